//! Boundary to the chat layer's stanza transport
//!
//! The engine never builds stanzas itself. Streamhost offers and results are
//! handed to a `Signaling` implementation, and the chat layer feeds the
//! peer's choice back in through [`TransferRegistry::activate`].
//!
//! [`TransferRegistry::activate`]: crate::TransferRegistry::activate

use crate::types::Candidate;

/// Outbound signaling used by the registry
pub trait Signaling {
    /// Offer our streamhosts to `peer` for `session_id`
    ///
    /// Returns the correlation id the peer's answer will carry.
    fn send_streamhost_offer(
        &mut self,
        peer: &str,
        session_id: &str,
        candidates: &[Candidate],
    ) -> String;

    /// Tell the initiator which of its streamhosts we connected through
    fn send_streamhost_result(&mut self, peer: &str, correlation_id: &str, chosen_label: &str);

    /// Tell the initiator that none of its streamhosts could be used
    fn send_streamhost_error(&mut self, _peer: &str, _correlation_id: &str) {}
}
