//! Error categories for file operations during a transfer
//!
//! File I/O failures are fatal to a transfer and are never retried. The
//! engine maps the underlying `io::Error` to one of these categories so the
//! chat layer can show a readable reason.

use std::fmt;
use std::io;

/// Category of a file I/O failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileErrorKind {
    /// The file could not be opened or written for lack of permission
    Permission,

    /// The destination file system is full
    NoSpace,

    /// The path names a directory
    IsDirectory,

    /// The source file does not exist
    NotFound,

    /// The file ended before its declared size
    Truncated,

    /// Any other I/O failure
    Other,
}

impl FileErrorKind {
    /// Classify an I/O error
    #[must_use]
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied | io::ErrorKind::ReadOnlyFilesystem => {
                Self::Permission
            }
            io::ErrorKind::StorageFull => Self::NoSpace,
            io::ErrorKind::IsADirectory => Self::IsDirectory,
            io::ErrorKind::NotFound => Self::NotFound,
            io::ErrorKind::UnexpectedEof => Self::Truncated,
            _ => Self::Other,
        }
    }

    /// Short machine-readable name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Permission => "permission",
            Self::NoSpace => "no_space",
            Self::IsDirectory => "is_directory",
            Self::NotFound => "not_found",
            Self::Truncated => "truncated",
            Self::Other => "io_error",
        }
    }

    /// Human-readable message shown to the user
    #[must_use]
    pub fn message(&self) -> &'static str {
        match self {
            Self::Permission => "Permission denied",
            Self::NoSpace => "No space left on device",
            Self::IsDirectory => "Path is a directory",
            Self::NotFound => "File not found",
            Self::Truncated => "File is shorter than expected",
            Self::Other => "File input/output error",
        }
    }
}

impl fmt::Display for FileErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&io::Error> for FileErrorKind {
    fn from(err: &io::Error) -> Self {
        Self::from_io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io() {
        let err = io::Error::from(io::ErrorKind::PermissionDenied);
        assert_eq!(FileErrorKind::from_io(&err), FileErrorKind::Permission);

        let err = io::Error::from(io::ErrorKind::NotFound);
        assert_eq!(FileErrorKind::from_io(&err), FileErrorKind::NotFound);

        let err = io::Error::from(io::ErrorKind::UnexpectedEof);
        assert_eq!(FileErrorKind::from_io(&err), FileErrorKind::Truncated);

        let err = io::Error::from(io::ErrorKind::StorageFull);
        assert_eq!(FileErrorKind::from_io(&err), FileErrorKind::NoSpace);

        let err = io::Error::other("boom");
        assert_eq!(FileErrorKind::from_io(&err), FileErrorKind::Other);
    }

    #[test]
    fn test_as_str() {
        assert_eq!(FileErrorKind::Permission.as_str(), "permission");
        assert_eq!(FileErrorKind::NoSpace.as_str(), "no_space");
        assert_eq!(FileErrorKind::IsDirectory.as_str(), "is_directory");
        assert_eq!(FileErrorKind::Truncated.as_str(), "truncated");
    }

    #[test]
    fn test_display_matches_as_str() {
        assert_eq!(format!("{}", FileErrorKind::NotFound), "not_found");
        assert_eq!(format!("{}", FileErrorKind::Other), "io_error");
    }

    #[test]
    fn test_messages_are_distinct() {
        let kinds = [
            FileErrorKind::Permission,
            FileErrorKind::NoSpace,
            FileErrorKind::IsDirectory,
            FileErrorKind::NotFound,
            FileErrorKind::Truncated,
            FileErrorKind::Other,
        ];
        let mut seen = std::collections::HashSet::new();
        for kind in kinds {
            assert!(seen.insert(kind.message()), "duplicate message for {kind}");
        }
    }
}
