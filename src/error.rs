use std::fmt;

/// A convenient result type wrapping [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub struct LoadingError {
    pub entry: String,
    pub path: String,
}

#[derive(Debug)]
pub struct FormatError {
    pub context: &'static str,
    pub detail: String,
}

#[derive(Debug)]
pub struct RangeError {
    pub what: &'static str,
    pub min: [i64; 2],
    pub max: [i64; 2],
    pub size: u32,
}

#[derive(Debug)]
pub struct ChecksumError {
    pub expected: u64,
    pub found: u64,
}

impl fmt::Display for LoadingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Failed to load terrain entry {}! Attempted path: {}",
            self.entry, self.path
        )
    }
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Malformed terrain {}: {}", self.context, self.detail)
    }
}

impl fmt::Display for RangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}, {}]..[{}, {}] is outside of a {}x{} grid",
            self.what, self.min[0], self.min[1], self.max[0], self.max[1], self.size, self.size
        )
    }
}

impl fmt::Display for ChecksumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Terrain checksum mismatch! Expected {:#018x}, found {:#018x}",
            self.expected, self.found
        )
    }
}

impl std::error::Error for LoadingError {}

impl std::error::Error for FormatError {}

impl std::error::Error for RangeError {}

impl std::error::Error for ChecksumError {}

#[derive(Debug)]
pub enum Error {
    LoadingError(LoadingError),
    FormatError(FormatError),
    OutOfRange(RangeError),
    ChecksumMismatch(ChecksumError),
    NotLoaded(),
    ReadOnly(),
}

impl Error {
    pub(crate) fn format(context: &'static str, detail: impl Into<String>) -> Self {
        Error::FormatError(FormatError {
            context,
            detail: detail.into(),
        })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::LoadingError(err) => err.fmt(f),
            Error::FormatError(err) => err.fmt(f),
            Error::OutOfRange(err) => err.fmt(f),
            Error::ChecksumMismatch(err) => err.fmt(f),
            Error::NotLoaded() => write!(f, "Terrain block has no loaded terrain file!"),
            Error::ReadOnly() => write!(f, "Dependent terrain blocks cannot be edited!"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::LoadingError(err) => Some(err),
            Error::FormatError(err) => Some(err),
            Error::OutOfRange(err) => Some(err),
            Error::ChecksumMismatch(err) => Some(err),
            Error::NotLoaded() | Error::ReadOnly() => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::LoadingError(LoadingError {
            entry: "IO Loading Error".to_string(),
            path: value.to_string(),
        })
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::LoadingError(LoadingError {
            entry: "JSON FILE".to_string(),
            path: value.to_string(),
        })
    }
}
