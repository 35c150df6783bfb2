pub enum Error {
    InvalidArgument(String),
    NotFound(String),
    StorageCorrupted(String),
    AuthRequired,
    NotImplemented(&'static str),
    UnsupportedApiVersion(u32),
    Io(std::io::Error),
    Index(rusqlite::Error),
    IndexViolation(String),
    Http(reqwest::Error),
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::Index(e)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e)
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidArgument(m) => write!(f, "InvalidArgument({})", m),
            Error::NotFound(m) => write!(f, "NotFound({})", m),
            Error::StorageCorrupted(m) => write!(f, "StorageCorrupted({})", m),
            Error::AuthRequired => write!(f, "AuthRequired"),
            Error::NotImplemented(m) => write!(f, "NotImplemented({})", m),
            Error::UnsupportedApiVersion(v) => write!(f, "UnsupportedApiVersion({:#x})", v),
            Error::Io(e) => write!(f, "Io({:?})", e),
            Error::Index(e) => write!(f, "Index({:?})", e),
            Error::IndexViolation(m) => write!(f, "IndexViolation({})", m),
            Error::Http(e) => write!(f, "Http({:?})", e),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidArgument(m) => write!(f, "invalid argument: {}", m),
            Error::NotFound(m) => write!(f, "not found: {}", m),
            Error::StorageCorrupted(m) => write!(f, "storage corrupted: {}", m),
            Error::AuthRequired => {
                write!(f, "repository is encrypted but no key has been set")
            }
            Error::NotImplemented(m) => write!(f, "not implemented: {}", m),
            Error::UnsupportedApiVersion(v) => {
                write!(f, "unsupported api version {:#x}", v)
            }
            Error::Io(e) => write!(f, "i/o error: {}", e),
            Error::Index(e) => write!(f, "index error: {}", e),
            Error::IndexViolation(m) => write!(f, "index error: {}", m),
            Error::Http(e) => write!(f, "http error: {}", e),
        }
    }
}
