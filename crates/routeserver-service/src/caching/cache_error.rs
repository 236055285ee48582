use thiserror::Error;

/// An error that happens when loading an object into a cache.
///
/// Errors are shared among all callers waiting for the same load, but never cached: the next
/// lookup of the same key tries again.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The object does not exist in the store.
    #[error("not found")]
    NotFound,
    /// The object was retrieved successfully, but could not be decoded.
    ///
    /// The attached string contains the decoder's complaint.
    #[error("malformed: {0}")]
    Malformed(String),
    /// The object could not be retrieved due to an I/O or transport problem.
    #[error("loading failed: {0}")]
    LoadFailed(String),
    /// An unexpected error in the server itself, such as a panicking loader.
    #[error("internal error")]
    InternalError,
}

impl From<std::io::Error> for CacheError {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        Self::from_std_error(err)
    }
}

impl From<serde_json::Error> for CacheError {
    #[track_caller]
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

impl CacheError {
    #[track_caller]
    pub fn from_std_error<E: std::error::Error + 'static>(e: E) -> Self {
        let dynerr: &dyn std::error::Error = &e; // tracing expects a `&dyn Error`
        tracing::error!(error = dynerr);
        Self::InternalError
    }

    /// A short name of the variant, used as metrics tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound => "notfound",
            Self::Malformed(_) => "malformed",
            Self::LoadFailed(_) => "loadfailed",
            Self::InternalError => "internalerror",
        }
    }
}

/// An entry in a cache, containing either `Ok(T)` or an error denoting the reason why an
/// object could not be loaded.
pub type CacheEntry<T = ()> = Result<T, CacheError>;

/// A cache was configured without room for a single entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cache `{name}` must have a capacity of at least 1")]
pub struct CapacityError {
    pub name: &'static str,
}
