use thiserror::Error;

/// Failure taxonomy for one resolution attempt.
///
/// `Unavailable` is the upstream saying no (a normal, user-facing outcome).
/// `Protocol` means the upstream answered with something we cannot accept.
/// `Http`/`Io` are transport failures; only a site resolver's candidate
/// loop is allowed to swallow those while trying the next fallback URL.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("{0}")]
    Unavailable(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),
}

impl ResolveError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Io(_))
    }

    /// True for outcomes an operator should read as "the site said no",
    /// as opposed to our integration being broken.
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

pub type ResolveResult<T> = Result<T, ResolveError>;
