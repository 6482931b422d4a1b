//! Error types for cluster authentication

/// Errors from the token acquisition path.
///
/// `Clone` because a single refresh outcome is fanned out to every caller
/// waiting on the same in-flight refresh.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Network-level failure talking to the authorization endpoint,
    /// including timeouts.
    #[error("authorization request failed: {0}")]
    Transport(String),

    /// The authorization endpoint did not produce a usable redirect. Covers
    /// both a non-302 reply and a 302 with a missing or unreadable Location.
    #[error("expected a login redirect, got status {status} with no usable Location")]
    NoLocation { status: u16 },

    /// The redirect Location did not carry a valid token.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The refresh task went away without reporting an outcome. Waiters see
    /// this instead of blocking forever.
    #[error("token refresh aborted before completing")]
    RefreshInterrupted,
}

/// Failures extracting token material from a redirect Location.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("redirect location carries no access_token parameter")]
    MissingToken,

    #[error("redirect location carries no expires_in parameter")]
    MissingExpiry,

    #[error("expires_in value {0:?} is not an integer")]
    MalformedExpiry(String),
}

/// Result alias for authentication operations.
pub type Result<T> = std::result::Result<T, Error>;
