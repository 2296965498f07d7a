use thiserror::Error;

/// Failure conditions surfaced while sending a message and consuming its stream.
#[derive(Debug, Error)]
pub enum ChatError {
    /// No session token is stored; the request was never sent.
    #[error("no session token is present")]
    Unauthenticated,

    /// The backend rejected the session token.
    #[error("the session token was rejected by the backend")]
    SessionExpired,

    /// A single `data:` record could not be decoded. Never fatal to a stream.
    #[error("malformed stream record: {source}")]
    MalformedRecord {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    /// Transport failure while opening or reading the stream.
    #[error("network failure: {0}")]
    NetworkFailure(String),

    /// The backend sent an explicit `error` event.
    #[error("backend error: {0}")]
    BackendError(String),
}

impl ChatError {
    /// True for conditions that send the user back to the login screen.
    pub fn requires_login(&self) -> bool {
        matches!(self, ChatError::Unauthenticated | ChatError::SessionExpired)
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::NetworkFailure(err.to_string())
    }
}
