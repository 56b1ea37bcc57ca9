use std::fmt;

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// The transport call itself failed (DNS, connection reset, offline).
    #[error("network error: {0}")]
    Network(#[source] TransportError),
    /// Non-success HTTP status code with raw response body.
    #[error("http error {status}: {body}")]
    HttpStatus { status: u16, body: String },
    /// The deadline passed before the transport completed.
    #[error("request timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
    /// The caller canceled the request before it completed.
    #[error("request canceled")]
    Canceled,
    /// Every attempt allowed by the retry policy failed.
    #[error("retries exhausted after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        attempts: usize,
        /// Error produced by the final attempt.
        last: Box<RequestError>,
    },
    /// A bounded poll ran out of attempts without the predicate holding.
    #[error("poll condition not met after {attempts} attempt(s)")]
    ConditionNotMet {
        attempts: usize,
        last_status: Option<u16>,
    },
    /// The request spec or policy could not be turned into a transport call.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Response body decoding error.
    #[error("decode error: {0}")]
    Decode(String),
}

impl RequestError {
    /// HTTP status carried by this error, looking through retry wrappers.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            Self::RetriesExhausted { last, .. } => last.status(),
            Self::ConditionNotMet { last_status, .. } => *last_status,
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

/// Classification of a transport-level fault.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransportErrorKind {
    /// Connection could not be established.
    Connect,
    /// The transport's own socket-level timeout fired.
    Timeout,
    /// Sending the request failed after the connection was made.
    Request,
    /// The request could not be built (bad URL, bad header).
    Malformed,
    /// Reading the response body failed.
    Body,
    /// The call was aborted through its cancellation token.
    Aborted,
    /// Any fault the transport could not classify further.
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::Timeout => "timeout",
            Self::Request => "request",
            Self::Malformed => "malformed",
            Self::Body => "body",
            Self::Aborted => "aborted",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// Fault raised by a [`Transport`](crate::Transport) implementation.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Connect, message)
    }

    pub fn aborted() -> Self {
        Self::new(TransportErrorKind::Aborted, "request aborted")
    }

    /// Whether the same call may succeed if issued again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            TransportErrorKind::Connect
                | TransportErrorKind::Timeout
                | TransportErrorKind::Request
                | TransportErrorKind::Body
        )
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else if err.is_builder() {
            TransportErrorKind::Malformed
        } else if err.is_body() || err.is_decode() {
            TransportErrorKind::Body
        } else if err.is_request() {
            TransportErrorKind::Request
        } else {
            TransportErrorKind::Other
        };
        Self::new(kind, err.to_string())
    }
}
