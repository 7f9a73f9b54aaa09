//! Upstream repository access for condor proxy and mirror channels.
//!
//! A [`Session`] performs exactly one GET per call: no retries, no caching.
//! [`HttpSession`](http::HttpSession) is the `ureq`-backed implementation;
//! [`RemoteRepository`] binds a session to one upstream base URL and turns
//! connection failures into [`RemoteError::Unavailable`] naming that URL.

pub mod config;
pub mod http;
pub mod repository;

pub use config::RemoteConfig;
pub use http::HttpSession;
pub use repository::RemoteRepository;

use std::io::Read;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote channel {url} unavailable: {reason}")]
    Unavailable { url: String, reason: String },
    #[error("remote file not found: {0}")]
    NotFound(String),
    #[error("HTTP {code} for {url}")]
    Status { url: String, code: u16 },
    #[error("remote I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RemoteError {
    /// Upstream HTTP status to pass through to clients, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            RemoteError::NotFound(_) => Some(404),
            RemoteError::Status { code, .. } => Some(*code),
            RemoteError::Unavailable { .. } | RemoteError::Io(_) => None,
        }
    }
}

/// Response to a single upstream GET.
pub struct RemoteResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Box<dyn Read + Send>,
}

impl RemoteResponse {
    pub fn new(status: u16, body: Box<dyn Read + Send>) -> Self {
        Self {
            status,
            content_type: None,
            body,
        }
    }

    /// A response with no body, as produced for upstream error statuses.
    pub fn empty(status: u16) -> Self {
        Self::new(status, Box::new(std::io::empty()))
    }

    pub fn from_bytes(status: u16, data: Vec<u8>) -> Self {
        Self::new(status, Box::new(std::io::Cursor::new(data)))
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn into_bytes(mut self) -> Result<Vec<u8>, RemoteError> {
        let mut body = Vec::new();
        self.body.read_to_end(&mut body)?;
        Ok(body)
    }
}

impl std::fmt::Debug for RemoteResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteResponse")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// One-shot GET transport.
pub trait Session: Send + Sync {
    /// Fetch `url`. Upstream error statuses are returned as responses;
    /// only transport failures (DNS, refused connection, timeout) are errors.
    fn get(&self, url: &str) -> Result<RemoteResponse, RemoteError>;
}
