use crate::{RemoteError, RemoteResponse, Session};
use condor_schema::MirrorUrl;
use std::sync::Arc;

/// An upstream channel: a base URL plus the session used to reach it.
///
/// Transport failures are reported against the base URL rather than the
/// individual file, so callers can tell the user which upstream is down.
#[derive(Clone)]
pub struct RemoteRepository {
    base: MirrorUrl,
    session: Arc<dyn Session>,
}

impl RemoteRepository {
    pub fn new(base: MirrorUrl, session: Arc<dyn Session>) -> Self {
        Self { base, session }
    }

    pub fn base(&self) -> &MirrorUrl {
        &self.base
    }

    /// Absolute URL for a channel-relative path.
    pub fn url(&self, path: &str) -> String {
        self.base.join(path)
    }

    /// GET `path` and return the response whatever its status.
    pub fn fetch(&self, path: &str) -> Result<RemoteResponse, RemoteError> {
        let url = self.url(path);
        self.session.get(&url).map_err(|e| match e {
            RemoteError::Unavailable { reason, .. } => RemoteError::Unavailable {
                url: self.base.to_string(),
                reason,
            },
            other => other,
        })
    }

    /// GET `path`, treating any non-2xx status as an error.
    pub fn open(&self, path: &str) -> Result<RemoteResponse, RemoteError> {
        let resp = self.fetch(path)?;
        if resp.is_success() {
            return Ok(resp);
        }
        let url = self.url(path);
        tracing::debug!("upstream returned HTTP {} for {url}", resp.status);
        if resp.status == 404 {
            Err(RemoteError::NotFound(url))
        } else {
            Err(RemoteError::Status {
                url,
                code: resp.status,
            })
        }
    }

    pub fn fetch_bytes(&self, path: &str) -> Result<Vec<u8>, RemoteError> {
        self.open(path)?.into_bytes()
    }
}

impl std::fmt::Debug for RemoteRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteRepository")
            .field("base", &self.base)
            .finish_non_exhaustive()
    }
}
