//! Attestation service sessions.
//!
//! A [`Session`] is opened once per policy run and released exactly once:
//! either explicitly through [`Session::close`], or, if the owner is dropped
//! early (panic, cancelled future), by a background task spawned from `Drop`.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::client::AttestationService;
use crate::error::RunError;

pub struct Session {
    service: Arc<dyn AttestationService>,
    id: String,
    released: bool,
}

impl Session {
    /// Opens a session. Failure here is fatal for the run.
    pub async fn open(service: Arc<dyn AttestationService>) -> Result<Self, RunError> {
        let id = service
            .open_session()
            .await
            .map_err(RunError::SessionOpen)?;
        info!(session = %id, service = service.base_url(), "opened attestation session");
        Ok(Self {
            service,
            id,
            released: false,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Releases the session. Close failures are logged and swallowed.
    pub async fn close(mut self) {
        self.released = true;
        close_quietly(self.service.as_ref(), &self.id).await;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let service = Arc::clone(&self.service);
        let id = std::mem::take(&mut self.id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(session = %id, "session dropped without close, releasing in background");
                handle.spawn(async move {
                    close_quietly(service.as_ref(), &id).await;
                });
            }
            Err(_) => {
                warn!(session = %id, "session dropped outside a runtime and was not released");
            }
        }
    }
}

async fn close_quietly(service: &dyn AttestationService, id: &str) {
    match service.close_session(id).await {
        Ok(()) => debug!(session = %id, "closed attestation session"),
        Err(e) => warn!(session = %id, error = %e, "failed to close attestation session"),
    }
}
