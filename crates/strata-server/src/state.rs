use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use strata_core::config::ServerConfig;
use strata_core::session::SessionResources;

/// Shared server state, cloned into every connection thread.
#[derive(Clone)]
pub struct ServerState {
    inner: Arc<Inner>,
}

struct Inner {
    resources: SessionResources,

    /// Per-client session mutexes. Two connections from the same logical
    /// client run one after the other; different clients never contend.
    client_locks: Mutex<HashMap<u32, Arc<Mutex<()>>>>,
}

impl ServerState {
    pub fn new(resources: SessionResources) -> Self {
        ServerState {
            inner: Arc::new(Inner {
                resources,
                client_locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn resources(&self) -> &SessionResources {
        &self.inner.resources
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.resources.config
    }

    /// Hand out the session mutex for one client. The registry lock is
    /// held only for the map access, never across a session.
    pub fn client_lock(&self, client_id: u32) -> Arc<Mutex<()>> {
        let mut locks = self
            .inner
            .client_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        locks.entry(client_id).or_default().clone()
    }
}
