//! Host-keyed cache of open sessions
//!
//! A run issues dozens of commands against the same host; they all go through one
//! connected executor obtained from [`SessionCache::acquire`]. The cache is an ordinary
//! value owned by whoever drives the deployment, not process-global state.

use launchpad_core::{DeployResult, RemoteHost};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{RemoteExecutor, SshExecutor};

/// Creates an unconnected executor for a host
pub type ExecutorFactory =
    Arc<dyn Fn(&RemoteHost) -> DeployResult<Arc<dyn RemoteExecutor>> + Send + Sync>;

pub struct SessionCache {
    factory: ExecutorFactory,
    sessions: Mutex<HashMap<String, Arc<dyn RemoteExecutor>>>,
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionCache {
    /// Cache backed by OpenSSH sessions
    pub fn new() -> Self {
        Self::with_factory(Arc::new(|remote: &RemoteHost| {
            let executor = SshExecutor::new(remote.clone())?;
            Ok(Arc::new(executor) as Arc<dyn RemoteExecutor>)
        }))
    }

    pub fn with_factory(factory: ExecutorFactory) -> Self {
        Self {
            factory,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Connected executor for `remote`, opening the session on first use.
    ///
    /// A failed connect leaves nothing cached, so the next call retries.
    pub async fn acquire(&self, remote: &RemoteHost) -> DeployResult<Arc<dyn RemoteExecutor>> {
        let key = remote.cache_key();
        let mut sessions = self.sessions.lock().await;
        if let Some(executor) = sessions.get(&key) {
            debug!("Reusing session to {}", key);
            return Ok(executor.clone());
        }

        let executor = (self.factory)(remote)?;
        executor.connect().await?;
        sessions.insert(key, executor.clone());
        Ok(executor)
    }

    /// Close and forget the session to `remote`, if any
    pub async fn release(&self, remote: &RemoteHost) -> DeployResult<()> {
        let executor = self.sessions.lock().await.remove(&remote.cache_key());
        match executor {
            Some(executor) => executor.close().await,
            None => Ok(()),
        }
    }

    /// Close every cached session; failures are logged and do not stop the others
    pub async fn close_all(&self) {
        let sessions: Vec<_> = self.sessions.lock().await.drain().collect();
        for (key, executor) in sessions {
            if let Err(e) = executor.close().await {
                warn!("Failed to close session to {}: {}", key, e);
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}
