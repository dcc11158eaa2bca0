use crate::config::NetworkConfig;
use crate::net::{host_of, NetworkFailure};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Global and per-host concurrency bounds
#[derive(Debug)]
pub struct HostLimiter {
    global: Arc<Semaphore>,
    per_host: usize,
    hosts: Mutex<HashMap<String, Arc<Semaphore>>>,
}

/// Held for the duration of one request
#[derive(Debug)]
pub struct HostPermit {
    _host: OwnedSemaphorePermit,
    _global: OwnedSemaphorePermit,
}

impl HostLimiter {
    #[must_use]
    pub fn new(max_concurrent: usize, max_per_host: usize) -> Self {
        Self {
            global: Arc::new(Semaphore::new(max_concurrent.max(1))),
            per_host: max_per_host.max(1),
            hosts: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn from_config(config: &NetworkConfig) -> Self {
        Self::new(config.max_concurrent, config.max_per_host)
    }

    fn host_semaphore(&self, host: &str) -> Arc<Semaphore> {
        let mut hosts = self
            .hosts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(
            hosts
                .entry(host.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.per_host))),
        )
    }

    /// Wait for a slot for `url`
    ///
    /// The host slot is taken first so a request queued behind a busy host
    /// does not hold a global slot.
    pub async fn acquire(&self, url: &str) -> Result<HostPermit, NetworkFailure> {
        let host = host_of(url)?;
        let closed = |_| NetworkFailure::Connection("request limiter closed".to_string());

        let host_permit = self.host_semaphore(&host).acquire_owned().await.map_err(closed)?;
        let global_permit = Arc::clone(&self.global).acquire_owned().await.map_err(closed)?;

        Ok(HostPermit {
            _host: host_permit,
            _global: global_permit,
        })
    }

    #[must_use]
    pub fn available_global(&self) -> usize {
        self.global.available_permits()
    }
}
