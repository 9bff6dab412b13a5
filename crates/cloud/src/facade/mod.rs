//! The resource facade.
//!
//! Every cloud access in the workspace goes through [`Cloud`]. Each method is
//! one remote operation wrapped in the retrying executor with the backoff
//! profile its operation class calls for: reads and lists use `read`,
//! creates, updates and deletes use `write`, and waits on late-published
//! values use `poll`. Deletes treat an already-missing resource as success.

mod floating_ip;
mod image;
mod instance;
mod loadbalancer;
mod network;
mod port;
mod server_group;
mod tag;

use std::future::Future;
use std::sync::Arc;

use cumulus_core::{
    retry_call, retry_with_backoff, Attempt, BackoffPolicy, BackoffProfiles, Call, Result,
    ResultExt, Sleeper, TokioSleeper,
};

use crate::api::{ApiResult, CloudClients};

/// Cloud-wide behavior switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudSettings {
    /// Whether the cloud hands out floating IPs at all. When disabled, a
    /// server's fixed addresses stand in for its public ones.
    pub floating_ips_enabled: bool,
    /// Name of the network floating IPs are allocated from.
    pub external_network: Option<String>,
}

impl Default for CloudSettings {
    fn default() -> Self {
        Self {
            floating_ips_enabled: true,
            external_network: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Cloud {
    clients: CloudClients,
    backoff: BackoffProfiles,
    sleeper: Arc<dyn Sleeper>,
    settings: CloudSettings,
}

impl Cloud {
    /// Facade over `clients` sleeping on the tokio timer.
    #[must_use]
    pub fn new(clients: CloudClients, backoff: BackoffProfiles) -> Self {
        Self {
            clients,
            backoff,
            sleeper: Arc::new(TokioSleeper),
            settings: CloudSettings::default(),
        }
    }

    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: CloudSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub const fn settings(&self) -> &CloudSettings {
        &self.settings
    }

    #[must_use]
    pub const fn backoff(&self) -> &BackoffProfiles {
        &self.backoff
    }

    async fn read<T, F, Fut>(&self, call: &Call, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = ApiResult<T>> + Send,
    {
        self.run(&self.backoff.read, call, operation).await
    }

    async fn write<T, F, Fut>(&self, call: &Call, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = ApiResult<T>> + Send,
    {
        self.run(&self.backoff.write, call, operation).await
    }

    async fn delete<F, Fut>(&self, call: &Call, operation: F) -> Result<()>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = ApiResult<()>> + Send,
    {
        self.run(&self.backoff.write, call, operation)
            .await
            .not_found_as_none()
            .map(|_| ())
    }

    async fn poll<T, F, Fut>(&self, call: &Call, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<Attempt<T>>> + Send,
    {
        retry_with_backoff(&self.backoff.poll, self.sleeper.as_ref(), call, operation).await
    }

    async fn run<T, F, Fut>(&self, policy: &BackoffPolicy, call: &Call, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = ApiResult<T>> + Send,
    {
        retry_call(policy, self.sleeper.as_ref(), call, || {
            let fut = operation();
            async move { fut.await.map_err(|e| e.into_error(call)) }
        })
        .await
    }
}
