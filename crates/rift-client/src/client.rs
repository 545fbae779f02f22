//! Async client for the imposter Admin API.

use crate::api::{self, Endpoints, ImposterDetail, RecordedRequest};
use crate::config::ClientConfig;
use crate::definition::ImposterDefinition;
use crate::error::{Error, Result};
use crate::session::{ImposterSession, Lifecycle, OpenOptions, SessionState};
use futures::FutureExt;
use reqwest::Client;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// HTTP client for a Mountebank-compatible Admin API
#[derive(Debug, Clone)]
pub struct MountebankClient {
    client: Client,
    config: ClientConfig,
    endpoints: Endpoints,
}

impl MountebankClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder().build()?;
        Ok(Self::with_http_client(client, config))
    }

    /// Use a preconfigured `reqwest` client (proxies, TLS roots, ...)
    pub fn with_http_client(client: Client, config: ClientConfig) -> Self {
        let endpoints = Endpoints::new(&config.admin_url());
        Self {
            client,
            config,
            endpoints,
        }
    }

    pub fn from_admin_url(url: &str) -> Result<Self> {
        Self::new(ClientConfig::from_admin_url(url)?)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn admin_url(&self) -> &str {
        self.endpoints.admin()
    }

    /// Probe the Admin API with the configured retry budget
    pub async fn wait(&self) -> Result<()> {
        let wait = &self.config.wait;
        self.wait_with(wait.max_attempts, wait.interval()).await
    }

    /// Probe `GET /` until it answers 2xx, sleeping `interval` between
    /// attempts. Fails with [`Error::Setup`] once `max_attempts` are spent.
    pub async fn wait_with(&self, max_attempts: u32, interval: Duration) -> Result<()> {
        let attempts = max_attempts.max(1);
        let mut last_failure = String::new();

        for attempt in 1..=attempts {
            match self.probe().await {
                Ok(()) => {
                    debug!("Imposter server ready after {} attempt(s)", attempt);
                    return Ok(());
                }
                Err(reason) => {
                    debug!(
                        "Imposter server not ready (attempt {}/{}): {}",
                        attempt, attempts, reason
                    );
                    last_failure = reason;
                }
            }
            if attempt < attempts {
                tokio::time::sleep(interval).await;
            }
        }

        warn!(
            "Imposter server at {} not ready after {} attempt(s)",
            self.admin_url(),
            attempts
        );
        Err(Error::Setup {
            attempts,
            reason: last_failure,
        })
    }

    async fn probe(&self) -> std::result::Result<(), String> {
        let resp = self
            .client
            .get(self.endpoints.root())
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(format!("status {}", resp.status()))
        }
    }

    /// Register a definition, returning the port the imposter listens on
    pub async fn create_imposter(&self, definition: &ImposterDefinition) -> Result<u16> {
        let resp = self
            .client
            .post(self.endpoints.imposters())
            .json(definition)
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            error!(
                "Imposter server returned {}: {}",
                status,
                api::error_summary(&body).unwrap_or_else(|| body.clone())
            );
        }
        let port = api::created_port(status, &body)?;
        info!("Imposter created on port {}", port);
        Ok(port)
    }

    pub async fn get_imposter(&self, port: u16) -> Result<ImposterDetail> {
        let resp = self.client.get(self.endpoints.imposter(port)).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        api::imposter_detail(status, &body)
    }

    /// Requests recorded by the imposter on `port`, oldest first
    pub async fn requests(&self, port: u16) -> Result<Vec<RecordedRequest>> {
        Ok(self.get_imposter(port).await?.requests)
    }

    pub async fn delete_imposter(&self, port: u16) -> Result<()> {
        self.delete_imposter_within(port, None).await
    }

    /// Delete with an optional per-request timeout
    pub(crate) async fn delete_imposter_within(
        &self,
        port: u16,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let mut request = self.client.delete(self.endpoints.imposter(port));
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let resp = request.send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        api::deleted(port, status, &body)?;
        info!("Imposter on port {} deleted", port);
        Ok(())
    }

    /// Register `definition` and return the live session.
    ///
    /// Nothing is left on the server if this fails.
    pub async fn open(
        &self,
        mut definition: ImposterDefinition,
        options: OpenOptions,
    ) -> Result<ImposterSession> {
        let lifecycle = Lifecycle::new();
        if options.wait_first {
            self.wait().await?;
        }
        if let Some(port) = options.port {
            definition.set_port(port);
        }

        lifecycle.set(SessionState::Registering);
        let port = self.create_imposter(&definition).await?;
        Ok(ImposterSession::new(self.clone(), port, definition, lifecycle))
    }

    /// Run `scope` against a live imposter and delete the imposter afterwards.
    ///
    /// The imposter is deleted whether `scope` succeeds, fails or panics. A
    /// failed delete is returned only when `scope` succeeded; otherwise it is
    /// logged and the scope's own error (or panic) wins.
    ///
    /// ```no_run
    /// use rift_client::{ImposterDefinition, MountebankClient, OpenOptions};
    ///
    /// # async fn run() -> anyhow::Result<()> {
    /// let client = MountebankClient::from_admin_url("http://localhost:2525")?;
    /// let mut imposter = ImposterDefinition::new();
    /// imposter.add_stub("/test", "GET", "What I'm expecting");
    ///
    /// client
    ///     .mock_http(imposter, OpenOptions::default(), |session| async move {
    ///         let body = reqwest::get(format!("{}/test", session.url())).await?.text().await?;
    ///         assert_eq!(body, "What I'm expecting");
    ///         Ok::<_, anyhow::Error>(())
    ///     })
    ///     .await
    /// # }
    /// ```
    pub async fn mock_http<F, Fut, T, E>(
        &self,
        definition: ImposterDefinition,
        options: OpenOptions,
        scope: F,
    ) -> Result<T, E>
    where
        F: FnOnce(ImposterSession) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<Error>,
    {
        let session = self.open(definition, options).await?;
        let scoped = session.clone();
        let outcome = AssertUnwindSafe(async move { scope(scoped).await })
            .catch_unwind()
            .await;
        let teardown = session.close().await;

        // close() has already logged a failed delete
        match outcome {
            Ok(Ok(value)) => {
                teardown?;
                Ok(value)
            }
            Ok(Err(scope_error)) => Err(scope_error),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}
