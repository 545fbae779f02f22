//! Blocking client, for tests that do not run inside an async runtime.
//!
//! Built on `reqwest::blocking`, so it must not be called from within a
//! Tokio runtime. [`ImposterSession`] here is an RAII guard: dropping a live
//! session deletes the imposter before the drop returns.

use crate::api::{self, Endpoints, ImposterDetail, RecordedRequest};
use crate::config::ClientConfig;
use crate::definition::ImposterDefinition;
use crate::error::{Error, Result};
use crate::session::{log_teardown_failure, Lifecycle, OpenOptions, SessionState};
use reqwest::blocking::Client;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Blocking HTTP client for a Mountebank-compatible Admin API
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
        let endpoints = Endpoints::new(&config.admin_url());
        Ok(Self {
            client,
            config,
            endpoints,
        })
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

    pub fn wait(&self) -> Result<()> {
        let wait = &self.config.wait;
        self.wait_with(wait.max_attempts, wait.interval())
    }

    /// Probe `GET /` until it answers 2xx, blocking the thread for
    /// `interval` between attempts.
    pub fn wait_with(&self, max_attempts: u32, interval: Duration) -> Result<()> {
        let attempts = max_attempts.max(1);
        let mut last_failure = String::new();

        for attempt in 1..=attempts {
            match self.probe() {
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
                std::thread::sleep(interval);
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

    fn probe(&self) -> std::result::Result<(), String> {
        let resp = self
            .client
            .get(self.endpoints.root())
            .send()
            .map_err(|e| e.to_string())?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(format!("status {}", resp.status()))
        }
    }

    pub fn create_imposter(&self, definition: &ImposterDefinition) -> Result<u16> {
        let resp = self
            .client
            .post(self.endpoints.imposters())
            .json(definition)
            .send()?;
        let status = resp.status();
        let body = resp.text()?;

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

    pub fn get_imposter(&self, port: u16) -> Result<ImposterDetail> {
        let resp = self.client.get(self.endpoints.imposter(port)).send()?;
        let status = resp.status();
        let body = resp.text()?;
        api::imposter_detail(status, &body)
    }

    pub fn requests(&self, port: u16) -> Result<Vec<RecordedRequest>> {
        Ok(self.get_imposter(port)?.requests)
    }

    pub fn delete_imposter(&self, port: u16) -> Result<()> {
        let resp = self.client.delete(self.endpoints.imposter(port)).send()?;
        let status = resp.status();
        let body = resp.text()?;
        api::deleted(port, status, &body)?;
        info!("Imposter on port {} deleted", port);
        Ok(())
    }

    pub fn open(
        &self,
        mut definition: ImposterDefinition,
        options: OpenOptions,
    ) -> Result<ImposterSession> {
        let lifecycle = Lifecycle::new();
        if options.wait_first {
            self.wait()?;
        }
        if let Some(port) = options.port {
            definition.set_port(port);
        }

        lifecycle.set(SessionState::Registering);
        let port = self.create_imposter(&definition)?;
        lifecycle.set(SessionState::Live);
        Ok(ImposterSession {
            client: self.clone(),
            url: self.config.imposter_url(port),
            port,
            definition,
            lifecycle,
        })
    }

    /// Run `scope` against a live imposter and delete the imposter afterwards.
    ///
    /// Same guarantees as the async
    /// [`mock_http`](crate::MountebankClient::mock_http).
    ///
    /// ```no_run
    /// use rift_client::blocking::MountebankClient;
    /// use rift_client::{ImposterDefinition, OpenOptions};
    ///
    /// # fn run() -> anyhow::Result<()> {
    /// let client = MountebankClient::from_admin_url("http://localhost:2525")?;
    /// let mut imposter = ImposterDefinition::new();
    /// imposter.add_stub("/test", "GET", "What I'm expecting");
    ///
    /// client.mock_http(imposter, OpenOptions::default(), |session| {
    ///     let body = reqwest::blocking::get(format!("{}/test", session.url()))?.text()?;
    ///     assert_eq!(body, "What I'm expecting");
    ///     Ok::<_, anyhow::Error>(())
    /// })
    /// # }
    /// ```
    pub fn mock_http<F, T, E>(
        &self,
        definition: ImposterDefinition,
        options: OpenOptions,
        scope: F,
    ) -> Result<T, E>
    where
        F: FnOnce(&ImposterSession) -> Result<T, E>,
        E: From<Error>,
    {
        let session = self.open(definition, options)?;
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| scope(&session)));
        let teardown = session.close();

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

/// A live imposter registered through the blocking [`MountebankClient`]
#[derive(Debug)]
pub struct ImposterSession {
    client: MountebankClient,
    url: String,
    port: u16,
    definition: ImposterDefinition,
    lifecycle: Lifecycle,
}

impl ImposterSession {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn definition(&self) -> &ImposterDefinition {
        &self.definition
    }

    pub fn state(&self) -> SessionState {
        self.lifecycle.state()
    }

    pub fn requests(&self) -> Result<Vec<RecordedRequest>> {
        self.lifecycle.ensure_live("read recorded requests")?;
        self.client.requests(self.port)
    }

    /// Delete the imposter. The session is closed afterwards even if the
    /// delete fails.
    pub fn close(&self) -> Result<()> {
        if !self.lifecycle.begin_teardown() {
            return Err(Error::Usage(format!(
                "imposter session on port {} is already {}",
                self.port,
                self.lifecycle.state()
            )));
        }
        let result = self.client.delete_imposter(self.port);
        self.lifecycle.set(SessionState::Closed);
        if let Err(ref e) = result {
            log_teardown_failure(self.port, e);
        }
        result
    }
}

impl Drop for ImposterSession {
    fn drop(&mut self) {
        if self.lifecycle.state() == SessionState::Live {
            // close() logs the failure; there is no caller left to return it to
            let _ = self.close();
        }
    }
}
