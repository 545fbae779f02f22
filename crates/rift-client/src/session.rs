//! Imposter sessions: a registered definition and its remote lifetime.
//!
//! A session moves through
//! `Unopened -> Registering -> Live -> TearingDown -> Closed`. Only a `Live`
//! session answers [`ImposterSession::requests`], and the move out of `Live`
//! happens exactly once, so an imposter is deleted at most once no matter how
//! many handles to the session exist.

use crate::api::RecordedRequest;
use crate::client::MountebankClient;
use crate::definition::ImposterDefinition;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, error, warn};

/// Upper bound on the delete sent when a live session is dropped
const DROP_TEARDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Where a session is in its lifetime.
///
/// `Unopened` and `Registering` only exist inside `open`: a session handle is
/// returned once registration succeeded, so callers see `Live`, `TearingDown`
/// and `Closed`. The earlier states show up in debug logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unopened,
    Registering,
    Live,
    TearingDown,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Unopened => "unopened",
            SessionState::Registering => "registering",
            SessionState::Live => "live",
            SessionState::TearingDown => "tearing down",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// How to open a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOptions {
    /// Fixed imposter port; the server picks one when `None`
    pub port: Option<u16>,
    /// Probe the Admin API until it answers before registering
    pub wait_first: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            port: None,
            wait_first: true,
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn wait_first(mut self, wait_first: bool) -> Self {
        self.wait_first = wait_first;
        self
    }
}

/// State cell shared by every handle to one session
#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: Mutex<SessionState>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::Unopened),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub(crate) fn set(&self, next: SessionState) {
        let mut state = self.state.lock();
        debug!("Imposter session {} -> {}", *state, next);
        *state = next;
    }

    pub(crate) fn ensure_live(&self, operation: &str) -> Result<()> {
        match self.state() {
            SessionState::Live => Ok(()),
            other => Err(Error::Usage(format!(
                "cannot {operation}: imposter session is {other}"
            ))),
        }
    }

    /// Move `Live -> TearingDown`. Returns false if another caller already did.
    pub(crate) fn begin_teardown(&self) -> bool {
        let mut state = self.state.lock();
        if *state != SessionState::Live {
            return false;
        }
        *state = SessionState::TearingDown;
        true
    }
}

pub(crate) fn log_teardown_failure(port: u16, err: &Error) {
    error!("Unable to delete imposter on port {}: {}", port, err);
}

/// A live imposter registered through the async [`MountebankClient`].
///
/// Cloning yields another handle to the same imposter. Call
/// [`close`](Self::close) to delete it and observe the result. A session
/// still live when its last handle drops is deleted before the drop returns;
/// a failure there can only be logged.
#[derive(Debug, Clone)]
pub struct ImposterSession {
    inner: Arc<SessionInner>,
}

#[derive(Debug)]
struct SessionInner {
    client: MountebankClient,
    port: u16,
    url: String,
    definition: ImposterDefinition,
    lifecycle: Lifecycle,
}

impl ImposterSession {
    pub(crate) fn new(
        client: MountebankClient,
        port: u16,
        definition: ImposterDefinition,
        lifecycle: Lifecycle,
    ) -> Self {
        let url = client.config().imposter_url(port);
        lifecycle.set(SessionState::Live);
        Self {
            inner: Arc::new(SessionInner {
                client,
                port,
                url,
                definition,
                lifecycle,
            }),
        }
    }

    /// Port the imposter listens on
    pub fn port(&self) -> u16 {
        self.inner.port
    }

    /// Base URL of the imposter, e.g. `http://localhost:4545`
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// The definition as it was registered
    pub fn definition(&self) -> &ImposterDefinition {
        &self.inner.definition
    }

    pub fn state(&self) -> SessionState {
        self.inner.lifecycle.state()
    }

    /// Requests the imposter has recorded so far, oldest first
    pub async fn requests(&self) -> Result<Vec<RecordedRequest>> {
        self.inner.lifecycle.ensure_live("read recorded requests")?;
        self.inner.client.requests(self.inner.port).await
    }

    /// Delete the imposter. The session is closed afterwards even if the
    /// delete fails.
    pub async fn close(&self) -> Result<()> {
        let inner = &self.inner;
        if !inner.lifecycle.begin_teardown() {
            return Err(Error::Usage(format!(
                "imposter session on port {} is already {}",
                inner.port,
                inner.lifecycle.state()
            )));
        }
        let result = inner.client.delete_imposter(inner.port).await;
        inner.lifecycle.set(SessionState::Closed);
        if let Err(ref e) = result {
            log_teardown_failure(inner.port, e);
        }
        result
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if !self.lifecycle.begin_teardown() {
            return;
        }
        warn!(
            "Imposter session on port {} dropped while live, deleting",
            self.port
        );
        let result = delete_on_drop(&self.client, self.port);
        self.lifecycle.set(SessionState::Closed);
        if let Err(e) = result {
            log_teardown_failure(self.port, &e);
        }
    }
}

/// Delete the imposter before `drop` returns.
///
/// A multi-thread runtime lends the current worker to the delete. Anywhere
/// else (current-thread runtime, no runtime) the delete runs on a scratch
/// thread with its own runtime and a client built from the same config, and
/// the caller waits for it. On a current-thread runtime that also hosts the
/// Admin API the delete can only time out; call
/// [`close`](ImposterSession::close) there instead.
fn delete_on_drop(client: &MountebankClient, port: u16) -> Result<()> {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(|| {
                handle.block_on(client.delete_imposter_within(port, Some(DROP_TEARDOWN_TIMEOUT)))
            })
        }
        _ => {
            let config = client.config().clone();
            std::thread::spawn(move || -> Result<()> {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()?;
                let client = MountebankClient::new(config)?;
                runtime.block_on(client.delete_imposter_within(port, Some(DROP_TEARDOWN_TIMEOUT)))
            })
            .join()
            .unwrap_or_else(|_| {
                Err(Error::Usage(format!(
                    "teardown of imposter on port {port} panicked"
                )))
            })
        }
    }
}
