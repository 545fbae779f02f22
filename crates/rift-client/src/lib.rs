//! Rift Client - configure Mountebank-compatible imposters from tests
//!
//! This crate drives the Admin API of Rift or Mountebank to stand up an
//! imposter in place of a real HTTP dependency, run a test against it, and
//! tear it down again.
//!
//! # Features
//!
//! - **Definition builder**: `equals` stubs on method and path, merged per key,
//!   always terminated by a catch-all `404`
//! - **Scoped sessions**: the imposter is deleted on every exit path
//! - **Readiness wait**: bounded retry against the Admin API before registering
//! - **Request history**: read back what the imposter recorded
//! - **Blocking API** (default `blocking` feature) for non-async tests
//!
//! # Example
//!
//! ```no_run
//! use rift_client::{ClientConfig, ImposterDefinition, MountebankClient, OpenOptions, StubSpec};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = MountebankClient::new(ClientConfig::new("localhost", 2525))?;
//!
//!     let mut imposter = ImposterDefinition::new();
//!     imposter
//!         .push(StubSpec::get("/health").body("starting").repeat(2))
//!         .add_stub("/health", "GET", "ok");
//!
//!     client
//!         .mock_http(imposter, OpenOptions::default(), |session| async move {
//!             let url = format!("{}/health", session.url());
//!             for expected in ["starting", "starting", "ok"] {
//!                 assert_eq!(reqwest::get(&url).await?.text().await?, expected);
//!             }
//!             assert_eq!(session.requests().await?.len(), 3);
//!             Ok::<_, anyhow::Error>(())
//!         })
//!         .await
//! }
//! ```

pub mod api;
#[cfg(feature = "blocking")]
pub mod blocking;
mod client;
pub mod config;
pub mod cycler;
pub mod definition;
mod error;
mod session;

pub use api::{ImposterDetail, RecordedRequest};
pub use client::MountebankClient;
pub use config::{ClientConfig, Scheme, WaitConfig};
pub use cycler::ResponseRotation;
pub use definition::{ImposterDefinition, Stub, StubResponse, StubSpec};
pub use error::{Error, Result};
pub use session::{ImposterSession, OpenOptions, SessionState};
