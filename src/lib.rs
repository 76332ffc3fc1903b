//! Courier - multi-channel conversation orchestration
//!
//! Facade over [`courier_core`] and [`courier_channels`]: layered
//! configuration, tracing setup and bootstrap of the enabled channels.
//!
//! ```no_run
//! # async fn run() -> anyhow::Result<()> {
//! let config = courier::config::load_config()?;
//! let _guard = courier::telemetry::init_tracing(&config.logging)?;
//! let app = courier::bootstrap(&config, std::sync::Arc::new(courier_core::InMemoryStore::new()))?;
//! # let _ = app;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod bootstrap;
pub mod config;
pub mod telemetry;

pub use bootstrap::{bootstrap, build_registry, Courier};
pub use config::{load_config, AppConfig};

pub use courier_channels;
pub use courier_core;
