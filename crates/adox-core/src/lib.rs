//! # adox-core
//!
//! Core types for adox, the query and download layer that sits between a
//! tool-calling front end and the Azure DevOps REST API.
//!
//! ## Contents
//!
//! - [`Envelope`]: the success/failure wrapper every operation returns
//! - [`classify`]: maps raw failures into the closed [`ErrorKind`] taxonomy
//! - Record types for pools, agents, queues, builds, timelines and artifacts
//! - [`AdoxConfig`]: `.adox/config.toml` loading with environment overrides

pub mod config;
mod envelope;
mod error;
mod types;

pub use config::{AdoxConfig, DownloadConfig, FanOutConfig, PagingConfig};
pub use envelope::{classify, ClassifiedError, Envelope, ErrorKind, OperationContext};
pub use error::{AdoxError, Result};
pub use types::*;
