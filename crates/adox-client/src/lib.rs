//! # adox-client
//!
//! Remote capability boundary for adox.
//!
//! - [`AgentApi`], [`BuildApi`], [`PipelineApi`]: async traits, one per sub-client
//! - [`HttpDevOpsClient`]: reqwest implementation against the Azure DevOps REST API
//! - [`MockDevOpsApi`]: in-memory implementation with failure injection
//! - [`Connection`]: the sub-clients bundled once and passed explicitly

mod api;
mod auth;
mod http;
pub mod mock;
mod session;

pub use api::{AgentApi, BuildApi, ByteStream, PipelineApi};
pub use auth::{get_auth_token, EXT_PAT_ENV};
pub use http::HttpDevOpsClient;
pub use mock::MockDevOpsApi;
pub use session::Connection;
