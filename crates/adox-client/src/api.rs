//! Remote capability traits
//!
//! One trait per sub-client. Implementations either resolve records or fail
//! with an [`AdoxError`](adox_core::AdoxError) carrying the upstream status.
//! `top` is a hint: some endpoints ignore it and return everything.

use adox_core::{
    Agent, AgentPool, AgentQueue, Build, BuildArtifact, BuildQuery, Pipeline, PipelineArtifact,
    PipelineRun, Result, TimelineRecord,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

/// Remote payload body, yielded chunk by chunk
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Agent pools, agents and project queues
#[async_trait]
pub trait AgentApi: Send + Sync {
    async fn list_pools(&self, top: Option<usize>) -> Result<Vec<AgentPool>>;

    /// Agents registered in one pool; `agent_name` is an exact upstream filter
    async fn list_agents(
        &self,
        pool_id: i64,
        agent_name: Option<&str>,
        top: Option<usize>,
    ) -> Result<Vec<Agent>>;

    async fn list_queues(&self, project: &str, top: Option<usize>) -> Result<Vec<AgentQueue>>;
}

/// Builds, timelines, logs and build artifacts
#[async_trait]
pub trait BuildApi: Send + Sync {
    async fn list_builds(
        &self,
        project: &str,
        query: &BuildQuery,
        top: Option<usize>,
    ) -> Result<Vec<Build>>;

    async fn get_build(&self, project: &str, build_id: i64) -> Result<Build>;

    async fn get_timeline(&self, project: &str, build_id: i64) -> Result<Vec<TimelineRecord>>;

    async fn list_artifacts(&self, project: &str, build_id: i64) -> Result<Vec<BuildArtifact>>;

    /// Open one build log as a stream; fails before yielding if the log is unavailable
    async fn open_log(&self, project: &str, build_id: i64, log_id: i64) -> Result<ByteStream>;

    /// Open an authenticated download URL issued by the service
    async fn open_url(&self, url: &str) -> Result<ByteStream>;
}

/// YAML pipelines, runs and pipeline artifacts
#[async_trait]
pub trait PipelineApi: Send + Sync {
    async fn list_pipelines(&self, project: &str, top: Option<usize>) -> Result<Vec<Pipeline>>;

    async fn list_runs(
        &self,
        project: &str,
        pipeline_id: i64,
        top: Option<usize>,
    ) -> Result<Vec<PipelineRun>>;

    /// Resolve a run artifact with its signed download URL expanded
    async fn get_run_artifact(
        &self,
        project: &str,
        pipeline_id: i64,
        run_id: i64,
        artifact_name: &str,
    ) -> Result<PipelineArtifact>;

    /// Open a pre-signed URL (no credentials attached)
    async fn open_signed_url(&self, url: &str) -> Result<ByteStream>;
}
