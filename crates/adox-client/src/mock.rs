//! In-memory backend for tests and offline runs
//!
//! Seeded through builder methods. Failures are injected per key with a status
//! code, e.g. `"pool:7"` → 403 makes `list_agents(7, ..)` fail with 403.
//!
//! Failure keys: `pools`, `pool:{id}`, `queues:{project}`, `builds:{project}`,
//! `build:{id}`, `timeline:{build}`, `artifacts:{build}`, `log:{build}:{log}`,
//! `url:{url}`, `pipelines:{project}`, `runs:{pipeline}`, `run:{pipeline}:{run}`.

use crate::api::{AgentApi, BuildApi, ByteStream, PipelineApi};
use adox_core::{
    AdoxError, Agent, AgentPool, AgentQueue, Build, BuildArtifact, BuildQuery, Pipeline,
    PipelineArtifact, PipelineRun, Result, TimelineRecord,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Mutex;

const DEFAULT_CHUNK_SIZE: usize = 8;

/// Mock Azure DevOps backend
#[derive(Default)]
pub struct MockDevOpsApi {
    pools: Vec<AgentPool>,
    agents: HashMap<i64, Vec<Agent>>,
    queues: HashMap<String, Vec<AgentQueue>>,
    builds: HashMap<String, Vec<Build>>,
    timelines: HashMap<i64, Vec<TimelineRecord>>,
    artifacts: HashMap<i64, Vec<BuildArtifact>>,
    logs: HashMap<(i64, i64), Vec<u8>>,
    payloads: HashMap<String, Vec<u8>>,
    /// Payloads that fail after yielding this many bytes
    broken_payloads: HashMap<String, usize>,
    pipelines: HashMap<String, Vec<Pipeline>>,
    runs: HashMap<i64, Vec<PipelineRun>>,
    run_artifacts: HashMap<(i64, i64), Vec<PipelineArtifact>>,
    failures: HashMap<String, u16>,
    /// Truncate list results to `top` like a well-behaved upstream
    honor_top: bool,
    chunk_size: Option<usize>,
    calls: Mutex<Vec<String>>,
}

impl MockDevOpsApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pool(mut self, pool: AgentPool) -> Self {
        self.pools.push(pool);
        self
    }

    pub fn with_agents(mut self, pool_id: i64, agents: Vec<Agent>) -> Self {
        self.agents.entry(pool_id).or_default().extend(agents);
        self
    }

    pub fn with_queue(mut self, project: &str, queue: AgentQueue) -> Self {
        self.queues
            .entry(project.to_string())
            .or_default()
            .push(queue);
        self
    }

    pub fn with_builds(mut self, project: &str, builds: Vec<Build>) -> Self {
        self.builds
            .entry(project.to_string())
            .or_default()
            .extend(builds);
        self
    }

    pub fn with_timeline(mut self, build_id: i64, records: Vec<TimelineRecord>) -> Self {
        self.timelines.insert(build_id, records);
        self
    }

    pub fn with_artifact(mut self, build_id: i64, artifact: BuildArtifact) -> Self {
        self.artifacts.entry(build_id).or_default().push(artifact);
        self
    }

    pub fn with_log(mut self, build_id: i64, log_id: i64, content: impl Into<Vec<u8>>) -> Self {
        self.logs.insert((build_id, log_id), content.into());
        self
    }

    /// Content served by `open_url` / `open_signed_url`
    pub fn with_payload(mut self, url: &str, content: impl Into<Vec<u8>>) -> Self {
        self.payloads.insert(url.to_string(), content.into());
        self
    }

    /// Payload whose stream fails after `fail_after` bytes
    pub fn with_broken_payload(
        mut self,
        url: &str,
        content: impl Into<Vec<u8>>,
        fail_after: usize,
    ) -> Self {
        self.payloads.insert(url.to_string(), content.into());
        self.broken_payloads.insert(url.to_string(), fail_after);
        self
    }

    pub fn with_pipeline(mut self, project: &str, pipeline: Pipeline) -> Self {
        self.pipelines
            .entry(project.to_string())
            .or_default()
            .push(pipeline);
        self
    }

    pub fn with_runs(mut self, pipeline_id: i64, runs: Vec<PipelineRun>) -> Self {
        self.runs.entry(pipeline_id).or_default().extend(runs);
        self
    }

    pub fn with_run_artifact(
        mut self,
        pipeline_id: i64,
        run_id: i64,
        artifact: PipelineArtifact,
    ) -> Self {
        self.run_artifacts
            .entry((pipeline_id, run_id))
            .or_default()
            .push(artifact);
        self
    }

    /// Make every call matching `key` fail with `status`
    pub fn with_failure(mut self, key: &str, status: u16) -> Self {
        self.failures.insert(key.to_string(), status);
        self
    }

    pub fn honor_top(mut self, honor: bool) -> Self {
        self.honor_top = honor;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size.max(1));
        self
    }

    /// Keys of every call made so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    /// Number of calls whose key starts with `prefix`
    pub fn call_count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    fn record(&self, key: &str) -> Result<()> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(key.to_string());
        }

        match self.failures.get(key) {
            Some(&status) => Err(AdoxError::Api {
                status,
                message: format!("Mock failure ({}) for {}", status, key),
            }),
            None => Ok(()),
        }
    }

    fn limit<T: Clone>(&self, items: &[T], top: Option<usize>) -> Vec<T> {
        match top {
            Some(top) if self.honor_top => items.iter().take(top).cloned().collect(),
            _ => items.to_vec(),
        }
    }

    fn stream_payload(&self, key: &str, content: &[u8]) -> ByteStream {
        let chunk_size = self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE);
        let fail_after = self.broken_payloads.get(key).copied();

        let mut chunks: Vec<Result<Bytes>> = Vec::new();
        let mut sent = 0usize;
        for chunk in content.chunks(chunk_size) {
            if let Some(limit) = fail_after {
                if sent >= limit {
                    chunks.push(Err(AdoxError::Http(format!(
                        "Mock stream for {} interrupted after {} bytes",
                        key, sent
                    ))));
                    break;
                }
            }
            sent += chunk.len();
            chunks.push(Ok(Bytes::copy_from_slice(chunk)));
        }

        stream::iter(chunks).boxed()
    }
}

#[async_trait]
impl AgentApi for MockDevOpsApi {
    async fn list_pools(&self, top: Option<usize>) -> Result<Vec<AgentPool>> {
        self.record("pools")?;
        Ok(self.limit(&self.pools, top))
    }

    async fn list_agents(
        &self,
        pool_id: i64,
        agent_name: Option<&str>,
        top: Option<usize>,
    ) -> Result<Vec<Agent>> {
        self.record(&format!("pool:{}", pool_id))?;

        let Some(agents) = self.agents.get(&pool_id) else {
            if self.pools.iter().any(|p| p.id == pool_id) {
                return Ok(Vec::new());
            }
            return Err(AdoxError::NotFound(format!("Agent pool {} not found", pool_id)));
        };

        let matching: Vec<Agent> = agents
            .iter()
            .filter(|a| agent_name.map_or(true, |n| a.name.eq_ignore_ascii_case(n)))
            .cloned()
            .collect();
        Ok(self.limit(&matching, top))
    }

    async fn list_queues(&self, project: &str, top: Option<usize>) -> Result<Vec<AgentQueue>> {
        self.record(&format!("queues:{}", project))?;
        let queues = self.queues.get(project).cloned().unwrap_or_default();
        Ok(self.limit(&queues, top))
    }
}

#[async_trait]
impl BuildApi for MockDevOpsApi {
    async fn list_builds(
        &self,
        project: &str,
        query: &BuildQuery,
        top: Option<usize>,
    ) -> Result<Vec<Build>> {
        self.record(&format!("builds:{}", project))?;

        let matching: Vec<Build> = self
            .builds
            .get(project)
            .map(|builds| {
                builds
                    .iter()
                    .filter(|b| {
                        query.definition_id.map_or(true, |id| {
                            b.definition.as_ref().map(|d| d.id) == Some(id)
                        })
                    })
                    .filter(|b| query.status.map_or(true, |s| b.status == s))
                    .filter(|b| query.result.map_or(true, |r| b.result == Some(r)))
                    .filter(|b| {
                        query
                            .branch
                            .as_ref()
                            .map_or(true, |br| b.source_branch.as_ref() == Some(br))
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        Ok(self.limit(&matching, top))
    }

    async fn get_build(&self, project: &str, build_id: i64) -> Result<Build> {
        self.record(&format!("build:{}", build_id))?;
        self.builds
            .get(project)
            .and_then(|builds| builds.iter().find(|b| b.id == build_id))
            .cloned()
            .ok_or_else(|| AdoxError::NotFound(format!("Build {} not found", build_id)))
    }

    async fn get_timeline(&self, _project: &str, build_id: i64) -> Result<Vec<TimelineRecord>> {
        self.record(&format!("timeline:{}", build_id))?;
        self.timelines
            .get(&build_id)
            .cloned()
            .ok_or_else(|| AdoxError::NotFound(format!("Build {} not found", build_id)))
    }

    async fn list_artifacts(&self, _project: &str, build_id: i64) -> Result<Vec<BuildArtifact>> {
        self.record(&format!("artifacts:{}", build_id))?;
        Ok(self.artifacts.get(&build_id).cloned().unwrap_or_default())
    }

    async fn open_log(&self, _project: &str, build_id: i64, log_id: i64) -> Result<ByteStream> {
        let key = format!("log:{}:{}", build_id, log_id);
        self.record(&key)?;
        let content = self.logs.get(&(build_id, log_id)).ok_or_else(|| {
            AdoxError::NotFound(format!("Log {} of build {} not found", log_id, build_id))
        })?;
        Ok(self.stream_payload(&key, content))
    }

    async fn open_url(&self, url: &str) -> Result<ByteStream> {
        self.record(&format!("url:{}", url))?;
        let content = self
            .payloads
            .get(url)
            .ok_or_else(|| AdoxError::NotFound(format!("No content at {}", url)))?;
        Ok(self.stream_payload(url, content))
    }
}

#[async_trait]
impl PipelineApi for MockDevOpsApi {
    async fn list_pipelines(&self, project: &str, top: Option<usize>) -> Result<Vec<Pipeline>> {
        self.record(&format!("pipelines:{}", project))?;
        let pipelines = self.pipelines.get(project).cloned().unwrap_or_default();
        Ok(self.limit(&pipelines, top))
    }

    async fn list_runs(
        &self,
        _project: &str,
        pipeline_id: i64,
        top: Option<usize>,
    ) -> Result<Vec<PipelineRun>> {
        self.record(&format!("runs:{}", pipeline_id))?;
        let runs = self.runs.get(&pipeline_id).cloned().unwrap_or_default();
        Ok(self.limit(&runs, top))
    }

    async fn get_run_artifact(
        &self,
        _project: &str,
        pipeline_id: i64,
        run_id: i64,
        artifact_name: &str,
    ) -> Result<PipelineArtifact> {
        self.record(&format!("run:{}:{}", pipeline_id, run_id))?;
        self.run_artifacts
            .get(&(pipeline_id, run_id))
            .and_then(|artifacts| artifacts.iter().find(|a| a.name == artifact_name))
            .cloned()
            .ok_or_else(|| {
                AdoxError::NotFound(format!(
                    "Artifact '{}' not found for run {} of pipeline {}",
                    artifact_name, run_id, pipeline_id
                ))
            })
    }

    async fn open_signed_url(&self, url: &str) -> Result<ByteStream> {
        self.record(&format!("url:{}", url))?;
        let content = self
            .payloads
            .get(url)
            .ok_or_else(|| AdoxError::NotFound(format!("No content at {}", url)))?;
        Ok(self.stream_payload(url, content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adox_core::AgentStatus;
    use futures::TryStreamExt;

    fn agent(id: i64, name: &str) -> Agent {
        Agent {
            id,
            name: name.to_string(),
            status: AgentStatus::Online,
            enabled: true,
            version: None,
            os_description: None,
        }
    }

    #[tokio::test]
    async fn test_injected_failure_and_call_log() {
        let mock = MockDevOpsApi::new()
            .with_agents(1, vec![agent(1, "a")])
            .with_failure("pool:2", 403);

        assert_eq!(mock.list_agents(1, None, None).await.unwrap().len(), 1);
        let err = mock.list_agents(2, None, None).await.unwrap_err();
        assert_eq!(err.status(), Some(403));
        assert_eq!(mock.calls(), vec!["pool:1", "pool:2"]);
        assert_eq!(mock.call_count("pool:"), 2);
    }

    #[tokio::test]
    async fn test_top_ignored_unless_honored() {
        let agents = vec![agent(1, "a"), agent(2, "b"), agent(3, "c")];
        let lax = MockDevOpsApi::new().with_agents(1, agents.clone());
        assert_eq!(lax.list_agents(1, None, Some(1)).await.unwrap().len(), 3);

        let strict = MockDevOpsApi::new().with_agents(1, agents).honor_top(true);
        assert_eq!(strict.list_agents(1, None, Some(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_payload_streams_in_chunks() {
        let mock = MockDevOpsApi::new()
            .with_chunk_size(3)
            .with_payload("https://x/a.zip", b"abcdefgh".to_vec());
        let chunks: Vec<Bytes> = mock
            .open_url("https://x/a.zip")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.concat(), b"abcdefgh");
    }

    #[tokio::test]
    async fn test_broken_payload_errors_mid_stream() {
        let mock = MockDevOpsApi::new().with_chunk_size(2).with_broken_payload(
            "https://x/b.zip",
            b"abcdef".to_vec(),
            2,
        );
        let mut stream = mock.open_url("https://x/b.zip").await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"ab"));
        assert!(stream.next().await.unwrap().is_err());
    }
}
