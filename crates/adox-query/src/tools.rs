//! Operation catalog
//!
//! One async method per operation. Each takes a deserializable argument
//! struct, does its work through the [`Connection`], and classifies any
//! failure into an [`Envelope`] exactly once on the way out.

use crate::download::{JobSelector, StreamingDownloader};
use crate::fanout::{filter_scopes, FanOut, FanOutResult, RecordFilter};
use crate::pagination::{Page, PageRequest, Paginator};
use adox_client::Connection;
use adox_core::{
    AdoxConfig, AdoxError, Agent, AgentPool, AgentQueue, Build, BuildArtifact, BuildQuery,
    BuildResult, BuildStatus, DownloadDescriptor, Envelope, OperationContext, Pipeline,
    PipelineRun, Result, ScopedResourceRef,
};
use serde::Deserialize;
use tracing::debug;

pub const AGENT_POOLS_READ: &str = "Agent Pools (Read)";
pub const BUILD_READ: &str = "Build (Read)";

pub const LIST_AGENT_POOLS: OperationContext =
    OperationContext::new("list_agent_pools", AGENT_POOLS_READ);
pub const LIST_AGENTS: OperationContext = OperationContext::new("list_agents", AGENT_POOLS_READ);
pub const LIST_QUEUES: OperationContext = OperationContext::new("list_queues", AGENT_POOLS_READ);
pub const LIST_BUILDS: OperationContext = OperationContext::new("list_builds", BUILD_READ);
pub const LIST_PIPELINES: OperationContext = OperationContext::new("list_pipelines", BUILD_READ);
pub const LIST_PIPELINE_RUNS: OperationContext =
    OperationContext::new("list_pipeline_runs", BUILD_READ);
pub const FIND_AGENT: OperationContext = OperationContext::new("find_agent", AGENT_POOLS_READ);
pub const LIST_ALL_AGENTS: OperationContext =
    OperationContext::new("list_all_agents", AGENT_POOLS_READ);
pub const LIST_PROJECT_AGENTS: OperationContext =
    OperationContext::new("list_project_agents", AGENT_POOLS_READ);
pub const LIST_BUILD_ARTIFACTS: OperationContext =
    OperationContext::new("list_build_artifacts", BUILD_READ);
pub const DOWNLOAD_JOB_LOG: OperationContext =
    OperationContext::new("download_job_log", BUILD_READ);
pub const DOWNLOAD_BUILD_ARTIFACT: OperationContext =
    OperationContext::new("download_build_artifact", BUILD_READ);
pub const DOWNLOAD_PIPELINE_ARTIFACT: OperationContext =
    OperationContext::new("download_pipeline_artifact", BUILD_READ);

/// Agents gathered across pools or queues
pub type AgentSearch = FanOutResult<Agent>;

// ===== Arguments =====

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListAgentPoolsArgs {
    #[serde(default)]
    pub name_filter: Option<String>,
    #[serde(flatten)]
    pub page: PageRequest,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListAgentsArgs {
    pub pool_id: i64,
    #[serde(default)]
    pub name_filter: Option<String>,
    #[serde(flatten)]
    pub page: PageRequest,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQueuesArgs {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub name_filter: Option<String>,
    #[serde(flatten)]
    pub page: PageRequest,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListBuildsArgs {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub definition_id: Option<i64>,
    /// e.g. `completed`, `inProgress`
    #[serde(default)]
    pub status: Option<String>,
    /// e.g. `succeeded`, `failed`
    #[serde(default)]
    pub result: Option<String>,
    /// Short branch names are expanded to `refs/heads/{branch}`
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(flatten)]
    pub page: PageRequest,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPipelinesArgs {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(flatten)]
    pub page: PageRequest,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPipelineRunsArgs {
    #[serde(default)]
    pub project: Option<String>,
    pub pipeline_id: i64,
    #[serde(flatten)]
    pub page: PageRequest,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindAgentArgs {
    pub agent_name: String,
    #[serde(default)]
    pub pool_name_filter: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListAllAgentsArgs {
    #[serde(default)]
    pub pool_name_filter: Option<String>,
    #[serde(default)]
    pub name_filter: Option<String>,
    /// `online` or `offline`
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListProjectAgentsArgs {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub queue_name_filter: Option<String>,
    #[serde(default)]
    pub name_filter: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListBuildArtifactsArgs {
    #[serde(default)]
    pub project: Option<String>,
    pub build_id: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadJobLogArgs {
    #[serde(default)]
    pub project: Option<String>,
    pub build_id: i64,
    #[serde(default)]
    pub job_name: Option<String>,
    /// Takes precedence over `job_name`
    #[serde(default)]
    pub job_id: Option<String>,
    /// Directory (trailing separator or existing) or file path
    #[serde(default)]
    pub output_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadBuildArtifactArgs {
    #[serde(default)]
    pub project: Option<String>,
    pub build_id: i64,
    pub artifact_name: String,
    #[serde(default)]
    pub output_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadPipelineArtifactArgs {
    #[serde(default)]
    pub project: Option<String>,
    pub pipeline_id: i64,
    pub run_id: i64,
    pub artifact_name: String,
    #[serde(default)]
    pub output_path: Option<String>,
}

// ===== Helpers =====

/// Upstream `$top` for a page; a client-side name filter needs every record
fn upstream_top(name_filter: Option<&str>, top: usize) -> Option<usize> {
    match name_filter {
        Some(_) => None,
        None => Some(top),
    }
}

/// Keep items whose name contains `needle` (case-insensitive)
fn retain_named<T>(items: Vec<T>, needle: Option<&str>, name: impl Fn(&T) -> &str) -> Vec<T> {
    match needle {
        None => items,
        Some(needle) => {
            let needle = needle.to_lowercase();
            items
                .into_iter()
                .filter(|item| name(item).to_lowercase().contains(&needle))
                .collect()
        }
    }
}

fn branch_ref(branch: &str) -> String {
    if branch.starts_with("refs/") {
        branch.to_string()
    } else {
        format!("refs/heads/{}", branch)
    }
}

fn build_query(args: &ListBuildsArgs) -> Result<BuildQuery> {
    let status = args
        .status
        .as_deref()
        .map(str::parse::<BuildStatus>)
        .transpose()
        .map_err(AdoxError::InvalidArgument)?;
    let result = args
        .result
        .as_deref()
        .map(str::parse::<BuildResult>)
        .transpose()
        .map_err(AdoxError::InvalidArgument)?;

    Ok(BuildQuery {
        definition_id: args.definition_id,
        status,
        result,
        branch: args.branch.as_deref().map(branch_ref),
    })
}

fn job_selector(args: &DownloadJobLogArgs) -> Result<JobSelector> {
    let non_blank = |value: &Option<String>| {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    if let Some(id) = non_blank(&args.job_id) {
        return Ok(JobSelector::Id(id));
    }
    if let Some(name) = non_blank(&args.job_name) {
        return Ok(JobSelector::Name(name));
    }
    Err(AdoxError::InvalidArgument(
        "Either job_id or job_name is required".to_string(),
    ))
}

// ===== Operations =====

/// Every operation, bound to one connection and configuration
pub struct DevOpsTools {
    connection: Connection,
    config: AdoxConfig,
    paginator: Paginator,
}

impl DevOpsTools {
    pub fn new(connection: Connection, config: AdoxConfig) -> Self {
        let paginator = Paginator::new(&config.paging);
        Self {
            connection,
            config,
            paginator,
        }
    }

    /// Project named by the caller, else the configured default
    fn project(&self, project: Option<&str>) -> Result<String> {
        project
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .or(self.config.default_project.as_deref())
            .map(str::to_string)
            .ok_or_else(|| {
                AdoxError::InvalidArgument(
                    "No project given and no default_project configured".to_string(),
                )
            })
    }

    fn project_label(&self, project: Option<&str>) -> String {
        format!("project '{}'", self.project(project).unwrap_or_default())
    }

    fn organization(&self) -> String {
        self.config
            .organization_url
            .clone()
            .unwrap_or_else(|| "organization".to_string())
    }

    fn output_path(&self, output_path: Option<&str>) -> String {
        match output_path.map(str::trim).filter(|p| !p.is_empty()) {
            Some(path) => path.to_string(),
            None => format!(
                "{}{}",
                self.config.downloads.default_dir.display(),
                std::path::MAIN_SEPARATOR
            ),
        }
    }

    fn fan_out(&self, op: OperationContext, scope_label: &'static str) -> FanOut {
        FanOut::new(op, scope_label, self.config.fan_out.max_concurrency)
    }

    async fn pool_scopes(&self, pool_name_filter: Option<&str>) -> Result<Vec<ScopedResourceRef>> {
        let organization = self.organization();
        let pools = self.connection.agents().list_pools(None).await?;
        let scopes = pools
            .into_iter()
            .map(|pool| ScopedResourceRef::new(organization.clone(), pool.id, pool.name))
            .collect();
        Ok(filter_scopes(scopes, pool_name_filter))
    }

    /// Queues of a project, each carrying the pool that backs it
    async fn queue_scopes(
        &self,
        project: &str,
        queue_name_filter: Option<&str>,
    ) -> Result<Vec<ScopedResourceRef>> {
        let organization = self.organization();
        let queues: Vec<AgentQueue> = self.connection.agents().list_queues(project, None).await?;

        let mut scopes = Vec::with_capacity(queues.len());
        for queue in queues {
            match queue.pool {
                Some(pool) => scopes.push(
                    ScopedResourceRef::new(project, queue.id, queue.name).with_parent(
                        ScopedResourceRef::new(organization.clone(), pool.id, pool.name),
                    ),
                ),
                None => debug!("Queue {} has no backing pool, skipping", queue.name),
            }
        }
        Ok(filter_scopes(scopes, queue_name_filter))
    }

    pub async fn list_agent_pools(&self, args: ListAgentPoolsArgs) -> Envelope<Page<AgentPool>> {
        let name_filter = args.name_filter.as_deref();
        let agents = self.connection.agents();

        let result = self
            .paginator
            .fetch(&args.page, |top| async move {
                let pools = agents.list_pools(upstream_top(name_filter, top)).await?;
                Ok::<_, AdoxError>(retain_named(pools, name_filter, |p| p.name.as_str()))
            })
            .await;

        Envelope::from_result(result, &LIST_AGENT_POOLS, "agent pools")
    }

    pub async fn list_agents(&self, args: ListAgentsArgs) -> Envelope<Page<Agent>> {
        let name_filter = args.name_filter.as_deref();
        let agents = self.connection.agents();
        let pool_id = args.pool_id;

        let result = self
            .paginator
            .fetch(&args.page, |top| async move {
                let found = agents
                    .list_agents(pool_id, None, upstream_top(name_filter, top))
                    .await?;
                Ok::<_, AdoxError>(retain_named(found, name_filter, |a| a.name.as_str()))
            })
            .await;

        Envelope::from_result(result, &LIST_AGENTS, &format!("agent pool {}", pool_id))
    }

    pub async fn list_queues(&self, args: ListQueuesArgs) -> Envelope<Page<AgentQueue>> {
        let result = async {
            let project = self.project(args.project.as_deref())?;
            let name_filter = args.name_filter.as_deref();
            let agents = self.connection.agents();
            let project = project.as_str();

            self.paginator
                .fetch(&args.page, |top| async move {
                    let queues = agents
                        .list_queues(project, upstream_top(name_filter, top))
                        .await?;
                    Ok::<_, AdoxError>(retain_named(queues, name_filter, |q| q.name.as_str()))
                })
                .await
        }
        .await;

        Envelope::from_result(
            result,
            &LIST_QUEUES,
            &self.project_label(args.project.as_deref()),
        )
    }

    pub async fn list_builds(&self, args: ListBuildsArgs) -> Envelope<Page<Build>> {
        let result = async {
            let project = self.project(args.project.as_deref())?;
            let query = build_query(&args)?;
            let builds = self.connection.builds();
            let (project, query) = (project.as_str(), &query);

            self.paginator
                .fetch(&args.page, |top| builds.list_builds(project, query, Some(top)))
                .await
        }
        .await;

        Envelope::from_result(
            result,
            &LIST_BUILDS,
            &self.project_label(args.project.as_deref()),
        )
    }

    pub async fn list_pipelines(&self, args: ListPipelinesArgs) -> Envelope<Page<Pipeline>> {
        let result = async {
            let project = self.project(args.project.as_deref())?;
            let pipelines = self.connection.pipelines();
            let project = project.as_str();

            self.paginator
                .fetch(&args.page, |top| pipelines.list_pipelines(project, Some(top)))
                .await
        }
        .await;

        Envelope::from_result(
            result,
            &LIST_PIPELINES,
            &self.project_label(args.project.as_deref()),
        )
    }

    pub async fn list_pipeline_runs(
        &self,
        args: ListPipelineRunsArgs,
    ) -> Envelope<Page<PipelineRun>> {
        let pipeline_id = args.pipeline_id;
        let result = async {
            let project = self.project(args.project.as_deref())?;
            let pipelines = self.connection.pipelines();
            let project = project.as_str();

            self.paginator
                .fetch(&args.page, |top| {
                    pipelines.list_runs(project, pipeline_id, Some(top))
                })
                .await
        }
        .await;

        Envelope::from_result(result, &LIST_PIPELINE_RUNS, &format!("pipeline {}", pipeline_id))
    }

    /// Search every pool for an agent by exact name
    pub async fn find_agent(&self, args: FindAgentArgs) -> Envelope<AgentSearch> {
        let name = args.agent_name.trim();
        if name.is_empty() {
            return Envelope::from_result(
                Err(AdoxError::InvalidArgument(
                    "agent_name must not be empty".to_string(),
                )),
                &FIND_AGENT,
                "agent",
            );
        }

        let scopes = match self.pool_scopes(args.pool_name_filter.as_deref()).await {
            Ok(scopes) => scopes,
            Err(e) => return Envelope::from_result(Err(e), &FIND_AGENT, "agent pools"),
        };

        let agents = self.connection.agents();
        self.fan_out(FIND_AGENT, "pool")
            .find(name, scopes, move |scope| async move {
                agents.list_agents(scope.resource_id, Some(name), None).await
            })
            .await
            .into()
    }

    /// Every agent in every accessible pool
    pub async fn list_all_agents(&self, args: ListAllAgentsArgs) -> Envelope<AgentSearch> {
        let result = async {
            let filter = RecordFilter::for_agents(args.name_filter.clone(), args.status.clone())?;
            let scopes = self.pool_scopes(args.pool_name_filter.as_deref()).await?;
            let agents = self.connection.agents();

            let search = self
                .fan_out(LIST_ALL_AGENTS, "pool")
                .collect(scopes, &filter, move |scope| async move {
                    agents.list_agents(scope.resource_id, None, None).await
                })
                .await;
            Ok::<_, AdoxError>(search)
        }
        .await;

        Envelope::from_result(result, &LIST_ALL_AGENTS, "agent pools")
    }

    /// Agents reachable from a project's queues
    ///
    /// Queues sharing a pool yield each agent once.
    pub async fn list_project_agents(&self, args: ListProjectAgentsArgs) -> Envelope<AgentSearch> {
        let result = async {
            let project = self.project(args.project.as_deref())?;
            let filter = RecordFilter::for_agents(args.name_filter.clone(), args.status.clone())?;
            let scopes = self
                .queue_scopes(&project, args.queue_name_filter.as_deref())
                .await?;
            let agents = self.connection.agents();

            let search = self
                .fan_out(LIST_PROJECT_AGENTS, "queue")
                .collect(scopes, &filter, move |scope| async move {
                    let pool_id = scope
                        .parent_ref
                        .as_ref()
                        .map_or(scope.resource_id, |pool| pool.resource_id);
                    agents.list_agents(pool_id, None, None).await
                })
                .await;
            Ok::<_, AdoxError>(search)
        }
        .await;

        Envelope::from_result(
            result,
            &LIST_PROJECT_AGENTS,
            &self.project_label(args.project.as_deref()),
        )
    }

    pub async fn list_build_artifacts(
        &self,
        args: ListBuildArtifactsArgs,
    ) -> Envelope<Vec<BuildArtifact>> {
        let result = async {
            let project = self.project(args.project.as_deref())?;
            self.connection
                .builds()
                .list_artifacts(&project, args.build_id)
                .await
        }
        .await;

        Envelope::from_result(
            result,
            &LIST_BUILD_ARTIFACTS,
            &format!("build {}", args.build_id),
        )
    }

    pub async fn download_job_log(&self, args: DownloadJobLogArgs) -> Envelope<DownloadDescriptor> {
        let result = async {
            let project = self.project(args.project.as_deref())?;
            let selector = job_selector(&args)?;
            let output_path = self.output_path(args.output_path.as_deref());

            StreamingDownloader::new(&self.connection)
                .job_log(&project, args.build_id, &selector, &output_path)
                .await
        }
        .await;

        Envelope::from_result(result, &DOWNLOAD_JOB_LOG, &format!("build {}", args.build_id))
    }

    pub async fn download_build_artifact(
        &self,
        args: DownloadBuildArtifactArgs,
    ) -> Envelope<DownloadDescriptor> {
        let result = async {
            let project = self.project(args.project.as_deref())?;
            let output_path = self.output_path(args.output_path.as_deref());

            StreamingDownloader::new(&self.connection)
                .build_artifact(&project, args.build_id, &args.artifact_name, &output_path)
                .await
        }
        .await;

        Envelope::from_result(
            result,
            &DOWNLOAD_BUILD_ARTIFACT,
            &format!("artifact '{}'", args.artifact_name),
        )
    }

    pub async fn download_pipeline_artifact(
        &self,
        args: DownloadPipelineArtifactArgs,
    ) -> Envelope<DownloadDescriptor> {
        let result = async {
            let project = self.project(args.project.as_deref())?;
            let output_path = self.output_path(args.output_path.as_deref());

            StreamingDownloader::new(&self.connection)
                .pipeline_artifact(
                    &project,
                    args.pipeline_id,
                    args.run_id,
                    &args.artifact_name,
                    &output_path,
                )
                .await
        }
        .await;

        Envelope::from_result(
            result,
            &DOWNLOAD_PIPELINE_ARTIFACT,
            &format!("artifact '{}'", args.artifact_name),
        )
    }
}
