//! Azure DevOps REST client
//!
//! Implements the three remote capability traits over reqwest. Every call is
//! attempted once; a non-success status becomes [`AdoxError::Api`] carrying the
//! status and the service's own error message.

use crate::api::{AgentApi, BuildApi, ByteStream, PipelineApi};
use crate::auth;
use adox_core::{
    AdoxConfig, AdoxError, Agent, AgentPool, AgentQueue, Build, BuildArtifact, BuildQuery,
    Pipeline, PipelineArtifact, PipelineRun, Result, TimelineRecord,
};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client as HttpClient, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

const DEFAULT_API_VERSION: &str = "7.1";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// `{ "count": n, "value": [...] }` wrapper used by list endpoints
#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct TimelineResponse {
    #[serde(default)]
    records: Option<Vec<TimelineRecord>>,
}

/// Error body shape returned by the service
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// HTTP client for one organization
#[derive(Debug, Clone)]
pub struct HttpDevOpsClient {
    /// Organization URL without trailing slash
    base_url: String,
    http: HttpClient,
    token: String,
    api_version: String,
    /// Applied to JSON calls only; streamed downloads run unbounded
    timeout: Duration,
}

impl HttpDevOpsClient {
    /// Create a client for `organization_url` authenticated with a personal access token
    pub fn new(organization_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let base_url = organization_url.into();

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(AdoxError::Config(format!(
                "Organization URL must start with http:// or https://, got: {}",
                base_url
            )));
        }

        let http = HttpClient::builder()
            .connect_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| AdoxError::Http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            token: token.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        })
    }

    /// Build a client from configuration, reading the token from the environment
    pub fn from_config(config: &AdoxConfig) -> Result<Self> {
        let url = config.require_organization_url()?;
        let token = auth::get_auth_token(&config.token_env)?;
        Ok(Self::new(url, token)?
            .with_api_version(&config.api_version)
            .with_timeout(Duration::from_secs(config.request_timeout_secs)))
    }

    pub fn with_api_version(mut self, api_version: &str) -> Self {
        self.api_version = api_version.to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn org_url(&self, path: &str) -> String {
        format!("{}/_apis/{}", self.base_url, path)
    }

    fn project_url(&self, project: &str, path: &str) -> String {
        format!(
            "{}/{}/_apis/{}",
            self.base_url,
            urlencoding::encode(project),
            path
        )
    }

    fn authed_get(&self, url: &str) -> RequestBuilder {
        self.http
            .get(url)
            .basic_auth("", Some(&self.token))
            .query(&[("api-version", self.api_version.as_str())])
    }

    /// Send a request and turn any non-success status into an error
    async fn send(&self, request: RequestBuilder, url: &str) -> Result<Response> {
        debug!("GET {}", url);

        let response = request
            .send()
            .await
            .map_err(|e| AdoxError::Http(format!("Failed to send request to {}: {}", url, e)))?;

        let status = response.status();

        // The service answers a rejected token with a 203 sign-in page
        if status == StatusCode::NON_AUTHORITATIVE_INFORMATION {
            return Err(AdoxError::Api {
                status: 401,
                message: "The service returned a sign-in page; the personal access token was rejected"
                    .to_string(),
            });
        }

        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.message)
            .unwrap_or_else(|| {
                if body.trim().is_empty() {
                    status.to_string()
                } else {
                    body
                }
            });

        debug!("Request to {} failed with {}: {}", url, status, message);

        Err(AdoxError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let request = self.authed_get(url).query(params).timeout(self.timeout);
        let response = self.send(request, url).await?;

        response
            .json::<T>()
            .await
            .map_err(|e| AdoxError::Other(format!("Failed to parse response from {}: {}", url, e)))
    }

    async fn get_list<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let list: ListResponse<T> = self.get_json(url, params).await?;
        Ok(list.value)
    }

    /// Open a body stream; the status is checked before the stream is handed out
    async fn open_stream(&self, request: RequestBuilder, url: &str) -> Result<ByteStream> {
        let response = self.send(request, url).await?;
        let source = url.to_string();

        Ok(response
            .bytes_stream()
            .map(move |chunk| {
                chunk.map_err(|e| {
                    AdoxError::Http(format!("Stream from {} interrupted: {}", source, e))
                })
            })
            .boxed())
    }
}

fn top_param(params: &mut Vec<(&'static str, String)>, top: Option<usize>) {
    if let Some(top) = top {
        params.push(("$top", top.to_string()));
    }
}

#[async_trait]
impl AgentApi for HttpDevOpsClient {
    #[instrument(skip(self))]
    async fn list_pools(&self, _top: Option<usize>) -> Result<Vec<AgentPool>> {
        // The pools endpoint has no paging parameters; `top` is ignored upstream
        self.get_list(&self.org_url("distributedtask/pools"), &[])
            .await
    }

    #[instrument(skip(self))]
    async fn list_agents(
        &self,
        pool_id: i64,
        agent_name: Option<&str>,
        _top: Option<usize>,
    ) -> Result<Vec<Agent>> {
        let mut params = Vec::new();
        if let Some(name) = agent_name {
            params.push(("agentName", name.to_string()));
        }
        self.get_list(
            &self.org_url(&format!("distributedtask/pools/{}/agents", pool_id)),
            &params,
        )
        .await
    }

    #[instrument(skip(self))]
    async fn list_queues(&self, project: &str, _top: Option<usize>) -> Result<Vec<AgentQueue>> {
        self.get_list(&self.project_url(project, "distributedtask/queues"), &[])
            .await
    }
}

#[async_trait]
impl BuildApi for HttpDevOpsClient {
    #[instrument(skip(self))]
    async fn list_builds(
        &self,
        project: &str,
        query: &BuildQuery,
        top: Option<usize>,
    ) -> Result<Vec<Build>> {
        let mut params = vec![("queryOrder", "queueTimeDescending".to_string())];
        if let Some(definition_id) = query.definition_id {
            params.push(("definitions", definition_id.to_string()));
        }
        if let Some(status) = query.status {
            params.push(("statusFilter", status.api_name().to_string()));
        }
        if let Some(result) = query.result {
            params.push(("resultFilter", result.api_name().to_string()));
        }
        if let Some(branch) = &query.branch {
            params.push(("branchName", branch.clone()));
        }
        top_param(&mut params, top);

        self.get_list(&self.project_url(project, "build/builds"), &params)
            .await
    }

    #[instrument(skip(self))]
    async fn get_build(&self, project: &str, build_id: i64) -> Result<Build> {
        self.get_json(
            &self.project_url(project, &format!("build/builds/{}", build_id)),
            &[],
        )
        .await
    }

    #[instrument(skip(self))]
    async fn get_timeline(&self, project: &str, build_id: i64) -> Result<Vec<TimelineRecord>> {
        let timeline: TimelineResponse = self
            .get_json(
                &self.project_url(project, &format!("build/builds/{}/timeline", build_id)),
                &[],
            )
            .await?;
        Ok(timeline.records.unwrap_or_default())
    }

    #[instrument(skip(self))]
    async fn list_artifacts(&self, project: &str, build_id: i64) -> Result<Vec<BuildArtifact>> {
        self.get_list(
            &self.project_url(project, &format!("build/builds/{}/artifacts", build_id)),
            &[],
        )
        .await
    }

    #[instrument(skip(self))]
    async fn open_log(&self, project: &str, build_id: i64, log_id: i64) -> Result<ByteStream> {
        let url = self.project_url(project, &format!("build/builds/{}/logs/{}", build_id, log_id));
        let request = self.authed_get(&url).header("Accept", "text/plain");
        self.open_stream(request, &url).await
    }

    #[instrument(skip(self))]
    async fn open_url(&self, url: &str) -> Result<ByteStream> {
        let request = self
            .http
            .get(url)
            .basic_auth("", Some(&self.token))
            .header("Accept", "application/zip");
        self.open_stream(request, url).await
    }
}

#[async_trait]
impl PipelineApi for HttpDevOpsClient {
    #[instrument(skip(self))]
    async fn list_pipelines(&self, project: &str, top: Option<usize>) -> Result<Vec<Pipeline>> {
        let mut params = Vec::new();
        top_param(&mut params, top);
        self.get_list(&self.project_url(project, "pipelines"), &params)
            .await
    }

    #[instrument(skip(self))]
    async fn list_runs(
        &self,
        project: &str,
        pipeline_id: i64,
        _top: Option<usize>,
    ) -> Result<Vec<PipelineRun>> {
        // Runs are always returned newest first, without paging support
        self.get_list(
            &self.project_url(project, &format!("pipelines/{}/runs", pipeline_id)),
            &[],
        )
        .await
    }

    #[instrument(skip(self))]
    async fn get_run_artifact(
        &self,
        project: &str,
        pipeline_id: i64,
        run_id: i64,
        artifact_name: &str,
    ) -> Result<PipelineArtifact> {
        let params = [
            ("artifactName", artifact_name.to_string()),
            ("$expand", "signedContent".to_string()),
        ];
        self.get_json(
            &self.project_url(
                project,
                &format!("pipelines/{}/runs/{}/artifacts", pipeline_id, run_id),
            ),
            &params,
        )
        .await
    }

    #[instrument(skip(self))]
    async fn open_signed_url(&self, url: &str) -> Result<ByteStream> {
        let request = self.http.get(url);
        self.open_stream(request, url).await
    }
}
