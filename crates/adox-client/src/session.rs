//! Connection holder
//!
//! Built once at startup and passed to whatever needs remote access. Each
//! sub-client is a shared read-only handle; nothing is created lazily.

use crate::api::{AgentApi, BuildApi, PipelineApi};
use crate::http::HttpDevOpsClient;
use adox_core::{AdoxConfig, Result};
use std::sync::Arc;

/// Typed sub-clients over one authenticated connection
#[derive(Clone)]
pub struct Connection {
    agents: Arc<dyn AgentApi>,
    builds: Arc<dyn BuildApi>,
    pipelines: Arc<dyn PipelineApi>,
}

impl Connection {
    /// Connect to the organization named in `config`
    pub fn connect(config: &AdoxConfig) -> Result<Self> {
        let client = Arc::new(HttpDevOpsClient::from_config(config)?);
        tracing::debug!(
            "Connected to {}",
            config.organization_url.as_deref().unwrap_or_default()
        );
        Ok(Self::from_backend(client))
    }

    /// Use one backend for every sub-client
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: AgentApi + BuildApi + PipelineApi + 'static,
    {
        Self {
            agents: backend.clone(),
            builds: backend.clone(),
            pipelines: backend,
        }
    }

    pub fn agents(&self) -> &dyn AgentApi {
        self.agents.as_ref()
    }

    pub fn builds(&self) -> &dyn BuildApi {
        self.builds.as_ref()
    }

    pub fn pipelines(&self) -> &dyn PipelineApi {
        self.pipelines.as_ref()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDevOpsApi;
    use adox_core::{AdoxError, AgentPool};

    #[tokio::test]
    async fn test_single_backend_serves_all_sub_clients() {
        let mock = Arc::new(MockDevOpsApi::new().with_pool(AgentPool {
            id: 1,
            name: "Default".to_string(),
            is_hosted: false,
            size: None,
            pool_type: None,
        }));
        let connection = Connection::from_backend(mock.clone());

        let pools = connection.agents().list_pools(None).await.unwrap();
        assert_eq!(pools.len(), 1);
        assert!(connection.pipelines().list_pipelines("p", None).await.unwrap().is_empty());
        assert_eq!(mock.calls(), vec!["pools", "pipelines:p"]);
    }

    #[test]
    fn test_connect_requires_org_url() {
        let err = Connection::connect(&AdoxConfig::default()).unwrap_err();
        assert!(matches!(err, AdoxError::Config(_)));
    }
}
