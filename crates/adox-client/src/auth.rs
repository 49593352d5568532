//! Authentication for the Azure DevOps REST API
//!
//! Personal access tokens only. Lookup order:
//! 1. The variable named by `token_env` in config (default `AZURE_DEVOPS_PAT`)
//! 2. `AZURE_DEVOPS_EXT_PAT` (the variable the `az devops` extension reads)

use adox_core::{AdoxError, Result};
use std::env;

pub const EXT_PAT_ENV: &str = "AZURE_DEVOPS_EXT_PAT";

/// Get the personal access token for API calls
pub fn get_auth_token(token_env: &str) -> Result<String> {
    if let Some(token) = non_empty_var(token_env) {
        tracing::debug!("Using personal access token from {}", token_env);
        return Ok(token);
    }

    if let Some(token) = non_empty_var(EXT_PAT_ENV) {
        tracing::debug!("Using personal access token from {}", EXT_PAT_ENV);
        return Ok(token);
    }

    Err(AdoxError::Auth(format!(
        "No personal access token found. Set either:\n\
         - {}=<token>\n\
         - {}=<token>",
        token_env, EXT_PAT_ENV
    )))
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}
