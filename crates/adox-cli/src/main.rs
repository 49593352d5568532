//! adox CLI - Azure DevOps pools, agents, builds and artifacts
//!
//! Usage:
//!   adox init                         Write a default .adox/config.toml
//!   adox pools [--name <filter>]      List agent pools, one page at a time
//!   adox find-agent <name>            Search every pool for an agent
//!   adox job-log <build> --job-name   Download a completed job's log
//!
//! Every query prints its result envelope as JSON on stdout. Logs go to stderr.

use adox_client::Connection;
use adox_core::{AdoxConfig, Envelope};
use adox_query::{
    DevOpsTools, DownloadBuildArtifactArgs, DownloadJobLogArgs, DownloadPipelineArtifactArgs,
    FindAgentArgs, ListAgentPoolsArgs, ListAgentsArgs, ListAllAgentsArgs, ListBuildArtifactsArgs,
    ListBuildsArgs, ListPipelineRunsArgs, ListPipelinesArgs, ListProjectAgentsArgs,
    ListQueuesArgs, PageRequest,
};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "adox")]
#[command(author, version, about = "Query Azure DevOps pools, agents, builds and artifacts")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to .adox/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct PageArgs {
    /// Records per page
    #[arg(long)]
    limit: Option<usize>,

    /// Token returned by the previous page
    #[arg(long = "continuation-token", value_name = "TOKEN")]
    continuation_token: Option<String>,
}

impl From<PageArgs> for PageRequest {
    fn from(args: PageArgs) -> Self {
        PageRequest::new(args.limit, args.continuation_token)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init {
        /// Directory to initialize
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// List agent pools
    Pools {
        /// Pool name contains (case-insensitive)
        #[arg(long)]
        name: Option<String>,

        #[command(flatten)]
        page: PageArgs,
    },

    /// List agents in one pool
    Agents {
        pool_id: i64,

        /// Agent name contains (case-insensitive)
        #[arg(long)]
        name: Option<String>,

        #[command(flatten)]
        page: PageArgs,
    },

    /// List a project's agent queues
    Queues {
        #[arg(short, long)]
        project: Option<String>,

        #[arg(long)]
        name: Option<String>,

        #[command(flatten)]
        page: PageArgs,
    },

    /// List builds, newest first
    Builds {
        #[arg(short, long)]
        project: Option<String>,

        /// Build definition id
        #[arg(long)]
        definition: Option<i64>,

        /// Build status (notStarted, inProgress, completed, ...)
        #[arg(long)]
        status: Option<String>,

        /// Build result (succeeded, failed, canceled, ...)
        #[arg(long)]
        result: Option<String>,

        /// Source branch, e.g. main or refs/pull/4/merge
        #[arg(long)]
        branch: Option<String>,

        #[command(flatten)]
        page: PageArgs,
    },

    /// List YAML pipelines
    Pipelines {
        #[arg(short, long)]
        project: Option<String>,

        #[command(flatten)]
        page: PageArgs,
    },

    /// List runs of a pipeline
    Runs {
        pipeline_id: i64,

        #[arg(short, long)]
        project: Option<String>,

        #[command(flatten)]
        page: PageArgs,
    },

    /// Find an agent by exact name across every pool
    FindAgent {
        name: String,

        /// Only search pools whose name contains this
        #[arg(long)]
        pool: Option<String>,
    },

    /// List agents across every pool
    AllAgents {
        #[arg(long)]
        pool: Option<String>,

        #[arg(long)]
        name: Option<String>,

        /// online or offline
        #[arg(long)]
        status: Option<String>,
    },

    /// List agents reachable from a project's queues
    ProjectAgents {
        #[arg(short, long)]
        project: Option<String>,

        /// Only use queues whose name contains this
        #[arg(long)]
        queue: Option<String>,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        status: Option<String>,
    },

    /// List artifacts published by a build
    Artifacts {
        build_id: i64,

        #[arg(short, long)]
        project: Option<String>,
    },

    /// Download the log of a completed job
    JobLog {
        build_id: i64,

        #[arg(long)]
        job_name: Option<String>,

        #[arg(long)]
        job_id: Option<String>,

        /// Directory (trailing separator or existing) or file path
        #[arg(short, long)]
        output: Option<String>,

        #[arg(short, long)]
        project: Option<String>,
    },

    /// Download a build artifact as a zip archive
    BuildArtifact {
        build_id: i64,

        artifact: String,

        #[arg(short, long)]
        output: Option<String>,

        #[arg(short, long)]
        project: Option<String>,
    },

    /// Download a pipeline run artifact
    PipelineArtifact {
        pipeline_id: i64,

        run_id: i64,

        artifact: String,

        #[arg(short, long)]
        output: Option<String>,

        #[arg(short, long)]
        project: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs on stderr so stdout stays parseable
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();

    if let Commands::Init { path } = &cli.command {
        return cmd_init(path);
    }

    let config = load_config(cli.config.as_deref())?;
    let connection = Connection::connect(&config).context("Failed to connect to Azure DevOps")?;
    let tools = DevOpsTools::new(connection, config);

    let ok = run(&tools, cli.command).await?;
    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_init(path: &std::path::Path) -> Result<()> {
    let written = AdoxConfig::write_default(path)
        .with_context(|| format!("Failed to initialize adox in {}", path.display()))?;
    info!("Wrote {}", written.display());
    println!("Initialized adox in {}", path.display());
    println!("Created:");
    println!("  {}", written.display());
    println!();
    println!("Set organization_url and export AZURE_DEVOPS_PAT before running queries.");
    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<AdoxConfig> {
    let config = match path {
        Some(path) => AdoxConfig::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => AdoxConfig::load_or_default(std::path::Path::new("."))
            .context("Failed to load .adox/config.toml")?,
    }
    .with_env_overrides();

    config.validate()?;
    debug!(?config, "Loaded configuration");
    Ok(config)
}

/// Print an envelope as JSON; returns whether it succeeded
fn emit<T: Serialize>(envelope: Envelope<T>) -> Result<bool> {
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    Ok(envelope.is_ok())
}

async fn run(tools: &DevOpsTools, command: Commands) -> Result<bool> {
    match command {
        Commands::Init { .. } => Ok(true),
        Commands::Pools { name, page } => emit(
            tools
                .list_agent_pools(ListAgentPoolsArgs {
                    name_filter: name,
                    page: page.into(),
                })
                .await,
        ),
        Commands::Agents {
            pool_id,
            name,
            page,
        } => emit(
            tools
                .list_agents(ListAgentsArgs {
                    pool_id,
                    name_filter: name,
                    page: page.into(),
                })
                .await,
        ),
        Commands::Queues {
            project,
            name,
            page,
        } => emit(
            tools
                .list_queues(ListQueuesArgs {
                    project,
                    name_filter: name,
                    page: page.into(),
                })
                .await,
        ),
        Commands::Builds {
            project,
            definition,
            status,
            result,
            branch,
            page,
        } => emit(
            tools
                .list_builds(ListBuildsArgs {
                    project,
                    definition_id: definition,
                    status,
                    result,
                    branch,
                    page: page.into(),
                })
                .await,
        ),
        Commands::Pipelines { project, page } => emit(
            tools
                .list_pipelines(ListPipelinesArgs {
                    project,
                    page: page.into(),
                })
                .await,
        ),
        Commands::Runs {
            pipeline_id,
            project,
            page,
        } => emit(
            tools
                .list_pipeline_runs(ListPipelineRunsArgs {
                    project,
                    pipeline_id,
                    page: page.into(),
                })
                .await,
        ),
        Commands::FindAgent { name, pool } => emit(
            tools
                .find_agent(FindAgentArgs {
                    agent_name: name,
                    pool_name_filter: pool,
                })
                .await,
        ),
        Commands::AllAgents { pool, name, status } => emit(
            tools
                .list_all_agents(ListAllAgentsArgs {
                    pool_name_filter: pool,
                    name_filter: name,
                    status,
                })
                .await,
        ),
        Commands::ProjectAgents {
            project,
            queue,
            name,
            status,
        } => emit(
            tools
                .list_project_agents(ListProjectAgentsArgs {
                    project,
                    queue_name_filter: queue,
                    name_filter: name,
                    status,
                })
                .await,
        ),
        Commands::Artifacts { build_id, project } => emit(
            tools
                .list_build_artifacts(ListBuildArtifactsArgs { project, build_id })
                .await,
        ),
        Commands::JobLog {
            build_id,
            job_name,
            job_id,
            output,
            project,
        } => emit(
            tools
                .download_job_log(DownloadJobLogArgs {
                    project,
                    build_id,
                    job_name,
                    job_id,
                    output_path: output,
                })
                .await,
        ),
        Commands::BuildArtifact {
            build_id,
            artifact,
            output,
            project,
        } => emit(
            tools
                .download_build_artifact(DownloadBuildArtifactArgs {
                    project,
                    build_id,
                    artifact_name: artifact,
                    output_path: output,
                })
                .await,
        ),
        Commands::PipelineArtifact {
            pipeline_id,
            run_id,
            artifact,
            output,
            project,
        } => emit(
            tools
                .download_pipeline_artifact(DownloadPipelineArtifactArgs {
                    project,
                    pipeline_id,
                    run_id,
                    artifact_name: artifact,
                    output_path: output,
                })
                .await,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_builds_with_paging() {
        let cli = Cli::try_parse_from([
            "adox",
            "builds",
            "-p",
            "web",
            "--status",
            "completed",
            "--limit",
            "5",
            "--continuation-token",
            "10",
        ])
        .unwrap();

        match cli.command {
            Commands::Builds {
                project,
                status,
                page,
                ..
            } => {
                assert_eq!(project.as_deref(), Some("web"));
                assert_eq!(status.as_deref(), Some("completed"));
                let request: PageRequest = page.into();
                assert_eq!(request, PageRequest::new(Some(5), Some("10".to_string())));
            }
            _ => panic!("Expected builds command"),
        }
    }

    #[test]
    fn test_parse_job_log() {
        let cli = Cli::try_parse_from([
            "adox", "-v", "job-log", "42", "--job-name", "Build", "-o", "logs/",
        ])
        .unwrap();

        assert!(cli.verbose);
        match cli.command {
            Commands::JobLog {
                build_id,
                job_name,
                output,
                ..
            } => {
                assert_eq!(build_id, 42);
                assert_eq!(job_name.as_deref(), Some("Build"));
                assert_eq!(output.as_deref(), Some("logs/"));
            }
            _ => panic!("Expected job-log command"),
        }
    }
}
