use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use policy_attest::http::{self, AppState};
use policy_attest::{
    FilePolicyStore, HttpConnector, OrchestratorConfig, PolicyExecutor, PolicyStore,
    RunCancellation, RunError,
};

#[derive(Parser)]
#[command(
    name = "policy-attest",
    version,
    about = "Runs attestation policies against a remote attestation service"
)]
struct Cli {
    /// TOML config file
    #[arg(long, global = true, env = "POLICY_ATTEST_CONFIG")]
    config: Option<PathBuf>,

    /// Directory of JSON policy documents (overrides config)
    #[arg(long, global = true, env = "POLICY_ATTEST_POLICIES_DIR")]
    policies_dir: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true, env = "POLICY_ATTEST_JSON_LOGS")]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the policies in the store
    List,
    /// Execute one policy and print its run report as JSON
    Run {
        name: String,
        /// Exit non-zero when any attestation failed
        #[arg(long)]
        fail_on_failed: bool,
    },
    /// Serve the JSON HTTP API
    Serve {
        /// Listen address (overrides config)
        #[arg(long, env = "POLICY_ATTEST_LISTEN")]
        listen: Option<SocketAddr>,
    },
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("policy_attest=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let mut config = match &cli.config {
        Some(path) => OrchestratorConfig::load(path)?,
        None => OrchestratorConfig::default(),
    };
    if let Some(dir) = cli.policies_dir.clone() {
        config.policies_dir = dir;
    }

    let store = FilePolicyStore::open(&config.policies_dir)
        .with_context(|| format!("failed to open policy store at {}", config.policies_dir.display()))?;
    let executor = PolicyExecutor::new(
        Arc::new(HttpConnector::new(config.client_settings())),
        config.executor_settings(),
    );

    match cli.command {
        Command::List => {
            for policy in store.list().await? {
                println!(
                    "{}\t{}\t{}\t{} attestation(s)",
                    policy.name,
                    policy.service_url,
                    policy.description,
                    policy.attestations.len()
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Run {
            name,
            fail_on_failed,
        } => {
            let policy = store.get_by_name(&name).await?;
            let (cancel, signal) = RunCancellation::new();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupt received, cancelling run");
                    cancel.cancel();
                }
            });

            let run = match executor.run_report(&policy, &signal).await {
                Ok(run) => run,
                Err(RunError::Cancelled) => {
                    eprintln!("run of `{name}` cancelled");
                    return Ok(ExitCode::from(130));
                }
                Err(e) => {
                    return Err(anyhow::Error::new(e).context(format!("policy `{name}` failed to run")))
                }
            };

            println!("{}", serde_json::to_string_pretty(&run)?);
            if fail_on_failed && !run.all_passed() {
                return Ok(ExitCode::FAILURE);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Serve { listen } => {
            let addr = listen.unwrap_or(config.listen_addr);
            let state = Arc::new(AppState {
                store: Arc::new(store),
                executor,
            });

            let app = http::router(state);
            tracing::info!(%addr, policies_dir = %config.policies_dir.display(), "HTTP server listening");

            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
