use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use kfzf_completion::{format_stats, prepare_cmd_args, process_result, CompletionEngine};
use kfzf_fetcher::{Fetcher, FetcherConfig, KubeTunnelOpener, TunnelOpener};
use kfzf_kubehub::ClusterConfig;
use tracing::{debug, error, warn};

const VERBS: [&str; 8] = ["get", "exec", "logs", "label", "describe", "delete", "annotate", "edit"];

const EXIT_NO_COMPLETION: u8 = 5;
const EXIT_FALLTHROUGH: u8 = 6;

#[derive(Parser, Debug)]
#[command(name = "kfzf-client", version, about = "kubectl completion backed by a kfzf collector")]
struct Cli {
    #[command(flatten)]
    fetch: FetchArgs,

    /// Overall budget for one invocation, in seconds
    #[arg(long, env = "KFZF_TIMEOUT", default_value_t = 5, global = true)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct FetchArgs {
    /// Snapshot directory of a collector running on this host
    #[arg(long, env = "KFZF_CACHE_DIR", default_value = "/tmp/kfzf/cache", global = true)]
    cache_dir: PathBuf,
    /// Where snapshots fetched from a remote collector are kept
    #[arg(long, env = "KFZF_FETCHER_CACHE_PATH", default_value = "/tmp/kfzf/fetcher_cache", global = true)]
    fetcher_cache_path: PathBuf,
    /// Collector address (host:port) reachable without port-forward
    #[arg(long, env = "KFZF_HTTP_ENDPOINT", global = true)]
    http_endpoint: Option<String>,
    /// Reuse fetched snapshots younger than this many seconds without asking the collector
    #[arg(long, env = "KFZF_MINIMUM_CACHE", default_value_t = 60, global = true)]
    minimum_cache: u64,
    /// Local port of the port-forward tunnel, 0 for any
    #[arg(long, env = "KFZF_PORT_FORWARD_LOCAL_PORT", default_value_t = 0, global = true)]
    port_forward_local_port: u16,
    #[arg(long, env = "KFZF_COLLECTOR_LABEL_SELECTOR", default_value = "app=kfzf-collector", global = true)]
    collector_label_selector: String,
    #[arg(long, env = "KFZF_COLLECTOR_NAMESPACE", global = true)]
    collector_namespace: Option<String>,
}

impl FetchArgs {
    fn config(&self) -> FetcherConfig {
        FetcherConfig {
            fetcher_cache_path: self.fetcher_cache_path.clone(),
            http_endpoint: self.http_endpoint.clone(),
            minimum_cache: Duration::from_secs(self.minimum_cache),
            port_forward_local_port: self.port_forward_local_port,
            collector_label_selector: self.collector_label_selector.clone(),
            collector_namespace: self.collector_namespace.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print completion candidates for a kubectl verb
    #[command(name = "k8s-completion")]
    K8sCompletion {
        #[arg(value_parser = clap::builder::PossibleValuesParser::new(VERBS))]
        verb: String,
        /// Arguments typed so far; a single argument is split on whitespace
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Print the text to insert for a selected candidate
    #[command(name = "k8s-result")]
    K8sResult {
        /// Command line as typed, starting with the verb
        cmd_line: String,
        /// Line picked from the completion output
        row: String,
    },
    /// Show what the collector currently holds
    Stats,
}

fn init_tracing() {
    let env = std::env::var("KFZF_LOG").unwrap_or_else(|_| "warn".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

async fn tunnel_opener(args: &FetchArgs) -> Option<Arc<dyn TunnelOpener>> {
    match kube::Client::try_default().await {
        Ok(client) => Some(Arc::new(KubeTunnelOpener::new(
            client,
            args.collector_label_selector.clone(),
            args.collector_namespace.clone(),
            args.port_forward_local_port,
        ))),
        Err(e) => {
            debug!(error = %e, "no kubernetes client, port-forward disabled");
            None
        }
    }
}

async fn fetcher(args: &FetchArgs) -> Result<Fetcher> {
    let cluster = ClusterConfig::load(args.cache_dir.clone());
    let opener = tunnel_opener(args).await;
    Fetcher::new(args.config(), cluster, opener).context("building fetcher")
}

/// A lone argument holds the raw command line from the shell.
fn completion_args(args: Vec<String>) -> Vec<String> {
    match args.as_slice() {
        [line] => prepare_cmd_args(line),
        _ => args,
    }
}

async fn complete(fetch: &FetchArgs, verb: &str, args: Vec<String>) -> Result<ExitCode> {
    let args = completion_args(args);
    let fetcher = fetcher(fetch).await?;
    let cluster = fetcher.cluster_name().to_string();
    let engine = CompletionEngine::new(fetcher, cluster);
    match engine.process_command_args(verb, &args).await {
        Ok(res) if res.completions.is_empty() => {
            warn!("no completion found");
            Ok(ExitCode::from(EXIT_NO_COMPLETION))
        }
        Ok(res) => {
            print!("{}", res.formatted_output());
            Ok(ExitCode::SUCCESS)
        }
        Err(e) if e.is_fallthrough() => {
            warn!(error = %e, "leaving completion to the shell");
            Ok(ExitCode::from(EXIT_FALLTHROUGH))
        }
        Err(e) => Err(e).context("completion failed"),
    }
}

fn result(cmd_line: &str, row: &str) -> Result<ExitCode> {
    let tokens = prepare_cmd_args(cmd_line);
    let Some((verb, args)) = tokens.split_first() else { anyhow::bail!("empty command line") };
    let current_namespace = kfzf_kubehub::current_namespace();
    match process_result(verb, args, row, &current_namespace) {
        Ok(text) => {
            print!("{}", text);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) if e.is_fallthrough() => {
            warn!(error = %e, "leaving completion to the shell");
            Ok(ExitCode::from(EXIT_FALLTHROUGH))
        }
        Err(e) => Err(e).context("processing selection"),
    }
}

async fn stats(fetch: &FetchArgs) -> Result<ExitCode> {
    let stats = fetcher(fetch).await?.get_stats().await.context("fetching collector stats")?;
    print!("{}", format_stats(&stats, chrono::Utc::now().timestamp()));
    Ok(ExitCode::SUCCESS)
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::K8sCompletion { verb, args } => complete(&cli.fetch, &verb, args).await,
        Commands::K8sResult { cmd_line, row } => result(&cmd_line, &row),
        Commands::Stats => stats(&cli.fetch).await,
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    let budget = Duration::from_secs(cli.timeout);
    match tokio::time::timeout(budget, run(cli)).await {
        Ok(Ok(code)) => code,
        Ok(Err(e)) => {
            error!(error = %format!("{:#}", e), "kfzf-client failed");
            ExitCode::FAILURE
        }
        Err(_) => {
            error!(timeout_s = budget.as_secs(), "kfzf-client timed out");
            ExitCode::FAILURE
        }
    }
}
