use clap::{ArgAction, Parser, Subcommand};
use serde_json::Value;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use trendcache::{ops, Config, Service};

#[derive(Parser)]
#[command(
    name = "trendcache",
    version,
    about = "Deduplicating cache and job queue for corpus analytics"
)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true, env = "TRENDCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Cache root directory (overrides config and environment)
    #[arg(long, global = true)]
    cache_root: Option<PathBuf>,

    /// Directory of per-group post files
    #[arg(long, global = true)]
    posts_root: Option<PathBuf>,

    /// Accounts JSON file
    #[arg(long, global = true)]
    accounts_path: Option<PathBuf>,

    /// More log output (-v debug, -vv trace). RUST_LOG wins when set.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a request; prints the result or a request id
    Request {
        /// word_frequency, word_cloud or topic_modeling
        kind: String,
        /// Parameters as JSON. Read from stdin when omitted
        #[arg(short, long)]
        params: Option<String>,
        /// Address to notify when the result is ready
        #[arg(short, long)]
        email: Option<String>,
    },
    /// Add an address to a pending request
    Subscribe {
        kind: String,
        request_id: String,
        address: String,
    },
    /// Show where a request stands
    Status { kind: String, request_id: String },
    /// Print the finished result of a request
    Result { kind: String, request_id: String },
    /// Drain the queue on an interval until interrupted
    Worker {
        /// Run a single tick and exit
        #[arg(long)]
        once: bool,
        /// Seconds between ticks (overrides config)
        #[arg(long)]
        interval: Option<u64>,
    },
    /// List pending jobs
    Queue {
        #[arg(short, long)]
        kind: Option<String>,
    },
    /// List dead-lettered jobs, or move one back to the queue
    #[command(name = "dead-letter")]
    DeadLetter {
        #[arg(short, long)]
        kind: Option<String>,
        /// Request id to requeue (needs --kind)
        #[arg(long, requires = "kind")]
        requeue: Option<String>,
    },
    /// Show cached artifacts, or clear them
    Cache {
        /// Delete artifacts instead of listing them
        #[arg(long)]
        clear: bool,
        /// Restrict --clear to one namespace
        #[arg(short, long, requires = "clear")]
        namespace: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let command = cli.command.unwrap_or_else(|| {
        eprintln!("No subcommand provided. Run `trendcache --help` for usage.");
        std::process::exit(1);
    });

    let mut config = Config::load(cli.config.as_deref()).unwrap_or_else(|e| fail(e));
    if let Some(path) = cli.cache_root {
        config.cache_root = path;
    }
    if let Some(path) = cli.posts_root {
        config.corpus.posts_root = path;
    }
    if let Some(path) = cli.accounts_path {
        config.corpus.accounts_path = path;
    }
    let svc = Service::open(&config).unwrap_or_else(|e| fail(e));

    match command {
        Commands::Request {
            kind,
            params,
            email,
        } => {
            let params = match params {
                Some(text) => serde_json::from_str(&text).unwrap_or_else(|e| fail(format!("invalid --params JSON: {e}"))),
                None => read_stdin_json(),
            };
            print_json(ops::op_request(&svc, &kind, &params, email.as_deref()));
        }
        Commands::Subscribe {
            kind,
            request_id,
            address,
        } => print_json(ops::op_subscribe(&svc, &kind, &request_id, &address)),
        Commands::Status { kind, request_id } => print_json(ops::op_status(&svc, &kind, &request_id)),
        Commands::Result { kind, request_id } => print_json(ops::op_result(&svc, &kind, &request_id)),
        Commands::Worker { once, interval } => {
            if once {
                print_json(ops::op_tick(&svc));
            } else {
                let secs = interval.unwrap_or(config.worker.interval_secs).max(1);
                cmd_worker(&svc, std::time::Duration::from_secs(secs));
            }
        }
        Commands::Queue { kind } => print_json(ops::op_queue_list(&svc, kind.as_deref())),
        Commands::DeadLetter { kind, requeue } => match (kind, requeue) {
            (Some(kind), Some(id)) => print_json(ops::op_requeue(&svc, &kind, &id)),
            (kind, _) => print_json(ops::op_dead_list(&svc, kind.as_deref())),
        },
        Commands::Cache { clear, namespace } => {
            if clear {
                print_json(ops::op_cache_clear(&svc, namespace.as_deref()));
            } else {
                print_json(ops::op_cache_info(&svc));
            }
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "trendcache=info",
        1 => "trendcache=debug",
        _ => "trendcache=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn cmd_worker(svc: &Service, interval: std::time::Duration) {
    let rt = tokio::runtime::Runtime::new().unwrap_or_else(|e| fail(format!("failed to create tokio runtime: {e}")));
    let worker = Arc::clone(&svc.worker);
    rt.block_on(async move {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("interrupt received, finishing current tick");
                    let _ = tx.send(true);
                }
                Err(e) => {
                    warn!(error = %e, "cannot listen for interrupts");
                    std::future::pending::<()>().await;
                }
            }
        });
        worker.run(interval, rx).await;
    });
}

fn read_stdin_json() -> Value {
    let mut buf = String::new();
    if let Err(e) = io::stdin().read_to_string(&mut buf) {
        fail(format!("failed to read stdin: {e}"));
    }
    serde_json::from_str(&buf).unwrap_or_else(|e| fail(format!("invalid JSON on stdin: {e}")))
}

fn print_json(result: Result<Value, String>) {
    match result {
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(text) => println!("{text}"),
            Err(e) => fail(e),
        },
        Err(e) => fail(e),
    }
}

fn fail(err: impl std::fmt::Display) -> ! {
    eprintln!("error: {err}");
    std::process::exit(1);
}
