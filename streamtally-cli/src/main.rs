use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::DateTime;
use clap::{Parser, Subcommand};
use streamtally_core::admin::rpc::query_admin_client::QueryAdminClient;
use streamtally_core::admin::{rpc, serve_with_shutdown};
use streamtally_core::interval::parse_interval;
use streamtally_core::query::{
    QueryConfig, QueryHandle, QueryManager, QueryState, TriggerMode,
};
use streamtally_core::schema::format_event_time;
use streamtally_core::sink::OutputMode;
use streamtally_core::source::DirectorySource;
use streamtally_core::types::BatchId;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tonic::Request;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const PROGRESS_POLL: Duration = Duration::from_millis(250);

#[derive(Parser, Debug)]
#[command(name = "streamtally")]
#[command(about = "Windowed streaming aggregations over a directory of JSON-lines files", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one query until it stops, fails, or Ctrl-C.
    Run {
        /// Directory whose files are the input units.
        #[arg(long)]
        dir: PathBuf,
        /// Query definition (JSON).
        #[arg(long)]
        config: PathBuf,
        /// Only read files with this extension.
        #[arg(long)]
        extension: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        output_mode: Option<OutputMode>,
        /// Run one cycle per interval, e.g. "10 seconds".
        #[arg(long, value_parser = parse_interval_arg, conflicts_with = "available_now")]
        trigger_interval: Option<Duration>,
        /// Process what is currently in the directory, then exit.
        #[arg(long)]
        available_now: bool,
        #[arg(long)]
        max_units_per_cycle: Option<usize>,
        #[arg(long)]
        checkpoint_location: Option<PathBuf>,
        /// Serve the admin endpoint on this address.
        #[arg(long)]
        admin_listen: Option<SocketAddr>,
    },
    /// List the queries of a running `run --admin-listen`.
    List {
        #[arg(long, default_value = "127.0.0.1:7070")]
        endpoint: String,
        #[arg(long)]
        active_only: bool,
    },
    Status {
        #[arg(long, default_value = "127.0.0.1:7070")]
        endpoint: String,
        /// Query id or name.
        query: String,
    },
    Progress {
        #[arg(long, default_value = "127.0.0.1:7070")]
        endpoint: String,
        query: String,
    },
    Stop {
        #[arg(long, default_value = "127.0.0.1:7070")]
        endpoint: String,
        query: String,
    },
    /// Print the contents of a memory table.
    Table {
        #[arg(long, default_value = "127.0.0.1:7070")]
        endpoint: String,
        table: String,
    },
}

fn parse_interval_arg(s: &str) -> Result<Duration, String> {
    parse_interval(s).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            dir,
            config,
            extension,
            name,
            output_mode,
            trigger_interval,
            available_now,
            max_units_per_cycle,
            checkpoint_location,
            admin_listen,
        } => {
            let json = std::fs::read_to_string(&config)
                .with_context(|| format!("read config {} failed", config.display()))?;
            let mut config = QueryConfig::from_json(&json)?;
            if let Some(name) = name {
                config = config.with_name(name);
            }
            if let Some(mode) = output_mode {
                config = config.with_output_mode(mode);
            }
            let mut trigger = config.trigger;
            if let Some(interval) = trigger_interval {
                trigger.mode = TriggerMode::ProcessingTime { interval };
            } else if available_now {
                trigger.mode = TriggerMode::AvailableNow;
            }
            if let Some(max_units) = max_units_per_cycle {
                trigger = trigger.with_max_units_per_cycle(max_units);
            }
            config = config.with_trigger(trigger);
            if let Some(path) = checkpoint_location {
                config = config.with_checkpoint_location(path);
            }

            let mut source = DirectorySource::new(&dir);
            if let Some(ext) = extension {
                source = source.with_extension(ext);
            }
            let manager = Arc::new(QueryManager::new());
            let handle = manager.start(config, Arc::new(source))?;
            println!("query {} started over {}", handle.id(), dir.display());

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let admin = match admin_listen {
                Some(addr) => {
                    let listener = TcpListener::bind(addr)
                        .await
                        .with_context(|| format!("bind admin endpoint {addr} failed"))?;
                    println!("admin endpoint listening on {}", listener.local_addr()?);
                    Some(tokio::spawn(serve_with_shutdown(
                        Arc::clone(&manager),
                        listener,
                        shutdown_rx,
                    )))
                }
                None => None,
            };

            watch_query(&handle).await;

            let _ = shutdown_tx.send(true);
            if let Some(admin) = admin {
                match admin.await {
                    Ok(result) => result?,
                    Err(join_err) => return Err(join_err.into()),
                }
            }
            let status = handle.status();
            if status.state == QueryState::Failed {
                anyhow::bail!(
                    "query failed: {}",
                    status.last_error.unwrap_or_else(|| status.message.clone())
                );
            }
        }
        Commands::List {
            endpoint,
            active_only,
        } => {
            let mut client = QueryAdminClient::connect(normalize_endpoint(&endpoint)).await?;
            let response = client
                .list_queries(Request::new(rpc::ListQueriesRequest { active_only }))
                .await?
                .into_inner();
            println!("queries={}", response.queries.len());
            for q in response.queries {
                println!(
                    "id={} name={} state={} cycles={}",
                    q.id,
                    q.name.as_deref().unwrap_or("-"),
                    q.state,
                    q.cycles_run
                );
            }
            println!("tables={}", response.tables.join(","));
        }
        Commands::Status { endpoint, query } => {
            let mut client = QueryAdminClient::connect(normalize_endpoint(&endpoint)).await?;
            let s = client
                .get_query_status(Request::new(rpc::QueryRef { query }))
                .await?
                .into_inner();
            println!(
                "query status: id={} name={} state={} phase={} message={}",
                s.id,
                s.name.as_deref().unwrap_or("-"),
                s.state,
                s.phase,
                s.message
            );
            println!(
                "cycles={} failures={} next_batch={} last_unit={} units_seen={} watermark={}",
                s.cycles_run,
                s.consecutive_failures,
                s.next_batch_id,
                s.last_unit.as_deref().unwrap_or("-"),
                s.units_seen,
                s.watermark
                    .map(format_event_time)
                    .unwrap_or_else(|| "-".to_string())
            );
            if let Some(err) = s.last_error {
                println!("last_error={err}");
            }
        }
        Commands::Progress { endpoint, query } => {
            let mut client = QueryAdminClient::connect(normalize_endpoint(&endpoint)).await?;
            let response = client
                .get_recent_progress(Request::new(rpc::QueryRef { query }))
                .await?
                .into_inner();
            for p in response.progress {
                let at = DateTime::from_timestamp_millis(p.timestamp)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default();
                println!(
                    "batch={} at={} units={} input={} skipped={} late={} emitted={} state={} evicted={} took={}ms",
                    p.batch_id,
                    at,
                    p.units.len(),
                    p.input_rows,
                    p.skipped_rows,
                    p.late_rows,
                    p.emitted_rows,
                    p.state_rows,
                    p.evicted_rows,
                    p.duration_ms
                );
            }
        }
        Commands::Stop { endpoint, query } => {
            let mut client = QueryAdminClient::connect(normalize_endpoint(&endpoint)).await?;
            let s = client
                .stop_query(Request::new(rpc::QueryRef { query }))
                .await?
                .into_inner();
            println!("stop result: id={} state={}", s.id, s.state);
        }
        Commands::Table { endpoint, table } => {
            let mut client = QueryAdminClient::connect(normalize_endpoint(&endpoint)).await?;
            let reply = client
                .read_table(Request::new(rpc::ReadTableRequest { table }))
                .await?
                .into_inner();
            match reply.batch_id {
                Some(id) => println!("table {} as of batch {id}", reply.table),
                None => println!("table {} (no batch yet)", reply.table),
            }
            for row in reply.rows {
                println!(
                    "{}\t[{}, {})\t{}",
                    row.key,
                    format_event_time(row.window_start),
                    format_event_time(row.window_end),
                    row.value
                );
            }
        }
    }
    Ok(())
}

/// Print the memory table after every committed batch until the query ends.
async fn watch_query(handle: &QueryHandle) {
    let mut printed: Option<BatchId> = None;
    let mut ticker = tokio::time::interval(PROGRESS_POLL);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!(query = %handle.id(), "interrupted, stopping query");
                let stopping = handle.clone();
                if let Err(err) = tokio::task::spawn_blocking(move || stopping.stop()).await {
                    warn!(error = %err, "stop task failed");
                }
                return;
            }
            _ = ticker.tick() => {}
        }

        // Read liveness before progress so a batch committed just before
        // the query ends is still printed.
        let active = handle.is_active();
        let latest = handle.last_progress().map(|p| p.batch_id);
        if latest.is_some() && latest != printed {
            printed = latest;
            if let Some(table) = handle.table() {
                println!("{}", table.render());
            }
        }
        if !active {
            return;
        }
    }
}

fn normalize_endpoint(input: &str) -> String {
    if input.starts_with("http://") || input.starts_with("https://") {
        input.to_string()
    } else {
        format!("http://{}", input)
    }
}
