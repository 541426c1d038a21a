mod config;
mod http;
mod net;
mod policy;
mod queue;
mod store;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use crate::http::{Method, Request};
use crate::net::HttpNetwork;
use crate::queue::SqliteQueue;
use crate::store::SqliteStore;
use crate::worker::Worker;

#[derive(Parser, Debug)]
#[command(name = "offramp")]
#[command(about = "An offline-capable HTTP request cache with deferred replay")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offramp/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Prime the static store with the shell manifest and sweep old generations
  Install,
  /// Fetch a path through the offline cache; body goes to stdout
  Fetch {
    /// Path relative to the configured origin, e.g. /api/resumes
    path: String,

    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Request body
    #[arg(short, long)]
    data: Option<String>,

    /// Request header, "name: value"; repeatable
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
  },
  /// Replay deferred actions recorded while offline
  Sync,
  /// Show store and queue statistics
  Status,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("offramp=info")),
    )
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();
  let config = config::Config::load(args.config.as_deref())?;

  let net = HttpNetwork::new(Duration::from_secs(config.cache.network_timeout_secs))?;
  let backend = match &config.cache.db_path {
    Some(path) => SqliteStore::open_at(path)?,
    None => SqliteStore::open()?,
  };
  let queue = match &config.queue.db_path {
    Some(path) => SqliteQueue::open_at(path)?,
    None => SqliteQueue::open()?,
  };

  let worker = Worker::new(&config, net, backend, queue)?;

  match args.command {
    Command::Install => {
      worker.on_install().await?;
      worker.on_activate().await?;
      println!("installed");
    }
    Command::Fetch {
      path,
      method,
      data,
      headers,
    } => {
      let mut req = Request::new(Method::parse(&method)?, worker.request_url(&path)?);
      for header in &headers {
        let (name, value) = header
          .split_once(':')
          .ok_or_else(|| eyre!("Invalid header (expected \"name: value\"): {}", header))?;
        req = req.with_header(name.trim(), value.trim());
      }
      if let Some(data) = data {
        req = req.with_body(data.into_bytes());
      }

      let resp = worker.on_fetch(&req).await?;
      eprintln!("HTTP {}", resp.status);
      if let Some(served_by) = resp.header(policy::SERVED_BY_HEADER) {
        eprintln!("served by: {}", served_by);
      }

      use std::io::Write;
      std::io::stdout().write_all(&resp.body)?;
    }
    Command::Sync => {
      let report = worker.on_sync().await?;
      println!(
        "replayed {}, failed {}, abandoned {}",
        report.replayed, report.failed, report.abandoned
      );
    }
    Command::Status => {
      let status = worker.status()?;
      println!("static store entries: {}", status.static_entries);
      println!("api store entries:    {}", status.api_entries);
      println!("pending actions:      {}", status.pending_actions);
      println!("abandoned actions:    {}", status.abandoned_actions);
    }
  }

  Ok(())
}
