use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use shelfsync::cache::{CacheStorage, SqliteStorage};
use shelfsync::http::{Destination, Request};
use shelfsync::network::HttpNetwork;
use shelfsync::offline::SnapshotCategory;
use shelfsync::{logging, Config, ServiceWorker};

#[derive(Parser, Debug)]
#[command(name = "shelfsync")]
#[command(about = "Offline cache and sync outbox for the library reservation app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/shelfsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Application origin, overrides the config file
  #[arg(short, long)]
  origin: Option<String>,

  /// Also log to stderr
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Precache the manifests and activate this version
  Install,
  /// Delete caches from other versions
  Activate,
  /// Fetch a URL through the worker
  Fetch {
    url: String,
    /// Treat as a full-page navigation (always GET)
    #[arg(long, conflicts_with = "method")]
    navigate: bool,
    /// Treat as an image request
    #[arg(long, conflicts_with = "navigate")]
    image: bool,
    #[arg(long)]
    method: Option<String>,
  },
  /// Queue a mutation for later replay
  Enqueue {
    /// Action kind, e.g. reservation.create
    kind: String,
    /// JSON payload
    payload: String,
  },
  /// List pending actions
  Outbox,
  /// List actions discarded after too many failed replays
  Discarded {
    /// Drop a discarded action once it has been dealt with
    #[arg(long, value_name = "ID")]
    forget: Option<String>,
  },
  /// Replay pending actions now
  Sync {
    #[arg(default_value = "sync-reservations")]
    tag: String,
  },
  /// List caches and their entry counts
  Caches,
  /// Record counts in the offline store
  Stats,
  /// Wipe the offline store, e.g. at sign-out
  Clear,
  /// Save or show offline snapshots
  #[command(subcommand)]
  Snapshot(SnapshotCommand),
  /// Look up, store or purge cached query results
  Query {
    query: Option<String>,
    /// Store this JSON as the result of the query
    #[arg(long, requires = "query")]
    save: Option<String>,
    /// Delete results older than the freshness window
    #[arg(long, conflicts_with_all = ["query", "save"])]
    purge: bool,
  },
  /// Render the notification for a push payload
  Push { text: Option<String> },
}

#[derive(Subcommand, Debug)]
enum SnapshotCommand {
  /// Replace the snapshot of a collection for one owner
  Save {
    /// books, reservations or notifications
    category: String,
    owner: String,
    /// JSON payload
    payload: String,
  },
  /// Show one owner's snapshot, or every snapshot in the category
  Show { category: String, owner: Option<String> },
}

fn parse_payload(payload: &str) -> Result<serde_json::Value> {
  serde_json::from_str(payload).map_err(|e| eyre!("Payload is not valid JSON: {}", e))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  let text =
    serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to render output: {}", e))?;
  println!("{}", text);
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = Config::load(args.config.as_deref(), args.origin.as_deref())?;
  let _log_guard = logging::init(&Config::data_dir()?.join("logs"), args.verbose)?;

  let storage = SqliteStorage::open(&config.cache_db_path()?)?;
  let network = HttpNetwork::new(config.request_timeout_secs.map(Duration::from_secs))?;
  let worker = ServiceWorker::new(config, storage, Arc::new(network));

  match args.command {
    Command::Install => {
      let (installed, activated) = worker.start().await?;
      print_json(&installed)?;
      print_json(&activated)?;
    }
    Command::Activate => {
      if !worker.resume()? {
        return Err(eyre!("Version {} is not installed", worker.config().version));
      }
      print_json(&worker.handle_activate().await?)?;
    }
    Command::Fetch {
      url,
      navigate,
      image,
      method,
    } => {
      if !worker.resume()? {
        eprintln!("Worker not installed, request goes straight to the network");
      }

      let mut request = Request::parse(&url)?;
      if navigate {
        request = Request::navigate(request.url);
      } else if image {
        request = request.with_destination(Destination::Image);
      }
      if let Some(method) = method {
        let method = Method::from_bytes(method.to_uppercase().as_bytes())
          .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;
        request = request.with_method(method);
      }

      let result = worker.handle_fetch(&request).await?;
      eprintln!("{} ({})", result.data.status, result.source);
      println!("{}", result.data.text());
    }
    Command::Enqueue { kind, payload } => {
      println!("{}", worker.enqueue_action(&kind, &parse_payload(&payload)?)?);
    }
    Command::Outbox => {
      print_json(&worker.offline_store()?.pending_actions()?)?;
    }
    Command::Discarded { forget: None } => {
      print_json(&worker.offline_store()?.discarded_actions()?)?;
    }
    Command::Discarded { forget: Some(id) } => {
      if !worker.offline_store()?.forget_discarded(&id)? {
        return Err(eyre!("No discarded action with id {}", id));
      }
      info!(id = %id, "Forgot discarded action");
    }
    Command::Sync { tag } => match worker.handle_sync(&tag).await? {
      Some(report) => print_json(&report)?,
      None => eprintln!("Nothing to replay for tag {}", tag),
    },
    Command::Caches => {
      let storage = worker.storage();
      for name in storage.cache_names()? {
        println!("{}\t{}", name, storage.keys(&name)?.len());
      }
    }
    Command::Stats => {
      print_json(&worker.offline_store()?.stats()?)?;
    }
    Command::Clear => {
      worker.offline_store()?.clear()?;
      info!("Offline store cleared");
    }
    Command::Snapshot(SnapshotCommand::Save {
      category,
      owner,
      payload,
    }) => {
      let store = worker.offline_store()?;
      let snapshot = store.save_snapshot(category.parse::<SnapshotCategory>()?, &owner, &parse_payload(&payload)?)?;
      print_json(&snapshot)?;
    }
    Command::Snapshot(SnapshotCommand::Show { category, owner }) => {
      let store = worker.offline_store()?;
      let category: SnapshotCategory = category.parse()?;
      match owner {
        Some(owner) => match store.snapshot(category, &owner)? {
          Some(snapshot) => print_json(&snapshot)?,
          None => return Err(eyre!("No {} snapshot for {}", category, owner)),
        },
        None => print_json(&store.snapshots(category)?)?,
      }
    }
    Command::Query { purge: true, .. } => {
      let purged = worker.offline_store()?.purge_expired_queries()?;
      println!("{}", purged);
    }
    Command::Query {
      query: Some(query),
      save: Some(payload),
      ..
    } => {
      worker
        .offline_store()?
        .cache_query(&query, &parse_payload(&payload)?)?;
    }
    Command::Query {
      query: Some(query),
      save: None,
      ..
    } => match worker.offline_store()?.cached_query(&query)? {
      Some(result) => print_json(&result)?,
      None => return Err(eyre!("No fresh result cached for '{}'", query)),
    },
    Command::Query { query: None, .. } => {
      return Err(eyre!("Give a query, or --purge"));
    }
    Command::Push { text } => {
      print_json(&worker.handle_push(text.as_deref()))?;
    }
  }

  Ok(())
}
