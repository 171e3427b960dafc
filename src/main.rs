mod app;
mod cache;
mod commands;
mod config;
mod remote;
mod render;
mod sync;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::app::App;
use crate::cache::{CacheStore, NoopStore, SqliteStore};
use crate::commands::{Action, Input};
use crate::config::Config;
use crate::remote::{RemoteGateway, RestGateway};

#[derive(Parser, Debug)]
#[command(name = "tdo")]
#[command(about = "A todo tracker with an offline-capable local cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/tdo/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Cli>,
}

#[derive(Subcommand, Debug)]
enum Cli {
  /// Interactive shell (the default)
  Shell,
  #[command(flatten)]
  Action(Action),
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Held until exit so buffered log lines are flushed
  let _guard = init_logging()?;

  let config = Config::load(args.config.as_deref())?;
  let gateway = RestGateway::new(&config)?;

  if config.cache.enabled {
    let store = match &config.cache.path {
      Some(path) => SqliteStore::open(path)?,
      None => SqliteStore::open_for_origin(&config.remote.origin()?)?,
    };
    run(&config, gateway, Arc::new(store), args.command).await
  } else {
    tracing::info!("cache disabled");
    run(&config, gateway, Arc::new(NoopStore), args.command).await
  }
}

/// Log to `<data_dir>/tdo/tdo.log`; stdout belongs to command output.
fn init_logging() -> Result<Option<WorkerGuard>> {
  let Some(dir) = dirs::data_dir().map(|d| d.join("tdo")) else {
    return Ok(None);
  };
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(&dir, "tdo.log"));
  let filter = EnvFilter::try_from_env("TDO_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::registry()
    .with(filter)
    .with(
      tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false),
    )
    .init();

  Ok(Some(guard))
}

async fn run<G: RemoteGateway, S: CacheStore>(
  config: &Config,
  gateway: G,
  store: Arc<S>,
  command: Option<Cli>,
) -> Result<()> {
  let mut app = App::new(gateway, store, config);

  match command {
    None | Some(Cli::Shell) => shell(&mut app).await,
    Some(Cli::Action(action)) => {
      let result = app.execute(action).await;
      print_notices(&mut app);
      println!("{}", result?);
      Ok(())
    }
  }
}

async fn shell<G: RemoteGateway, S: CacheStore>(app: &mut App<G, S>) -> Result<()> {
  let mut lines = BufReader::new(tokio::io::stdin()).lines();

  loop {
    print!("tdo> ");
    std::io::stdout().flush()?;

    let Some(line) = lines.next_line().await? else {
      println!();
      break;
    };

    match commands::parse_line(&line) {
      Input::Empty => continue,
      Input::Quit => break,
      Input::Usage(text) => println!("{}", text.trim_end()),
      Input::Unknown(suggestions) => {
        if suggestions.is_empty() {
          println!("Unknown command. Type `help` for a list of commands.");
        } else {
          let names: Vec<&str> = suggestions.iter().map(|c| c.name).collect();
          println!("Unknown command. Did you mean: {}?", names.join(", "));
        }
      }
      Input::Action(action) => match app.execute(action).await {
        Ok(output) => println!("{}", output),
        Err(e) => println!("Error: {}", e),
      },
    }

    print_notices(app);
  }

  Ok(())
}

fn print_notices<G: RemoteGateway, S: CacheStore>(app: &mut App<G, S>) {
  for notice in app.take_notices() {
    eprintln!("{}", render::notice_line(&notice));
  }
}
