mod cache;
mod commands;
mod config;
mod logging;
mod proxy;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;

use commands::{Context, FetchOptions, Overrides};

#[derive(Parser, Debug)]
#[command(name = "gpcache")]
#[command(about = "Offline cache proxy for the gym-progress web app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/gpcache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// App origin, overrides `origin` from the config file
  #[arg(long, global = true)]
  origin: Option<String>,

  /// Cache version tag, overrides `cache.version`
  #[arg(long = "version-tag", global = true)]
  version_tag: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install the current version and run the caching proxy
  Serve,
  /// Pre-warm the current version's static assets
  Install,
  /// Make the current version the only one on disk
  Activate,
  /// Send one request through the worker and print the response
  Fetch {
    /// Path on the origin, e.g. /progress
    path: String,
    /// Treat the request as a page navigation
    #[arg(short, long)]
    navigate: bool,
    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Print response headers before the body
    #[arg(short, long)]
    include: bool,
  },
  /// List cache generations
  Status {
    /// Also list the keys stored in the current generation
    #[arg(short, long)]
    entries: bool,
  },
  /// Delete cache generations
  Purge {
    /// Generations to delete
    names: Vec<String>,
    /// Delete every generation, including the current one
    #[arg(long)]
    all: bool,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Only the long-running proxy writes a log file
  let log_dir = match args.command {
    Command::Serve => Some(logging::default_log_dir()?),
    _ => None,
  };
  let _guard = logging::init(log_dir)?;

  let overrides = Overrides {
    origin: args.origin,
    version: args.version_tag,
  };
  let config = overrides.apply(config::Config::load(args.config.as_deref())?);
  config.validate()?;

  let ctx = Context::new(config)?;

  match args.command {
    Command::Serve => commands::serve(&ctx, args.config, overrides).await,
    Command::Install => commands::install(&ctx).await,
    Command::Activate => commands::activate(&ctx),
    Command::Fetch {
      path,
      navigate,
      method,
      include,
    } => {
      let opts = FetchOptions {
        path,
        method,
        navigate,
        include_headers: include,
      };
      commands::fetch(&ctx, &opts).await
    }
    Command::Status { entries } => commands::status(&ctx, entries),
    Command::Purge { names, all } => commands::purge(&ctx, &names, all),
  }
}
