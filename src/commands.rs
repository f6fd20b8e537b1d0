//! Subcommand implementations.

use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::cache::{CacheStorage, SqliteStorage};
use crate::config::Config;
use crate::proxy::{self, ProxyState};
use crate::worker::{
  HttpNetwork, InstallReport, Intercept, Network, OfflineWorker, Registration, Request,
};

/// Everything a subcommand needs, built once from the resolved config.
pub struct Context {
  pub config: Config,
  pub storage: Arc<dyn CacheStorage>,
  pub network: Arc<dyn Network>,
}

impl Context {
  pub fn new(config: Config) -> Result<Self> {
    let path = config.storage_path()?;
    let storage: Arc<dyn CacheStorage> = Arc::new(SqliteStorage::open(&path)?);
    let network: Arc<dyn Network> = Arc::new(
      HttpNetwork::new(config.network.timeout()).map_err(|e| eyre!("{}", e))?,
    );

    Ok(Self {
      config,
      storage,
      network,
    })
  }

  fn worker(&self, config: &Config) -> Result<OfflineWorker> {
    OfflineWorker::new(config, self.network.clone(), self.storage.clone())
  }
}

fn print_install_report(report: &InstallReport) {
  println!("Installed {}", report.version);
  for path in &report.cached {
    println!("  cached   {}", path);
  }
  for skipped in &report.skipped {
    println!("  skipped  {} ({})", skipped.path, skipped.reason);
  }
}

/// Pre-warm the current generation without activating it.
pub async fn install(ctx: &Context) -> Result<()> {
  let worker = ctx.worker(&ctx.config)?;
  let report = worker.install().await?;
  print_install_report(&report);
  Ok(())
}

/// Delete every generation but the current one.
pub fn activate(ctx: &Context) -> Result<()> {
  let worker = ctx.worker(&ctx.config)?;
  let report = worker.activate()?;
  if report.deleted.is_empty() {
    println!("{} is current, nothing to delete", report.version);
  } else {
    println!("{} is current, deleted:", report.version);
    for name in &report.deleted {
      println!("  {}", name);
    }
  }
  Ok(())
}

/// Options for a one-off fetch through the worker.
#[derive(Debug, Clone)]
pub struct FetchOptions {
  pub path: String,
  pub method: String,
  pub navigate: bool,
  pub include_headers: bool,
}

/// Run a single request through the worker and print the outcome.
pub async fn fetch(ctx: &Context, opts: &FetchOptions) -> Result<()> {
  let worker = ctx.worker(&ctx.config)?;
  let mut request = worker.request_for(&opts.path)?.with_method(&opts.method);
  if opts.navigate {
    request = Request::navigate(request.url).with_method(&opts.method);
  }

  let result = match worker.intercept(&request).await {
    Ok(Intercept::Respond(result)) => result,
    Ok(Intercept::Ignored) => return Err(eyre!("{} is not intercepted", request.url)),
    Err(e) => return Err(eyre!("{} {} failed: {}", request.method, request.url, e)),
  };

  let response = result.response;
  eprintln!(
    "{} {} -> {} ({})",
    request.method,
    request.url,
    response.status,
    result.source.as_str()
  );

  let mut stdout = std::io::stdout().lock();
  if opts.include_headers {
    for (name, value) in &response.headers {
      writeln!(stdout, "{}: {}", name, value)?;
    }
    writeln!(stdout)?;
  }
  stdout.write_all(&response.body)?;
  stdout.flush()?;
  Ok(())
}

/// List cache generations.
pub fn status(ctx: &Context, show_entries: bool) -> Result<()> {
  let current = &ctx.config.cache.version;
  let generations = ctx.storage.generations()?;

  if generations.is_empty() {
    println!("No cache generations (current version: {})", current);
    return Ok(());
  }

  for generation in &generations {
    let marker = if &generation.name == current { "*" } else { " " };
    println!(
      "{} {:<32} {:>6} entries  created {}",
      marker,
      generation.name,
      generation.entries,
      generation.created_at.format("%Y-%m-%d %H:%M:%S")
    );
  }

  if show_entries {
    for key in ctx.storage.entry_keys(current)? {
      println!("    {}", key);
    }
  }
  Ok(())
}

/// Delete the named generations, or all of them.
pub fn purge(ctx: &Context, names: &[String], all: bool) -> Result<()> {
  let targets: Vec<String> = if all {
    ctx.storage.generations()?.into_iter().map(|g| g.name).collect()
  } else if names.is_empty() {
    return Err(eyre!("Name at least one generation to purge, or pass --all"));
  } else {
    names.to_vec()
  };

  for name in &targets {
    if ctx.storage.delete_generation(name)? {
      println!("Deleted {}", name);
    } else {
      println!("No generation named {}", name);
    }
  }
  Ok(())
}

/// Run the caching proxy until Ctrl-C.
///
/// On SIGHUP the config file is read again and the resulting version is
/// installed and activated while the current one keeps serving.
pub async fn serve(ctx: &Context, config_path: Option<PathBuf>, overrides: Overrides) -> Result<()> {
  let registration = Arc::new(Registration::new());
  let report = registration.register(ctx.worker(&ctx.config)?).await?;
  print_install_report(&report);

  let state = Arc::new(ProxyState {
    registration: registration.clone(),
    origin: ctx.config.origin_url()?,
    network: ctx.network.clone(),
    timeout: ctx.config.network.timeout(),
  });

  let listen = ctx.config.proxy.listen;
  let listener = TcpListener::bind(listen)
    .await
    .map_err(|e| eyre!("Failed to bind {}: {}", listen, e))?;

  #[cfg(unix)]
  spawn_reloader(
    registration,
    ctx.network.clone(),
    ctx.storage.clone(),
    config_path,
    overrides,
  )?;
  #[cfg(not(unix))]
  let _ = (config_path, overrides);

  proxy::run(listener, state, async {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutting down");
  })
  .await
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
  pub origin: Option<String>,
  pub version: Option<String>,
}

impl Overrides {
  pub fn apply(&self, mut config: Config) -> Config {
    if let Some(origin) = &self.origin {
      config.origin = Some(origin.clone());
    }
    if let Some(version) = &self.version {
      config.cache.version = version.clone();
    }
    config
  }
}

#[cfg(unix)]
fn spawn_reloader(
  registration: Arc<Registration>,
  network: Arc<dyn Network>,
  storage: Arc<dyn CacheStorage>,
  config_path: Option<PathBuf>,
  overrides: Overrides,
) -> Result<()> {
  use tokio::signal::unix::{signal, SignalKind};

  let mut hangup =
    signal(SignalKind::hangup()).map_err(|e| eyre!("Failed to listen for SIGHUP: {}", e))?;

  tokio::spawn(async move {
    while hangup.recv().await.is_some() {
      info!("SIGHUP received, reloading configuration");
      let worker = Config::load(config_path.as_deref())
        .map(|config| overrides.apply(config))
        .and_then(|config| OfflineWorker::new(&config, network.clone(), storage.clone()));

      match worker {
        Ok(worker) => match registration.register(worker).await {
          Ok(report) => info!(
            version = %report.version,
            cached = report.cached.len(),
            skipped = report.skipped.len(),
            "New version active"
          ),
          Err(e) => error!(error = %e, "Failed to install new version, keeping current one"),
        },
        Err(e) => error!(error = %e, "Failed to reload configuration"),
      }
    }
  });

  Ok(())
}
