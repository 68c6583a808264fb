//! Packgate binary: assemble the stores, chains, and proxy service from
//! configuration and serve until interrupted.
//!
//! SIGHUP rebuilds the chains from the configuration file without dropping
//! live connections or parked pushes. SIGINT and SIGTERM drain the listener.

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use mimalloc::MiMalloc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use url::Url;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

use packgate::chain::Chains;
use packgate::config::{Cli, CompiledRules, Config};
use packgate::error::GatewayError;
use packgate::git::GitRunner;
use packgate::plugin::{PluginLoader, PluginRegistry};
use packgate::proxy::forwarder::Forwarder;
use packgate::proxy::ProxyService;
use packgate::store::{MemoryStore, RepoStore};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Compile the rules, assemble the canonical chains, and splice in any
/// configured plugins. Shared by startup and reload.
fn build_chains(config: &Config, store: &Arc<MemoryStore>) -> Result<Chains, GatewayError> {
    let rules = Arc::new(CompiledRules::from_config(&config.commit_config)?);
    let mut chains = Chains::build(
        config,
        rules,
        store.clone(),
        store.clone(),
        store.clone(),
    );

    let mut loader = PluginLoader::new(
        config.plugins.clone(),
        PluginRegistry::default(),
        GitRunner::new(&config.subprocess),
    );
    loader.load();
    chains.insert_plugins(loader.push_plugins, loader.pull_plugins);

    Ok(chains)
}

/// Re-read the configuration and rebuild the chains over the existing
/// stores. Newly authorised repositories are seeded; parked pushes and
/// their audit trails survive the swap.
async fn reload(
    path: &Path,
    upstream: Option<&Url>,
    store: &Arc<MemoryStore>,
) -> Result<Chains, GatewayError> {
    let config = load_config(path, upstream)?;
    for repo in config.authorised_repos()? {
        store.insert(repo).await;
    }
    build_chains(&config, store)
}

/// Load the configuration file, with the command-line upstream override
/// applied when one was given.
fn load_config(path: &Path, upstream: Option<&Url>) -> Result<Config, GatewayError> {
    let mut config = Config::load(path)?;
    if let Some(upstream) = upstream {
        config.proxy_url = upstream.to_string();
    }
    Ok(config)
}

async fn run(args: Cli) -> Result<(), GatewayError> {
    let config = load_config(&args.config, args.upstream.as_ref())?;
    let store = Arc::new(MemoryStore::from_config(&config)?);
    let chains = build_chains(&config, &store)?;
    let forwarder = Forwarder::new(config.proxy_url.clone())?;
    let service = Arc::new(ProxyService::new(chains, forwarder, config.max_body_bytes));

    info!(
        config_file = %args.config.display(),
        listen = %args.listen,
        upstream = %config.proxy_url,
        "packgate starting"
    );

    let shutdown = CancellationToken::new();

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let ctrl_c = tokio::signal::ctrl_c();

            #[cfg(unix)]
            {
                let mut sigterm = match signal(SignalKind::terminate()) {
                    Ok(stream) => stream,
                    Err(e) => {
                        error!("failed to register SIGTERM handler: {e}");
                        return;
                    }
                };
                tokio::select! {
                    _ = ctrl_c => info!("received SIGINT"),
                    _ = sigterm.recv() => info!("received SIGTERM"),
                }
            }

            #[cfg(not(unix))]
            {
                let _ = ctrl_c.await;
                info!("received SIGINT");
            }

            shutdown.cancel();
        });
    }

    #[cfg(unix)]
    {
        let config_path = args.config.clone();
        let upstream = args.upstream.clone();
        let store = store.clone();
        let service = service.clone();
        tokio::spawn(async move {
            let mut sighup = match signal(SignalKind::hangup()) {
                Ok(stream) => stream,
                Err(e) => {
                    error!("failed to register SIGHUP handler: {e}");
                    return;
                }
            };
            while sighup.recv().await.is_some() {
                match reload(&config_path, upstream.as_ref(), &store).await {
                    Ok(chains) => {
                        service.install_chains(chains);
                        info!("Configuration reloaded");
                    }
                    Err(e) => error!("Reload failed, keeping previous configuration: {e}"),
                }
            }
        });
    }

    service.serve(args.listen, shutdown).await
}

#[tokio::main]
async fn main() {
    let args = Cli::parse();
    init_tracing(args.log_json);

    if let Err(e) = run(args).await {
        error!("{e}");
        std::process::exit(1);
    }
}
