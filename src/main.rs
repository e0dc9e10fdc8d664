use std::error::Error as StdError;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tokio::io::AsyncReadExt;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use graphos_resources::reconciler::random_revision;
use graphos_resources::secrets::{ApiKeySource, LocalSecretResolver, SecretRef, resolve_api_key};
use graphos_resources::supergraph_config::load_subgraphs;
use graphos_resources::{
    CustomResourceDispatcher, Error, LifecycleEvent, RegistryClient, Settings,
    SubgraphReconciler, VariantReadinessPoller, server,
};

type BoxError = Box<dyn StdError + Send + Sync>;

/// GraphOS custom resource provider
#[derive(Parser, Debug)]
#[command(name = "graphos-resources", version, about, long_about = None)]
struct Cli {
    /// YAML settings file overlaid on the defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Registry GraphQL endpoint
    #[arg(long, global = true, env = "GRAPHOS_REGISTRY_URL")]
    registry_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve lifecycle events over HTTP
    Serve {
        /// Address to listen on
        #[arg(long)]
        listen: Option<SocketAddr>,
    },

    /// Handle one lifecycle event and print the response
    Handle {
        /// Event JSON file; stdin when omitted
        #[arg(long)]
        event: Option<PathBuf>,
    },

    /// Reconcile a supergraph file into one variant of an existing graph
    Sync(SyncArgs),
}

#[derive(Args, Debug)]
struct SyncArgs {
    #[arg(long)]
    graph_id: String,

    /// Supergraph YAML file listing the variant's subgraphs
    #[arg(long)]
    supergraph: PathBuf,

    #[arg(long, default_value = "current")]
    variant: String,

    #[arg(long, env = "APOLLO_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Secret reference for the key, `env:NAME` or `file:PATH`
    #[arg(long, conflicts_with = "api_key")]
    api_key_secret: Option<String>,

    /// Wait for composition and print the router URL
    #[arg(long)]
    wait: bool,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut settings = match &cli.config {
        Some(path) => Settings::from_file(path)?,
        None => Settings::default(),
    };
    if let Some(url) = cli.registry_url {
        settings.registry_url = url;
    }

    match cli.command {
        Commands::Serve { listen } => {
            if let Some(listen) = listen {
                settings.listen = listen;
            }
            settings.validate()?;
            let addr = settings.listen;
            let dispatcher = Arc::new(CustomResourceDispatcher::with_http(settings));
            server::serve(addr, dispatcher).await?;
        }
        Commands::Handle { event } => {
            settings.validate()?;
            let raw = match event {
                Some(path) => tokio::fs::read_to_string(&path).await?,
                None => {
                    let mut raw = String::new();
                    tokio::io::stdin().read_to_string(&mut raw).await?;
                    raw
                }
            };
            let event: LifecycleEvent = serde_json::from_str(&raw)
                .map_err(|e| Error::validation(format!("Invalid lifecycle event: {}", e)))?;
            let response = CustomResourceDispatcher::with_http(settings)
                .handle(&event)
                .await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Sync(args) => {
            settings.validate()?;
            run_sync(settings, args).await?;
        }
    }
    Ok(())
}

async fn run_sync(settings: Settings, args: SyncArgs) -> Result<(), BoxError> {
    let source = match (args.api_key, args.api_key_secret) {
        (Some(key), _) => ApiKeySource::Literal(key),
        (None, Some(reference)) => ApiKeySource::Secret(reference.parse::<SecretRef>()?),
        (None, None) => {
            return Err(Error::missing_credential(
                "pass --api-key, set APOLLO_KEY or pass --api-key-secret",
            )
            .into());
        }
    };
    let api_key = resolve_api_key(&source, &LocalSecretResolver).await?;
    let registry = Arc::new(RegistryClient::new(&api_key, &settings)?);

    let subgraphs = load_subgraphs(&args.supergraph)?;
    let revision = random_revision();
    info!(
        graph_id = %args.graph_id,
        variant = %args.variant,
        subgraphs = subgraphs.len(),
        revision = %revision,
        "syncing supergraph"
    );

    let report = SubgraphReconciler::new(registry.clone())
        .synchronize_variant(&args.graph_id, &revision, &args.variant, &subgraphs)
        .await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if args.wait {
        let url = VariantReadinessPoller::new(registry)
            .with_interval(settings.poll_interval)
            .with_max_wait(settings.max_wait)
            .get_url(&args.graph_id, &args.variant)
            .await?;
        println!("{}", url);
    }
    Ok(())
}
