use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use portcullis::{
    AppState, build_app,
    auth::{
        MemoryCorrelationStore, SamlProvider, SharedCorrelationStore, SsoProviderRegistry,
        ensure_key_material,
        metadata::{SpEndpoints, sp_metadata_xml},
        start_correlation_sweeper,
    },
    config::ServiceConfig,
    db::{MemoryUserRepo, UserRepo},
    observability,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// CLI arguments for Portcullis
#[derive(Parser, Debug)]
#[command(version, about = "Portcullis SAML service provider", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (defaults to ./portcullis.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Start the server (default)
    Serve,
    /// Print the SP metadata document, creating key material if configured to
    Metadata {
        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Load and validate the configuration file, then exit
    CheckConfig,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Some(Command::Metadata { output }) => run_metadata_export(args.config.as_deref(), output),
        Some(Command::CheckConfig) => run_check_config(args.config.as_deref()),
        Some(Command::Serve) | None => run_server(args.config.as_deref()).await,
    }
}

fn resolve_config_path(explicit_path: Option<&str>) -> Result<PathBuf, String> {
    let path = PathBuf::from(explicit_path.unwrap_or("portcullis.toml"));
    if !path.exists() {
        return Err(format!("Config file not found: {}", path.display()));
    }
    Ok(path)
}

fn load_config(explicit_path: Option<&str>) -> (PathBuf, ServiceConfig) {
    let config_path = match resolve_config_path(explicit_path) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    match ServiceConfig::from_file(&config_path) {
        Ok(config) => (config_path, config),
        Err(e) => {
            eprintln!(
                "Failed to load config from {}: {}",
                config_path.display(),
                e
            );
            std::process::exit(1);
        }
    }
}

fn run_check_config(explicit_path: Option<&str>) {
    let (config_path, config) = load_config(explicit_path);
    println!("Configuration OK: {}", config_path.display());
    if !config.saml.enabled {
        println!("Note: SAML is disabled");
    }
}

fn run_metadata_export(explicit_path: Option<&str>, output: Option<String>) {
    let (_, config) = load_config(explicit_path);

    let metadata = SpEndpoints::from_config(&config.saml).and_then(|endpoints| {
        let key_material = ensure_key_material(&config.saml)?;
        Ok(sp_metadata_xml(
            &endpoints,
            &key_material.certificate_base64()?,
            config.saml.name_id_format.as_deref(),
        ))
    });

    let metadata = match metadata {
        Ok(m) => m,
        Err(e) => {
            eprintln!("Failed to build SP metadata: {}", e);
            std::process::exit(1);
        }
    };

    match output {
        Some(path) => {
            if let Err(e) = std::fs::write(&path, metadata) {
                eprintln!("Failed to write metadata to {}: {}", path, e);
                std::process::exit(1);
            }
            eprintln!("SP metadata written to {}", path);
        }
        None => println!("{}", metadata),
    }
}

async fn run_server(explicit_config_path: Option<&str>) {
    let (config_path, config) = load_config(explicit_config_path);

    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    tracing::info!(
        config_file = %config_path.display(),
        "Starting Portcullis"
    );

    let http_client = match reqwest::Client::builder()
        .timeout(config.saml.metadata_timeout())
        .danger_accept_invalid_certs(config.saml.insecure_skip_verify)
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build HTTP client");
            std::process::exit(1);
        }
    };

    let task_tracker = TaskTracker::new();
    let shutdown_token = CancellationToken::new();

    let correlations = Arc::new(MemoryCorrelationStore::new(
        config.saml.pending_request_ttl(),
    ));
    {
        let store: SharedCorrelationStore = correlations.clone();
        let interval = config.saml.pending_request_sweep_interval();
        let token = shutdown_token.clone();
        task_tracker.spawn(async move {
            start_correlation_sweeper(store, interval, token).await;
        });
    }

    let users: Arc<dyn UserRepo> = Arc::new(MemoryUserRepo::new());
    let saml = SamlProvider::initialize(&config.saml, &http_client, correlations, users).await;

    let providers = SsoProviderRegistry::new();
    providers.register("saml", Arc::new(saml)).await;

    let bind_addr = config.server.bind_addr();
    let state = AppState::new(config, providers);
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind to address");
    tracing::info!(address = %bind_addr, "Server listening");

    // Graceful shutdown: wait for SIGINT/SIGTERM, then wait for background tasks
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(task_tracker, shutdown_token))
        .await
    {
        tracing::error!(error = %e, "Server error");
    }
}

async fn shutdown_signal(task_tracker: TaskTracker, shutdown_token: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, waiting for background tasks to complete...");

    shutdown_token.cancel();
    task_tracker.close();

    if tokio::time::timeout(Duration::from_secs(5), task_tracker.wait())
        .await
        .is_err()
    {
        tracing::warn!("Timeout waiting for background tasks to complete");
    } else {
        tracing::info!("Background tasks completed");
    }
}
