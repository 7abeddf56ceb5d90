use clap::{Parser, ValueEnum};
use esign_adapters::{RpcEndpoint, StorageConfig};
use esign_core::{BreakerConfig, ProviderConfig};
use esign_service::{
    build_router, spawn_sweeper, GatewayConfig, ServiceConfig, ServiceState,
};
use esign_service::worker::{DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StorageMode {
    Auto,
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum GatewayMode {
    /// Deterministic local mocks, no network.
    Mock,
    /// Real provider surfaces over HTTP.
    Http,
}

#[derive(Debug, Parser)]
#[command(name = "esignd", version, about = "Signing-workflow orchestration service")]
struct Cli {
    /// Socket address to bind, e.g. 127.0.0.1:8085
    #[arg(long, default_value = "127.0.0.1:8085")]
    listen: SocketAddr,
    /// Job persistence backend. `auto` picks postgres when a database url is configured.
    #[arg(long, value_enum, default_value_t = StorageMode::Auto, env = "ESIGN_STORAGE")]
    storage: StorageMode,
    /// PostgreSQL url for job/re-confirmation/seal/audit persistence.
    #[arg(long, env = "ESIGN_DATABASE_URL")]
    database_url: Option<String>,
    /// Max PostgreSQL pool connections.
    #[arg(long, default_value_t = 5, env = "ESIGN_PG_MAX_CONNECTIONS")]
    pg_max_connections: u32,
    /// Directory for signed/sealed artifacts. In-memory when omitted.
    #[arg(long, env = "ESIGN_BLOB_ROOT")]
    blob_root: Option<PathBuf>,
    /// Which gateway implementations to run against.
    #[arg(long, value_enum, default_value_t = GatewayMode::Mock, env = "ESIGN_GATEWAYS")]
    gateways: GatewayMode,

    /// Identity provider base url, e.g. https://id.example.gov
    #[arg(long, env = "ESIGN_PROVIDER_URL", default_value = "https://id.example.gov")]
    provider_url: String,
    /// OAuth client id registered with the provider.
    #[arg(long, env = "ESIGN_CLIENT_ID", default_value = "esign-local")]
    client_id: String,
    /// OAuth client secret registered with the provider.
    #[arg(long, env = "ESIGN_CLIENT_SECRET", default_value = "", hide_env_values = true)]
    client_secret: String,
    /// Public base of this service, used to build callback URLs.
    #[arg(long, env = "ESIGN_APP_URL", default_value = "http://127.0.0.1:8085")]
    app_url: String,
    /// Frontend base the user lands on after a flow finishes.
    #[arg(long, env = "ESIGN_FRONTEND_URL", default_value = "http://127.0.0.1:3000")]
    frontend_url: String,
    /// Scope requested for signing flows.
    #[arg(long, env = "ESIGN_SIGN_SCOPE", default_value = "urn:digitalid:profile urn:digitalid:sign")]
    sign_scope: String,
    /// Scope requested for identity re-confirmation.
    #[arg(long, env = "ESIGN_RECONFIRM_SCOPE", default_value = "openid urn:digitalid:profile:general")]
    reconfirm_scope: String,
    /// Scope for the service's client-credentials token.
    #[arg(long, env = "ESIGN_SERVICE_SCOPE", default_value = "urn:digitalid:profile")]
    service_scope: String,
    /// Authentication strength demanded for re-confirmation.
    #[arg(long, env = "ESIGN_RECONFIRM_ACR", default_value = "urn:digitalid:authentication:biometric")]
    reconfirm_acr: String,
    /// Minutes a successful re-confirmation stays valid for route guards.
    #[arg(long, default_value_t = 15, env = "ESIGN_RECONFIRM_WINDOW_MINS")]
    reconfirm_window_mins: i64,

    /// Document signing API base url (http gateways only).
    #[arg(long, env = "ESIGN_SIGN_API_URL", default_value = "http://127.0.0.1:9090")]
    sign_api_url: String,
    /// Signing co-process base url (http gateways only).
    #[arg(long, env = "ESIGN_HASH_SDK_URL", default_value = "http://127.0.0.1:9091")]
    hash_sdk_url: String,
    /// Electronic seal RPC endpoint (http gateways only).
    #[arg(long, env = "ESIGN_SEAL_URL", default_value = "http://127.0.0.1:9092/seal")]
    seal_url: String,
    #[arg(long, env = "ESIGN_SEAL_USERNAME", default_value = "esign")]
    seal_username: String,
    #[arg(long, env = "ESIGN_SEAL_PASSWORD", default_value = "", hide_env_values = true)]
    seal_password: String,
    /// Long-term-validation RPC endpoint (http gateways only).
    #[arg(long, env = "ESIGN_LTV_URL", default_value = "http://127.0.0.1:9093/ltv")]
    ltv_url: String,

    /// Completion queue depth before callbacks see back-pressure.
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY, env = "ESIGN_QUEUE_CAPACITY")]
    queue_capacity: usize,
    /// Completion worker count.
    #[arg(long, default_value_t = DEFAULT_WORKERS, env = "ESIGN_WORKERS")]
    workers: usize,
}

fn resolve_storage(cli: &Cli) -> anyhow::Result<StorageConfig> {
    let resolved_url = cli
        .database_url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok());

    let storage = match cli.storage {
        StorageMode::Memory => StorageConfig::Memory,
        StorageMode::Postgres => {
            let database_url = resolved_url.ok_or_else(|| {
                anyhow::anyhow!("storage=postgres requires --database-url or DATABASE_URL")
            })?;
            StorageConfig::Postgres {
                database_url,
                max_connections: cli.pg_max_connections,
            }
        }
        StorageMode::Auto => {
            if let Some(database_url) = resolved_url {
                StorageConfig::Postgres {
                    database_url,
                    max_connections: cli.pg_max_connections,
                }
            } else {
                StorageConfig::Memory
            }
        }
    };

    Ok(storage)
}

fn resolve_gateways(cli: &Cli) -> GatewayConfig {
    match cli.gateways {
        GatewayMode::Mock => GatewayConfig::Mock,
        GatewayMode::Http => GatewayConfig::Http {
            sign_api_url: cli.sign_api_url.clone(),
            hash_sdk_url: cli.hash_sdk_url.clone(),
            seal: RpcEndpoint {
                url: cli.seal_url.clone(),
                username: cli.seal_username.clone(),
                password: cli.seal_password.clone(),
            },
            ltv: RpcEndpoint {
                url: cli.ltv_url.clone(),
                username: cli.seal_username.clone(),
                password: cli.seal_password.clone(),
            },
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "esign_service=info,info".to_string()),
        )
        .init();

    let cli = Cli::parse();
    let storage = resolve_storage(&cli)?;
    let gateways = resolve_gateways(&cli);
    let provider = ProviderConfig {
        base_url: cli.provider_url.clone(),
        client_id: cli.client_id.clone(),
        client_secret: cli.client_secret.clone(),
        app_base_url: cli.app_url.clone(),
        frontend_url: cli.frontend_url.clone(),
        sign_scope: cli.sign_scope.clone(),
        reconfirm_scope: cli.reconfirm_scope.clone(),
        service_scope: cli.service_scope.clone(),
        reconfirm_acr: cli.reconfirm_acr.clone(),
        reconfirm_window_mins: cli.reconfirm_window_mins,
    };
    let config = ServiceConfig {
        provider,
        storage,
        gateways,
        blob_root: cli.blob_root.clone(),
        queue_capacity: cli.queue_capacity,
        workers: cli.workers,
        breaker: BreakerConfig::default(),
    };

    let state = ServiceState::bootstrap(config).await?;
    spawn_sweeper(&state);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!("esign-service listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
