use axum::{
    routing::{get, post},
    Router,
};
use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dashboards::DashboardManager;
use datasource::memory::MemoryStore;
use datasource::{ConnectionContext, Datasource};

mod api;
mod dashboards;
mod datasource;
mod editor;

// =============================================================================
// CLI
// =============================================================================

#[derive(Parser)]
#[command(name = "fq-hub", version, about = "FireQuery datasource hub")]
struct Args {
    /// Server bind address
    #[arg(long, default_value = "127.0.0.1:3000")]
    bind: String,

    /// Path to config file
    #[arg(long, default_value = "fq-hub.toml")]
    config: PathBuf,

    /// Seed documents for the in-memory store (`{ "collection": [ ... ] }`)
    #[arg(long)]
    data: Option<PathBuf>,
}

// =============================================================================
// Config
// =============================================================================

#[derive(Debug, Deserialize, Default, Clone)]
struct Config {
    #[serde(default)]
    datasource: DatasourceConfig,
    #[serde(default)]
    editor: EditorConfig,
    #[serde(default)]
    server: ServerConfig,
}

#[derive(Debug, Deserialize, Default, Clone)]
struct DatasourceConfig {
    #[serde(default)]
    project_id: String,
    /// Service-account key file; its contents are never logged.
    #[serde(default)]
    service_account_file: Option<PathBuf>,
    /// Falls back to `FIRESTORE_EMULATOR_HOST`.
    #[serde(default)]
    emulator_host: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
struct EditorConfig {
    #[serde(default = "default_quiet_period")]
    quiet_period_ms: u64,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            quiet_period_ms: default_quiet_period(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
struct ServerConfig {
    #[serde(default = "default_dashboards_path")]
    dashboards_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            dashboards_path: default_dashboards_path(),
        }
    }
}

fn default_quiet_period() -> u64 {
    500
}
fn default_dashboards_path() -> PathBuf {
    PathBuf::from("dashboards.json")
}

fn load_config(path: &Path) -> Config {
    if !path.exists() {
        return Config::default();
    }
    match std::fs::read_to_string(path).map(|content| toml::from_str::<Config>(&content)) {
        Ok(Ok(config)) => config,
        Ok(Err(e)) => {
            tracing::warn!("Ignoring invalid config {:?}: {}", path, e);
            Config::default()
        }
        Err(e) => {
            tracing::warn!("Cannot read config {:?}: {}", path, e);
            Config::default()
        }
    }
}

fn connection_context(config: &DatasourceConfig) -> ConnectionContext {
    let mut ctx = ConnectionContext::new(config.project_id.clone());

    if let Some(path) = &config.service_account_file {
        match std::fs::read_to_string(path) {
            Ok(json) => ctx = ctx.with_service_account(json),
            // left unset so the health check reports it
            Err(e) => tracing::error!("Cannot read service account {:?}: {}", path, e),
        }
    }

    let emulator = config
        .emulator_host
        .clone()
        .or_else(|| std::env::var("FIRESTORE_EMULATOR_HOST").ok())
        .filter(|host| !host.trim().is_empty());
    if let Some(host) = emulator {
        ctx = ctx.with_emulator(host);
    }
    ctx
}

// =============================================================================
// Application State
// =============================================================================

struct AppState {
    datasource: Datasource,
    dashboards: DashboardManager,
    quiet_period: Duration,
    start_time: Instant,
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(api::check_health))
        .route("/api/status", get(api::status))
        .route("/api/query", post(api::query_data))
        .route("/api/collections", get(api::list_collections))
        .route("/api/render", post(api::render))
        .route("/api/edit", post(api::edit))
        .route(
            "/api/dashboards",
            get(api::list_dashboards).post(api::create_dashboard),
        )
        .route(
            "/api/dashboards/:id",
            get(api::get_dashboard)
                .put(api::update_dashboard)
                .delete(api::delete_dashboard),
        )
        .route(
            "/api/dashboards/:id/panels/:panel/query",
            get(api::get_panel_query).put(api::save_panel_query),
        )
        .route("/ws/editor", get(editor::ws_editor))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "fq_hub=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = load_config(&args.config);

    let store = match &args.data {
        Some(path) => match MemoryStore::load(path).await {
            Ok(store) => store,
            Err(e) => {
                tracing::error!("Failed to load seed data: {}", e);
                std::process::exit(1);
            }
        },
        None => MemoryStore::new(),
    };

    let dashboards = match DashboardManager::open(&config.server.dashboards_path).await {
        Ok(manager) => manager,
        Err(e) => {
            tracing::error!(
                "Failed to open dashboards at {:?}: {}",
                config.server.dashboards_path,
                e
            );
            std::process::exit(1);
        }
    };

    let context = connection_context(&config.datasource);
    tracing::info!("Datasource settings: {:?}", context);

    let state = Arc::new(AppState {
        datasource: Datasource::new(context, Arc::new(store)),
        dashboards,
        quiet_period: Duration::from_millis(config.editor.quiet_period_ms),
        start_time: Instant::now(),
    });

    let health = state.datasource.check_health().await;
    tracing::info!("Initial health check: {:?} ({})", health.status, health.message);

    let app = build_router(state);

    let addr: SocketAddr = match args.bind.parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!("Invalid bind address {:?}: {}", args.bind, e);
            std::process::exit(1);
        }
    };
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    tracing::info!("  FireQuery hub v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("  API:        http://{}/api/health", addr);
    tracing::info!("  Editor:     ws://{}/ws/editor", addr);
    tracing::info!("  Dashboards: {:?}", config.server.dashboards_path);
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
    }
}
