use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use panelhub::config;
use panelhub::models::admin::NewAdmin;
use panelhub::models::panel::{PanelInput, PanelType};
use panelhub::panel::http::PanelHttp;
use panelhub::panel::{AdapterContext, AdapterRegistry};
use panelhub::store::memory::MemoryStore;
use panelhub::store::postgres::PgStore;
use panelhub::store::EntityStore;
use panelhub::AppState;

mod cli;

const GIB: f64 = (1024u64 * 1024 * 1024) as f64;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "panelhub"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "panelhub=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port, memory }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port, memory).await
        }
        Some(cli::Commands::Panel { command }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            let registry = AdapterRegistry::new(PanelHttp::from_config(&cfg)?);
            let state = AppState::new(Arc::new(db), registry.clone(), cfg);
            handle_panel_command(command, &state, &registry).await
        }
        Some(cli::Commands::Admin { command }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            handle_admin_command(command, &db).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port, false).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn run_server(cfg: config::Config, port: u16, memory: bool) -> anyhow::Result<()> {
    let store: Arc<dyn EntityStore> = if memory {
        tracing::warn!("Using in-memory store, nothing will be persisted");
        Arc::new(MemoryStore::new())
    } else {
        tracing::info!("Connecting to database...");
        let db = PgStore::connect(&cfg.database_url).await?;
        tracing::info!("Running migrations...");
        db.migrate().await?;
        Arc::new(db)
    };

    let registry = AdapterRegistry::new(PanelHttp::from_config(&cfg)?);
    let state = Arc::new(AppState::new(store, registry, cfg));

    let app = axum::Router::new()
        .route("/healthz", axum::routing::get(|| async { "ok" }))
        .nest("/api/v1", panelhub::api::api_router(state.clone()))
        .with_state(state.clone())
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer({
            use axum::http::{HeaderName, Method};
            use tower_http::cors::AllowOrigin;
            let dashboard_origin = std::env::var("DASHBOARD_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string());
            CorsLayer::new()
                .allow_origin(AllowOrigin::predicate(move |origin, _| {
                    let origin_str = origin.to_str().unwrap_or("");
                    origin_str == dashboard_origin
                        || origin_str.starts_with("http://localhost:")
                        || origin_str.starts_with("http://127.0.0.1:")
                }))
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
                .allow_headers([
                    HeaderName::from_static("content-type"),
                    HeaderName::from_static("authorization"),
                    HeaderName::from_static("x-admin-key"),
                    HeaderName::from_static("x-request-id"),
                ])
                .allow_credentials(true)
        })
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(axum::middleware::from_fn(security_headers_middleware));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("panelhub listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Middleware: injects a unique X-Request-Id into every response.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

async fn security_headers_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();
    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert("Cache-Control", HeaderValue::from_static("no-store"));
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));
    headers.remove("Server");
    resp
}

async fn handle_panel_command(
    cmd: cli::PanelCommands,
    state: &AppState,
    registry: &AdapterRegistry,
) -> anyhow::Result<()> {
    match cmd {
        cli::PanelCommands::Add {
            name,
            panel_type,
            url,
            sub_url,
            username,
            password,
        } => {
            let panel_type: PanelType = panel_type.parse().map_err(|e| anyhow::anyhow!("{}", e))?;
            let input = PanelInput {
                name,
                panel_type,
                url,
                sub_url,
                username,
                password,
                is_active: true,
            };
            state
                .orchestrator
                .validate_panel(&input)
                .await
                .map_err(|e| anyhow::anyhow!(e.message()))?;
            let panel = state.store.insert_panel(&input).await?;
            println!(
                "Panel created:\n  Name:  {}\n  Type:  {}\n  URL:   {}",
                panel.name, panel.panel_type, panel.url
            );
        }
        cli::PanelCommands::List => {
            let panels = state.store.list_panels().await?;
            if panels.is_empty() {
                println!("No panels found.");
            } else {
                println!("{:<20} {:<10} {:<40} {:<8}", "NAME", "TYPE", "URL", "ACTIVE");
                for p in panels {
                    println!(
                        "{:<20} {:<10} {:<40} {:<8}",
                        p.name, p.panel_type, p.url, p.is_active
                    );
                }
            }
        }
        cli::PanelCommands::Test { name } => {
            let panel = state
                .store
                .get_panel_by_name(&name)
                .await?
                .with_context(|| format!("panel '{}' not found", name))?;
            let adapter = registry
                .build(AdapterContext::for_panel(panel))
                .map_err(|e| anyhow::anyhow!(e.message()))?;
            adapter
                .test_connection()
                .await
                .with_context(|| format!("panel '{}' did not answer", name))?;
            println!("Panel '{}' is reachable.", name);
        }
    }
    Ok(())
}

async fn handle_admin_command(cmd: cli::AdminCommands, db: &PgStore) -> anyhow::Result<()> {
    match cmd {
        cli::AdminCommands::Add {
            username,
            panel,
            inbound_id,
            inbound_flow,
            traffic_gb,
            update_return_traffic,
            delete_return_traffic,
            expiry,
        } => {
            let expiry_date = expiry
                .map(|e| chrono::DateTime::parse_from_rfc3339(&e).map(|d| d.with_timezone(&chrono::Utc)))
                .transpose()
                .context("Invalid expiry")?;
            let input = NewAdmin {
                username,
                panel,
                inbound_id,
                inbound_flow,
                traffic: gb_to_bytes(traffic_gb),
                expiry_date,
                update_return_traffic,
                delete_return_traffic,
                is_active: true,
            };
            input.validate().map_err(|e| anyhow::anyhow!(e.message()))?;
            let admin = db.insert_admin(&input).await?;
            println!(
                "Admin created:\n  Username: {}\n  Panel:    {}\n  Traffic:  {:.1} GB",
                admin.username,
                admin.panel,
                admin.traffic as f64 / GIB
            );
        }
        cli::AdminCommands::List => {
            let admins = db.list_admins().await?;
            if admins.is_empty() {
                println!("No admins found.");
            } else {
                println!(
                    "{:<20} {:<20} {:<12} {:<8}",
                    "USERNAME", "PANEL", "TRAFFIC GB", "ACTIVE"
                );
                for a in admins {
                    println!(
                        "{:<20} {:<20} {:<12.1} {:<8}",
                        a.username,
                        a.panel,
                        a.traffic as f64 / GIB,
                        a.is_active
                    );
                }
            }
        }
        cli::AdminCommands::Traffic { username, gb } => {
            if db.set_admin_traffic(&username, gb_to_bytes(gb)).await? {
                tracing::warn!(admin = %username, gb, "admin traffic set from CLI");
                println!("Traffic for '{}' set to {:.1} GB.", username, gb);
            } else {
                println!("Admin '{}' not found.", username);
            }
        }
    }
    Ok(())
}

fn gb_to_bytes(gb: f64) -> i64 {
    (gb * GIB).round() as i64
}
