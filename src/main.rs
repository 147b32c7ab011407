use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use dotenvy::dotenv;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use learnserver::api_router::configure_api_routes;
use learnserver::certificates::render::HttpCertificateRenderer;
use learnserver::certificates::CertificateRenderer;
use learnserver::config::AppConfig;
use learnserver::enrollment::gateway::GatewayRegistry;
use learnserver::notify::NotificationDispatcher;
use learnserver::shared::state::AppState;
use learnserver::shared::utils::{create_conn, DbPool};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

fn run_migrations(pool: &DbPool) -> anyhow::Result<()> {
    let mut conn = pool.get()?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("failed to run migrations: {e}"))?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = AppConfig::from_env()?;

    let pool = create_conn()?;
    run_migrations(&pool)?;

    let gateways = Arc::new(GatewayRegistry::new(
        &config.paystack,
        &config.flutterwave,
    ));
    let renderer: Arc<dyn CertificateRenderer> =
        Arc::new(HttpCertificateRenderer::new(&config.renderer));
    let notifier = Arc::new(NotificationDispatcher::new(config.smtp.clone()));

    let state = Arc::new(AppState {
        conn: pool,
        config: config.clone(),
        gateways,
        renderer,
        notifier,
    });

    let app = configure_api_routes()
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!(
        "Starting HTTP server on {}:{}",
        config.server.host, config.server.port
    );
    let listener =
        tokio::net::TcpListener::bind(format!("{}:{}", config.server.host, config.server.port))
            .await?;
    axum::serve(listener, app).await?;

    Ok(())
}
