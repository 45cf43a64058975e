use std::net::SocketAddr;
use std::sync::Arc;

use diesel_async::AsyncPgConnection;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::pooled_connection::deadpool::Pool;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::EnvFilter;

mod collector;
mod config;
mod deepdive;
mod error;
mod identity;
mod json;
mod models;
mod ranking;
mod schema;
mod taxonomy;
mod vecmath;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Shared per-process state; cheap to clone into handlers and background
/// tasks.
#[derive(Clone)]
pub struct App {
    pub diesel: Pool<AsyncPgConnection>,
    pub http: reqwest::Client,
    pub config: Arc<config::ServerConfig>,
    pub collector: Arc<collector::CollectorState>,
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Arc::new(config::ServerConfig::new_from_env());

    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(&config.database_url);
    let pool = Pool::builder(manager)
        .max_size(10)
        .build()
        .expect("couldn't build the database pool");

    let http = reqwest::Client::builder()
        .user_agent("newslens/1.0")
        .build()
        .expect("couldn't build the http client");

    let ctx = App {
        diesel: pool,
        http,
        config,
        collector: Arc::new(collector::CollectorState::new()),
    };

    collector::start_background_collect(ctx.clone());

    let app = axum::Router::new()
        .merge(ranking::route())
        .merge(collector::route())
        .merge(deepdive::route())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(ctx.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], ctx.config.port));
    tracing::info!(%addr, env = ?ctx.config.env, "Listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("couldn't bind the listen address");
    axum::serve(listener, app)
        .await
        .expect("server exited with an error");
}
