mod broker;
mod chats;
mod config;
mod db;
mod routes;
mod state;
mod users;
mod ws;

use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use config::{generate_config_template, Config};

fn init_tracing(json_logs: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "pairchat_server=info".parse().unwrap());
    if json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Layered precedence: defaults < TOML < PAIRCHAT_* env < CLI.
    let config = Config::load()?;

    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    init_tracing(config.json_logs);
    tracing::info!("pairchat server v{} starting", env!("CARGO_PKG_VERSION"));

    let db = db::init_db(&config.data_dir)?;

    // Rooms and the waiting list are transient: one broker per process,
    // empty on every boot. Durable chats live in the SQLite store.
    let app_state = state::AppState {
        db,
        broker: broker::new_shared_broker(),
    };

    let app = routes::build_router(app_state);

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
