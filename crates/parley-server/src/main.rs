use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("parley=info,tower_http=debug"));
    if args.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = config::Config::load(&args.config)?;

    let (gateway, hub_task) = parley_core::hub::spawn(config.gateway_config());
    let state = parley_core::AppState::new(gateway.clone(), config.app_config());
    let shutdown_notify = state.shutdown.clone();

    let app = parley_api::build_router()
        .merge(parley_ws::gateway_router())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;

    print_startup_banner(&config);

    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {e}");
        }
        println!();
        tracing::info!("Shutting down (ctrl-c)...");
        // Open sockets close themselves with 1001 once told.
        shutdown_notify.notify_waiters();
    };

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    if gateway.shutdown().await.is_ok() {
        hub_task.await?;
    }

    Ok(())
}

fn print_startup_banner(config: &config::Config) {
    println!();
    println!("  ____            _");
    println!(" |  _ \\ __ _ _ __| | ___ _   _");
    println!(" | |_) / _` | '__| |/ _ \\ | | |");
    println!(" |  __/ (_| | |  | |  __/ |_| |");
    println!(" |_|   \\__,_|_|  |_|\\___|\\__, |");
    println!("                         |___/");
    println!();
    println!("  Listening:   http://{}", config.server.bind_address);
    println!("  Socket:      ws://{}/socket", config.server.bind_address);
    println!(
        "  Limits:      {} sockets, {} per user",
        config.gateway.max_connections, config.gateway.max_connections_per_user
    );
    if config.calls.ring_timeout_secs == 0 {
        println!("  Ring timeout: disabled");
    } else {
        println!("  Ring timeout: {}s", config.calls.ring_timeout_secs);
    }
    println!("  Meetings:    up to {} participants", config.meetings.max_participants);
    println!();
}
