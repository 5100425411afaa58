use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hookrelay::api;
use hookrelay::cli;
use hookrelay::dispatcher::Dispatcher;
use hookrelay::executor::HttpSender;
use hookrelay::notifier::MemoryNotifier;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hookrelay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse args and env vars
    let settings = cli::Cli::parse().into_settings()?;
    // Socket server listen address setup
    let listen_address: IpAddr = settings.listen_address.parse::<IpAddr>()?;
    let socket_address = SocketAddr::from((listen_address, settings.listen_port));

    // Delivery core
    let notifier = Arc::new(MemoryNotifier::new(
        settings.delivery.notifier.result_history,
    ));
    let sender = Arc::new(HttpSender::new(settings.delivery.retry.request_timeout)?);
    let dispatcher = Dispatcher::spawn(
        settings.delivery.clone(),
        settings.relay_config.clone(),
        sender,
        notifier.clone(),
    );

    // Build Axum Router
    let app = api::api(api::AppState {
        dispatcher,
        notifier,
    })
    .await?;

    // Start server
    info!("Starting hookrelay on {}", socket_address);
    let listener = tokio::net::TcpListener::bind(socket_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
