use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use reqwest::Client;
use serde_json::{json, Value};

use hookrelay::api::paths;
use hookrelay::settings::RelayConfig;

#[derive(Parser)]
#[command(name = "hookrelay-admin")]
#[command(about = "hookrelay administration tool")]
struct Cli {
    /// Base url of a running hookrelay server
    #[arg(long, default_value = "http://127.0.0.1:8420", env("HOOKRELAY_SERVER"))]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the server answers
    Health,
    /// Queue a JSON payload for a webhook
    Send {
        /// Webhook url
        #[arg(long)]
        url: String,
        /// JSON payload, e.g. '{"url": "https://example.com"}'
        #[arg(long)]
        payload: String,
        /// Display name; defaults to the configured one
        #[arg(long)]
        name: Option<String>,
        /// Seconds between sends; defaults to the configured one
        #[arg(long)]
        rate_limit: Option<u64>,
    },
    /// Replace the server's webhook configuration from a JSON file
    Config {
        #[arg(long)]
        file: PathBuf,
    },
    /// Show per-destination queue state
    Destinations,
    /// Show active queue statuses and recent delivery results
    Notifications,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();
    let client = Client::new();

    match cli.command {
        Commands::Health => check_health(&client, &server).await?,
        Commands::Send {
            url,
            payload,
            name,
            rate_limit,
        } => send(&client, &server, url, &payload, name, rate_limit).await?,
        Commands::Config { file } => push_config(&client, &server, &file).await?,
        Commands::Destinations => {
            print_json(&client, &format!("{}{}", server, paths::webhooks::DESTINATIONS)).await?
        }
        Commands::Notifications => {
            print_json(&client, &format!("{}{}", server, paths::NOTIFICATIONS)).await?
        }
    }

    Ok(())
}

async fn check_health(client: &Client, server: &str) -> anyhow::Result<()> {
    let health_url = format!("{}{}", server, paths::base::HEALTH);
    match client.get(&health_url).send().await {
        Ok(response) if response.status().is_success() => {
            println!("Server {} is healthy", server);
        }
        Ok(response) => {
            println!("Server {} returned status {}", server, response.status());
        }
        Err(e) => {
            println!("Server {} is unreachable: {}", server, e);
        }
    }
    Ok(())
}

fn build_send_body(
    url: String,
    payload: &str,
    name: Option<String>,
    rate_limit: Option<u64>,
) -> anyhow::Result<Value> {
    let payload: Value = serde_json::from_str(payload)
        .map_err(|e| anyhow::anyhow!("Payload is not valid JSON: {}", e))?;
    Ok(json!({
        "url": url,
        "payload": payload,
        "name": name,
        "rateLimit": rate_limit,
    }))
}

async fn send(
    client: &Client,
    server: &str,
    url: String,
    payload: &str,
    name: Option<String>,
    rate_limit: Option<u64>,
) -> anyhow::Result<()> {
    let body = build_send_body(url, payload, name, rate_limit)?;
    let response = client
        .post(format!("{}{}", server, paths::webhooks::ENQUEUE))
        .json(&body)
        .send()
        .await?;
    if response.status().is_success() {
        println!("Queued for delivery");
    } else {
        println!("Rejected: HTTP {} {}", response.status(), response.text().await?);
    }
    Ok(())
}

async fn push_config(client: &Client, server: &str, file: &Path) -> anyhow::Result<()> {
    // validate locally before bothering the server
    let config = RelayConfig::load(file)?;
    let response = client
        .put(format!("{}{}", server, paths::webhooks::CONFIG))
        .json(&config)
        .send()
        .await?;
    if response.status().is_success() {
        println!("Applied {} webhooks", config.webhooks.len());
    } else {
        println!("Rejected: HTTP {} {}", response.status(), response.text().await?);
    }
    Ok(())
}

async fn print_json(client: &Client, url: &str) -> anyhow::Result<()> {
    let value: Value = client.get(url).send().await?.error_for_status()?.json().await?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
