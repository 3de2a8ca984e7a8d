//! Command-line client for a running Experiment Hub.

use std::ops::ControlFlow;

use clap::{Parser, Subcommand};
use experiment_hub_sdk::{ExperimentMessage, HubClient, ReconnectPolicy};
use serde::Serialize;
use serde_json::Value;

#[derive(Parser)]
#[command(name = "hub-cli")]
#[command(about = "Command-line client for the Experiment Hub", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8000")]
    url: String,

    /// API prefix the service mounts its routes under.
    #[arg(long, default_value = "/api/v1")]
    api_prefix: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show service name, version and description
    Info,
    /// Check service liveness
    Health,
    /// Stream messages of an experiment, reconnecting on disconnect
    Watch {
        experiment_id: String,
        /// Stop after this many messages
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },
    /// Publish one message to an experiment
    Send {
        experiment_id: String,
        #[arg(value_name = "TYPE")]
        kind: String,
        /// JSON payload
        #[arg(default_value = "null")]
        data: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = HubClient::new(&cli.url)?.with_api_prefix(cli.api_prefix);

    match cli.command {
        Commands::Info => print_json(&client.identity().await?)?,
        Commands::Health => print_json(&client.health().await?)?,
        Commands::Watch {
            experiment_id,
            count,
        } => {
            let mut seen = 0;
            client
                .watch_experiment(&experiment_id, ReconnectPolicy::default(), |message| {
                    if let Err(e) = print_json(&message) {
                        eprintln!("Error: {}", e);
                    }
                    seen += 1;
                    match count {
                        Some(limit) if seen >= limit => ControlFlow::Break(()),
                        _ => ControlFlow::Continue(()),
                    }
                })
                .await?;
        }
        Commands::Send {
            experiment_id,
            kind,
            data,
        } => {
            let data: Value = serde_json::from_str(&data)?;
            let mut stream = client.connect_experiment(&experiment_id).await?;
            // The first frame is the server's greeting.
            if let Some(greeting) = stream.next_message().await {
                greeting?;
            }
            stream.send(&ExperimentMessage::new(kind, data)).await?;
            stream.close().await?;
            println!("sent");
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
