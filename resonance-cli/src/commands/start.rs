//! Run the pipeline until interrupted.

use anyhow::{Context, Result};
use resonance_client::{SimulatedFactory, TransportFactory, WebSocketFactory};
use resonance_node::{run_until, wait_for_shutdown_signal, Config, Pipeline, SocketMode};

/// Run the start command.
pub async fn run(config: Config) -> Result<()> {
    println!("Starting Resonance Streaming Pipeline...");
    println!("Anchor: {}", config.resonance.anchor);
    println!("Frequency: {} Hz", config.resonance.frequency);
    println!("S-ROI Threshold: {}", config.resonance.s_roi_threshold);
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    match config.socket.mode {
        SocketMode::Websocket => serve(Pipeline::new(config, WebSocketFactory::default()).await).await,
        SocketMode::Simulated => serve(Pipeline::new(config, SimulatedFactory).await).await,
    }
}

async fn serve<F: TransportFactory + 'static>(pipeline: Pipeline<F>) -> Result<()> {
    let signal = async {
        match wait_for_shutdown_signal().await {
            Ok(name) => tracing::info!("Received {}", name),
            Err(e) => tracing::error!("Cannot listen for shutdown signals: {}", e),
        }
        println!();
        println!("Shutting down...");
    };

    run_until(&pipeline, signal)
        .await
        .context("Pipeline failed to start")
}
