//! Publish one test message.

use clap::ValueEnum;
use resonance_node::{bus, Config, Producer};
use serde_json::json;

/// Message kinds the send command can publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Kind {
    /// State update carrying the message text
    State,
    /// Frequency sync with the configured values
    Frequency,
    /// Repository event, optionally targeted at one peer
    Event,
}

/// Run the send command. Returns whether the publish succeeded.
pub async fn run(config: &Config, kind: Kind, message: &str, target: Option<&str>) -> bool {
    let producer = Producer::new(config, bus::from_config(&config.bus));
    let data = json!({
        "test": true,
        "content": message,
    });

    let (label, sent) = match kind {
        Kind::State => ("State update", producer.send_state_update(data).await.is_ok()),
        Kind::Frequency => (
            "Frequency sync",
            producer
                .send_frequency_sync(config.resonance.frequency, config.resonance.s_roi_threshold)
                .await
                .is_ok(),
        ),
        Kind::Event => (
            "Repository event",
            producer
                .send_repository_event("test", data, target)
                .await
                .is_ok(),
        ),
    };
    println!("{} {}", label, if sent { "sent" } else { "failed" });

    producer.close().await;
    sent
}
