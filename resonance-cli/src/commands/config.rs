//! Show the effective configuration.

use resonance_node::Config;

/// Run the config command.
pub fn run(config: &Config) {
    println!();
    println!("=== Resonance Streaming Configuration ===");
    println!();

    let resonance = &config.resonance;
    println!("Resonance Parameters:");
    println!("  frequency: {}", resonance.frequency);
    println!("  s_roi_threshold: {}", resonance.s_roi_threshold);
    println!("  anchor: {}", resonance.anchor);
    println!("  source: {}", resonance.source);
    println!("  sync_interval: {}s", resonance.sync_interval_secs);

    println!();
    println!("Bus:");
    println!("  backend: {:?}", config.bus.backend);
    println!("  bootstrap_servers: {}", config.bus.bootstrap_servers.join(", "));
    println!("  group_id: {}", config.bus.group_id);

    println!();
    println!("Topics:");
    println!("  outbound: {}", config.topics.outbound);
    println!("  inbound: {}", config.topics.inbound);
    println!("  state_sync: {}", config.topics.state_sync);

    println!();
    println!("Socket:");
    println!("  mode: {:?}", config.socket.mode);
    println!("  listen: {}", config.socket.bind_address());
    println!(
        "  ping: every {}s, timeout {}s",
        config.socket.ping_interval_secs, config.socket.ping_timeout_secs
    );
    println!("  reconnect_delay: {}s", config.socket.reconnect_delay_secs);

    println!();
    println!("Nodes:");
    if config.nodes.is_empty() {
        println!("  (none)");
    }
    for (name, endpoint) in config.nodes.iter() {
        println!("  {}: {} (topic: {})", name, endpoint.websocket, endpoint.topic);
    }

    println!();
}
