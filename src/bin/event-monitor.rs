// Copyright (c) 2025 - Cowboy AI, Inc.
//! Event Monitor
//!
//! Connects a resilient event service to NATS, logs every event of the
//! monitored types and periodically reports health and metrics.
//!
//! Run with: cargo run --bin event-monitor
//!
//! Prerequisites:
//! 1. NATS server running (default: localhost:4222, see `MESSAGING_BROKER_*`)
//! 2. Event types to watch in `MONITOR_EVENT_TYPES` (comma-separated)

use anyhow::{bail, Context, Result};
use cim_messaging_resilience::{Event, MessagingConfig, ResilientEventService};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Metrics older than this are pruned after each report
const METRICS_RETENTION: Duration = Duration::from_secs(60 * 60);

/// Configuration for the monitor itself
#[derive(Debug, Clone)]
struct MonitorConfig {
    /// Event types to subscribe to
    event_types: Vec<String>,
    /// Time between health and metrics reports
    report_interval: Duration,
}

impl MonitorConfig {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let event_types = lookup("MONITOR_EVENT_TYPES")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();

        let report_interval = match lookup("MONITOR_INTERVAL_SECS") {
            Some(raw) => {
                let secs: u64 = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("MONITOR_INTERVAL_SECS is not a number: {}", raw))?;
                if secs == 0 {
                    bail!("MONITOR_INTERVAL_SECS must be at least 1");
                }
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(30),
        };

        Ok(Self {
            event_types,
            report_interval,
        })
    }
}

async fn log_event(event: Event) -> anyhow::Result<()> {
    info!(
        event_id = %event.id,
        event_type = %event.event_type,
        timestamp = %event.timestamp,
        "📨 {}",
        event.payload
    );
    Ok(())
}

async fn report(service: &ResilientEventService) -> Result<()> {
    let health = service.check_health().await;
    info!(
        "🩺 Health: {}",
        serde_json::to_string(&health).context("Failed to serialize health report")?
    );

    let metrics = service.get_metrics();
    info!(
        "📊 Metrics: {}",
        serde_json::to_string(&metrics).context("Failed to serialize metrics")?
    );

    for event_type in service.list_event_types() {
        let page = service.list_events(&event_type, 1, 1);
        warn!(
            event_type = %event_type,
            dead_letters = page.pagination.total,
            "⚠️ Dead letters pending"
        );
    }

    service.metrics().clear_old_metrics(METRICS_RETENTION);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("🚀 Starting Event Monitor");

    let config = MessagingConfig::from_env().context("Invalid messaging configuration")?;
    let monitor = MonitorConfig::from_env()?;
    info!("📋 Configuration loaded:");
    info!("  - Brokers: {}", config.nats.servers.join(", "));
    info!("  - Subject prefix: {}", config.subject_prefix);
    info!("  - Event types: {}", monitor.event_types.join(", "));
    info!("  - Report interval: {:?}", monitor.report_interval);

    info!("🔌 Connecting to NATS");
    let service = ResilientEventService::connect(config)
        .await
        .context("Failed to connect to NATS")?;
    info!("✅ Connected to NATS");

    if monitor.event_types.is_empty() {
        warn!("⚠️ MONITOR_EVENT_TYPES is empty, only reporting health");
    }
    for event_type in &monitor.event_types {
        service
            .subscribe_fn(event_type, log_event)
            .await
            .with_context(|| format!("Failed to subscribe to {}", event_type))?;
        debug!("👂 Subscribed to {}", event_type);
    }

    let mut ticker = tokio::time::interval(monitor.report_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => report(&service).await?,
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                info!("🛑 Shutdown requested");
                break;
            }
        }
    }

    service
        .disconnect()
        .await
        .context("Failed to disconnect from NATS")?;
    info!("👋 Event Monitor stopped");
    Ok(())
}
