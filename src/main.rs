//! RideLink - headless sensor monitor
//!
//! Connects to the sensors enabled in the configuration and logs their values.

use anyhow::Context;
use ridelink::config::load_config;
use ridelink::sensors::{BleTransport, Reading, SensorEvent, SensorHub};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config().context("failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting RideLink v{}", env!("CARGO_PKG_VERSION"));

    let transport = BleTransport::initialize(config.sensors.scan_timeout())
        .await
        .context("failed to initialize Bluetooth")?;

    let mut hub = SensorHub::new(transport, config.sensors.attempt_timeout());
    let events = hub.event_receiver();

    for kind in &config.sensors.enabled {
        hub.enable(*kind);
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = hub.process_next() => {}
        }

        for event in events.try_iter() {
            log_event(&event);
        }
    }

    hub.shutdown().await;
    Ok(())
}

fn log_event(event: &SensorEvent) {
    match event {
        SensorEvent::ValueUpdated { kind, reading } => match reading {
            Reading::Power { watts, history } => {
                tracing::info!("{}: {} {} (history {:?})", kind, watts, kind.unit(), history)
            }
            _ => tracing::info!("{}: {} {}", kind, reading.value(), kind.unit()),
        },
        SensorEvent::Deactivated { kind } => tracing::info!("{} switched off", kind),
        SensorEvent::ConnectionStateChanged { kind, state } => {
            tracing::debug!("{}: {}", kind, state)
        }
        SensorEvent::LoadingChanged { kind, loading } => {
            tracing::debug!("{} loading: {}", kind, loading)
        }
    }
}
