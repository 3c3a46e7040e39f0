//! Simulated participant: walks a square route and logs who it can see.

use anyhow::{Context, Result};
use log::info;
use std::time::Duration;
use tokio::sync::mpsc;

use geoshare_collab::{
    connect, ClientConfig, Position, PresenceChange, RouteSource, SelfLocationPublisher, Session,
    SessionUpdate,
};

/// Corner of the square walked by default.
const ORIGIN: (f64, f64) = (52.520, 13.405);
/// Side of the square, in degrees.
const SPAN_DEG: f64 = 0.002;
const CADENCE: Duration = Duration::from_secs(2);

pub async fn walk(config: ClientConfig) -> Result<()> {
    let (transport, channel_rx) = connect(&config)
        .await
        .with_context(|| format!("failed to connect to {}", config.server_url))?;

    let origin = Position::new(ORIGIN.0, ORIGIN.1)?;
    let source = RouteSource::square(origin, SPAN_DEG, CADENCE);
    let (fix_tx, fix_rx) = mpsc::channel(config.event_buffer.max(1));
    let tracker = SelfLocationPublisher::new(config.positioning).spawn(source, fix_tx);

    let (update_tx, mut update_rx) = mpsc::channel(config.event_buffer.max(1));
    let session = Session::new(&config, transport);
    let session_task = tokio::spawn(session.run(channel_rx, fix_rx, update_tx));

    loop {
        tokio::select! {
            update = update_rx.recv() => match update {
                Some(update) => log_update(&update),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping walker");
                break;
            }
        }
    }

    tracker.abort();
    session_task.abort();
    Ok(())
}

fn log_update(update: &SessionUpdate) {
    match update {
        SessionUpdate::Presence(PresenceChange::Joined(p)) => info!(
            "+ {}{} at ({:.5}, {:.5})",
            p.identity,
            if p.is_local { " (you)" } else { "" },
            p.position.latitude(),
            p.position.longitude()
        ),
        SessionUpdate::Presence(PresenceChange::Moved(p)) => log::debug!(
            "~ {} at ({:.5}, {:.5})",
            p.identity,
            p.position.latitude(),
            p.position.longitude()
        ),
        SessionUpdate::Presence(PresenceChange::Left(id)) => info!("- {id}"),
        SessionUpdate::Status(status) => info!(
            "connected={} tracking={}{}",
            status.connected,
            status.tracking_active,
            status
                .tracking_error
                .as_ref()
                .map(|e| format!(" ({e})"))
                .unwrap_or_default()
        ),
    }
}
