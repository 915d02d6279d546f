use std::time::Duration;

use anyhow::Context;
use teleprompter_relay::coordinator::paired::PairedSession;
use teleprompter_relay::coordinator::peer::{PeerOptions, PeerSession};
use teleprompter_relay::coordinator::runtime::{self, EndpointHandle};
use teleprompter_relay::coordinator::status::EventReporter;
use teleprompter_relay::coordinator::{DisplayEndpoint, IntermediaryEndpoint, RemoteEndpoint};
use teleprompter_relay::domain::command::Command;
use teleprompter_relay::domain::cursor::SectionCursor;
use teleprompter_relay::domain::models::{AppEvent, StatusSnapshot};
use teleprompter_relay::domain::settings::{Settings, SettingsService};
use teleprompter_relay::infrastructure::authorization::FixedAuthorizer;
use teleprompter_relay::infrastructure::logging::init_logger;
use teleprompter_relay::infrastructure::transport::loopback::{LoopbackMedium, LoopbackPairedLink};
use teleprompter_relay::infrastructure::transport::EventSink;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

fn peer_session(
    medium: &LoopbackMedium,
    settings: &Settings,
    name: &str,
    auto_invite: bool,
    sink: EventSink,
    events: &EventReporter,
) -> PeerSession {
    PeerSession::new(
        PeerOptions::from_settings(settings, auto_invite),
        Box::new(medium.peer_transport(name, sink.clone())),
        Box::new(medium.path_monitor(sink.clone())),
        Box::new(FixedAuthorizer::new(true, sink)),
        events.clone(),
    )
}

/// Logs alerts and log lines; returns the last section the display reported.
fn drain(role: &str, events: &mut UnboundedReceiver<AppEvent>) -> Option<usize> {
    let mut section = None;
    while let Ok(event) = events.try_recv() {
        match event {
            AppEvent::Alert(e) => warn!("[{}] alert: {}", role, e),
            AppEvent::LogMessage(m) => info!("[{}] {:?}: {}", role, m.severity, m.message),
            AppEvent::SectionChanged(index) => section = Some(index),
        }
    }
    section
}

async fn wait_connected(
    name: &str,
    handle: &EndpointHandle,
    pred: fn(&StatusSnapshot) -> bool,
) -> anyhow::Result<()> {
    let snapshot = handle
        .wait_for(CONNECT_TIMEOUT, pred)
        .await
        .with_context(|| format!("{} never connected (status: {})", name, handle.snapshot().status))?;
    info!("{}: {}", name, snapshot.status);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new().unwrap_or_else(|e| {
        eprintln!("Failed to load settings, using defaults: {}", e);
        SettingsService::with_settings(Settings::default())
    });
    let settings = settings_service.get().clone();

    let _logging_guard = init_logger(&settings.log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!("Starting teleprompter relay demo");

    let medium = LoopbackMedium::new();
    let paired = LoopbackPairedLink::new();
    let every = settings.poll_interval();

    let wrist = paired.clone();
    let (remote, mut remote_events) = runtime::spawn(move |sink, events| {
        let session = PairedSession::new(Box::new(wrist.wrist(sink)), every, events.clone());
        RemoteEndpoint::new(session, events)
    });

    let (handheld, handheld_medium, handheld_settings) =
        (paired.clone(), medium.clone(), settings.clone());
    let (intermediary, mut intermediary_events) = runtime::spawn(move |sink, events| {
        let session =
            PairedSession::new(Box::new(handheld.handheld(sink.clone())), every, events.clone());
        let peer = peer_session(
            &handheld_medium,
            &handheld_settings,
            "iPhone",
            handheld_settings.auto_invite_discovered_peers,
            sink,
            &events,
        );
        IntermediaryEndpoint::new(session, peer, events)
    });

    let (display_medium, display_settings) = (medium.clone(), settings.clone());
    let (display, mut display_events) = runtime::spawn(move |sink, events| {
        let peer = peer_session(
            &display_medium,
            &display_settings,
            &display_settings.device_name,
            false,
            sink,
            &events,
        );
        let cursor = SectionCursor::new(vec![
            "Welcome".to_string(),
            "Quarterly numbers".to_string(),
            "Questions".to_string(),
        ]);
        DisplayEndpoint::new(peer, cursor, events)
    });

    for handle in [&remote, &intermediary, &display] {
        handle.activate();
    }

    let connected = async {
        wait_connected("intermediary", &intermediary, |s| {
            s.paired_reachable && s.peer_connected
        })
        .await?;
        wait_connected("remote", &remote, |s| s.status == "Connected").await
    };
    if let Err(e) = connected.await {
        error!("{:#}", e);
    } else {
        for command in [Command::Next, Command::Next, Command::Next, Command::Previous] {
            match remote.send_command(command.clone()).await {
                Ok(()) => info!("Remote sent {}", command),
                Err(e) => warn!("Remote could not send {}: {}", command, e),
            }
        }
        // Give the relay a moment to deliver before reading the cursor.
        tokio::time::sleep(every * 2).await;
    }

    drain("remote", &mut remote_events);
    drain("intermediary", &mut intermediary_events);
    match drain("display", &mut display_events) {
        Some(index) => info!("Display is on section {}", index),
        None => warn!("Display never moved"),
    }

    for handle in [&remote, &intermediary, &display] {
        handle.shutdown().await;
    }
    info!("Demo finished");
    Ok(())
}
