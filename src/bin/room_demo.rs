//! In-process mesh demo
//!
//! Spins up N participants on a shared in-process signaling hub with
//! synthetic capture sources, has the first one call the room, and logs
//! every call event as the mesh negotiates.
//!
//! # Usage
//!
//! ```bash
//! # Three participants, 15 seconds
//! cargo run --bin room_demo
//!
//! # Five participants in a named room
//! cargo run --bin room_demo -- --room study-42 --participants 5
//!
//! # Verbose negotiation logging
//! RUST_LOG=roomcall=debug cargo run --bin room_demo
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use roomcall::media::SyntheticCapture;
use roomcall::peer::RtcTransportFactory;
use roomcall::signaling::LocalSignalingHub;
use roomcall::{
    CallConfig, CallEvent, CallSessionController, LocalIdentity, RoomMember,
};

#[derive(Parser, Debug)]
#[command(name = "room_demo", about = "In-process mesh call demo")]
struct Args {
    /// Room identifier
    #[arg(long, default_value = "study-hall", env = "ROOM_ID")]
    room: String,

    /// Number of simulated participants (2-10)
    #[arg(long, default_value_t = 3, env = "ROOM_PARTICIPANTS")]
    participants: u32,

    /// How long to keep the call up, in seconds
    #[arg(long, default_value_t = 15)]
    duration_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    anyhow::ensure!(
        (2..=10).contains(&args.participants),
        "participants must be in range 2-10"
    );

    info!(
        version = roomcall::version(),
        room = %args.room,
        participants = args.participants,
        "starting mesh demo"
    );

    let config = CallConfig::default();
    let hub = LocalSignalingHub::new();

    let members: Vec<RoomMember> = (0..args.participants)
        .map(|i| RoomMember {
            participant: format!("member-{i}").into(),
            display_name: format!("Member {i}"),
        })
        .collect();

    let mut controllers = Vec::new();
    for member in &members {
        let controller = CallSessionController::new(
            config.clone(),
            LocalIdentity {
                participant: member.participant.clone(),
                display_name: member.display_name.clone(),
            },
            args.room.clone(),
            Arc::new(hub.transport()),
            SyntheticCapture::new(),
            RtcTransportFactory::new(config.clone()),
        )?;
        controller.connect().await?;
        spawn_event_logger(&controller);
        controllers.push(controller);
    }

    // The first member calls the room; everyone else answers on the
    // incoming-call notification (wired up by the event logger)
    let caller = controllers[0].clone();
    caller.start_call(&members).await?;

    tokio::time::sleep(Duration::from_secs(args.duration_secs)).await;

    info!("hanging up");
    for controller in &controllers {
        controller.shutdown().await;
    }
    info!(
        signaling_messages = hub.published_count(),
        "demo finished"
    );
    Ok(())
}

/// Log every call event; auto-accept incoming calls
fn spawn_event_logger(controller: &Arc<CallSessionController>) {
    let mut events = controller.subscribe();
    let controller = controller.clone();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            let me = controller.participant().clone();
            match event {
                CallEvent::IncomingCall { from_name, .. } => {
                    info!("[{me}] incoming call from {from_name}, accepting");
                    if let Err(e) = controller.accept_call().await {
                        warn!("[{me}] accept failed: {e}");
                    }
                }
                CallEvent::RemoteStreamAttached {
                    display_name,
                    stream,
                    ..
                } => {
                    info!(
                        "[{me}] remote stream from {display_name} ({} tracks)",
                        stream.tracks().len()
                    );
                }
                CallEvent::RemoteStreamRemoved { participant } => {
                    info!("[{me}] {participant} left");
                }
                CallEvent::PeerUnreachable {
                    display_name,
                    reason,
                    ..
                } => {
                    warn!("[{me}] could not connect to {display_name}: {reason}");
                }
                CallEvent::CallEnded => {
                    info!("[{me}] call ended");
                    break;
                }
            }
        }
    });
}
