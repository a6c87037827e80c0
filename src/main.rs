use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use facechat::config::{DEFAULT_ROOM_CAPACITY, DEFAULT_STUN_SERVER};
use facechat::logging::{init_logging, LogFormat};
use facechat::negotiation::{CallNotice, Negotiator, NegotiatorHandle, StaticTrackCapture};
use facechat::rtc::WebRtcTransportFactory;
use facechat::signaling::JoinRequest;
use facechat::{
    ClientMessage, NegotiationConfig, ServerConfig, SignalingClient, SignalingServer,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Room signaling server and headless call client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value = "pretty", env = "FACECHAT_LOG_FORMAT", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the signaling server
    Serve(ServeArgs),
    /// Join a room and take part in a call without a UI
    Join(JoinArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:3000", env = "FACECHAT_LISTEN")]
    listen: SocketAddr,

    /// Maximum members per room, 0 for no limit
    #[arg(long, default_value_t = DEFAULT_ROOM_CAPACITY, env = "FACECHAT_ROOM_CAPACITY")]
    room_capacity: usize,
}

#[derive(Args, Debug)]
struct JoinArgs {
    /// Signaling server URL
    #[arg(long, default_value = "ws://127.0.0.1:3000", env = "FACECHAT_SERVER")]
    server: String,

    /// Identity to register with
    #[arg(long, env = "FACECHAT_EMAIL")]
    email: String,

    /// Room to join
    #[arg(long, env = "FACECHAT_ROOM")]
    room: String,

    /// Call the first user who joins after us
    #[arg(long)]
    call: bool,

    /// Accept incoming calls automatically
    #[arg(long, env = "FACECHAT_AUTO_ACCEPT")]
    auto_accept: bool,

    /// STUN/TURN servers (comma-separated)
    #[arg(long, value_delimiter = ',', default_value = DEFAULT_STUN_SERVER)]
    ice_servers: Vec<String>,

    /// Seconds an offer or answer may stay outstanding, 0 to wait forever
    #[arg(long, default_value_t = 30, env = "FACECHAT_NEGOTIATION_TIMEOUT")]
    negotiation_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Join(args) => join(args).await,
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let config = ServerConfig {
        listen_addr: args.listen,
        room_capacity: (args.room_capacity > 0).then_some(args.room_capacity),
    };
    let server = SignalingServer::bind(config)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

async fn join(args: JoinArgs) -> Result<()> {
    let config = NegotiationConfig {
        ice_servers: args.ice_servers,
        negotiation_timeout: (args.negotiation_timeout > 0)
            .then(|| Duration::from_secs(args.negotiation_timeout)),
        auto_accept: args.auto_accept,
        ..Default::default()
    };

    let mut signaling = SignalingClient::connect(&args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;

    let transports = Arc::new(WebRtcTransportFactory::new(config.ice_servers.clone()));
    let media = Arc::new(StaticTrackCapture::new(args.email.clone()));
    let (negotiator, handle, mut notices) =
        Negotiator::new(config, media, transports, signaling.sender());
    let negotiator = tokio::spawn(negotiator.run());

    signaling.send(ClientMessage::JoinRoom(JoinRequest::new(
        args.email.as_str(),
        args.room.as_str(),
    )))?;

    let mut want_call = args.call;
    loop {
        tokio::select! {
            message = signaling.receive() => match message {
                Some(message) => handle.deliver(message)?,
                None => {
                    warn!("signaling server closed the connection");
                    break;
                }
            },
            Some(notice) = notices.recv() => {
                want_call = on_notice(&handle, notice, want_call)?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("hanging up");
                handle.end_call()?;
                break;
            }
        }
    }

    handle.shutdown()?;
    negotiator.await.context("negotiator task failed")?;
    signaling.close().await;
    Ok(())
}

/// Logs a notice and places the call once a peer shows up. Returns whether a
/// call is still wanted.
fn on_notice(handle: &NegotiatorHandle, notice: CallNotice, want_call: bool) -> Result<bool> {
    match notice {
        CallNotice::RoomJoined(request) => {
            info!(identity = %request.identity, room = %request.room, "joined room")
        }
        CallNotice::UserJoined(user) => {
            info!(identity = %user.identity, handle = %user.handle, "user joined");
            if want_call {
                handle.start_call(user.handle)?;
                return Ok(false);
            }
        }
        CallNotice::UserLeft(user) => info!(identity = %user.identity, "user left"),
        CallNotice::IncomingCall { from } => info!(%from, "incoming call"),
        CallNotice::Connected { peer, role } => info!(%peer, ?role, "call connected"),
        CallNotice::RemoteTrack { peer, track } => {
            info!(%peer, kind = ?track.kind, id = %track.id, "receiving media")
        }
        CallNotice::Ended { peer, reason } => info!(?peer, ?reason, "call ended"),
        CallNotice::RoomLeft => info!("left room"),
        CallNotice::Error(text) => warn!(%text, "error"),
    }
    Ok(want_call)
}
