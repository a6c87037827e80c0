use crate::config::ServerConfig;
use crate::error::Result;
use crate::hub::SignalingHub;
use crate::ids::ConnectionHandle;
use crate::room::Delivery;
use crate::signaling::ClientMessage;
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

const MALFORMED_MESSAGE: &str = "Unrecognized message.";

/// WebSocket front end for a [`SignalingHub`].
pub struct SignalingServer {
    listener: TcpListener,
    hub: Arc<SignalingHub>,
}

impl SignalingServer {
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        info!(
            addr = %listener.local_addr()?,
            room_capacity = ?config.room_capacity,
            "signaling server listening"
        );
        Ok(Self {
            listener,
            hub: Arc::new(SignalingHub::from_config(&config)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn hub(&self) -> Arc<SignalingHub> {
        Arc::clone(&self.hub)
    }

    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Accepts connections until `shutdown` completes.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("signaling server shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        let hub = Arc::clone(&self.hub);
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(stream, peer_addr, hub).await {
                                debug!(%peer_addr, error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "failed to accept connection"),
                },
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    hub: Arc<SignalingHub>,
) -> Result<()> {
    let ws_stream = accept_async(stream).await?;
    let handle = ConnectionHandle::generate();
    info!(%handle, %peer_addr, "user connected");

    let (mut write, mut read) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
    hub.connect(handle.clone(), tx).await;

    // The hub holds the only sender; the writer stops once it is detached.
    let writer = tokio::spawn(async move {
        while let Some(delivery) = rx.recv().await {
            let text = match delivery.message.encode() {
                Ok(text) => text,
                Err(e) => {
                    warn!(to = %delivery.to, error = %e, "failed to encode server message");
                    continue;
                }
            };
            if write.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = write.close().await;
    });

    while let Some(frame) = read.next().await {
        match frame {
            Ok(Message::Text(text)) => match ClientMessage::decode(&text) {
                Ok(message) => hub.dispatch(&handle, message).await,
                Err(e) => {
                    warn!(%handle, error = %e, "malformed client message");
                    hub.send_error(&handle, MALFORMED_MESSAGE.to_owned()).await;
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(%handle, error = %e, "websocket read failed");
                break;
            }
        }
    }

    hub.disconnect(&handle).await;
    let _ = writer.await;
    Ok(())
}
