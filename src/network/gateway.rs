//! Gateway - TCP listener that accepts incoming WebSocket connections.
//!
//! The handshake is an HTTP upgrade carrying the bearer token in the
//! `Authorization` header or a `token` query parameter; transports that can
//! set neither may present it in a `connect` frame within a short deadline.
//! Token verification happens before the connection is registered anywhere.

use futures_util::{SinkExt, StreamExt};
use palaver_proto::{ClientCommand, ClientFrame, ErrorCode, ErrorData, ServerEvent};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tracing::{debug, error, info, instrument, warn};

use super::connection::Connection;
use super::limit::ConnectionLimit;
use crate::auth::Principal;
use crate::router::MessageRouter;
use crate::state::Hub;

/// How long a connection without a handshake token may wait for its
/// `connect` frame.
const CONNECT_FRAME_DEADLINE: Duration = Duration::from_secs(5);

/// The Gateway accepts incoming TCP connections, upgrades them, and spawns
/// connection tasks.
pub struct Gateway {
    listener: TcpListener,
    hub: Arc<Hub>,
    router: Arc<MessageRouter>,
    limit: ConnectionLimit,
}

impl Gateway {
    /// Bind the gateway to the configured address.
    pub async fn bind(addr: SocketAddr, hub: Arc<Hub>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let limit = ConnectionLimit::new(hub.settings.max_connections);
        let router = Arc::new(MessageRouter::new(Arc::clone(&hub)));
        info!(addr = %listener.local_addr()?, "gateway listening");
        Ok(Self {
            listener,
            hub,
            router,
            limit,
        })
    }

    /// The bound address (useful when the port was 0).
    #[allow(dead_code)] // Used by embedding harnesses
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until shutdown.
    #[instrument(skip(self), name = "gateway")]
    pub async fn run(self) -> std::io::Result<()> {
        let mut shutdown = self.hub.shutdown_signal();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let Some(permit) = self.limit.try_acquire() else {
                                warn!(%addr, "connection cap reached, refusing");
                                drop(stream);
                                continue;
                            };

                            let hub = Arc::clone(&self.hub);
                            let router = Arc::clone(&self.router);
                            tokio::spawn(async move {
                                let _permit = permit;
                                if let Err(e) = handshake(stream, addr, hub, router).await {
                                    debug!(%addr, error = %e, "connection ended with error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("gateway shutting down");
                    return Ok(());
                }
            }
        }
    }
}

/// Extract the bearer token from the upgrade request.
fn token_from_request(req: &Request) -> Option<String> {
    if let Some(auth) = req
        .headers()
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(token) = auth.strip_prefix("Bearer ") {
            return Some(token.to_string());
        }
    }
    req.uri().query().and_then(|query| {
        query
            .split('&')
            .find_map(|pair| pair.strip_prefix("token=").map(str::to_string))
    })
}

async fn send_auth_error(
    ws: &mut WebSocketStream<TcpStream>,
    message: &str,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    crate::metrics::AUTH_FAILURES.inc();
    let frame = ServerEvent::Error(ErrorData::new(ErrorCode::Unauthenticated, message));
    ws.send(WsMessage::Text(frame.to_json())).await?;
    ws.close(None).await
}

/// Upgrade, authenticate, and hand off to the connection lifecycle.
async fn handshake(
    stream: TcpStream,
    addr: SocketAddr,
    hub: Arc<Hub>,
    router: Arc<MessageRouter>,
) -> anyhow::Result<()> {
    let mut token: Option<String> = None;
    let callback = |req: &Request, response: Response| {
        token = token_from_request(req);
        Ok(response)
    };
    let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback).await?;

    // Fallback: credentials in a `connect` frame.
    let token = match token {
        Some(token) => token,
        None => match wait_for_connect_frame(&mut ws).await {
            Some(token) => token,
            None => {
                send_auth_error(&mut ws, "no credentials presented").await?;
                return Ok(());
            }
        },
    };

    let principal: Principal = match hub.verifier.verify(&token).await {
        Ok(principal) => principal,
        Err(e) => {
            info!(%addr, code = e.error_code(), "handshake rejected");
            send_auth_error(&mut ws, &e.to_string()).await?;
            return Ok(());
        }
    };

    info!(%addr, principal = principal.id, name = %principal.display_name, "client authenticated");
    let connection = Connection::new(hub, router, principal, ws, addr);
    connection.run().await
}

/// Read frames briefly until a `connect` frame with a token arrives.
async fn wait_for_connect_frame(ws: &mut WebSocketStream<TcpStream>) -> Option<String> {
    let deadline = tokio::time::sleep(CONNECT_FRAME_DEADLINE);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => return None,
            frame = ws.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Ok(decoded) = ClientFrame::decode(&text) {
                            if let ClientCommand::Connect(data) = decoded.command {
                                return Some(data.token);
                            }
                        }
                        // Anything else before authentication is ignored.
                    }
                    Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => continue,
                    Some(Ok(_)) => continue,
                    Some(Err(_)) | None => return None,
                }
            }
        }
    }
}
