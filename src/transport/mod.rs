use crate::protocol::{self, CodecError, Envelope, MessageType};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Transport layer errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to dial {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no retained connection for peer {0}")]
    UnknownPeer(String),

    #[error("handlers must be registered before the listener starts")]
    AlreadyListening,

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Result type handlers report back to the dispatch loop. Failures terminate
/// only the connection task they occur on.
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Lets a handler write at most one response envelope on the connection the
/// request arrived on. `reply` consumes the responder, so a second response
/// is unrepresentable.
pub struct Responder<'a> {
    stream: &'a mut TcpStream,
}

impl Responder<'_> {
    pub async fn reply(self, envelope: &Envelope) -> Result<(), CodecError> {
        protocol::write_envelope(self.stream, envelope).await
    }
}

/// A polymorphic message handler, dispatched by envelope type.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle<'a>(&self, envelope: Envelope, responder: Responder<'a>) -> HandlerResult;
}

/// Connection-oriented TCP transport.
///
/// The accept side is strictly one request (and at most one response) per
/// connection. The peer set holds long-lived outbound connections used for
/// broadcast pushes; entries are added by `connect` and never pruned, not
/// even after a send failure.
pub struct TcpTransport {
    handlers: RwLock<HashMap<MessageType, Arc<dyn MessageHandler>>>,
    peers: Mutex<HashMap<String, TcpStream>>,
    local_addr: RwLock<Option<SocketAddr>>,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            peers: Mutex::new(HashMap::new()),
            local_addr: RwLock::new(None),
        }
    }

    /// Associate a handler with a message type. The registry is frozen once
    /// the listener starts.
    pub fn register_handler(
        &self,
        msg_type: MessageType,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), TransportError> {
        if self.local_addr.read().unwrap().is_some() {
            return Err(TransportError::AlreadyListening);
        }
        self.handlers.write().unwrap().insert(msg_type, handler);
        Ok(())
    }

    /// Bind the listening socket and spawn the accept loop.
    ///
    /// Binding is the one fatal failure in the system; callers are expected
    /// to abort on it rather than degrade.
    pub async fn listen(self: Arc<Self>, addr: &str) -> Result<SocketAddr, TransportError> {
        let listener = TcpListener::bind(addr).await.map_err(|source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        let local = listener.local_addr().map_err(|source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        })?;

        *self.local_addr.write().unwrap() = Some(local);
        info!("listening on {}", local);

        let transport = Arc::clone(&self);
        tokio::spawn(async move {
            transport.accept_loop(listener).await;
        });

        Ok(local)
    }

    /// The address the listener is bound to, once `listen` has run.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read().unwrap()
    }

    /// Dial a peer and retain the connection in the peer set.
    pub async fn connect(&self, addr: &str) -> Result<(), TransportError> {
        let stream = TcpStream::connect(addr).await.map_err(|source| TransportError::Dial {
            addr: addr.to_string(),
            source,
        })?;
        self.peers.lock().await.insert(addr.to_string(), stream);
        info!("connected to peer {}", addr);
        Ok(())
    }

    /// Snapshot of the peer set's addresses.
    pub async fn peer_addrs(&self) -> Vec<String> {
        self.peers.lock().await.keys().cloned().collect()
    }

    /// One-shot write of an envelope on a retained peer connection.
    pub async fn send(&self, addr: &str, envelope: &Envelope) -> Result<(), TransportError> {
        let mut peers = self.peers.lock().await;
        let stream = peers
            .get_mut(addr)
            .ok_or_else(|| TransportError::UnknownPeer(addr.to_string()))?;
        protocol::write_envelope(stream, envelope).await?;
        Ok(())
    }

    /// Dial fresh, send one envelope, await exactly one response, close.
    ///
    /// Every coordinator-initiated request/response exchange goes through
    /// here; the connection never outlives the exchange.
    pub async fn request(&self, addr: &str, envelope: &Envelope) -> Result<Envelope, TransportError> {
        let mut stream = TcpStream::connect(addr).await.map_err(|source| TransportError::Dial {
            addr: addr.to_string(),
            source,
        })?;
        protocol::write_envelope(&mut stream, envelope).await?;
        let response = protocol::read_envelope(&mut stream).await?;
        Ok(response)
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, remote)) => {
                    let transport = Arc::clone(&self);
                    tokio::spawn(async move {
                        transport.handle_connection(stream, remote).await;
                    });
                }
                Err(e) => {
                    warn!("accept error: {}", e);
                }
            }
        }
    }

    // One inbound envelope per accepted connection: decode, dispatch, close.
    async fn handle_connection(&self, mut stream: TcpStream, remote: SocketAddr) {
        let envelope = match protocol::read_envelope(&mut stream).await {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("failed to decode message from {}: {}", remote, e);
                return;
            }
        };

        let handler = {
            let handlers = self.handlers.read().unwrap();
            handlers.get(&envelope.msg_type).cloned()
        };

        let Some(handler) = handler else {
            warn!("no handler registered for message type {}", envelope.msg_type);
            return;
        };

        debug!("dispatching {} from {}", envelope.msg_type, remote);
        let responder = Responder { stream: &mut stream };
        if let Err(e) = handler.handle(envelope, responder).await {
            error!("handler error on connection from {}: {}", remote, e);
        }
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}
