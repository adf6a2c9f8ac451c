use crate::config::NodeConfig;
use crate::crypto::{self, CryptoError, SecretKey};
use crate::protocol::{Envelope, FileAnnouncement, MessageType, StoredFilePayload};
use crate::store::{ContentStore, StoreError};
use crate::transport::{HandlerResult, MessageHandler, Responder, TcpTransport, TransportError};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock, Weak};
use thiserror::Error;
use tracing::{info, warn};

/// Coordinator-level errors. Each aborts the operation it occurred in and is
/// reported to the caller; nothing here crashes the process.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("failed to encode payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("stored record is not valid transport text: {0}")]
    CorruptRecord(#[from] std::string::FromUtf8Error),

    #[error("peer answered {got} where {want} was expected")]
    UnexpectedResponse { want: MessageType, got: MessageType },
}

/// Replication coordinator: wires the content store, the crypto envelope and
/// the transport together, and owns the handler set for inbound messages.
pub struct FileServer {
    transport: Arc<TcpTransport>,
    store: Arc<ContentStore>,
    key: SecretKey,
    listen_addr: String,
    advertised: RwLock<String>,
}

impl FileServer {
    /// Build a server from configuration and register its handler set.
    /// Handlers are in place before `start`, so the registry never changes
    /// while the listener is live.
    pub async fn new(config: &NodeConfig) -> Result<Arc<Self>, ServerError> {
        let store = Arc::new(ContentStore::open(&config.data_dir).await?);
        let key = config.secret_key()?;

        let server = Arc::new(Self {
            transport: Arc::new(TcpTransport::new()),
            store,
            key,
            listen_addr: config.listen_addr(),
            advertised: RwLock::new(String::new()),
        });
        Self::register_handlers(&server)?;
        Ok(server)
    }

    /// Start the TCP listener. Bind failure is fatal to the caller.
    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        let local = Arc::clone(&self.transport).listen(&self.listen_addr).await?;
        *self.advertised.write().unwrap() = local.to_string();
        Ok(local)
    }

    /// Establish a long-lived outbound connection to a peer.
    pub async fn connect_to(&self, addr: &str) -> Result<(), ServerError> {
        self.transport.connect(addr).await?;
        Ok(())
    }

    /// The address announced to peers, available once `start` has run.
    pub fn advertised_addr(&self) -> String {
        self.advertised.read().unwrap().clone()
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    pub async fn peer_addrs(&self) -> Vec<String> {
        self.transport.peer_addrs().await
    }

    /// Encrypt and store a file locally, then replicate it to the mesh.
    ///
    /// The record is stored before any network traffic happens; with no
    /// connected peers the upload still succeeds as a purely local store.
    /// Per-peer push failures are logged, never retried.
    pub async fn upload(
        &self,
        filename: &str,
        filetype: &str,
        plaintext: &[u8],
    ) -> Result<String, ServerError> {
        info!("starting replication of {} to all nodes", filename);

        let ciphertext = crypto::encrypt(plaintext, &self.key)?;
        let hash = crypto::content_hash(ciphertext.as_bytes());

        let payload = StoredFilePayload {
            filename: filename.to_string(),
            filetype: filetype.to_string(),
            content: ciphertext,
            hash: hash.clone(),
        };
        let payload_json = serde_json::to_string(&payload)?;

        // Local store first: replication only ever pushes content that is
        // already durable here.
        self.store.store(&payload_json).await?;
        let record = ContentStore::record_name(&hash);

        self.broadcast(&record).await?;

        let peers = self.transport.peer_addrs().await;
        if peers.is_empty() {
            info!("no connected peers, skipping replication");
            return Ok(record);
        }

        let envelope = Envelope::new(MessageType::StoreFile, payload_json);
        for peer in &peers {
            match self.transport.send(peer, &envelope).await {
                Ok(()) => info!("pushed {} to {}", record, peer),
                Err(e) => warn!("failed to push {} to {}: {}", record, peer, e),
            }
        }

        info!("replication of {} finished across {} peers", record, peers.len());
        Ok(record)
    }

    /// Fetch a record's plaintext, local-first.
    ///
    /// A locally present record is decrypted without any network traffic.
    /// Otherwise one `GET_FILE` round trip is made to `peer_addr` and the
    /// received ciphertext is cached under its own content hash, so the next
    /// lookup is local.
    pub async fn download(&self, peer_addr: &str, name: &str) -> Result<Vec<u8>, ServerError> {
        if self.store.has(name).await {
            info!("record {} found locally, no fetch needed", name);
            let text = String::from_utf8(self.store.load(name).await?)?;
            return Ok(crypto::decrypt(&text, &self.key)?);
        }

        info!("record {} not found locally, fetching from {}", name, peer_addr);
        let request = Envelope::new(MessageType::GetFile, name);
        let response = self.transport.request(peer_addr, &request).await?;
        if response.msg_type != MessageType::FileContent {
            return Err(ServerError::UnexpectedResponse {
                want: MessageType::FileContent,
                got: response.msg_type,
            });
        }

        let plaintext = crypto::decrypt(&response.data, &self.key)?;

        // Cache for the next access. The identity is the hash of the bytes we
        // received, which for a faithful peer equals the announced name.
        let hash = crypto::content_hash(response.data.as_bytes());
        let payload = StoredFilePayload {
            filename: name.to_string(),
            filetype: "text/plain".to_string(),
            content: response.data,
            hash,
        };
        self.store.store(&serde_json::to_string(&payload)?).await?;
        info!("record {} cached locally, next access will be local", name);

        Ok(plaintext)
    }

    /// Announce a record to every peer currently in the set. Send failures
    /// are logged per peer; announcements are fire-and-forget.
    pub async fn broadcast(&self, name: &str) -> Result<(), ServerError> {
        let announcement = FileAnnouncement {
            filename: name.to_string(),
            addr: self.advertised_addr(),
        };
        let envelope = Envelope::new(
            MessageType::FileAnnouncement,
            serde_json::to_string(&announcement)?,
        );

        for peer in self.transport.peer_addrs().await {
            if let Err(e) = self.transport.send(&peer, &envelope).await {
                warn!("failed to announce {} to {}: {}", name, peer, e);
            }
        }
        Ok(())
    }

    /// Ask a remote node to delete a record. No local effect.
    pub async fn delete(&self, peer_addr: &str, name: &str) -> Result<String, ServerError> {
        let request = Envelope::new(MessageType::DeleteFile, name);
        let response = self.transport.request(peer_addr, &request).await?;
        if response.msg_type != MessageType::DeleteFileResponse {
            return Err(ServerError::UnexpectedResponse {
                want: MessageType::DeleteFileResponse,
                got: response.msg_type,
            });
        }
        Ok(response.data)
    }

    /// Probe a remote node for a record's existence.
    pub async fn has_remote(&self, peer_addr: &str, name: &str) -> Result<bool, ServerError> {
        let request = Envelope::new(MessageType::HasFile, name);
        let response = self.transport.request(peer_addr, &request).await?;
        if response.msg_type != MessageType::HasFileResponse {
            return Err(ServerError::UnexpectedResponse {
                want: MessageType::HasFileResponse,
                got: response.msg_type,
            });
        }
        Ok(response.data == "true")
    }

    fn register_handlers(server: &Arc<Self>) -> Result<(), TransportError> {
        let t = &server.transport;
        t.register_handler(
            MessageType::StoreFile,
            Arc::new(StoreFileHandler { store: Arc::clone(&server.store) }),
        )?;
        t.register_handler(
            MessageType::GetFile,
            Arc::new(GetFileHandler { store: Arc::clone(&server.store) }),
        )?;
        t.register_handler(
            MessageType::HasFile,
            Arc::new(HasFileHandler { store: Arc::clone(&server.store) }),
        )?;
        t.register_handler(
            MessageType::DeleteFile,
            Arc::new(DeleteFileHandler { store: Arc::clone(&server.store) }),
        )?;
        t.register_handler(
            MessageType::FileAnnouncement,
            Arc::new(AnnouncementHandler { server: Arc::downgrade(server) }),
        )?;
        Ok(())
    }
}

/// Persists replicated content pushed by an uploader. No response.
struct StoreFileHandler {
    store: Arc<ContentStore>,
}

#[async_trait]
impl MessageHandler for StoreFileHandler {
    async fn handle<'a>(&self, envelope: Envelope, _responder: Responder<'a>) -> HandlerResult {
        info!("received file content to store");
        self.store.store(&envelope.data).await?;
        Ok(())
    }
}

/// Serves a record's ciphertext. A missing record closes the connection
/// without a response; the requester sees the aborted exchange.
struct GetFileHandler {
    store: Arc<ContentStore>,
}

#[async_trait]
impl MessageHandler for GetFileHandler {
    async fn handle<'a>(&self, envelope: Envelope, responder: Responder<'a>) -> HandlerResult {
        info!("received GET_FILE request for {}", envelope.data);
        let bytes = self.store.load(&envelope.data).await?;
        let text = String::from_utf8(bytes)?;
        responder
            .reply(&Envelope::new(MessageType::FileContent, text))
            .await?;
        Ok(())
    }
}

/// Existence probe; always answers `"true"` or `"false"`.
struct HasFileHandler {
    store: Arc<ContentStore>,
}

#[async_trait]
impl MessageHandler for HasFileHandler {
    async fn handle<'a>(&self, envelope: Envelope, responder: Responder<'a>) -> HandlerResult {
        let has = self.store.has(&envelope.data).await;
        responder
            .reply(&Envelope::new(MessageType::HasFileResponse, has.to_string()))
            .await?;
        Ok(())
    }
}

/// Deletes a record on request and reports the outcome either way.
struct DeleteFileHandler {
    store: Arc<ContentStore>,
}

#[async_trait]
impl MessageHandler for DeleteFileHandler {
    async fn handle<'a>(&self, envelope: Envelope, responder: Responder<'a>) -> HandlerResult {
        info!("received DELETE_FILE request for {}", envelope.data);
        let data = match self.store.delete(&envelope.data).await {
            Ok(()) => "success".to_string(),
            Err(e) => format!("error: {e}"),
        };
        responder
            .reply(&Envelope::new(MessageType::DeleteFileResponse, data))
            .await?;
        Ok(())
    }
}

/// Reacts to a peer's announcement by fetching the record on a fresh task.
///
/// The download must not run on the connection task: a slow fetch would
/// otherwise hold the announcing connection open. Announcements are never
/// re-broadcast; a handler that re-announced would amplify every upload
/// into an unbounded flood across the mesh.
struct AnnouncementHandler {
    server: Weak<FileServer>,
}

#[async_trait]
impl MessageHandler for AnnouncementHandler {
    async fn handle<'a>(&self, envelope: Envelope, _responder: Responder<'a>) -> HandlerResult {
        let announcement: FileAnnouncement = serde_json::from_str(&envelope.data)?;
        info!("peer announced new file {} at {}", announcement.filename, announcement.addr);

        let Some(server) = self.server.upgrade() else {
            // Server is shutting down; nothing to fetch into.
            return Ok(());
        };

        tokio::spawn(async move {
            match server.download(&announcement.addr, &announcement.filename).await {
                Ok(plaintext) => info!(
                    "announced record {} fetched, {} plaintext bytes",
                    announcement.filename,
                    plaintext.len()
                ),
                Err(e) => warn!(
                    "failed to fetch announced record {} from {}: {}",
                    announcement.filename, announcement.addr, e
                ),
            }
        });
        Ok(())
    }
}
