pub mod codec;

pub use codec::{CodecError, MAX_FRAME_LEN, read_envelope, write_envelope};

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Message kinds exchanged over the mesh.
///
/// The set is closed: dispatch is keyed by this enum, and an envelope whose
/// type has no registered handler is dropped without a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
pub enum MessageType {
    StoreFile,
    GetFile,
    FileContent,
    HasFile,
    HasFileResponse,
    DeleteFile,
    DeleteFileResponse,
    FileAnnouncement,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            MessageType::StoreFile => "STORE_FILE",
            MessageType::GetFile => "GET_FILE",
            MessageType::FileContent => "FILE_CONTENT",
            MessageType::HasFile => "HAS_FILE",
            MessageType::HasFileResponse => "HAS_FILE_RESPONSE",
            MessageType::DeleteFile => "DELETE_FILE",
            MessageType::DeleteFileResponse => "DELETE_FILE_RESPONSE",
            MessageType::FileAnnouncement => "FILE_ANNOUNCEMENT",
        };
        f.write_str(tag)
    }
}

/// The unit of wire transfer: one envelope per connection in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct Envelope {
    pub msg_type: MessageType,
    pub data: String,
}

impl Envelope {
    pub fn new(msg_type: MessageType, data: impl Into<String>) -> Self {
        Self {
            msg_type,
            data: data.into(),
        }
    }
}

/// The logical record carried inside `STORE_FILE` envelopes, as JSON.
///
/// `content` is the transport-safe ciphertext and `hash` its hex SHA-256
/// digest, which doubles as the record's storage identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFilePayload {
    pub filename: String,
    pub filetype: String,
    pub content: String,
    #[serde(default)]
    pub hash: String,
}

/// Broadcast record naming a file and the address it can be fetched from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAnnouncement {
    pub filename: String,
    pub addr: String,
}
