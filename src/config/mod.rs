use crate::crypto::{CryptoError, SecretKey};
use serde::{Deserialize, Serialize};

/// Node configuration.
///
/// Every node in a mesh must share the same `secret_key_hex`; the key is
/// distributed out-of-band and never exchanged over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Port the TCP listener binds on.
    pub port: u16,
    /// Peer address to connect to at startup; `None` runs a standalone node.
    pub peer: Option<String>,
    /// Directory holding the content-addressed records.
    pub data_dir: String,
    /// Hex-encoded 256-bit symmetric key.
    pub secret_key_hex: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            peer: None,
            data_dir: ".filemesh".to_string(),
            // Development fixture key so local demos and tests interoperate
            // out of the box. Production meshes must configure their own.
            secret_key_hex: hex::encode(b"thisis32bitlongpassphraseimusing"),
        }
    }
}

impl NodeConfig {
    /// Load configuration from a JSON file, falling back to defaults when the
    /// path is absent or unreadable.
    pub fn load_or_default(config_path: Option<&str>) -> Self {
        if let Some(config) = config_path
            .and_then(|path| std::fs::read_to_string(path).ok())
            .and_then(|content| serde_json::from_str(&content).ok())
        {
            return config;
        }
        Self::default()
    }

    /// Save configuration to file
    pub fn save_to_file(&self, config_path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    /// The address the listener binds to.
    pub fn listen_addr(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    /// Parse the configured symmetric key.
    pub fn secret_key(&self) -> Result<SecretKey, CryptoError> {
        SecretKey::from_hex(&self.secret_key_hex)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.data_dir.is_empty() {
            return Err("Data directory must not be empty".into());
        }

        if let Some(peer) = &self.peer {
            if peer.is_empty() {
                return Err("Peer address must not be empty when set".into());
            }
        }

        self.secret_key()?;
        Ok(())
    }
}
