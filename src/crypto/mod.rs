use aes::Aes256;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// AES block size in bytes; the IV occupies exactly one block.
pub const BLOCK_SIZE: usize = 16;

/// Length of the symmetric key in bytes (AES-256).
pub const KEY_SIZE: usize = 32;

/// Crypto operation errors
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("key must be exactly {KEY_SIZE} bytes")]
    KeyLength,

    #[error("key is not valid hex: {0}")]
    KeyEncoding(#[from] hex::FromHexError),

    #[error("transport text is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("ciphertext too short to contain an initialization vector")]
    CiphertextTooShort,

    #[error("ciphertext body is not a whole number of cipher blocks")]
    MisalignedCiphertext,

    #[error("invalid PKCS#7 padding")]
    InvalidPadding,

    #[error("failed to draw randomness for the initialization vector")]
    Randomness,
}

/// A 256-bit symmetric key shared by every node in the mesh.
///
/// All nodes must be configured with the same key; there is no key exchange.
#[derive(Clone)]
pub struct SecretKey([u8; KEY_SIZE]);

impl SecretKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| CryptoError::KeyLength)?;
        Ok(Self(key))
    }

    /// Parse a key from its hex-encoded configuration form.
    pub fn from_hex(text: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(text.trim())?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SecretKey {
    // Key material stays out of logs.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey(..)")
    }
}

/// Encrypt plaintext into transport-safe text.
///
/// The plaintext is PKCS#7-padded (a full block of padding is appended even
/// when the input is already block-aligned), encrypted with AES-256-CBC under
/// a fresh random IV, and the result is base64 of `IV || ciphertext`.
pub fn encrypt(plaintext: &[u8], key: &SecretKey) -> Result<String, CryptoError> {
    let mut iv = [0u8; BLOCK_SIZE];
    let rng = SystemRandom::new();
    rng.fill(&mut iv).map_err(|_| CryptoError::Randomness)?;

    let cipher = Aes256CbcEnc::new(key.as_bytes().into(), (&iv).into());
    let body = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut out = iv.to_vec();
    out.extend_from_slice(&body);
    Ok(BASE64.encode(out))
}

/// Decrypt transport-safe text back into plaintext.
///
/// Padding is validated byte-for-byte; ciphertext whose tail does not form
/// valid PKCS#7 padding is rejected rather than silently truncated.
pub fn decrypt(transport_text: &str, key: &SecretKey) -> Result<Vec<u8>, CryptoError> {
    let raw = BASE64.decode(transport_text)?;
    if raw.len() < BLOCK_SIZE {
        return Err(CryptoError::CiphertextTooShort);
    }

    let (iv_bytes, body) = raw.split_at(BLOCK_SIZE);
    if body.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::MisalignedCiphertext);
    }

    let mut iv = [0u8; BLOCK_SIZE];
    iv.copy_from_slice(iv_bytes);

    let cipher = Aes256CbcDec::new(key.as_bytes().into(), (&iv).into());
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(body)
        .map_err(|_| CryptoError::InvalidPadding)
}

/// Hex-encoded SHA-256 digest of the given bytes.
///
/// This is the content address of a record: the digest of the transport-safe
/// ciphertext, not of the plaintext it protects.
pub fn content_hash(data: &[u8]) -> String {
    let digest = digest::digest(&digest::SHA256, data);
    hex::encode(digest.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> SecretKey {
        SecretKey::from_bytes(b"thisis32bitlongpassphraseimusing").unwrap()
    }

    #[test]
    fn test_round_trip() {
        let key = test_key();
        let cases: &[&[u8]] = &[
            b"",
            b"a",
            b"exactly 16 byte.",
            b"exactly 32 bytes of plaintext!!!",
            b"This is some structured file content.",
        ];
        for plaintext in cases {
            let transport = encrypt(plaintext, &key).unwrap();
            let decrypted = decrypt(&transport, &key).unwrap();
            assert_eq!(&decrypted, plaintext, "round trip for {} bytes", plaintext.len());
        }
    }

    #[test]
    fn test_padding_always_appended() {
        // Even block-aligned plaintext gets a full block of padding, so the
        // raw output is always IV + plaintext rounded up one whole block.
        let key = test_key();
        for len in [0usize, 15, 16, 17, 32] {
            let plaintext = vec![0x41u8; len];
            let raw = BASE64.decode(encrypt(&plaintext, &key).unwrap()).unwrap();
            let padded = (len / BLOCK_SIZE + 1) * BLOCK_SIZE;
            assert_eq!(raw.len(), BLOCK_SIZE + padded, "plaintext of {} bytes", len);
        }
    }

    #[test]
    fn test_fresh_iv_changes_ciphertext() {
        // Same plaintext, different identity on every call. Cross-node dedup
        // therefore only converges on replicated ciphertext, never on
        // independently encrypted plaintext.
        let key = test_key();
        let a = encrypt(b"same content", &key).unwrap();
        let b = encrypt(b"same content", &key).unwrap();
        assert_ne!(a, b);
        assert_ne!(content_hash(a.as_bytes()), content_hash(b.as_bytes()));
    }

    #[test]
    fn test_ciphertext_too_short() {
        let key = test_key();
        let result = decrypt(&BASE64.encode([0u8; BLOCK_SIZE - 1]), &key);
        assert!(matches!(result, Err(CryptoError::CiphertextTooShort)));
    }

    #[test]
    fn test_misaligned_body_rejected() {
        let key = test_key();
        let result = decrypt(&BASE64.encode([0u8; BLOCK_SIZE + 5]), &key);
        assert!(matches!(result, Err(CryptoError::MisalignedCiphertext)));
    }

    #[test]
    fn test_empty_body_is_invalid_padding() {
        // A bare IV with no ciphertext blocks can never carry valid padding.
        let key = test_key();
        let result = decrypt(&BASE64.encode([0u8; BLOCK_SIZE]), &key);
        assert!(matches!(result, Err(CryptoError::InvalidPadding)));
    }

    #[test]
    fn test_not_base64() {
        let key = test_key();
        assert!(matches!(
            decrypt("definitely not base64!!!", &key),
            Err(CryptoError::Encoding(_))
        ));
    }

    #[test]
    fn test_key_parsing() {
        let hex_key = hex::encode([7u8; KEY_SIZE]);
        assert!(SecretKey::from_hex(&hex_key).is_ok());
        assert!(matches!(
            SecretKey::from_hex("0badc0de"),
            Err(CryptoError::KeyLength)
        ));
        assert!(matches!(
            SecretKey::from_hex("not hex at all"),
            Err(CryptoError::KeyEncoding(_))
        ));
    }

    #[test]
    fn test_content_hash_is_hex_sha256() {
        let hash = content_hash(b"Test content for hashing");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, content_hash(b"Test content for hashing"));
    }
}
