//! Streaming content encryption in rclone's crypt data format.
//!
//! # Format
//! - Header: magic `RCLONE\0\0` (8 bytes) + random nonce (24 bytes)
//! - Blocks: up to 64 KiB of plaintext sealed with XSalsa20-Poly1305,
//!   written as tag (16 bytes) followed by ciphertext
//! - The nonce is incremented (little-endian) after every block
//!
//! Both directions are lazy: at most one block is held in memory at a time.

use bytes::{Bytes, BytesMut};
use crypto_secretbox::aead::generic_array::GenericArray;
use crypto_secretbox::aead::{AeadInPlace, KeyInit};
use crypto_secretbox::XSalsa20Poly1305;
use futures::stream;
use std::sync::Arc;

use veilvault_common::{ByteStream, ChunkReader, Error, Result};

/// File magic identifying the format.
pub const FILE_MAGIC: &[u8; 8] = b"RCLONE\x00\x00";
/// Nonce length.
pub const NONCE_SIZE: usize = 24;
/// Magic plus nonce.
pub const FILE_HEADER_SIZE: usize = FILE_MAGIC.len() + NONCE_SIZE;
/// Poly1305 tag prepended to each block.
pub const BLOCK_HEADER_SIZE: usize = 16;
/// Plaintext bytes per block.
pub const BLOCK_DATA_SIZE: usize = 64 * 1024;

/// Per-file nonce, incremented once per block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nonce([u8; NONCE_SIZE]);

impl Nonce {
    pub fn random() -> Self {
        Self(rand::random::<[u8; NONCE_SIZE]>())
    }

    pub fn from_bytes(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }

    /// Add one, carrying from byte 0 upwards.
    pub fn increment(&mut self) {
        for byte in self.0.iter_mut() {
            let (next, overflow) = byte.overflowing_add(1);
            *byte = next;
            if !overflow {
                break;
            }
        }
    }
}

/// Seals and opens content blocks with the data key.
pub struct ContentCipher {
    aead: XSalsa20Poly1305,
}

impl ContentCipher {
    pub fn new(data_key: &[u8; 32]) -> Self {
        Self {
            aead: XSalsa20Poly1305::new(GenericArray::from_slice(data_key)),
        }
    }

    /// Seal one block: returns tag || ciphertext.
    pub fn seal_block(&self, nonce: &Nonce, plain: &[u8]) -> Result<Bytes> {
        let mut out = BytesMut::with_capacity(BLOCK_HEADER_SIZE + plain.len());
        out.resize(BLOCK_HEADER_SIZE, 0);
        out.extend_from_slice(plain);
        let tag = self
            .aead
            .encrypt_in_place_detached(
                GenericArray::from_slice(nonce.as_bytes()),
                b"",
                &mut out[BLOCK_HEADER_SIZE..],
            )
            .map_err(|e| Error::Crypto(format!("Block encryption failed: {}", e)))?;
        out[..BLOCK_HEADER_SIZE].copy_from_slice(&tag);
        Ok(out.freeze())
    }

    /// Open one sealed block produced by [`seal_block`](Self::seal_block).
    pub fn open_block(&self, nonce: &Nonce, sealed: &[u8]) -> Result<Bytes> {
        if sealed.len() <= BLOCK_HEADER_SIZE {
            return Err(Error::Crypto(
                "Encrypted block is truncated".to_string(),
            ));
        }
        let (tag, body) = sealed.split_at(BLOCK_HEADER_SIZE);
        let mut buf = BytesMut::from(body);
        self.aead
            .decrypt_in_place_detached(
                GenericArray::from_slice(nonce.as_bytes()),
                b"",
                &mut buf,
                GenericArray::from_slice(tag),
            )
            .map_err(|_| {
                Error::Crypto("Failed to authenticate decrypted block - bad password?".to_string())
            })?;
        Ok(buf.freeze())
    }
}

/// Size of the ciphertext produced for `plain_len` bytes of plaintext.
pub fn encrypted_size(plain_len: u64) -> u64 {
    let block = BLOCK_DATA_SIZE as u64;
    let blocks = plain_len.div_ceil(block);
    FILE_HEADER_SIZE as u64 + blocks * BLOCK_HEADER_SIZE as u64 + plain_len
}

/// Plaintext size of a ciphertext of `encrypted_len` bytes, or `None` if no
/// plaintext encrypts to that length.
pub fn decrypted_size(encrypted_len: u64) -> Option<u64> {
    let body = encrypted_len.checked_sub(FILE_HEADER_SIZE as u64)?;
    let full = (BLOCK_HEADER_SIZE + BLOCK_DATA_SIZE) as u64;
    let blocks = body / full;
    let rest = body % full;
    match rest {
        0 => Some(blocks * BLOCK_DATA_SIZE as u64),
        r if r > BLOCK_HEADER_SIZE as u64 => {
            Some(blocks * BLOCK_DATA_SIZE as u64 + r - BLOCK_HEADER_SIZE as u64)
        }
        _ => None,
    }
}

struct EncryptState {
    source: ChunkReader,
    cipher: Arc<ContentCipher>,
    nonce: Nonce,
    header_sent: bool,
    finished: bool,
}

/// Wrap `source` into a stream of ciphertext.
pub fn encrypt_stream(cipher: Arc<ContentCipher>, source: ByteStream) -> ByteStream {
    encrypt_stream_with_nonce(cipher, source, Nonce::random())
}

pub(crate) fn encrypt_stream_with_nonce(
    cipher: Arc<ContentCipher>,
    source: ByteStream,
    nonce: Nonce,
) -> ByteStream {
    let state = EncryptState {
        source: ChunkReader::new(source),
        cipher,
        nonce,
        header_sent: false,
        finished: false,
    };

    Box::pin(stream::try_unfold(state, |mut state| async move {
        if !state.header_sent {
            state.header_sent = true;
            let mut header = BytesMut::with_capacity(FILE_HEADER_SIZE);
            header.extend_from_slice(FILE_MAGIC);
            header.extend_from_slice(state.nonce.as_bytes());
            return Ok(Some((header.freeze(), state)));
        }
        if state.finished {
            return Ok(None);
        }

        let block = state.source.read_up_to(BLOCK_DATA_SIZE).await?;
        if block.is_empty() {
            return Ok(None);
        }
        if block.len() < BLOCK_DATA_SIZE {
            state.finished = true;
        }
        let sealed = state.cipher.seal_block(&state.nonce, &block)?;
        state.nonce.increment();
        Ok(Some((sealed, state)))
    }))
}

struct DecryptState {
    source: ChunkReader,
    cipher: Arc<ContentCipher>,
    nonce: Option<Nonce>,
}

/// Wrap a ciphertext stream into a stream of plaintext.
///
/// The header is read on first poll; authentication failures surface as
/// `Error::Crypto` items.
pub fn decrypt_stream(cipher: Arc<ContentCipher>, source: ByteStream) -> ByteStream {
    let state = DecryptState {
        source: ChunkReader::new(source),
        cipher,
        nonce: None,
    };

    Box::pin(stream::try_unfold(state, |mut state| async move {
        let mut nonce = match state.nonce {
            Some(nonce) => nonce,
            None => {
                let header = state.source.read_up_to(FILE_HEADER_SIZE).await?;
                if header.len() < FILE_HEADER_SIZE {
                    return Err(Error::Crypto("Encrypted file too short".to_string()));
                }
                if &header[..FILE_MAGIC.len()] != FILE_MAGIC {
                    return Err(Error::Crypto(
                        "Not an encrypted file - bad magic string".to_string(),
                    ));
                }
                let mut raw = [0u8; NONCE_SIZE];
                raw.copy_from_slice(&header[FILE_MAGIC.len()..]);
                Nonce::from_bytes(raw)
            }
        };

        let sealed = state
            .source
            .read_up_to(BLOCK_HEADER_SIZE + BLOCK_DATA_SIZE)
            .await?;
        if sealed.is_empty() {
            return Ok(None);
        }
        let plain = state.cipher.open_block(&nonce, &sealed)?;
        nonce.increment();
        state.nonce = Some(nonce);
        Ok(Some((plain, state)))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use proptest::prelude::*;
    use veilvault_common::{bytes_stream, collect_stream};

    fn cipher() -> Arc<ContentCipher> {
        Arc::new(ContentCipher::new(&[0x42u8; 32]))
    }

    async fn roundtrip(data: Vec<u8>, piece: usize) -> Vec<u8> {
        let encrypted = collect_stream(encrypt_stream(cipher(), bytes_stream(data, piece)))
            .await
            .unwrap();
        collect_stream(decrypt_stream(cipher(), bytes_stream(encrypted, piece + 3)))
            .await
            .unwrap()
    }

    #[test]
    fn test_nonce_increment_carries() {
        let mut nonce = Nonce::from_bytes([0u8; NONCE_SIZE]);
        nonce.increment();
        assert_eq!(nonce.as_bytes()[0], 1);

        let mut raw = [0u8; NONCE_SIZE];
        raw[0] = 0xFF;
        raw[1] = 0xFF;
        let mut nonce = Nonce::from_bytes(raw);
        nonce.increment();
        assert_eq!(&nonce.as_bytes()[..3], &[0, 0, 1]);
    }

    #[tokio::test]
    async fn test_empty_payload_is_header_only() {
        let encrypted = collect_stream(encrypt_stream(cipher(), bytes_stream(Vec::new(), 1)))
            .await
            .unwrap();
        assert_eq!(encrypted.len(), FILE_HEADER_SIZE);
        assert_eq!(&encrypted[..8], FILE_MAGIC);
        assert!(roundtrip(Vec::new(), 1).await.is_empty());
    }

    #[tokio::test]
    async fn test_roundtrip_across_block_boundaries() {
        for len in [1, BLOCK_DATA_SIZE - 1, BLOCK_DATA_SIZE, BLOCK_DATA_SIZE + 1, 3 * BLOCK_DATA_SIZE + 17] {
            let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            assert_eq!(roundtrip(data.clone(), 10_000).await, data, "len {}", len);
        }
    }

    #[tokio::test]
    async fn test_encrypted_size_matches() {
        for len in [0usize, 5, BLOCK_DATA_SIZE, BLOCK_DATA_SIZE * 2 + 1] {
            let encrypted = collect_stream(encrypt_stream(cipher(), bytes_stream(vec![1u8; len], 4096)))
                .await
                .unwrap();
            assert_eq!(encrypted.len() as u64, encrypted_size(len as u64));
            assert_eq!(decrypted_size(encrypted.len() as u64), Some(len as u64));
        }
        assert_eq!(decrypted_size(10), None);
        assert_eq!(decrypted_size((FILE_HEADER_SIZE + BLOCK_HEADER_SIZE) as u64), None);
    }

    #[tokio::test]
    async fn test_fixed_nonce_is_deterministic() {
        let nonce = Nonce::from_bytes([9u8; NONCE_SIZE]);
        let a = collect_stream(encrypt_stream_with_nonce(cipher(), bytes_stream(&b"same"[..], 2), nonce))
            .await
            .unwrap();
        let b = collect_stream(encrypt_stream_with_nonce(cipher(), bytes_stream(&b"same"[..], 4), nonce))
            .await
            .unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_tampered_block_fails() {
        let mut encrypted = collect_stream(encrypt_stream(cipher(), bytes_stream(&b"secret data"[..], 64)))
            .await
            .unwrap();
        let last = encrypted.len() - 1;
        encrypted[last] ^= 0x01;
        let result = collect_stream(decrypt_stream(cipher(), bytes_stream(encrypted, 64))).await;
        assert!(matches!(result, Err(Error::Crypto(_))));
    }

    #[tokio::test]
    async fn test_wrong_key_fails() {
        let encrypted = collect_stream(encrypt_stream(cipher(), bytes_stream(&b"secret"[..], 64)))
            .await
            .unwrap();
        let other = Arc::new(ContentCipher::new(&[0x43u8; 32]));
        let result = collect_stream(decrypt_stream(other, bytes_stream(encrypted, 64))).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_bad_header_rejected() {
        let short = collect_stream(decrypt_stream(cipher(), bytes_stream(&b"RCLONE"[..], 64))).await;
        assert!(matches!(short, Err(Error::Crypto(_))));

        let bad_magic = vec![0u8; FILE_HEADER_SIZE + 20];
        let result = collect_stream(decrypt_stream(cipher(), bytes_stream(bad_magic, 64))).await;
        assert!(matches!(result, Err(Error::Crypto(_))));
    }

    #[tokio::test]
    async fn test_decrypt_is_lazy() {
        // The first plaintext item arrives before the whole ciphertext is produced.
        let data = vec![7u8; BLOCK_DATA_SIZE * 4];
        let encrypted = encrypt_stream(cipher(), bytes_stream(data, BLOCK_DATA_SIZE));
        let mut plain = decrypt_stream(cipher(), encrypted);
        let first = plain.next().await.unwrap().unwrap();
        assert_eq!(first.len(), BLOCK_DATA_SIZE);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]
        #[test]
        fn prop_content_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..200_000), piece in 1usize..70_000) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let out = rt.block_on(roundtrip(data.clone(), piece));
            prop_assert_eq!(out, data);
        }
    }
}
