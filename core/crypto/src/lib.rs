//! Cryptographic layer for VeilVault.
//!
//! This module provides:
//! - Key derivation with scrypt, compatible with rclone's crypt backend
//! - Filename encryption (AES-256 EME, base32hex)
//! - Streaming content encryption (XSalsa20-Poly1305 secretbox blocks)
//! - Password obscuring for configuration storage
//! - [`CipherEngine`], a message-based front end to a dedicated cipher worker
//!
//! # Security Guarantees
//! - All key material is zeroized on drop
//! - No plaintext, password or key material is ever logged

pub mod cipher;
pub mod content;
pub mod eme;
pub mod engine;
pub mod keys;
pub mod names;
pub mod obscure;
mod worker;

pub use cipher::Cipher;
pub use engine::{CipherEngine, EngineConfig};
pub use keys::CipherKeys;
pub use obscure::{is_obscured, obscure, reveal};
pub use worker::Credentials;
