//! Cryptographic primitives for filecrypt.
//!
//! This module provides:
//! - Cipher selection (AES-128/192/256 in CBC mode)
//! - Key handling with automatic zeroization
//! - Chunked CBC transforms with PKCS#7 padding on the final chunk
//! - Streaming encryption for files of any size, over sync or async I/O
//!
//! # Security Notes
//! - CBC provides confidentiality only. Nothing here authenticates the
//!   ciphertext; a wrong key or corrupted input is detected only when the
//!   final padding fails to validate.
//! - Every encryption draws a fresh IV from the OS random source.
//! - No key material is ever logged

pub mod chunk;
pub mod cipher;
pub mod keys;
pub mod stream;

pub use chunk::{ChunkDecryptor, ChunkEncryptor};
pub use cipher::CipherSpec;
pub use keys::Key;
pub use stream::{
    decrypt_bytes, encrypt_bytes, DecryptingStream, EncryptingStream, StreamStats,
    DEFAULT_CHUNK_SIZE,
};
