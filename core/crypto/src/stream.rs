//! Streaming encryption for large files.
//!
//! Data is processed in fixed-size chunks so memory use stays bounded no
//! matter how large the input is.
//!
//! # Format
//! `[IV][ciphertext chunk 1]...[ciphertext chunk N]`
//!
//! There is no header, magic, or length field. The reader has to know the
//! cipher (and therefore the IV length) out of band.

use rand::rngs::OsRng;
use rand::RngCore;
use std::io::{self, Read, Write};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::chunk::{ChunkDecryptor, ChunkEncryptor};
use crate::cipher::CipherSpec;
use crate::keys::Key;
use filecrypt_common::{Error, Result};

/// Default chunk size for streaming encryption (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Byte counters for one transform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Bytes consumed from the source, IV included when decrypting.
    pub bytes_read: u64,
    /// Bytes written to the destination, IV included when encrypting.
    pub bytes_written: u64,
}

/// Read until `buf` is full or the reader is exhausted.
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

async fn fill_async<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn truncated(cipher: CipherSpec, got: usize) -> Error {
    Error::Crypto(format!(
        "Input too short: expected a {}-byte IV, got {} bytes",
        cipher.iv_len(),
        got
    ))
}

/// Encrypting stream that processes data in chunks.
pub struct EncryptingStream<'a> {
    key: &'a Key,
    cipher: CipherSpec,
    chunk_size: usize,
}

impl<'a> EncryptingStream<'a> {
    /// Create a new encrypting stream.
    ///
    /// # Errors
    /// - Returns a configuration error if the key length does not match `cipher`
    pub fn new(key: &'a Key, cipher: CipherSpec) -> Result<Self> {
        cipher.check_key(key.as_bytes())?;
        Ok(Self {
            key,
            cipher,
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    /// Set custom chunk size.
    ///
    /// # Errors
    /// - Size is zero or not a multiple of the cipher block size
    pub fn with_chunk_size(mut self, size: usize) -> Result<Self> {
        self.cipher.check_chunk_size(size)?;
        self.chunk_size = size;
        Ok(self)
    }

    fn start(&self) -> Result<(Vec<u8>, ChunkEncryptor)> {
        let mut iv = vec![0u8; self.cipher.iv_len()];
        OsRng.fill_bytes(&mut iv);
        let encryptor = ChunkEncryptor::new(self.cipher, self.key, &iv)?;
        Ok((iv, encryptor))
    }

    /// Encrypt data from reader and write to writer.
    ///
    /// # Postconditions
    /// - Writer holds a fresh random IV followed by the ciphertext
    /// - Ciphertext length is the plaintext length rounded up to the next
    ///   full block
    ///
    /// # Errors
    /// - I/O errors from reader/writer; the writer's content is then incomplete
    pub fn encrypt_stream<R: Read, W: Write>(&self, mut reader: R, mut writer: W) -> Result<StreamStats> {
        let (iv, mut encryptor) = self.start()?;
        writer.write_all(&iv)?;

        let mut stats = StreamStats {
            bytes_read: 0,
            bytes_written: iv.len() as u64,
        };
        let mut buffer = vec![0u8; self.chunk_size];

        loop {
            let n = fill(&mut reader, &mut buffer)?;
            if n == 0 {
                break;
            }
            stats.bytes_read += n as u64;

            let encrypted = encryptor.update(&buffer[..n]);
            writer.write_all(&encrypted)?;
            stats.bytes_written += encrypted.len() as u64;

            if n < buffer.len() {
                break;
            }
        }

        let last = encryptor.finalize();
        writer.write_all(&last)?;
        stats.bytes_written += last.len() as u64;
        writer.flush()?;

        Ok(stats)
    }

    /// Async counterpart of [`encrypt_stream`](Self::encrypt_stream).
    ///
    /// The writer is flushed but not shut down; closing it is up to the caller.
    pub async fn encrypt_async<R, W>(&self, mut reader: R, mut writer: W) -> Result<StreamStats>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let (iv, mut encryptor) = self.start()?;
        writer.write_all(&iv).await?;

        let mut stats = StreamStats {
            bytes_read: 0,
            bytes_written: iv.len() as u64,
        };
        let mut buffer = vec![0u8; self.chunk_size];

        loop {
            let n = fill_async(&mut reader, &mut buffer).await?;
            if n == 0 {
                break;
            }
            stats.bytes_read += n as u64;

            let encrypted = encryptor.update(&buffer[..n]);
            writer.write_all(&encrypted).await?;
            stats.bytes_written += encrypted.len() as u64;

            if n < buffer.len() {
                break;
            }
        }

        let last = encryptor.finalize();
        writer.write_all(&last).await?;
        stats.bytes_written += last.len() as u64;
        writer.flush().await?;

        Ok(stats)
    }
}

/// Decrypting stream that processes encrypted chunks.
pub struct DecryptingStream<'a> {
    key: &'a Key,
    cipher: CipherSpec,
    chunk_size: usize,
}

impl<'a> DecryptingStream<'a> {
    /// Create a new decrypting stream.
    ///
    /// # Errors
    /// - Returns a configuration error if the key length does not match `cipher`
    pub fn new(key: &'a Key, cipher: CipherSpec) -> Result<Self> {
        cipher.check_key(key.as_bytes())?;
        Ok(Self {
            key,
            cipher,
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    /// Set custom chunk size.
    pub fn with_chunk_size(mut self, size: usize) -> Result<Self> {
        self.cipher.check_chunk_size(size)?;
        self.chunk_size = size;
        Ok(self)
    }

    /// Decrypt data from reader and write to writer.
    ///
    /// # Preconditions
    /// - Reader contains data produced by [`EncryptingStream`] with the same
    ///   key and cipher
    ///
    /// # Errors
    /// - Crypto error if the input is shorter than the IV, is not block
    ///   aligned, or ends with invalid padding
    /// - I/O errors from reader/writer
    ///
    /// Plaintext is written as it is produced, so on error the writer may
    /// already hold a prefix of the output.
    pub fn decrypt_stream<R: Read, W: Write>(&self, mut reader: R, mut writer: W) -> Result<StreamStats> {
        let mut iv = vec![0u8; self.cipher.iv_len()];
        let got = fill(&mut reader, &mut iv)?;
        if got < iv.len() {
            return Err(truncated(self.cipher, got));
        }

        let mut decryptor = ChunkDecryptor::new(self.cipher, self.key, &iv)?;
        let mut stats = StreamStats {
            bytes_read: iv.len() as u64,
            bytes_written: 0,
        };
        let mut buffer = vec![0u8; self.chunk_size];

        loop {
            let n = fill(&mut reader, &mut buffer)?;
            if n == 0 {
                break;
            }
            stats.bytes_read += n as u64;

            let plaintext = decryptor.update(&buffer[..n]);
            writer.write_all(&plaintext)?;
            stats.bytes_written += plaintext.len() as u64;

            if n < buffer.len() {
                break;
            }
        }

        let last = decryptor.finalize()?;
        writer.write_all(&last)?;
        stats.bytes_written += last.len() as u64;
        writer.flush()?;

        Ok(stats)
    }

    /// Async counterpart of [`decrypt_stream`](Self::decrypt_stream).
    pub async fn decrypt_async<R, W>(&self, mut reader: R, mut writer: W) -> Result<StreamStats>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut iv = vec![0u8; self.cipher.iv_len()];
        let got = fill_async(&mut reader, &mut iv).await?;
        if got < iv.len() {
            return Err(truncated(self.cipher, got));
        }

        let mut decryptor = ChunkDecryptor::new(self.cipher, self.key, &iv)?;
        let mut stats = StreamStats {
            bytes_read: iv.len() as u64,
            bytes_written: 0,
        };
        let mut buffer = vec![0u8; self.chunk_size];

        loop {
            let n = fill_async(&mut reader, &mut buffer).await?;
            if n == 0 {
                break;
            }
            stats.bytes_read += n as u64;

            let plaintext = decryptor.update(&buffer[..n]);
            writer.write_all(&plaintext).await?;
            stats.bytes_written += plaintext.len() as u64;

            if n < buffer.len() {
                break;
            }
        }

        let last = decryptor.finalize()?;
        writer.write_all(&last).await?;
        stats.bytes_written += last.len() as u64;
        writer.flush().await?;

        Ok(stats)
    }
}

/// Encrypt a complete byte slice using streaming encryption.
///
/// This is a convenience function for when the complete data is available.
pub fn encrypt_bytes(key: &Key, cipher: CipherSpec, data: &[u8]) -> Result<Vec<u8>> {
    let stream = EncryptingStream::new(key, cipher)?;
    let mut output = Vec::with_capacity(cipher.iv_len() + data.len() + cipher.block_size());
    stream.encrypt_stream(data, &mut output)?;
    Ok(output)
}

/// Decrypt a complete byte slice that was encrypted with streaming encryption.
pub fn decrypt_bytes(key: &Key, cipher: CipherSpec, data: &[u8]) -> Result<Vec<u8>> {
    let stream = DecryptingStream::new(key, cipher)?;
    let mut output = Vec::with_capacity(data.len());
    stream.decrypt_stream(data, &mut output)?;
    Ok(output)
}
