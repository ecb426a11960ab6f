//! Chunked CBC transforms.
//!
//! [`ChunkEncryptor`] and [`ChunkDecryptor`] carry the CBC chaining state
//! across calls, so a stream can be fed through them one chunk at a time.
//! Only the final chunk is padded. Neither type performs I/O.

use aes::{Aes128, Aes192, Aes256};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use crate::cipher::{CipherSpec, BLOCK_SIZE};
use crate::keys::Key;
use filecrypt_common::{Error, Result};

enum EncryptorState {
    Aes128(cbc::Encryptor<Aes128>),
    Aes192(cbc::Encryptor<Aes192>),
    Aes256(cbc::Encryptor<Aes256>),
}

enum DecryptorState {
    Aes128(cbc::Decryptor<Aes128>),
    Aes192(cbc::Decryptor<Aes192>),
    Aes256(cbc::Decryptor<Aes256>),
}

fn init<C: KeyIvInit>(key: &[u8], iv: &[u8]) -> Result<C> {
    C::new_from_slices(key, iv)
        .map_err(|_| Error::Configuration("Invalid key or IV length".to_string()))
}

fn check_iv(cipher: CipherSpec, iv: &[u8]) -> Result<()> {
    if iv.len() != cipher.iv_len() {
        return Err(Error::Configuration(format!(
            "Invalid IV length for {}: expected {}, got {}",
            cipher,
            cipher.iv_len(),
            iv.len()
        )));
    }
    Ok(())
}

fn encrypt_blocks<C: BlockEncryptMut>(cipher: &mut C, buf: &mut [u8]) {
    for block in buf.chunks_exact_mut(BLOCK_SIZE) {
        cipher.encrypt_block_mut(GenericArray::from_mut_slice(block));
    }
}

fn decrypt_blocks<C: BlockDecryptMut>(cipher: &mut C, buf: &mut [u8]) {
    for block in buf.chunks_exact_mut(BLOCK_SIZE) {
        cipher.decrypt_block_mut(GenericArray::from_mut_slice(block));
    }
}

/// Incremental CBC encryptor.
pub struct ChunkEncryptor {
    state: EncryptorState,
    pending: Vec<u8>,
}

impl ChunkEncryptor {
    /// Create an encryptor seeded with `iv`.
    ///
    /// # Errors
    /// - Key or IV length does not match `cipher`
    pub fn new(cipher: CipherSpec, key: &Key, iv: &[u8]) -> Result<Self> {
        cipher.check_key(key.as_bytes())?;
        check_iv(cipher, iv)?;

        let key = key.as_bytes();
        let state = match cipher {
            CipherSpec::Aes128Cbc => EncryptorState::Aes128(init(key, iv)?),
            CipherSpec::Aes192Cbc => EncryptorState::Aes192(init(key, iv)?),
            CipherSpec::Aes256Cbc => EncryptorState::Aes256(init(key, iv)?),
        };

        Ok(Self {
            state,
            pending: Vec::with_capacity(BLOCK_SIZE),
        })
    }

    /// Encrypt every complete block available after appending `input`.
    ///
    /// A trailing partial block is kept until more input or [`finalize`]
    /// arrives. For block-aligned input the output has the input's length.
    ///
    /// [`finalize`]: ChunkEncryptor::finalize
    pub fn update(&mut self, input: &[u8]) -> Vec<u8> {
        self.pending.extend_from_slice(input);
        let complete = self.pending.len() - self.pending.len() % BLOCK_SIZE;
        let mut out: Vec<u8> = self.pending.drain(..complete).collect();

        match &mut self.state {
            EncryptorState::Aes128(c) => encrypt_blocks(c, &mut out),
            EncryptorState::Aes192(c) => encrypt_blocks(c, &mut out),
            EncryptorState::Aes256(c) => encrypt_blocks(c, &mut out),
        }
        out
    }

    /// Pad and encrypt the remaining bytes.
    ///
    /// Always returns between 1 and `BLOCK_SIZE` bytes more than were
    /// pending, i.e. exactly one block.
    pub fn finalize(self) -> Vec<u8> {
        let Self { state, pending } = self;
        match state {
            EncryptorState::Aes128(c) => c.encrypt_padded_vec_mut::<Pkcs7>(&pending),
            EncryptorState::Aes192(c) => c.encrypt_padded_vec_mut::<Pkcs7>(&pending),
            EncryptorState::Aes256(c) => c.encrypt_padded_vec_mut::<Pkcs7>(&pending),
        }
    }
}

/// Incremental CBC decryptor.
///
/// The last block seen is held back because it may carry the padding.
pub struct ChunkDecryptor {
    state: DecryptorState,
    pending: Vec<u8>,
}

impl ChunkDecryptor {
    /// Create a decryptor seeded with `iv`.
    ///
    /// # Errors
    /// - Key or IV length does not match `cipher`
    pub fn new(cipher: CipherSpec, key: &Key, iv: &[u8]) -> Result<Self> {
        cipher.check_key(key.as_bytes())?;
        check_iv(cipher, iv)?;

        let key = key.as_bytes();
        let state = match cipher {
            CipherSpec::Aes128Cbc => DecryptorState::Aes128(init(key, iv)?),
            CipherSpec::Aes192Cbc => DecryptorState::Aes192(init(key, iv)?),
            CipherSpec::Aes256Cbc => DecryptorState::Aes256(init(key, iv)?),
        };

        Ok(Self {
            state,
            pending: Vec::with_capacity(2 * BLOCK_SIZE),
        })
    }

    /// Decrypt all complete blocks except the last one seen so far.
    pub fn update(&mut self, input: &[u8]) -> Vec<u8> {
        self.pending.extend_from_slice(input);
        let held = match self.pending.len() % BLOCK_SIZE {
            0 => BLOCK_SIZE.min(self.pending.len()),
            partial => partial,
        };
        let ready = self.pending.len() - held;
        let mut out: Vec<u8> = self.pending.drain(..ready).collect();

        match &mut self.state {
            DecryptorState::Aes128(c) => decrypt_blocks(c, &mut out),
            DecryptorState::Aes192(c) => decrypt_blocks(c, &mut out),
            DecryptorState::Aes256(c) => decrypt_blocks(c, &mut out),
        }
        out
    }

    /// Decrypt the held-back block and strip its padding.
    ///
    /// # Errors
    /// - Crypto error if no final block was seen, the ciphertext was not
    ///   block aligned, or the padding is invalid
    pub fn finalize(self) -> Result<Vec<u8>> {
        let Self { state, pending } = self;

        if pending.is_empty() {
            return Err(Error::Crypto(
                "Ciphertext is missing its final block".to_string(),
            ));
        }
        if pending.len() != BLOCK_SIZE {
            return Err(Error::Crypto(
                "Ciphertext length is not a multiple of the block size".to_string(),
            ));
        }

        let result = match state {
            DecryptorState::Aes128(c) => c.decrypt_padded_vec_mut::<Pkcs7>(&pending),
            DecryptorState::Aes192(c) => c.decrypt_padded_vec_mut::<Pkcs7>(&pending),
            DecryptorState::Aes256(c) => c.decrypt_padded_vec_mut::<Pkcs7>(&pending),
        };

        result.map_err(|_| {
            Error::Crypto("Invalid padding (wrong key, wrong cipher, or corrupted data)".to_string())
        })
    }
}
