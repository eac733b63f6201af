//! Key derivation, password validation, and block decryption.
//!
//! Key derivation: PBKDF2-HMAC-SHA256(password, salt = SHA-256(image_id)) →
//! 32-byte key. The password check compares HMAC-SHA256(key, key) against
//! the `hmac` stored in the file header.
//!
//! Metadata blocks are AES-ECB encrypted; data blocks are AES-CBC with a
//! per-block IV derived from (image_id, disk, partition, block_index) so the
//! file never has to store IVs. Both modes use NoPadding: every encrypted
//! payload is a whole number of AES blocks.

use aes::cipher::block_padding::NoPadding;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncrypt, KeyInit, KeyIvInit};
use aes::{Aes128, Aes192, Aes256};
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::enums::AesType;
use crate::error::{ImageError, Result};

/// Derived key length; all AES variants read their key from the front of it.
pub const KEY_LENGTH: usize = 32;

/// AES block size; every cipher buffer must be a multiple of this.
pub const AES_BLOCK_SIZE: usize = 16;

type HmacSha256 = Hmac<Sha256>;

/// Derive the 32-byte encryption key from a password.
///
/// The salt is SHA-256 of the 8-byte binary image id, so the same password
/// yields a different key for every backup set.
pub fn derive_key(
    image_id: &[u8; 8],
    password: &str,
    iterations: u32,
) -> Zeroizing<[u8; KEY_LENGTH]> {
    let salt = Sha256::digest(image_id);
    let mut key = Zeroizing::new([0u8; KEY_LENGTH]);
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_slice(), iterations, &mut key[..]);
    key
}

/// HMAC-SHA256 of the derived key, keyed with itself. This is the value the
/// file header stores for password validation.
pub fn key_hmac(key: &[u8; KEY_LENGTH]) -> [u8; KEY_LENGTH] {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(key);
    mac.finalize().into_bytes().into()
}

/// Derive the key for `password` and compare its HMAC with the one stored in
/// the file. Returns the validated key, or `InvalidPassword` on mismatch.
pub fn validate_password(
    image_id: &[u8; 8],
    iterations: u32,
    hmac_binary: &[u8; KEY_LENGTH],
    password: &str,
) -> Result<Zeroizing<[u8; KEY_LENGTH]>> {
    let key = derive_key(image_id, password, iterations);
    if key_hmac(&key) != *hmac_binary {
        return Err(ImageError::InvalidPassword);
    }
    Ok(key)
}

/// MD5 digest of `data`.
pub fn md5(data: &[u8]) -> [u8; 16] {
    Md5::digest(data).into()
}

macro_rules! ecb_decrypt_in_place {
    ($cipher:ty, $key:expr, $buf:expr) => {{
        let dec = ecb::Decryptor::<$cipher>::new_from_slice($key)
            .map_err(|e| ImageError::CryptoInit(e.to_string()))?;
        dec.decrypt_padded_mut::<NoPadding>($buf)
            .map_err(|_| ImageError::CryptoInit("block decrypt failed".into()))?;
        Ok(())
    }};
}

macro_rules! cbc_decrypt_in_place {
    ($cipher:ty, $key:expr, $iv:expr, $buf:expr) => {{
        let dec = cbc::Decryptor::<$cipher>::new_from_slices($key, $iv)
            .map_err(|e| ImageError::CryptoInit(e.to_string()))?;
        dec.decrypt_padded_mut::<NoPadding>($buf)
            .map_err(|_| ImageError::CryptoInit("block decrypt failed".into()))?;
        Ok(())
    }};
}

/// Decrypt `buf` in place with AES-ECB. Used for metadata blocks.
pub fn decrypt_ecb(aes_type: AesType, key: &[u8; KEY_LENGTH], buf: &mut [u8]) -> Result<()> {
    if buf.len() % AES_BLOCK_SIZE != 0 {
        return Err(ImageError::CryptoSize(buf.len()));
    }
    match aes_type {
        AesType::None => Err(ImageError::CryptoInit("no AES variant selected".into())),
        AesType::Aes128 => ecb_decrypt_in_place!(Aes128, &key[..16], buf),
        AesType::Aes192 => ecb_decrypt_in_place!(Aes192, &key[..24], buf),
        AesType::Aes256 => ecb_decrypt_in_place!(Aes256, &key[..32], buf),
    }
}

/// Decrypt `buf` in place with AES-CBC. Used for data blocks.
pub fn decrypt_cbc(
    aes_type: AesType,
    key: &[u8; KEY_LENGTH],
    iv: &[u8; AES_BLOCK_SIZE],
    buf: &mut [u8],
) -> Result<()> {
    if buf.len() % AES_BLOCK_SIZE != 0 {
        return Err(ImageError::CryptoSize(buf.len()));
    }
    match aes_type {
        AesType::None => Err(ImageError::CryptoInit("no AES variant selected".into())),
        AesType::Aes128 => cbc_decrypt_in_place!(Aes128, &key[..16], iv, buf),
        AesType::Aes192 => cbc_decrypt_in_place!(Aes192, &key[..24], iv, buf),
        AesType::Aes256 => cbc_decrypt_in_place!(Aes256, &key[..32], iv, buf),
    }
}

/// Build the 16-byte IV for one data block.
///
/// The IV is a counter-like record — image id, then LE disk number,
/// partition number, and block index — encrypted with one round of
/// AES-256-ECB under SHA-256 of the derived key. Deterministic, so restore
/// never needs stored IVs.
pub fn format_iv(
    image_id: &[u8; 8],
    disk_number: u16,
    partition_number: u16,
    block_index: u32,
    key: &[u8; KEY_LENGTH],
) -> Result<[u8; AES_BLOCK_SIZE]> {
    let mut record = [0u8; AES_BLOCK_SIZE];
    record[0..8].copy_from_slice(image_id);
    record[8..10].copy_from_slice(&disk_number.to_le_bytes());
    record[10..12].copy_from_slice(&partition_number.to_le_bytes());
    record[12..16].copy_from_slice(&block_index.to_le_bytes());

    let key_hash = Sha256::digest(key);
    let cipher = Aes256::new_from_slice(key_hash.as_slice())
        .map_err(|e| ImageError::CryptoInit(e.to_string()))?;

    let mut block = GenericArray::clone_from_slice(&record);
    cipher.encrypt_block(&mut block);

    let mut iv = [0u8; AES_BLOCK_SIZE];
    iv.copy_from_slice(block.as_slice());
    Ok(iv)
}
