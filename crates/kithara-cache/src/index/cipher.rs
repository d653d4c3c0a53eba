#![forbid(unsafe_code)]

use aes::Aes128;
use cbc::{
    Decryptor, Encryptor,
    cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7},
};
use rand::RngCore;

use crate::error::{CacheError, CacheResult};

pub(crate) const IV_LEN: usize = 16;

/// AES-128 key of an encrypted content index.
pub type SecretKey = [u8; 16];

pub(crate) fn random_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);
    iv
}

/// AES-128-CBC with PKCS#7 padding.
pub(crate) fn encrypt(key: &SecretKey, iv: &[u8; IV_LEN], plaintext: &[u8]) -> Vec<u8> {
    Encryptor::<Aes128>::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

pub(crate) fn decrypt(
    key: &SecretKey,
    iv: &[u8; IV_LEN],
    ciphertext: &[u8],
) -> CacheResult<Vec<u8>> {
    Decryptor::<Aes128>::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|e| CacheError::Crypto(format!("index decrypt failed: {e}")))
}
