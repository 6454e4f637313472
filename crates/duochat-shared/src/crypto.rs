use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::constants::{DECRYPTION_FAILED, IV_SIZE, PLACEHOLDER_AUTH_TAG};
use crate::error::CryptoError;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub type CipherKey = [u8; 32];

/// Hex-encoded output of [`encrypt`], in the field names the clients send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedPayload {
    pub ciphertext: String,
    pub iv: String,
    pub auth_tag: String,
}

pub fn generate_iv() -> [u8; IV_SIZE] {
    let mut iv = [0u8; IV_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    iv
}

// The cipher key is SHA256 over the secret's hex text, not its decoded bytes.
pub fn cipher_key(secret_hex: &str) -> CipherKey {
    let digest = Sha256::digest(secret_hex.as_bytes());
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    key
}

/// AES-256-CBC with PKCS7 padding under a fresh random IV.
///
/// `auth_tag` is always [`PLACEHOLDER_AUTH_TAG`]; CBC gives no integrity.
pub fn encrypt(plaintext: &str, secret_hex: &str) -> EncryptedPayload {
    encrypt_with_iv(plaintext, secret_hex, generate_iv())
}

pub fn encrypt_with_iv(plaintext: &str, secret_hex: &str, iv: [u8; IV_SIZE]) -> EncryptedPayload {
    let key = cipher_key(secret_hex);
    let ciphertext = Aes256CbcEnc::new(&key.into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    EncryptedPayload {
        ciphertext: hex::encode(ciphertext),
        iv: hex::encode(iv),
        auth_tag: PLACEHOLDER_AUTH_TAG.to_string(),
    }
}

/// Inverse of [`encrypt`]. The auth tag is accepted and ignored.
pub fn decrypt(
    ciphertext_hex: &str,
    iv_hex: &str,
    _auth_tag_hex: &str,
    secret_hex: &str,
) -> Result<String, CryptoError> {
    let ciphertext = hex::decode(ciphertext_hex.trim())?;
    let iv_bytes = hex::decode(iv_hex.trim())?;
    if iv_bytes.len() != IV_SIZE {
        return Err(CryptoError::InvalidKeyLength);
    }
    let mut iv = [0u8; IV_SIZE];
    iv.copy_from_slice(&iv_bytes);

    let key = cipher_key(secret_hex);
    let plaintext = Aes256CbcDec::new(&key.into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)?;

    String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptionFailed)
}

/// [`decrypt`] for display paths: any failure becomes [`DECRYPTION_FAILED`].
pub fn decrypt_or_placeholder(
    ciphertext_hex: &str,
    iv_hex: &str,
    auth_tag_hex: &str,
    secret_hex: &str,
) -> String {
    decrypt(ciphertext_hex, iv_hex, auth_tag_hex, secret_hex)
        .unwrap_or_else(|_| DECRYPTION_FAILED.to_string())
}

impl EncryptedPayload {
    pub fn decrypt(&self, secret_hex: &str) -> Result<String, CryptoError> {
        decrypt(&self.ciphertext, &self.iv, &self.auth_tag, secret_hex)
    }
}
