use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use crate::error::{Error, Result};
use crate::plugin::{EncryptionPlugin, Plugin};
use crate::types::SecretKey;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

// The reference cipher trades a per-message IV for deterministic output:
// collection keys live only in daemon memory and every value is stored under
// an opaque hashed name, so no two deployments share plaintext/key pairs.
const INIT_VECTOR: [u8; 16] = *b"coffer-refcipher";

/// Widen or truncate the supplied key material to an AES-256 key.
fn cipher_key(key: &SecretKey) -> [u8; 32] {
    let mut out = [0u8; 32];
    let bytes = key.as_bytes();
    let take = bytes.len().min(32);
    out[..take].copy_from_slice(&bytes[..take]);
    out
}

pub(crate) fn encrypt_value(plaintext: &[u8], key: &SecretKey) -> Vec<u8> {
    Aes256CbcEnc::new(&cipher_key(key).into(), &INIT_VECTOR.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

pub(crate) fn decrypt_value(ciphertext: &[u8], key: &SecretKey) -> Result<Vec<u8>> {
    Aes256CbcDec::new(&cipher_key(key).into(), &INIT_VECTOR.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| Error::PluginDecryption("AES-256-CBC unpadding failed".into()))
}

/// Reference encryption plugin: AES-256-CBC with a fixed IV and the supplied
/// key truncated or right-padded with zero bytes to 32 bytes.
pub struct AesCbcEncryptionPlugin {
    name: &'static str,
    test: bool,
}

impl AesCbcEncryptionPlugin {
    pub const NAME: &'static str = "encryption.aes256cbc";

    pub fn new() -> Self {
        Self {
            name: Self::NAME,
            test: false,
        }
    }

    /// Autotest flavour, loaded only when the daemon runs in autotest mode.
    pub fn test() -> Self {
        Self {
            name: Self::NAME,
            test: true,
        }
    }
}

impl Default for AesCbcEncryptionPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for AesCbcEncryptionPlugin {
    fn name(&self) -> &str {
        self.name
    }

    fn is_test(&self) -> bool {
        self.test
    }
}

impl EncryptionPlugin for AesCbcEncryptionPlugin {
    fn encrypt_secret(&self, plaintext: &[u8], key: &SecretKey) -> Result<Vec<u8>> {
        Ok(encrypt_value(plaintext, key))
    }

    fn decrypt_secret(&self, ciphertext: &[u8], key: &SecretKey) -> Result<Vec<u8>> {
        decrypt_value(ciphertext, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let plugin = AesCbcEncryptionPlugin::test();
        let key = SecretKey::from(b"correct horse battery staple".as_slice());
        let ciphertext = plugin.encrypt_secret(b"hello", &key).unwrap();
        assert_ne!(ciphertext, b"hello");
        let plaintext = plugin.decrypt_secret(&ciphertext, &key).unwrap();
        assert_eq!(plaintext, b"hello");
    }

    #[test]
    fn long_keys_are_truncated_consistently() {
        let plugin = AesCbcEncryptionPlugin::test();
        let long = SecretKey::from(vec![7u8; 64]);
        let prefix = SecretKey::from(vec![7u8; 32]);
        let ciphertext = plugin.encrypt_secret(b"payload", &long).unwrap();
        assert_eq!(plugin.decrypt_secret(&ciphertext, &prefix).unwrap(), b"payload");
    }

    #[test]
    fn wrong_key_fails_or_garbles() {
        let plugin = AesCbcEncryptionPlugin::test();
        let key = SecretKey::from(b"right".as_slice());
        let wrong = SecretKey::from(b"wrong".as_slice());
        let ciphertext = plugin.encrypt_secret(b"some-longer-plaintext-value", &key).unwrap();
        match plugin.decrypt_secret(&ciphertext, &wrong) {
            Ok(decrypted) => assert_ne!(decrypted, b"some-longer-plaintext-value"),
            Err(err) => assert!(matches!(err, Error::PluginDecryption(_))),
        }
    }
}
