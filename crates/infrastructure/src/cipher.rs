//! AES-256-GCM 消息加密
//!
//! 密钥为 base64 编码的 32 字节；每条消息使用随机 96 位 nonce，
//! 密文与 nonce 均以 base64 存储。

use application::{CipherError, MessageCipher};
use data_encoding::BASE64;
use domain::EncryptedContent;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CipherKeyError {
    #[error("message key is not valid base64: {0}")]
    Encoding(#[from] data_encoding::DecodeError),
    #[error("message key must be 32 bytes, got {0}")]
    Length(usize),
}

pub struct RingMessageCipher {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl RingMessageCipher {
    pub fn from_base64(encoded: &str) -> Result<Self, CipherKeyError> {
        let bytes = BASE64.decode(encoded.trim().as_bytes())?;
        let unbound =
            UnboundKey::new(&AES_256_GCM, &bytes).map_err(|_| CipherKeyError::Length(bytes.len()))?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }
}

impl MessageCipher for RingMessageCipher {
    fn encrypt(&self, plaintext: &str) -> Result<Option<EncryptedContent>, CipherError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| CipherError::Encrypt("nonce generation failed".to_string()))?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = plaintext.as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CipherError::Encrypt("seal failed".to_string()))?;

        Ok(Some(EncryptedContent {
            ciphertext: BASE64.encode(&in_out),
            iv: BASE64.encode(&nonce_bytes),
        }))
    }

    fn decrypt(&self, encrypted: &EncryptedContent) -> Result<String, CipherError> {
        let nonce_bytes = BASE64
            .decode(encrypted.iv.as_bytes())
            .map_err(|err| CipherError::Decrypt(err.to_string()))?;
        let nonce = Nonce::try_assume_unique_for_key(&nonce_bytes)
            .map_err(|_| CipherError::Decrypt("invalid iv length".to_string()))?;
        let mut buffer = BASE64
            .decode(encrypted.ciphertext.as_bytes())
            .map_err(|err| CipherError::Decrypt(err.to_string()))?;

        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut buffer)
            .map_err(|_| CipherError::Decrypt("authentication tag mismatch".to_string()))?;
        String::from_utf8(plaintext.to_vec()).map_err(|err| CipherError::Decrypt(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> String {
        BASE64.encode(&[7u8; 32])
    }

    #[test]
    fn encrypts_with_fresh_nonce_and_decrypts() {
        let cipher = RingMessageCipher::from_base64(&test_key()).unwrap();
        let first = cipher.encrypt("hello there").unwrap().unwrap();
        let second = cipher.encrypt("hello there").unwrap().unwrap();

        assert_ne!(first.iv, second.iv);
        assert_ne!(first.ciphertext, second.ciphertext);
        assert_eq!(cipher.decrypt(&first).unwrap(), "hello there");
        assert_eq!(cipher.decrypt(&second).unwrap(), "hello there");
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let cipher = RingMessageCipher::from_base64(&test_key()).unwrap();
        let mut sealed = cipher.encrypt("payload").unwrap().unwrap();
        let mut raw = BASE64.decode(sealed.ciphertext.as_bytes()).unwrap();
        raw[0] ^= 0xff;
        sealed.ciphertext = BASE64.encode(&raw);

        assert!(matches!(cipher.decrypt(&sealed), Err(CipherError::Decrypt(_))));
    }

    #[test]
    fn short_keys_are_refused() {
        let short = BASE64.encode(&[1u8; 16]);
        assert!(matches!(
            RingMessageCipher::from_base64(&short),
            Err(CipherKeyError::Length(16))
        ));
        assert!(matches!(
            RingMessageCipher::from_base64("not base64!"),
            Err(CipherKeyError::Encoding(_))
        ));
    }
}
