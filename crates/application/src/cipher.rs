//! 静态加密接缝
//!
//! 消息在写入存储前封存（密文 + iv，明文列留空），读出后还原。

use domain::{EncryptedContent, GroupMessage, PrivateMessage};
use thiserror::Error;

use crate::error::ApplicationError;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("encryption failed: {0}")]
    Encrypt(String),
    #[error("decryption failed: {0}")]
    Decrypt(String),
}

impl From<CipherError> for ApplicationError {
    fn from(err: CipherError) -> Self {
        ApplicationError::Persistence(err.to_string())
    }
}

pub trait MessageCipher: Send + Sync {
    /// 返回 None 表示不加密，按明文存储
    fn encrypt(&self, plaintext: &str) -> Result<Option<EncryptedContent>, CipherError>;

    fn decrypt(&self, encrypted: &EncryptedContent) -> Result<String, CipherError>;
}

/// 未配置密钥时使用：按明文存储
#[derive(Debug, Default)]
pub struct PlaintextCipher;

impl MessageCipher for PlaintextCipher {
    fn encrypt(&self, _plaintext: &str) -> Result<Option<EncryptedContent>, CipherError> {
        Ok(None)
    }

    fn decrypt(&self, _encrypted: &EncryptedContent) -> Result<String, CipherError> {
        Err(CipherError::Decrypt("no message key configured".to_string()))
    }
}

/// 可封存的消息
pub trait SealedContent: Clone {
    fn content_slots(&mut self) -> (&mut String, &mut Option<EncryptedContent>);
}

impl SealedContent for PrivateMessage {
    fn content_slots(&mut self) -> (&mut String, &mut Option<EncryptedContent>) {
        (&mut self.content, &mut self.encrypted)
    }
}

impl SealedContent for GroupMessage {
    fn content_slots(&mut self) -> (&mut String, &mut Option<EncryptedContent>) {
        (&mut self.content, &mut self.encrypted)
    }
}

/// 生成存储形态：加密成功时清空明文
pub fn seal<T: SealedContent>(cipher: &dyn MessageCipher, message: &T) -> Result<T, CipherError> {
    let mut sealed = message.clone();
    let (content, encrypted) = sealed.content_slots();
    if content.is_empty() {
        return Ok(sealed);
    }
    if let Some(ciphertext) = cipher.encrypt(content)? {
        content.clear();
        *encrypted = Some(ciphertext);
    }
    Ok(sealed)
}

/// 还原明文；解密失败时保留空内容并记录错误
pub fn reveal<T: SealedContent>(cipher: &dyn MessageCipher, mut message: T) -> T {
    let (content, encrypted) = message.content_slots();
    if let Some(sealed) = encrypted.take() {
        match cipher.decrypt(&sealed) {
            Ok(plaintext) => *content = plaintext,
            Err(err) => {
                tracing::error!(error = %err, "消息解密失败");
                *encrypted = Some(sealed);
            }
        }
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    /// 可逆的测试密码：反转字符串
    struct ReverseCipher;

    impl MessageCipher for ReverseCipher {
        fn encrypt(&self, plaintext: &str) -> Result<Option<EncryptedContent>, CipherError> {
            Ok(Some(EncryptedContent {
                ciphertext: plaintext.chars().rev().collect(),
                iv: "iv".into(),
            }))
        }

        fn decrypt(&self, encrypted: &EncryptedContent) -> Result<String, CipherError> {
            Ok(encrypted.ciphertext.chars().rev().collect())
        }
    }

    #[test]
    fn seal_and_reveal() {
        let message =
            PrivateMessage::new(Uuid::new_v4(), Uuid::new_v4(), "secret", None, Utc::now()).unwrap();
        let sealed = seal(&ReverseCipher, &message).unwrap();
        assert!(sealed.content.is_empty());
        assert_eq!(sealed.encrypted.as_ref().unwrap().ciphertext, "terces");

        let revealed = reveal(&ReverseCipher, sealed);
        assert_eq!(revealed.content, "secret");
        assert!(revealed.encrypted.is_none());
    }

    #[test]
    fn plaintext_cipher_is_passthrough() {
        let message =
            PrivateMessage::new(Uuid::new_v4(), Uuid::new_v4(), "hello", None, Utc::now()).unwrap();
        let sealed = seal(&PlaintextCipher, &message).unwrap();
        assert_eq!(sealed, message);
    }
}
