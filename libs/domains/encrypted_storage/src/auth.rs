use async_trait::async_trait;

use crate::error::StorageResult;

/// JWE encryption capability provided by the hosting service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthService: Send + Sync {
    async fn encrypt_jwe(&self, plaintext: &str) -> StorageResult<String>;

    async fn decrypt_jwe(&self, ciphertext: &str) -> StorageResult<String>;
}
