use async_trait::async_trait;

use crate::models::{NewUser, UserChanges, UserId, UserView};
use crate::services::query::{ListQuery, Page};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("email already taken")]
    DuplicateEmail,

    #[error("database error")]
    Database(#[from] sqlx::Error),

    #[error("password hashing failed")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("password hashing task failed")]
    HashTask(#[from] tokio::task::JoinError),
}

/// Persistence for the users resource.
///
/// Every read returns the `UserView` projection; the password hash is write-only
/// from the point of view of callers.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn list(&self, query: &ListQuery) -> Result<Page<UserView>, StoreError>;

    async fn find(&self, id: UserId) -> Result<Option<UserView>, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<UserView>, StoreError>;

    /// Fails with `DuplicateEmail` when the address is already registered.
    async fn create(&self, user: NewUser) -> Result<UserView, StoreError>;

    /// Applies the provided columns and bumps `updated_at`. `None` when the user does not exist.
    async fn update(&self, id: UserId, changes: UserChanges) -> Result<Option<UserView>, StoreError>;

    /// Removes the user and returns its last state. `None` when the user does not exist.
    async fn delete(&self, id: UserId) -> Result<Option<UserView>, StoreError>;

    /// Whether the backing database answers.
    async fn ping(&self) -> bool;
}

/// One-way bcrypt hash, computed on the blocking pool.
pub async fn hash_password(password: String, cost: u32) -> Result<String, StoreError> {
    let hashed = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost)).await??;
    Ok(hashed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hashes_are_verifiable_and_not_plaintext() {
        let hashed = hash_password("secret".to_string(), 4).await.unwrap();
        assert_ne!(hashed, "secret");
        assert!(hashed.starts_with("$2"));
        assert!(bcrypt::verify("secret", &hashed).unwrap());
        assert!(!bcrypt::verify("wrong", &hashed).unwrap());
    }
}
