//! Identity Directory
//!
//! Resolves identity keys to canonical user records and upserts records
//! for logins. Thin layer over the persistence collaborator.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::core::id::UserId;
use crate::network::auth::VerifiedIdentity;
use crate::store::{IdentityKey, StoreError, UserRecord, UserStore};

/// Directory errors.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// No record under either id space.
    #[error("no such user")]
    NotFound,
    /// Persistence collaborator failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Identity directory.
#[derive(Clone)]
pub struct IdentityDirectory {
    store: Arc<dyn UserStore>,
}

impl IdentityDirectory {
    /// Create over a store.
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn UserStore> {
        &self.store
    }

    /// Resolve a key to a record.
    pub async fn resolve(&self, key: &IdentityKey) -> Result<UserRecord, DirectoryError> {
        self.store
            .find_user(key)
            .await?
            .ok_or(DirectoryError::NotFound)
    }

    /// Resolve an internal id.
    pub async fn resolve_id(&self, id: UserId) -> Result<UserRecord, DirectoryError> {
        self.resolve(&IdentityKey::Internal(id)).await
    }

    /// Upsert the record for a verified provider login.
    ///
    /// Existing records keep their id, name and stats.
    pub async fn login_provider(&self, identity: VerifiedIdentity) -> Result<UserRecord, DirectoryError> {
        let key = IdentityKey::Provider(identity.subject.clone());
        if let Some(existing) = self.store.find_user(&key).await? {
            debug!("Provider login for existing user {}", existing.id.short());
            return Ok(existing);
        }

        let record = UserRecord::new(
            identity.user_id,
            Some(identity.subject),
            identity.display_name,
        );
        self.store.upsert_user(record.clone()).await?;
        info!("Created user {} ({})", record.id.short(), record.display_name);
        Ok(record)
    }

    /// Mint a record for a guest login, keyed only internally.
    pub async fn login_guest(&self, display_name: String) -> Result<UserRecord, DirectoryError> {
        let record = UserRecord::new(UserId::random(), None, display_name);
        self.store.upsert_user(record.clone()).await?;
        info!("Created guest {} ({})", record.id.short(), record.display_name);
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::auth::user_id_for_subject;
    use crate::store::MemoryUserStore;

    fn directory() -> IdentityDirectory {
        IdentityDirectory::new(Arc::new(MemoryUserStore::new()))
    }

    fn identity(sub: &str, name: &str) -> VerifiedIdentity {
        VerifiedIdentity {
            subject: sub.into(),
            user_id: user_id_for_subject(sub),
            display_name: name.into(),
        }
    }

    #[tokio::test]
    async fn test_resolve_unknown_is_not_found() {
        let dir = directory();
        let result = dir.resolve_id(UserId::random()).await;
        assert!(matches!(result, Err(DirectoryError::NotFound)));
    }

    #[tokio::test]
    async fn test_provider_login_is_upsert() {
        let dir = directory();
        let first = dir.login_provider(identity("auth0|ada", "Ada")).await.unwrap();
        let again = dir.login_provider(identity("auth0|ada", "Renamed")).await.unwrap();

        assert_eq!(first.id, again.id);
        assert_eq!(again.display_name, "Ada");

        let by_provider = dir
            .resolve(&IdentityKey::Provider("auth0|ada".into()))
            .await
            .unwrap();
        assert_eq!(by_provider.id, first.id);
        assert_eq!(dir.resolve_id(first.id).await.unwrap().id, first.id);
    }

    #[tokio::test]
    async fn test_guest_login_mints_internal_record() {
        let dir = directory();
        let a = dir.login_guest("Guest".into()).await.unwrap();
        let b = dir.login_guest("Guest".into()).await.unwrap();

        assert_ne!(a.id, b.id);
        assert!(a.provider_id.is_none());
        assert_eq!(dir.resolve_id(a.id).await.unwrap().display_name, "Guest");
    }
}
