//! Capsule store adapter
//!
//! Translates capsule operations into storage calls and storage outcomes into the errors the
//! rest of the application deals with. Holds no state of its own.

use core::fmt;

use uuid::Uuid;

use crate::capsules::Capsule;
use crate::capsules::CapsuleFields;
use crate::storage;
use crate::storage::CreateCapsuleValues;
use crate::storage::Storage;
use crate::storage::Subscription;
use crate::storage::UpdateCapsuleValues;

/// Failures of the capsule store
#[derive(Debug, PartialEq, Eq)]
pub enum StoreError {
    /// There is no capsule with that ID
    NotFound,

    /// The storage could not be reached or refused the write
    Write(String),
}

impl std::error::Error for StoreError {}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StoreError::NotFound => write!(f, "Capsule not found"),
            StoreError::Write(error) => write!(f, "Storage failure: {error}"),
        }
    }
}

impl From<storage::Error> for StoreError {
    fn from(err: storage::Error) -> Self {
        StoreError::Write(err.to_string())
    }
}

/// Capsule operations on top of a storage
#[derive(Clone, Debug)]
pub struct CapsuleStore<S: Storage> {
    /// The storage doing the actual work
    storage: S,
}

impl<S: Storage> CapsuleStore<S> {
    /// Create the adapter for a storage
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Persist a new capsule for an owner, returns its ID
    pub async fn create(&self, owner_id: &Uuid, fields: &CapsuleFields) -> Result<Uuid, StoreError> {
        let values = CreateCapsuleValues {
            owner_id,
            title: &fields.title,
            message: &fields.message,
            open_date: &fields.open_date,
            image_url: fields.image_url.as_ref().map(url::Url::as_str),
        };

        let capsule = self.storage.create_capsule(&values).await?;

        tracing::debug!(capsule_id = %capsule.id, %owner_id, "Capsule sealed");

        Ok(capsule.id)
    }

    /// Overwrite title, message, open date and image of a capsule
    pub async fn update(&self, id: &Uuid, fields: &CapsuleFields) -> Result<(), StoreError> {
        let values = UpdateCapsuleValues {
            title: &fields.title,
            message: &fields.message,
            open_date: &fields.open_date,
            image_url: fields.image_url.as_ref().map(url::Url::as_str),
        };

        self.storage
            .update_capsule(id, &values)
            .await?
            .map(|_| tracing::debug!(capsule_id = %id, "Capsule updated"))
            .ok_or(StoreError::NotFound)
    }

    /// Fetch a single capsule
    pub async fn fetch_one(&self, id: &Uuid) -> Result<Capsule, StoreError> {
        self.storage
            .find_single_capsule_by_id(id)
            .await?
            .ok_or(StoreError::NotFound)
    }

    /// One-off read of all capsules of an owner
    pub async fn list_by_owner(&self, owner_id: &Uuid) -> Result<Vec<Capsule>, StoreError> {
        Ok(self.storage.find_all_capsules_by_owner(owner_id).await?)
    }

    /// Delete a capsule for good
    pub async fn delete(&self, id: &Uuid) -> Result<(), StoreError> {
        self.storage.delete_capsule(id).await?;

        tracing::debug!(capsule_id = %id, "Capsule deleted");

        Ok(())
    }

    /// Live query of all capsules of an owner
    pub fn subscribe_by_owner(&self, owner_id: Uuid) -> Subscription {
        self.storage.subscribe_by_owner(owner_id)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use chrono::Duration;
    use chrono::Utc;

    use crate::storage::Memory;

    use super::*;

    fn fields(title: &str) -> CapsuleFields {
        CapsuleFields {
            title: title.to_string(),
            message: "Hello from the past".to_string(),
            open_date: Utc::now() + Duration::days(30),
            image_url: None,
        }
    }

    #[tokio::test]
    async fn test_create_fetch_update_delete() {
        let store = CapsuleStore::new(Memory::new());
        let owner_id = Uuid::new_v4();

        let id = store.create(&owner_id, &fields("First")).await.unwrap();

        let capsule = store.fetch_one(&id).await.unwrap();
        assert_eq!("First", capsule.title);
        assert_eq!(owner_id, capsule.owner_id);
        assert!(!capsule.opened);

        store.update(&id, &fields("Second")).await.unwrap();
        let updated = store.fetch_one(&id).await.unwrap();
        assert_eq!("Second", updated.title);
        assert_eq!(capsule.owner_id, updated.owner_id);
        assert_eq!(capsule.created_at, updated.created_at);

        store.delete(&id).await.unwrap();
        assert_eq!(Err(StoreError::NotFound), store.fetch_one(&id).await);

        // gone for good, deleting again is fine
        assert_eq!(Ok(()), store.delete(&id).await);
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let store = CapsuleStore::new(Memory::new());

        assert_eq!(
            Err(StoreError::NotFound),
            store.update(&Uuid::new_v4(), &fields("Nope")).await
        );
    }

    #[tokio::test]
    async fn test_subscription_delivers_full_snapshots() {
        let store = CapsuleStore::new(Memory::new());
        let owner_id = Uuid::new_v4();

        let mut subscription = store.subscribe_by_owner(owner_id);

        let initial = subscription.next().await.unwrap().unwrap();
        assert!(initial.is_empty());

        let first = store.create(&owner_id, &fields("First")).await.unwrap();
        let snapshot = subscription.next().await.unwrap().unwrap();
        assert_eq!(vec![first], snapshot.iter().map(|c| c.id).collect::<Vec<_>>());

        // changes of other owners are not delivered
        store.create(&Uuid::new_v4(), &fields("Other")).await.unwrap();

        let second = store.create(&owner_id, &fields("Second")).await.unwrap();
        let snapshot = subscription.next().await.unwrap().unwrap();
        assert_eq!(2, snapshot.len());
        assert!(snapshot.iter().any(|c| c.id == second));
    }

    #[tokio::test]
    async fn test_unsubscribe_twice_is_noop() {
        let store = CapsuleStore::new(Memory::new());
        let owner_id = Uuid::new_v4();

        let mut subscription = store.subscribe_by_owner(owner_id);
        let handle = subscription.handle();

        // initial snapshot
        assert!(subscription.next().await.is_some());

        assert!(handle.unsubscribe());
        assert!(!handle.unsubscribe());
        assert!(handle.is_released());

        store.create(&owner_id, &fields("Late")).await.unwrap();

        let next = tokio::time::timeout(StdDuration::from_secs(1), subscription.next())
            .await
            .unwrap();
        assert!(next.is_none());
    }
}
