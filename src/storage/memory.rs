//! Memory storage
//!
//! Will be destroyed on system shutdown

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::capsules::Capsule;
use crate::users::User;

use super::ChangeFeed;
use super::ChangePasswordValues;
use super::CreateCapsuleValues;
use super::CreateUserValues;
use super::Error;
use super::Result;
use super::Storage;
use super::UpdateCapsuleValues;

/// An in-memory storage
///
/// Will be destroyed on system shutdown
#[derive(Clone, Debug)]
pub struct Memory {
    /// All users in storage
    users: Arc<Mutex<HashMap<Uuid, User>>>,

    /// All capsules in storage
    capsules: Arc<Mutex<HashMap<Uuid, Capsule>>>,

    /// Announces capsule changes
    changes: ChangeFeed,
}

impl Memory {
    /// Create a new empty Memory storage
    pub fn new() -> Self {
        Self {
            users: Arc::new(Mutex::new(HashMap::new())),
            capsules: Arc::new(Mutex::new(HashMap::new())),
            changes: ChangeFeed::new(),
        }
    }

    /// Update a user in place, the user has to exist
    async fn modify_user<F>(&self, user: &User, modify: F) -> Result<User>
    where
        F: FnOnce(&mut User) + Send,
    {
        self.users
            .lock()
            .await
            .get_mut(&user.id)
            .map(|user| {
                modify(user);
                user.updated_at = Utc::now();

                user.clone()
            })
            .ok_or_else(|| Error::Connection(format!("User {} is gone", user.id)))
    }
}

impl Storage for Memory {
    fn changes(&self) -> &ChangeFeed {
        &self.changes
    }

    async fn find_single_user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .lock()
            .await
            .values()
            .find(|user| user.email == email)
            .cloned())
    }

    async fn find_single_user_by_id(&self, id: &Uuid) -> Result<Option<User>> {
        Ok(self.users.lock().await.get(id).cloned())
    }

    async fn create_user(&self, values: &CreateUserValues<'_>) -> Result<User> {
        let mut users = self.users.lock().await;

        if users.values().any(|user| user.email == values.email) {
            return Err(Error::Duplicate(values.email.to_string()));
        }

        let user = User {
            id: Uuid::new_v4(),
            session_id: *values.session_id,
            email: values.email.to_string(),
            hashed_password: values.hashed_password.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        users.insert(user.id, user.clone());

        Ok(user)
    }

    async fn change_session(&self, user: &User, session_id: &Uuid) -> Result<User> {
        self.modify_user(user, |user| user.session_id = *session_id)
            .await
    }

    async fn change_password(
        &self,
        user: &User,
        values: &ChangePasswordValues<'_>,
    ) -> Result<User> {
        self.modify_user(user, |user| {
            user.session_id = *values.session_id;
            user.hashed_password = values.hashed_password.to_string();
        })
        .await
    }

    async fn find_all_capsules_by_owner(&self, owner_id: &Uuid) -> Result<Vec<Capsule>> {
        Ok(self
            .capsules
            .lock()
            .await
            .values()
            .filter(|capsule| &capsule.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn find_single_capsule_by_id(&self, id: &Uuid) -> Result<Option<Capsule>> {
        Ok(self.capsules.lock().await.get(id).cloned())
    }

    async fn create_capsule(&self, values: &CreateCapsuleValues<'_>) -> Result<Capsule> {
        let capsule = Capsule {
            id: Uuid::new_v4(),
            owner_id: *values.owner_id,
            title: values.title.to_string(),
            message: values.message.to_string(),
            open_date: *values.open_date,
            image_url: values.image_url.map(ToString::to_string),
            created_at: Utc::now(),
            opened: false,
        };

        self.capsules
            .lock()
            .await
            .insert(capsule.id, capsule.clone());

        self.changes.notify(capsule.owner_id);

        Ok(capsule)
    }

    async fn update_capsule(
        &self,
        id: &Uuid,
        values: &UpdateCapsuleValues<'_>,
    ) -> Result<Option<Capsule>> {
        let capsule = self.capsules.lock().await.get_mut(id).map(|capsule| {
            capsule.title = values.title.to_string();
            capsule.message = values.message.to_string();
            capsule.open_date = *values.open_date;
            capsule.image_url = values.image_url.map(ToString::to_string);

            capsule.clone()
        });

        if let Some(capsule) = &capsule {
            self.changes.notify(capsule.owner_id);
        }

        Ok(capsule)
    }

    async fn delete_capsule(&self, id: &Uuid) -> Result<()> {
        let capsule = self.capsules.lock().await.remove(id);

        if let Some(capsule) = capsule {
            self.changes.notify(capsule.owner_id);
        }

        Ok(())
    }
}
