//! Capsule intents
//!
//! Everything a user can ask of their capsules arrives here: the create and update forms, and
//! the typed intents raised from a rendered capsule (view, edit, delete). Every request on a
//! single capsule checks ownership first, whatever the storage returned.

use core::fmt;

use uuid::Uuid;

use crate::capsule_store::CapsuleStore;
use crate::capsule_store::StoreError;
use crate::capsules::Capsule;
use crate::capsules::CapsuleForm;
use crate::capsules::ValidationError;
use crate::lock_state::CapsuleView;
use crate::lock_state::reveal;
use crate::session::Clock;
use crate::session::Session;
use crate::session::SystemClock;
use crate::storage::Storage;

/// Intents raised from a rendered capsule
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intent {
    /// Show the capsule
    ViewRequested(Uuid),

    /// Prefill the edit form with the capsule
    EditRequested(Uuid),

    /// Delete the capsule
    DeleteRequested(Uuid),
}

/// A single capsule, as far as the user is allowed to see it
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CapsuleDetail {
    /// The user owns the capsule
    Granted(CapsuleView),

    /// The capsule belongs to someone else, nothing of it is shown
    AccessDenied,

    /// There is no such capsule
    NotFound,
}

/// Result of handling an intent
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Answer to [`Intent::ViewRequested`]
    Detail(CapsuleDetail),

    /// Answer to [`Intent::EditRequested`]
    Edit(CapsuleDetail),

    /// Answer to [`Intent::DeleteRequested`]
    Deleted(Uuid),
}

/// Failures of capsule requests
#[derive(Debug, PartialEq, Eq)]
pub enum CapsuleError {
    /// The form is not acceptable, nothing was written
    Validation(ValidationError),

    /// There is no such capsule
    NotFound,

    /// The capsule belongs to someone else
    AccessDenied,

    /// The storage failed, worth another try later
    Write(String),
}

impl std::error::Error for CapsuleError {}

impl fmt::Display for CapsuleError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CapsuleError::Validation(err) => write!(f, "{err}"),
            CapsuleError::NotFound => write!(f, "Capsule not found"),
            CapsuleError::AccessDenied => write!(f, "Not allowed to access capsule"),
            CapsuleError::Write(err) => write!(f, "Could not save capsule: {err}"),
        }
    }
}

impl From<ValidationError> for CapsuleError {
    fn from(err: ValidationError) -> Self {
        CapsuleError::Validation(err)
    }
}

impl From<StoreError> for CapsuleError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => CapsuleError::NotFound,
            StoreError::Write(err) => CapsuleError::Write(err),
        }
    }
}

/// Capsule requests of signed in users
#[derive(Clone, Debug)]
pub struct Capsules<S: Storage, C: Clock = SystemClock> {
    /// Where capsules live
    store: CapsuleStore<S>,

    /// Decides what "now" is for validation and classification
    clock: C,
}

impl<S: Storage, C: Clock> Capsules<S, C> {
    /// Create the capsule requests handler
    pub fn new(store: CapsuleStore<S>, clock: C) -> Self {
        Self { store, clock }
    }

    /// Handle an intent
    pub async fn dispatch(&self, session: &Session, intent: Intent) -> Result<Outcome, CapsuleError> {
        tracing::debug!(user_id = %session.user_id, ?intent, "Dispatching intent");

        match intent {
            Intent::ViewRequested(id) => self.detail(session, &id).await.map(Outcome::Detail),
            Intent::EditRequested(id) => self.detail(session, &id).await.map(Outcome::Edit),
            Intent::DeleteRequested(id) => {
                self.delete(session, &id).await.map(|()| Outcome::Deleted(id))
            }
        }
    }

    /// Seal a new capsule
    ///
    /// The form is validated before anything is written
    pub async fn create(&self, session: &Session, form: CapsuleForm) -> Result<Capsule, CapsuleError> {
        let fields = form.validate(self.clock.now())?;

        let id = self.store.create(&session.user_id, &fields).await?;

        Ok(self.store.fetch_one(&id).await?)
    }

    /// Overwrite all fields of an owned capsule
    ///
    /// The form is validated before anything is read or written
    pub async fn update(
        &self,
        session: &Session,
        id: &Uuid,
        form: CapsuleForm,
    ) -> Result<Capsule, CapsuleError> {
        let fields = form.validate(self.clock.now())?;

        let capsule = self.owned(session, id).await?;

        self.store.update(&capsule.id, &fields).await?;

        Ok(self.store.fetch_one(&capsule.id).await?)
    }

    /// All capsules of the user, classified right now
    pub async fn list(&self, session: &Session) -> Result<Vec<CapsuleView>, CapsuleError> {
        let items = self.store.list_by_owner(&session.user_id).await?;

        Ok(crate::sync::reconcile(&session.user_id, items, self.clock.now()))
    }

    /// A single capsule, as far as the user may see it
    pub async fn detail(&self, session: &Session, id: &Uuid) -> Result<CapsuleDetail, CapsuleError> {
        match self.store.fetch_one(id).await {
            Ok(capsule) if capsule.is_owned_by(&session.user_id) => {
                Ok(CapsuleDetail::Granted(reveal(&capsule, self.clock.now())))
            }
            Ok(_) => {
                tracing::warn!(user_id = %session.user_id, capsule_id = %id, "Denied access to capsule");
                Ok(CapsuleDetail::AccessDenied)
            }
            Err(StoreError::NotFound) => Ok(CapsuleDetail::NotFound),
            Err(err) => Err(err.into()),
        }
    }

    /// Delete an owned capsule for good
    pub async fn delete(&self, session: &Session, id: &Uuid) -> Result<(), CapsuleError> {
        let capsule = self.owned(session, id).await?;

        Ok(self.store.delete(&capsule.id).await?)
    }

    /// Classify a capsule right now
    pub fn view(&self, capsule: &Capsule) -> CapsuleView {
        reveal(capsule, self.clock.now())
    }

    /// Fetch a capsule the user owns
    async fn owned(&self, session: &Session, id: &Uuid) -> Result<Capsule, CapsuleError> {
        let capsule = self.store.fetch_one(id).await?;

        if capsule.is_owned_by(&session.user_id) {
            Ok(capsule)
        } else {
            tracing::warn!(user_id = %session.user_id, capsule_id = %id, "Denied access to capsule");
            Err(CapsuleError::AccessDenied)
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;
    use chrono::Duration;
    use chrono::Utc;

    use crate::lock_state::DisplayFields;
    use crate::lock_state::LockState;
    use crate::session::FixedClock;
    use crate::storage::Memory;

    use super::*;

    fn capsules(now: DateTime<Utc>) -> (Memory, Capsules<Memory, FixedClock>) {
        let storage = Memory::new();

        let capsules = Capsules::new(CapsuleStore::new(storage.clone()), FixedClock(now));

        (storage, capsules)
    }

    fn session() -> Session {
        Session {
            user_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            email: "someone@example.com".to_string(),
        }
    }

    fn form(open_date: DateTime<Utc>) -> CapsuleForm {
        CapsuleForm {
            title: "Birthday".to_string(),
            message: "Happy 30th".to_string(),
            open_date: Some(open_date),
            image_url: Some("https://www.example.com/cake.png".to_string()),
        }
    }

    #[tokio::test]
    async fn test_create_in_the_past_writes_nothing() {
        let now = Utc::now();
        let (storage, capsules) = capsules(now);
        let session = session();

        let result = capsules
            .create(&session, form(now - Duration::seconds(1)))
            .await;
        assert_eq!(
            Err(CapsuleError::Validation(ValidationError::OpenDateNotInFuture)),
            result
        );

        let stored = storage
            .find_all_capsules_by_owner(&session.user_id)
            .await
            .unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn test_create_sets_owner_and_opened() {
        let now = Utc::now();
        let (_, capsules) = capsules(now);
        let session = session();

        let capsule = capsules
            .create(&session, form(now + Duration::milliseconds(1)))
            .await
            .unwrap();

        assert_eq!(session.user_id, capsule.owner_id);
        assert!(!capsule.opened);
        assert_eq!(
            Some("https://www.example.com/cake.png".to_string()),
            capsule.image_url
        );
    }

    #[tokio::test]
    async fn test_detail_of_locked_capsule() {
        let now = Utc::now();
        let (_, capsules) = capsules(now);
        let session = session();

        let capsule = capsules
            .create(&session, form(now + Duration::hours(1)))
            .await
            .unwrap();

        let outcome = capsules
            .dispatch(&session, Intent::ViewRequested(capsule.id))
            .await
            .unwrap();

        let Outcome::Detail(CapsuleDetail::Granted(view)) = outcome else {
            panic!("Expected a granted detail, got {outcome:?}");
        };
        assert_eq!(LockState::Locked, view.state);
        assert!(matches!(view.fields, DisplayFields::Locked { .. }));
    }

    #[tokio::test]
    async fn test_detail_of_someone_elses_capsule() {
        let now = Utc::now();
        let (storage, capsules) = capsules(now);
        let owner = session();
        let intruder = session();

        let capsule = capsules
            .create(&owner, form(now + Duration::hours(1)))
            .await
            .unwrap();

        // even once unlocked nothing is revealed
        let later = Capsules::new(
            CapsuleStore::new(storage),
            FixedClock(now + Duration::days(1)),
        );

        assert_eq!(
            Ok(Outcome::Detail(CapsuleDetail::AccessDenied)),
            later
                .dispatch(&intruder, Intent::ViewRequested(capsule.id))
                .await
        );
        assert_eq!(
            Ok(Outcome::Edit(CapsuleDetail::AccessDenied)),
            later
                .dispatch(&intruder, Intent::EditRequested(capsule.id))
                .await
        );
    }

    #[tokio::test]
    async fn test_detail_of_missing_capsule() {
        let (_, capsules) = capsules(Utc::now());

        assert_eq!(
            Ok(Outcome::Detail(CapsuleDetail::NotFound)),
            capsules
                .dispatch(&session(), Intent::ViewRequested(Uuid::new_v4()))
                .await
        );
    }

    #[tokio::test]
    async fn test_update_and_delete_check_ownership() {
        let now = Utc::now();
        let (_, capsules) = capsules(now);
        let owner = session();
        let intruder = session();

        let capsule = capsules
            .create(&owner, form(now + Duration::hours(1)))
            .await
            .unwrap();

        assert_eq!(
            Err(CapsuleError::AccessDenied),
            capsules
                .update(&intruder, &capsule.id, form(now + Duration::hours(2)))
                .await
        );
        assert_eq!(
            Err(CapsuleError::AccessDenied),
            capsules
                .dispatch(&intruder, Intent::DeleteRequested(capsule.id))
                .await
        );

        let mut changed = form(now + Duration::hours(2));
        changed.title = "Changed".to_string();
        changed.image_url = None;

        let updated = capsules.update(&owner, &capsule.id, changed).await.unwrap();
        assert_eq!("Changed", updated.title);
        assert_eq!(None, updated.image_url);
        assert_eq!(capsule.created_at, updated.created_at);

        assert_eq!(
            Ok(Outcome::Deleted(capsule.id)),
            capsules
                .dispatch(&owner, Intent::DeleteRequested(capsule.id))
                .await
        );
        assert_eq!(
            Err(CapsuleError::NotFound),
            capsules.delete(&owner, &capsule.id).await
        );
    }

    #[tokio::test]
    async fn test_update_missing_capsule() {
        let now = Utc::now();
        let (_, capsules) = capsules(now);

        assert_eq!(
            Err(CapsuleError::NotFound),
            capsules
                .update(&session(), &Uuid::new_v4(), form(now + Duration::hours(1)))
                .await
        );
    }
}
