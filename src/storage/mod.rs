//! All things related to the storage of users and capsules
//!
//! The storage is the persistent store behind the capsules: it holds the records and tells
//! anyone listening which owner's capsules changed.

use core::fmt;
use std::future::Future;

use chrono::DateTime;
use chrono::Utc;
use uuid::Uuid;

use crate::capsules::Capsule;
use crate::users::User;

pub use feed::ChangeFeed;
pub use feed::Subscription;
pub use feed::Unsubscribe;
#[cfg(any(test, not(feature = "postgres")))]
pub use memory::Memory;
#[cfg(feature = "postgres")]
pub use postgres::Postgres;

mod feed;
#[cfg(any(test, not(feature = "postgres")))]
mod memory;
#[cfg(feature = "postgres")]
mod postgres;

/// Setup the storage
#[cfg(not(feature = "postgres"))]
#[allow(clippy::unused_async)]
pub async fn setup() -> Memory {
    Memory::new()
}

/// Setup the storage
#[cfg(feature = "postgres")]
pub async fn setup() -> Postgres {
    Postgres::new().await
}

/// Storage errors
#[derive(Debug)]
pub enum Error {
    /// A connection error with the storage
    Connection(String),

    /// A unique value is already taken
    Duplicate(String),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Connection(error) => write!(f, "Connection error: {error}"),
            Error::Duplicate(error) => write!(f, "Duplicate value: {error}"),
        }
    }
}

/// Result type for all storage interactions
pub type Result<T> = core::result::Result<T, Error>;

/// Values to create a User
pub struct CreateUserValues<'a> {
    /// The initial session ID for the user
    pub session_id: &'a Uuid,

    /// The normalized email address
    pub email: &'a str,

    /// The hashed password
    pub hashed_password: &'a str,
}

/// Values to change a password of a user
pub struct ChangePasswordValues<'a> {
    /// New session ID to invalidate current tokens
    pub session_id: &'a Uuid,

    /// The new hashed password
    pub hashed_password: &'a str,
}

/// Values to create a Capsule
pub struct CreateCapsuleValues<'a> {
    /// The owner of the capsule
    pub owner_id: &'a Uuid,

    /// Title of the capsule
    pub title: &'a str,

    /// Message of the capsule
    pub message: &'a str,

    /// Moment the capsule unlocks
    pub open_date: &'a DateTime<Utc>,

    /// Optional image URL
    pub image_url: Option<&'a str>,
}

/// Values to update a Capsule
///
/// All fields are overwritten, owner and creation date are never touched
pub struct UpdateCapsuleValues<'a> {
    /// New title
    pub title: &'a str,

    /// New message
    pub message: &'a str,

    /// New open date
    pub open_date: &'a DateTime<Utc>,

    /// New (optional) image URL
    pub image_url: Option<&'a str>,
}

/// Storage with all supported operations
pub trait Storage: Clone + Send + Sync + 'static {
    /// Feed of capsule changes, per owner
    fn changes(&self) -> &ChangeFeed;

    /// Finds a single user by its normalized email address
    fn find_single_user_by_email(
        &self,
        email: &str,
    ) -> impl Future<Output = Result<Option<User>>> + Send;

    /// Finds a single user by its ID
    fn find_single_user_by_id(
        &self,
        id: &Uuid,
    ) -> impl Future<Output = Result<Option<User>>> + Send;

    /// Create a single user
    ///
    /// Fails with [`Error::Duplicate`] when the email address is taken
    fn create_user(&self, values: &CreateUserValues) -> impl Future<Output = Result<User>> + Send;

    /// Rotate the session of a user, invalidating all tokens
    fn change_session(
        &self,
        user: &User,
        session_id: &Uuid,
    ) -> impl Future<Output = Result<User>> + Send;

    /// Change the password of a user
    fn change_password(
        &self,
        user: &User,
        values: &ChangePasswordValues,
    ) -> impl Future<Output = Result<User>> + Send;

    /// Find all capsules of an owner
    fn find_all_capsules_by_owner(
        &self,
        owner_id: &Uuid,
    ) -> impl Future<Output = Result<Vec<Capsule>>> + Send;

    /// Find a single capsule by ID, regardless of owner
    fn find_single_capsule_by_id(
        &self,
        id: &Uuid,
    ) -> impl Future<Output = Result<Option<Capsule>>> + Send;

    /// Create a capsule
    ///
    /// Creation date is assigned by the storage, `opened` starts as `false`
    fn create_capsule(
        &self,
        values: &CreateCapsuleValues,
    ) -> impl Future<Output = Result<Capsule>> + Send;

    /// Update a capsule
    ///
    /// Returns `None` when there is no capsule with that ID
    fn update_capsule(
        &self,
        id: &Uuid,
        values: &UpdateCapsuleValues,
    ) -> impl Future<Output = Result<Option<Capsule>>> + Send;

    /// Delete a capsule, for good
    ///
    /// Deleting a missing capsule is not an error
    fn delete_capsule(&self, id: &Uuid) -> impl Future<Output = Result<()>> + Send;

    /// Live query of all capsules of an owner
    ///
    /// Yields the full set right away and again after every change to it
    fn subscribe_by_owner(&self, owner_id: Uuid) -> Subscription {
        feed::subscribe(self.clone(), owner_id)
    }
}

