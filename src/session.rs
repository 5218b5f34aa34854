//! Sessions and the clock
//!
//! A session is the explicit context of a signed in user. It is created when a user signs in
//! and dropped when they sign out, nothing about the current user lives anywhere else.

use chrono::DateTime;
use chrono::Utc;
use uuid::Uuid;

use crate::users::User;

/// Context of a signed in user
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    /// The signed in user
    pub user_id: Uuid,

    /// Session of the user at the moment of signing in
    pub session_id: Uuid,

    /// Email address, for display
    pub email: String,
}

impl Session {
    /// Start a session for a user
    pub fn new(user: &User) -> Self {
        Self {
            user_id: user.id,
            session_id: user.session_id,
            email: user.email.clone(),
        }
    }
}

/// Source of "now"
pub trait Clock: Send + Sync + 'static {
    /// The current moment
    fn now(&self) -> DateTime<Utc>;
}

/// The wall clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock stuck at a given moment
#[cfg(test)]
#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub DateTime<Utc>);

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
