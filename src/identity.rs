//! Identity
//!
//! Registration, signing in and out, password resets and notifications of auth state changes.
//! Signing out rotates the session of a user, which invalidates every token handed out before.

use core::fmt;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use percent_encoding::NON_ALPHANUMERIC;
use percent_encoding::utf8_percent_encode;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use url::Url;
use uuid::Uuid;

use crate::password;
use crate::storage;
use crate::storage::ChangePasswordValues;
use crate::storage::CreateUserValues;
use crate::storage::Storage;
use crate::users::User;
use crate::users::is_valid_email;
use crate::users::normalize_email;

/// How long a password reset link stays valid
const RESET_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

/// Outstanding password reset tokens kept at most
const RESET_TOKEN_CAPACITY: u64 = 10_000;

/// Auth events kept for slow listeners before they lag
const EVENT_CAPACITY: usize = 64;

/// Identity failures
#[derive(Debug, PartialEq, Eq)]
pub enum AuthError {
    /// The email address is already registered
    EmailInUse,

    /// The password is too short
    WeakCredential,

    /// Unknown email, wrong password or unusable reset token
    InvalidCredential,

    /// The email address is malformed
    InvalidEmail,

    /// The storage or mailer could not be reached
    Network(String),

    /// Something broke that the user can do nothing about
    Internal(String),
}

impl std::error::Error for AuthError {}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuthError::EmailInUse => write!(f, "Email address is already registered"),
            AuthError::WeakCredential => write!(
                f,
                "Password must be at least {} characters",
                password::MIN_PASSWORD_LENGTH
            ),
            AuthError::InvalidCredential => write!(f, "Invalid credentials"),
            AuthError::InvalidEmail => write!(f, "Invalid email address"),
            AuthError::Network(error) => write!(f, "Network error: {error}"),
            AuthError::Internal(error) => write!(f, "Internal error: {error}"),
        }
    }
}

impl From<storage::Error> for AuthError {
    fn from(err: storage::Error) -> Self {
        match err {
            storage::Error::Duplicate(_) => AuthError::EmailInUse,
            storage::Error::Connection(_) => AuthError::Network(err.to_string()),
        }
    }
}

/// Auth state changes of users
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthEvent {
    /// The user registered or signed in
    SignedIn(Uuid),

    /// The user signed out, all their sessions ended
    SignedOut(Uuid),
}

/// Delivers password reset links
pub trait Mailer: Send + Sync + 'static {
    /// Send a password reset link to an email address
    fn send_password_reset(&self, email: &str, link: &Url) -> anyhow::Result<()>;
}

/// Mailer that only logs the links, for setups without outgoing mail
#[derive(Clone, Copy, Debug, Default)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send_password_reset(&self, email: &str, link: &Url) -> anyhow::Result<()> {
        tracing::info!("Password reset link for {email}: {link}");

        Ok(())
    }
}

/// Identity service
#[derive(Clone)]
pub struct Identity<S: Storage> {
    /// Where users live
    storage: S,

    /// Auth state changes, for whoever listens
    events: broadcast::Sender<AuthEvent>,

    /// Outstanding reset tokens, mapped to their user
    reset_tokens: Cache<String, Uuid>,

    /// Delivers reset links
    mailer: Arc<dyn Mailer>,

    /// Base of the reset links, always ending in a slash
    public_url: Url,
}

impl<S: Storage> Identity<S> {
    /// Create the identity service
    pub fn new(storage: S, mailer: Arc<dyn Mailer>, mut public_url: Url) -> Self {
        if !public_url.path().ends_with('/') {
            let path = format!("{}/", public_url.path());
            public_url.set_path(&path);
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let reset_tokens = Cache::builder()
            .max_capacity(RESET_TOKEN_CAPACITY)
            .time_to_live(RESET_TOKEN_TTL)
            .build();

        Self {
            storage,
            events,
            reset_tokens,
            mailer,
            public_url,
        }
    }

    /// Register a new user, who is signed in right away
    pub async fn register(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let email = normalize_email(email);

        if !is_valid_email(&email) {
            return Err(AuthError::InvalidEmail);
        }

        if !password::is_strong_enough(password) {
            return Err(AuthError::WeakCredential);
        }

        if self
            .storage
            .find_single_user_by_email(&email)
            .await?
            .is_some()
        {
            return Err(AuthError::EmailInUse);
        }

        let hashed_password = hash(password)?;

        let values = CreateUserValues {
            session_id: &Uuid::new_v4(),
            email: &email,
            hashed_password: &hashed_password,
        };

        let user = self.storage.create_user(&values).await?;

        tracing::info!(user_id = %user.id, "User registered");

        self.announce(AuthEvent::SignedIn(user.id));

        Ok(user)
    }

    /// Sign in with email address and password
    ///
    /// Unknown email addresses and wrong passwords fail the same way
    pub async fn login(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let email = normalize_email(email);

        let user = self.storage.find_single_user_by_email(&email).await?;

        match user {
            Some(user) if password::verify(&user.hashed_password, password) => {
                self.announce(AuthEvent::SignedIn(user.id));

                Ok(user)
            }
            _ => Err(AuthError::InvalidCredential),
        }
    }

    /// Sign out everywhere
    pub async fn logout(&self, user: &User) -> Result<(), AuthError> {
        self.storage.change_session(user, &Uuid::new_v4()).await?;

        tracing::info!(user_id = %user.id, "User signed out");

        self.announce(AuthEvent::SignedOut(user.id));

        Ok(())
    }

    /// Send a password reset link
    ///
    /// Unknown email addresses succeed without sending anything, so registrations can not be
    /// probed this way
    pub async fn send_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let email = normalize_email(email);

        if !is_valid_email(&email) {
            return Err(AuthError::InvalidEmail);
        }

        let Some(user) = self.storage.find_single_user_by_email(&email).await? else {
            tracing::debug!("Password reset requested for unknown email address");
            return Ok(());
        };

        let token = password::generate();
        let link = self.reset_link(&token)?;

        self.reset_tokens.insert(token, user.id).await;

        self.mailer
            .send_password_reset(&user.email, &link)
            .map_err(|err| AuthError::Network(err.to_string()))?;

        tracing::info!(user_id = %user.id, "Password reset link sent");

        Ok(())
    }

    /// Set a new password with a reset token
    ///
    /// Tokens are single use, all sessions of the user end
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<User, AuthError> {
        if !password::is_strong_enough(new_password) {
            return Err(AuthError::WeakCredential);
        }

        let user_id = self
            .reset_tokens
            .remove(token)
            .await
            .ok_or(AuthError::InvalidCredential)?;

        let user = self
            .storage
            .find_single_user_by_id(&user_id)
            .await?
            .ok_or(AuthError::InvalidCredential)?;

        let hashed_password = hash(new_password)?;

        let values = ChangePasswordValues {
            session_id: &Uuid::new_v4(),
            hashed_password: &hashed_password,
        };

        let user = self.storage.change_password(&user, &values).await?;

        tracing::info!(user_id = %user.id, "Password reset");

        self.announce(AuthEvent::SignedOut(user.id));

        Ok(user)
    }

    /// Follow the auth state of a signed in user
    pub fn on_auth_state_change(&self, user: &User) -> AuthState {
        AuthState {
            user_id: user.id,
            announced_current: false,
            receiver: self.events.subscribe(),
        }
    }

    /// Is the user still signed in with the same session?
    pub async fn is_signed_in(&self, user: &User) -> Result<bool, AuthError> {
        let stored = self.storage.find_single_user_by_id(&user.id).await?;

        Ok(stored.is_some_and(|stored| stored.session_id == user.session_id))
    }

    /// Tell listeners about an auth state change
    fn announce(&self, event: AuthEvent) {
        // nobody listening is fine
        let _ = self.events.send(event);
    }

    /// Link to the reset page for a token
    fn reset_link(&self, token: &str) -> Result<Url, AuthError> {
        let mut link = self
            .public_url
            .join("reset-password")
            .map_err(|err| AuthError::Internal(err.to_string()))?;

        let token = utf8_percent_encode(token, NON_ALPHANUMERIC);
        link.set_query(Some(&format!("token={token}")));

        Ok(link)
    }
}

/// Hash a password, failures are internal
fn hash(password: &str) -> Result<String, AuthError> {
    password::hash(password).map_err(|err| AuthError::Internal(err.to_string()))
}

/// Auth state of a single user
#[derive(Debug)]
pub struct AuthState {
    /// The followed user
    user_id: Uuid,

    /// Has the current state been handed out yet?
    announced_current: bool,

    /// All auth events
    receiver: broadcast::Receiver<AuthEvent>,
}

impl AuthState {
    /// Wait for the next state of the user
    ///
    /// The first call returns the current state (signed in), then `Some(user_id)` on every sign
    /// in and `None` on sign out. Returns `None` (the outer one) when the identity service is gone.
    pub async fn changed(&mut self) -> Option<Option<Uuid>> {
        if !self.announced_current {
            self.announced_current = true;
            return Some(Some(self.user_id));
        }

        loop {
            match self.receiver.recv().await {
                Ok(AuthEvent::SignedIn(user_id)) if user_id == self.user_id => {
                    return Some(Some(user_id));
                }
                Ok(AuthEvent::SignedOut(user_id)) if user_id == self.user_id => {
                    return Some(None);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    // a missed sign out can not be ruled out
                    tracing::warn!(user_id = %self.user_id, skipped, "Auth state lagged, signing out");
                    return Some(None);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// Mailer that keeps every link, for tests
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingMailer {
    /// Email address and link of every reset mail
    pub sent: std::sync::Mutex<Vec<(String, Url)>>,
}

#[cfg(test)]
impl RecordingMailer {
    /// Token of the last link sent
    pub fn last_token(&self) -> Option<String> {
        self.sent.lock().unwrap().last().and_then(|(_, link)| {
            link.query_pairs()
                .find(|(key, _)| key == "token")
                .map(|(_, value)| value.to_string())
        })
    }
}

#[cfg(test)]
impl Mailer for RecordingMailer {
    fn send_password_reset(&self, email: &str, link: &Url) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((email.to_string(), link.clone()));

        Ok(())
    }
}
