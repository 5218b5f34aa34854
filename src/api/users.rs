//! User API management

use axum::Extension;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::client_ip;
use crate::client_ip::ClientIp;
use crate::identity::Identity;
use crate::storage::Storage;
use crate::users::User;

use super::CurrentUser;
use super::Error;
use super::Form;
use super::JwtKeys;
use super::Success;
use super::current_user::Token;
use super::current_user::generate_token;

/// The user response information
///
/// A subset of all the information, ready to be serialized for the outside world
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    /// The user ID
    pub id: Uuid,

    /// The normalized email address
    pub email: String,

    /// Registration date
    pub created_at: DateTime<Utc>,
}

impl UserResponse {
    /// Create a user response from a [`User`](User)
    fn from_user(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            created_at: user.created_at,
        }
    }
}

/// A fresh registration, signed in right away
#[derive(Debug, Serialize)]
pub struct Registration {
    /// The new user
    user: UserResponse,

    /// Token of the first session
    token: Token,
}

/// Credentials form, for both registering and signing in
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsForm {
    /// Email address of the user
    email: String,
    /// Password of the user
    password: String,
}

/// Register a new user
///
/// Request:
/// ```sh
/// curl -v -H 'Content-Type: application/json' \
///     -d '{ "email": "someone@example.com", "password": "verysecret" }' \
///     http://localhost:6000/api/users
/// ```
///
/// Response
/// ```json
/// { "data": { "user": { "id": "<uuid>", ... }, "token": { "access_token": "some token", ... } } }
/// ```
pub async fn register<S: Storage>(
    client_ip: Option<ClientIp>,
    Extension(jwt_keys): Extension<JwtKeys>,
    Extension(identity): Extension<Identity<S>>,
    Form(form): Form<CredentialsForm>,
) -> Result<Success<Registration>, Error> {
    let user = identity.register(&form.email, &form.password).await?;

    tracing::info!(
        user_id = %user.id,
        "Registration from {}",
        client_ip::display(client_ip.as_ref())
    );

    let token = generate_token(&jwt_keys, &user)?;

    Ok(Success::created(Registration {
        user: UserResponse::from_user(&user),
        token,
    }))
}

/// Get a token for a user "session"
///
/// The token can then be used to access the rest of the API routes by using it in the
/// `Authorization` header
///
/// Request:
/// ```sh
/// curl -v -H 'Content-Type: application/json' \
///     -d '{ "email": "someone@example.com", "password": "verysecret" }' \
///     http://localhost:6000/api/users/token
/// ```
///
/// Response
/// ```json
/// { "data": { "token_type": "Bearer", "access_token": "some token" } }
/// ```
pub async fn token<S: Storage>(
    client_ip: Option<ClientIp>,
    Extension(jwt_keys): Extension<JwtKeys>,
    Extension(identity): Extension<Identity<S>>,
    Form(form): Form<CredentialsForm>,
) -> Result<Success<Token>, Error> {
    let user = identity
        .login(&form.email, &form.password)
        .await
        .inspect_err(|_| {
            tracing::warn!(
                "Failed sign in attempt from {}",
                client_ip::display(client_ip.as_ref())
            );
        })?;

    let token = generate_token(&jwt_keys, &user)?;

    Ok(Success::ok(token))
}

/// Get the current user
///
/// Request:
/// ```sh
/// curl -v -H 'Authorization: Bearer tokentokentoken' \
///     http://localhost:6000/api/users/me
/// ```
///
/// Response:
/// ```json
/// { "data": { "id": "<uuid>", "email": "someone@example.com", ... } }
/// ```
pub async fn me<S: Storage>(current_user: CurrentUser<S>) -> Success<UserResponse> {
    Success::ok(UserResponse::from_user(&current_user))
}

/// Sign out everywhere
///
/// Every token of the user stops working, live lists of the user end
///
/// Request:
/// ```sh
/// curl -v -XPOST -H 'Authorization: Bearer tokentokentoken' \
///     http://localhost:6000/api/users/me/logout
/// ```
pub async fn logout<S: Storage>(
    Extension(identity): Extension<Identity<S>>,
    current_user: CurrentUser<S>,
) -> Result<Success<&'static str>, Error> {
    identity.logout(&current_user).await?;

    Ok(Success::<&'static str>::no_content())
}

/// Password reset request form
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordResetRequestForm {
    /// Email address of the forgotten account
    email: String,
}

/// Send a password reset link
///
/// Always succeeds for well-formed email addresses, registered or not
///
/// Request:
/// ```sh
/// curl -v -H 'Content-Type: application/json' \
///     -d '{ "email": "someone@example.com" }' \
///     http://localhost:6000/api/users/password-reset
/// ```
pub async fn request_password_reset<S: Storage>(
    client_ip: Option<ClientIp>,
    Extension(identity): Extension<Identity<S>>,
    Form(form): Form<PasswordResetRequestForm>,
) -> Result<Success<&'static str>, Error> {
    tracing::info!(
        "Password reset requested from {}",
        client_ip::display(client_ip.as_ref())
    );

    identity.send_password_reset(&form.email).await?;

    Ok(Success::<&'static str>::no_content())
}

/// Password reset form
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordResetForm {
    /// Token from the reset link
    token: String,
    /// The new password
    password: String,
}

/// Set a new password with the token of a reset link
///
/// Every token of the user stops working, signing in again is needed
///
/// Request:
/// ```sh
/// curl -v -XPUT -H 'Content-Type: application/json' \
///     -d '{ "token": "tokentokentoken", "password": "veryverysecret" }' \
///     http://localhost:6000/api/users/password-reset
/// ```
pub async fn reset_password<S: Storage>(
    Extension(identity): Extension<Identity<S>>,
    Form(form): Form<PasswordResetForm>,
) -> Result<Success<&'static str>, Error> {
    identity.reset_password(&form.token, &form.password).await?;

    Ok(Success::<&'static str>::no_content())
}
