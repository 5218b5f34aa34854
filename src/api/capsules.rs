//! Capsule API management
//!
//! Every capsule route acts on the capsules of the current user only

use axum::Extension;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::capsules::CapsuleForm;
use crate::intents::CapsuleDetail;
use crate::intents::Capsules;
use crate::intents::Intent;
use crate::intents::Outcome;
use crate::lock_state::CapsuleView;
use crate::storage::Storage;

use super::CurrentUser;
use super::Error;
use super::Form;
use super::PathParameters;
use super::Success;

/// Capsule form, used for both creating and updating
///
/// Updating overwrites every field, left out optional fields are cleared
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapsuleRequest {
    /// Title, always visible
    title: String,
    /// Message, hidden until the open date
    message: String,
    /// Moment the capsule unlocks, must be in the future
    #[serde(default)]
    open_date: Option<DateTime<Utc>>,
    /// Optional image, hidden until the open date
    #[serde(default)]
    image_url: Option<String>,
}

impl From<CapsuleRequest> for CapsuleForm {
    fn from(request: CapsuleRequest) -> Self {
        Self {
            title: request.title,
            message: request.message,
            open_date: request.open_date,
            image_url: request.image_url,
        }
    }
}

/// Turn a detail into a response, only granted details have something to show
fn granted(detail: CapsuleDetail) -> Result<CapsuleView, Error> {
    match detail {
        CapsuleDetail::Granted(view) => Ok(view),
        CapsuleDetail::AccessDenied => Err(Error::forbidden("Not allowed to access capsule")),
        CapsuleDetail::NotFound => Err(Error::not_found("Capsule not found")),
    }
}

/// List all capsules of the current user
///
/// Locked capsules only show their title and open date
///
/// Request:
/// ```sh
/// curl -v -H 'Authorization: Bearer tokentokentoken' \
///     http://localhost:6000/api/capsules
/// ```
///
/// Response:
/// ```json
/// { "data": [ { "id": "<uuid>", "state": "locked", "title": "Birthday", ... } ] }
/// ```
pub async fn list<S: Storage>(
    Extension(capsules): Extension<Capsules<S>>,
    current_user: CurrentUser<S>,
) -> Result<Success<Vec<CapsuleView>>, Error> {
    let entries = capsules.list(&current_user.session()).await?;

    Ok(Success::ok(entries))
}

/// Seal a new capsule
///
/// Request:
/// ```sh
/// curl -v -H 'Content-Type: application/json' \
///     -H 'Authorization: Bearer tokentokentoken' \
///     -d '{ "title": "Birthday", "message": "Happy 30th", "openDate": "2030-01-01T00:00:00Z" }' \
///     http://localhost:6000/api/capsules
/// ```
///
/// Response:
/// ```json
/// { "data": { "id": "<uuid>", "state": "locked", "title": "Birthday", ... } }
/// ```
pub async fn create<S: Storage>(
    Extension(capsules): Extension<Capsules<S>>,
    current_user: CurrentUser<S>,
    Form(request): Form<CapsuleRequest>,
) -> Result<Success<CapsuleView>, Error> {
    let capsule = capsules
        .create(&current_user.session(), request.into())
        .await?;

    Ok(Success::created(capsules.view(&capsule)))
}

/// Get a single capsule
///
/// Request:
/// ```sh
/// curl -v -H 'Authorization: Bearer tokentokentoken' \
///     http://localhost:6000/api/capsules/<uuid>
/// ```
///
/// Response:
/// ```json
/// { "data": { "id": "<uuid>", "state": "unlocked", "message": "Happy 30th", ... } }
/// ```
pub async fn single<S: Storage>(
    Extension(capsules): Extension<Capsules<S>>,
    current_user: CurrentUser<S>,
    PathParameters(capsule_id): PathParameters<Uuid>,
) -> Result<Success<CapsuleView>, Error> {
    let outcome = capsules
        .dispatch(&current_user.session(), Intent::ViewRequested(capsule_id))
        .await?;

    match outcome {
        Outcome::Detail(detail) => granted(detail).map(Success::ok),
        _ => Err(Error::internal_server_error("Unexpected outcome")),
    }
}

/// Get a capsule to prefill an edit form
///
/// The same rules as viewing apply, a locked capsule does not give away its message
///
/// Request:
/// ```sh
/// curl -v -H 'Authorization: Bearer tokentokentoken' \
///     http://localhost:6000/api/capsules/<uuid>/edit
/// ```
pub async fn edit<S: Storage>(
    Extension(capsules): Extension<Capsules<S>>,
    current_user: CurrentUser<S>,
    PathParameters(capsule_id): PathParameters<Uuid>,
) -> Result<Success<CapsuleView>, Error> {
    let outcome = capsules
        .dispatch(&current_user.session(), Intent::EditRequested(capsule_id))
        .await?;

    match outcome {
        Outcome::Edit(detail) => granted(detail).map(Success::ok),
        _ => Err(Error::internal_server_error("Unexpected outcome")),
    }
}

/// Overwrite a capsule
///
/// Request:
/// ```sh
/// curl -v -XPUT -H 'Content-Type: application/json' \
///     -H 'Authorization: Bearer tokentokentoken' \
///     -d '{ "title": "Birthday", "message": "Happy 31st", "openDate": "2031-01-01T00:00:00Z" }' \
///     http://localhost:6000/api/capsules/<uuid>
/// ```
pub async fn update<S: Storage>(
    Extension(capsules): Extension<Capsules<S>>,
    current_user: CurrentUser<S>,
    PathParameters(capsule_id): PathParameters<Uuid>,
    Form(request): Form<CapsuleRequest>,
) -> Result<Success<CapsuleView>, Error> {
    let capsule = capsules
        .update(&current_user.session(), &capsule_id, request.into())
        .await?;

    Ok(Success::ok(capsules.view(&capsule)))
}

/// Delete a capsule
///
/// Request:
/// ```sh
/// curl -v -XDELETE -H 'Authorization: Bearer tokentokentoken' \
///     http://localhost:6000/api/capsules/<uuid>
/// ```
pub async fn delete<S: Storage>(
    Extension(capsules): Extension<Capsules<S>>,
    current_user: CurrentUser<S>,
    PathParameters(capsule_id): PathParameters<Uuid>,
) -> Result<Success<&'static str>, Error> {
    capsules
        .dispatch(&current_user.session(), Intent::DeleteRequested(capsule_id))
        .await?;

    Ok(Success::<&'static str>::no_content())
}
