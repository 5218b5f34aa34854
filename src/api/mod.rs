//! All API endpoint setup

use axum::Router;
use axum::routing::get;
use axum::routing::post;

pub use current_user::CurrentUser;
pub use current_user::JwtKeys;
pub use request::Form;
pub use request::PathParameters;
pub use response::Error;
pub use response::Success;

use crate::storage::Storage;

mod capsules;
mod current_user;
mod live;
mod request;
mod response;
mod users;

/// Get the Axum router for all API routes
pub fn router<S: Storage>() -> Router {
    let users = Router::new()
        .route("/", post(users::register::<S>))
        .route("/token", post(users::token::<S>))
        .route("/me", get(users::me::<S>))
        .route("/me/logout", post(users::logout::<S>))
        .route(
            "/password-reset",
            post(users::request_password_reset::<S>).put(users::reset_password::<S>),
        );

    let capsules = Router::new()
        .route("/", get(capsules::list::<S>).post(capsules::create::<S>))
        .route("/live", get(live::live::<S>))
        .route(
            "/{capsule}",
            get(capsules::single::<S>)
                .put(capsules::update::<S>)
                .delete(capsules::delete::<S>),
        )
        .route("/{capsule}/edit", get(capsules::edit::<S>));

    Router::new()
        .nest("/users", users)
        .nest("/capsules", capsules)
}
