#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
// easier to use when using the functions as callback of foreign functions
#![allow(clippy::needless_pass_by_value)]

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Extension;
use axum::Router;
use axum_client_ip::ClientIpSource;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing_subscriber::prelude::*;
use url::Url;

use crate::api::JwtKeys;
use crate::api::router;
use crate::capsule_store::CapsuleStore;
use crate::identity::Identity;
use crate::identity::LogMailer;
use crate::identity::Mailer;
use crate::intents::Capsules;
use crate::session::SystemClock;
use crate::storage::Storage;
use crate::storage::setup;
use crate::utils::env_var_or_else;

mod api;
mod capsule_store;
mod capsules;
mod client_ip;
mod graceful_shutdown;
mod identity;
mod intents;
mod lock_state;
mod password;
mod session;
mod storage;
mod sync;
#[cfg(test)]
mod tests;
mod users;
mod utils;

const DEFAULT_RUST_LOG: &str = "timecapsule=debug,tower_http=debug";
const DEFAULT_ADDRESS: &str = "0.0.0.0:6000";
const DEFAULT_PUBLIC_URL: &str = "http://localhost:6000";

#[tokio::main]
async fn main() -> Result<()> {
    setup_environment();
    setup_tracing();

    let shutdown = CancellationToken::new();

    let app = setup_app(Arc::new(LogMailer), shutdown.clone()).await?;

    let address = setup_address()?;
    tracing::info!("Listening on {}", address);

    let listener = TcpListener::bind(address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(graceful_shutdown::handler(shutdown))
    .await?;

    Ok(())
}

/// Create and setup the app with its dependencies
///
/// Live capsule lists end when `shutdown` is cancelled
///
/// # Errors
///
/// Will return `Err` if any of its dependencies fail to load:
/// - Storage connection
/// - Invalid `PUBLIC_URL`
pub async fn setup_app(mailer: Arc<dyn Mailer>, shutdown: CancellationToken) -> Result<Router> {
    let storage = setup().await;

    create_router(storage, mailer, shutdown)
}

/// Create the router for the capsules
fn create_router<S: Storage>(
    storage: S,
    mailer: Arc<dyn Mailer>,
    shutdown: CancellationToken,
) -> Result<Router> {
    let jwt_keys = setup_jwt_keys();
    let public_url = setup_public_url()?;

    let identity = Identity::new(storage.clone(), mailer, public_url);
    let store = CapsuleStore::new(storage.clone());
    let capsules = Capsules::new(store.clone(), SystemClock);

    Ok(Router::new()
        .nest("/api", router::<S>())
        .layer(TraceLayer::new_for_http())
        .layer(ClientIpSource::ConnectInfo.into_extension())
        .layer(Extension(storage))
        .layer(Extension(store))
        .layer(Extension(capsules))
        .layer(Extension(identity))
        .layer(Extension(jwt_keys))
        .layer(Extension(shutdown)))
}

fn setup_environment() {
    dotenvy::dotenv().ok();
}

fn setup_tracing() {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::registry;

    registry()
        .with(EnvFilter::new(env_var_or_else("RUST_LOG", || {
            DEFAULT_RUST_LOG.into()
        })))
        .with(fmt::layer())
        .init();
}

fn setup_jwt_keys() -> JwtKeys {
    use crate::password::generate;

    let jwt_secret = env_var_or_else("JWT_SECRET", || {
        let jwt_secret = generate();
        tracing::info!("`JWT_SECRET` is not set, generating temporary one: {jwt_secret}");
        jwt_secret
    });

    JwtKeys::new(jwt_secret.as_bytes())
}

fn setup_public_url() -> Result<Url> {
    let public_url = env_var_or_else("PUBLIC_URL", || String::from(DEFAULT_PUBLIC_URL));

    Ok(Url::parse(&public_url)?)
}

fn setup_address() -> Result<SocketAddr> {
    let mut address =
        env_var_or_else("ADDRESS", || String::from(DEFAULT_ADDRESS)).parse::<SocketAddr>()?;

    // optional override of just the port
    if let Some(port) = utils::env_var_optional("PORT") {
        let port = port.parse::<u16>()?;

        address.set_port(port);
    }

    Ok(address)
}
