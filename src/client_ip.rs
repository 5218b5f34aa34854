//! Optional client IP address extractor
//!
//! `axum_client_ip` fails when no address can be found, handlers that only log the address take
//! it optionally.

use core::fmt;
use std::convert::Infallible;

use axum::extract::FromRequestParts as _;
use axum::extract::OptionalFromRequestParts;
use axum::http::request::Parts;

/// Client IP address extractor
#[derive(Debug, Clone)]
pub struct ClientIp {
    /// Internal IP address
    pub ip_address: axum_client_ip::ClientIp,
}

impl fmt::Display for ClientIp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.ip_address.0)
    }
}

impl<S> OptionalFromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        let ip_address = axum_client_ip::ClientIp::from_request_parts(parts, state).await;

        Ok(ip_address.ok().map(|ip_address| Self { ip_address }))
    }
}

/// Client address for logging, `unknown` when missing
pub fn display(client_ip: Option<&ClientIp>) -> String {
    client_ip.map_or_else(|| "unknown".to_string(), ToString::to_string)
}
