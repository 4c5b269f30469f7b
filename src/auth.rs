//! Authenticator: cookie JWT → bearer JWT → bearer API key, in that
//! priority order, writing a `CallerIdentity` onto the request.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Request};
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

use crate::catalog::CatalogStore;
use crate::crypto::verify_jwt;
use crate::error::{GatewayError, Result};

pub const AUTH_COOKIE_NAME: &str = "auth_token";

/// The caller's identity, however it was established.
#[derive(Debug, Clone)]
pub enum CallerIdentity {
    User { id: String, username: String },
    ApiKey { id: String },
}

#[derive(Clone)]
pub struct Authenticator {
    pub catalog: Arc<CatalogStore>,
    pub jwt_secret: Vec<u8>,
}

impl Authenticator {
    pub fn new(catalog: Arc<CatalogStore>, jwt_secret: Vec<u8>) -> Self {
        Self { catalog, jwt_secret }
    }

    /// Runs the 3-step priority chain. `localhost` is a side channel for
    /// logging only and never affects the decision.
    pub async fn authenticate(&self, headers: &HeaderMap, localhost: bool) -> Result<(CallerIdentity, bool)> {
        if let Some(token) = cookie_value(headers, AUTH_COOKIE_NAME) {
            match verify_jwt(&token, &self.jwt_secret) {
                Ok(claims) => {
                    debug!(localhost, "authenticated via cookie JWT");
                    return Ok((CallerIdentity::User { id: claims.user_id, username: claims.username }, false));
                }
                Err(_) => {
                    return Err(GatewayError::TokenInvalid("cookie token invalid".into()));
                }
            }
        }

        if let Some(token) = bearer_token(headers) {
            if let Ok(claims) = verify_jwt(&token, &self.jwt_secret) {
                debug!(localhost, "authenticated via bearer JWT");
                return Ok((CallerIdentity::User { id: claims.user_id, username: claims.username }, false));
            }

            if let Some(key) = self.catalog.verify_api_key(&token).await? {
                debug!(localhost, "authenticated via bearer API key");
                return Ok((CallerIdentity::ApiKey { id: key.id }, false));
            }
        }

        Err(GatewayError::Unauthenticated)
    }
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    raw.split(';').map(str::trim).find_map(|pair| pair.strip_prefix(&format!("{name}="))).map(str::to_string)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    raw.strip_prefix("Bearer ").map(str::to_string)
}

/// Clears the `auth_token` cookie on a response, used when the cookie's
/// JWT fails to verify.
pub fn clear_auth_cookie(response: &mut Response) {
    if let Ok(value) = HeaderValue::from_str(&format!("{AUTH_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Strict; Max-Age=0")) {
        response.headers_mut().insert(axum::http::header::SET_COOKIE, value);
    }
}

/// axum middleware: authenticates the request, stores the `CallerIdentity`
/// in request extensions for downstream handlers, else renders the error.
pub async fn require_auth(
    State(authenticator): State<Authenticator>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let localhost = req
        .extensions()
        .get::<std::net::SocketAddr>()
        .map(|addr| addr.ip().is_loopback())
        .unwrap_or(false);

    match authenticator.authenticate(req.headers(), localhost).await {
        Ok((identity, _)) => {
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        Err(e) => {
            let had_cookie = cookie_value(req.headers(), AUTH_COOKIE_NAME).is_some();
            let mut response = axum::response::IntoResponse::into_response(e);
            if had_cookie {
                clear_auth_cookie(&mut response);
            }
            response
        }
    }
}
