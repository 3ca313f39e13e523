//! Authentication middleware.
//!
//! The control surface needs an authenticated principal; resolving one is
//! delegated to a [`PrincipalLookup`]. The config-backed implementation
//! accepts the `api_key` or any entry of `tokens`, passed either as
//! `Authorization: Bearer <token>` or as the `accessToken` cookie. The
//! resolved [`Principal`] is inserted into request extensions.

use std::collections::HashMap;

use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use lc_core::config::AuthConfig;
use lc_core::ChannelId;

use crate::context::AppContext;
use crate::error::AppError;
use crate::middleware::request_id::RequestId;

/// Cookie carrying the access token for browser clients.
pub const ACCESS_TOKEN_COOKIE: &str = "accessToken";

/// Channel that the config `api_key` authenticates as.
pub const ADMIN_CHANNEL: &str = "admin";

/// The authenticated caller of a control request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal(pub ChannelId);

/// Resolves request credentials to a principal.
pub trait PrincipalLookup: Send + Sync {
    /// `None` means the request is not authenticated.
    fn resolve(&self, authorization: Option<&str>, cookie: Option<&str>) -> Option<Principal>;
}

/// [`PrincipalLookup`] backed by the `auth` config section.
pub struct ConfigPrincipals {
    enabled: bool,
    api_key: Option<String>,
    tokens: HashMap<String, ChannelId>,
}

impl ConfigPrincipals {
    pub fn new(config: &AuthConfig) -> Self {
        let tokens = config
            .tokens
            .iter()
            .filter_map(|(token, channel)| match channel.parse::<ChannelId>() {
                Ok(channel) => Some((token.clone(), channel)),
                Err(e) => {
                    tracing::warn!("Ignoring auth token with invalid channel id: {e}");
                    None
                }
            })
            .collect();
        Self {
            enabled: config.enabled,
            api_key: config.api_key.clone(),
            tokens,
        }
    }

    fn validate_token(&self, token: &str) -> Option<Principal> {
        if token.is_empty() {
            return None;
        }
        if self.api_key.as_deref() == Some(token) {
            return ADMIN_CHANNEL.parse().ok().map(Principal);
        }
        self.tokens.get(token).cloned().map(Principal)
    }
}

impl PrincipalLookup for ConfigPrincipals {
    fn resolve(&self, authorization: Option<&str>, cookie: Option<&str>) -> Option<Principal> {
        if !self.enabled {
            return Some(Principal(ChannelId::anonymous()));
        }

        if let Some(token) = authorization.and_then(|v| v.strip_prefix("Bearer ")) {
            if let Some(principal) = self.validate_token(token.trim()) {
                return Some(principal);
            }
        }

        let cookie_token = cookie.into_iter().flat_map(|c| c.split(';')).find_map(|part| {
            part.trim()
                .strip_prefix(ACCESS_TOKEN_COOKIE)
                .and_then(|rest| rest.strip_prefix('='))
        });
        cookie_token.and_then(|token| self.validate_token(token))
    }
}

/// Authentication middleware. Applied to the control routes only.
pub async fn auth_middleware(
    State(ctx): State<AppContext>,
    mut request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let (authorization, cookie) = {
        let headers = request.headers();
        let header = |name: axum::http::HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };
        (
            header(axum::http::header::AUTHORIZATION),
            header(axum::http::header::COOKIE),
        )
    };

    match ctx
        .principals
        .resolve(authorization.as_deref(), cookie.as_deref())
    {
        Some(principal) => {
            request.extensions_mut().insert(principal);
            Ok(next.run(request).await)
        }
        None => {
            let mut err =
                AppError::new(lc_core::Error::Unauthorized("Authentication required".into()));
            if let Some(RequestId(id)) = request.extensions().get::<RequestId>() {
                err = err.with_request_id(id.clone());
            }
            Err(err.into_response())
        }
    }
}
