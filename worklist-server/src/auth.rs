use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{jwk::JwkSet, Algorithm, DecodingKey, TokenData, Validation};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use worklist_core::Permission;

use crate::{config::JwtSettings, error::ApiError, AppState};

/// Cookie set by Stytch's frontend SDK
pub const DEFAULT_SESSION_COOKIE: &str = "stytch_session_jwt";

/// Cached JWK key set fetched from an external IdP.
#[derive(Default)]
pub struct JwkCache {
    jwks: Option<JwkSet>,
    fetched_at: Option<std::time::Instant>,
}

/// Cache TTL: 15 minutes
const JWK_CACHE_TTL: std::time::Duration = std::time::Duration::from_secs(15 * 60);

impl JwkCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_expired(&self) -> bool {
        match self.fetched_at {
            Some(t) => t.elapsed() > JWK_CACHE_TTL,
            None => true,
        }
    }
}

/// Fetch or return cached JWK set from the configured URL.
async fn get_jwks(jwk_url: &str, cache: &RwLock<JwkCache>) -> Result<JwkSet, String> {
    // Check cache first (read lock)
    {
        let c = cache.read().await;
        if !c.is_expired()
            && let Some(ref jwks) = c.jwks
        {
            return Ok(jwks.clone());
        }
    }

    // Fetch fresh keys (write lock)
    let mut c = cache.write().await;
    // Double-check after acquiring write lock
    if !c.is_expired()
        && let Some(ref jwks) = c.jwks
    {
        return Ok(jwks.clone());
    }

    let response = reqwest::get(jwk_url)
        .await
        .map_err(|e| format!("Failed to fetch JWK from {}: {}", jwk_url, e))?;

    let jwks: JwkSet = response
        .json()
        .await
        .map_err(|e| format!("Failed to parse JWK response: {}", e))?;

    tracing::info!(url = jwk_url, keys = jwks.keys.len(), "Refreshed JWK set");
    c.jwks = Some(jwks.clone());
    c.fetched_at = Some(std::time::Instant::now());

    Ok(jwks)
}

/// Authenticated caller, inserted into request extensions by [`auth_middleware`]
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub auth_type: AuthType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthType {
    /// Auth disabled; the caller owns everything
    Anonymous,
    /// Service credential; bypasses panel ACLs
    ApiKey,
    Jwt,
}

impl AuthUser {
    pub fn new(user_id: impl Into<String>, auth_type: AuthType) -> Self {
        Self {
            user_id: user_id.into(),
            auth_type,
        }
    }

    pub fn anonymous() -> Self {
        Self::new("anonymous", AuthType::Anonymous)
    }

    /// Whether panel ACLs apply to this caller
    pub fn is_acl_bound(&self) -> bool {
        self.auth_type == AuthType::Jwt
    }
}

/// JWT claims structure
#[derive(Debug, Deserialize)]
struct JwtClaims {
    sub: Option<String>,
}

/// Authentication middleware
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Response> {
    // Skip auth if disabled
    if !state.config.auth.enabled {
        request.extensions_mut().insert(AuthUser::anonymous());
        return Ok(next.run(request).await);
    }

    // Allow public endpoints without auth
    if request.uri().path() == "/health" {
        return Ok(next.run(request).await);
    }

    let cookie_name = state
        .config
        .auth
        .session_cookie
        .as_deref()
        .unwrap_or(DEFAULT_SESSION_COOKIE);

    let Some(token) = extract_token(request.headers(), cookie_name) else {
        return Err(
            ApiError::Unauthorized("Missing bearer token or session cookie".into()).into_response(),
        );
    };

    let auth_user = authenticate_token(&state, &token)
        .await
        .map_err(IntoResponse::into_response)?;

    tracing::debug!(user = %auth_user.user_id, auth_type = ?auth_user.auth_type, "Authenticated request");

    // Insert auth user into request extensions
    request.extensions_mut().insert(auth_user);

    Ok(next.run(request).await)
}

/// Bearer token from the Authorization header, falling back to the session cookie
fn extract_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    {
        return value
            .strip_prefix("Bearer ")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == cookie_name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Authenticate a token (API key first, then JWT fallback)
async fn authenticate_token(state: &AppState, token: &str) -> Result<AuthUser, ApiError> {
    // Try API key match first
    for api_key in &state.config.auth.api_keys {
        if api_key.key == token {
            return Ok(AuthUser::new(api_key.name.clone(), AuthType::ApiKey));
        }
    }

    // Try JWT decode if JWT settings are configured
    if let Some(ref jwt_settings) = state.config.auth.jwt {
        return authenticate_jwt(jwt_settings, token, &state.jwk_cache).await;
    }

    Err(ApiError::Unauthorized("Invalid API key".into()))
}

/// Authenticate using JWT token
async fn authenticate_jwt(
    jwt_settings: &JwtSettings,
    token: &str,
    jwk_cache: &RwLock<JwkCache>,
) -> Result<AuthUser, ApiError> {
    // Determine decoding key and algorithm
    let (decoding_key, algorithm) = if let Some(ref jwk_url) = jwt_settings.jwk_url {
        // JWK URL mode: fetch keys from external IdP
        let jwks = get_jwks(jwk_url, jwk_cache).await.map_err(ApiError::Upstream)?;

        // Decode JWT header to get kid
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| ApiError::Unauthorized(format!("Invalid JWT header: {}", e)))?;

        let kid = header.kid.as_deref().unwrap_or("");
        let jwk = jwks
            .keys
            .iter()
            .find(|k| k.common.key_id.as_deref() == Some(kid))
            .or_else(|| jwks.keys.first())
            .ok_or_else(|| ApiError::Unauthorized("No matching JWK found".into()))?;

        let key = DecodingKey::from_jwk(jwk)
            .map_err(|e| ApiError::Unauthorized(format!("Invalid JWK: {}", e)))?;

        let alg = jwk
            .common
            .key_algorithm
            .and_then(|a| match a {
                jsonwebtoken::jwk::KeyAlgorithm::RS256 => Some(Algorithm::RS256),
                jsonwebtoken::jwk::KeyAlgorithm::RS384 => Some(Algorithm::RS384),
                jsonwebtoken::jwk::KeyAlgorithm::RS512 => Some(Algorithm::RS512),
                jsonwebtoken::jwk::KeyAlgorithm::ES256 => Some(Algorithm::ES256),
                jsonwebtoken::jwk::KeyAlgorithm::ES384 => Some(Algorithm::ES384),
                _ => None,
            })
            .unwrap_or(Algorithm::RS256);

        (key, alg)
    } else if let Some(ref secret) = jwt_settings.secret {
        (DecodingKey::from_secret(secret.as_bytes()), Algorithm::HS256)
    } else {
        return Err(ApiError::Internal(
            "JWT is configured but neither secret nor jwk_url is set".into(),
        ));
    };

    // Build validation
    let mut validation = Validation::new(algorithm);

    if let Some(ref issuer) = jwt_settings.issuer {
        validation.set_issuer(&[issuer]);
    }

    if let Some(ref audience) = jwt_settings.audience {
        validation.set_audience(&[audience]);
    } else {
        validation.validate_aud = false;
    }

    let token_data: TokenData<JwtClaims> = jsonwebtoken::decode(token, &decoding_key, &validation)
        .map_err(|e| ApiError::Unauthorized(format!("Invalid JWT: {}", e)))?;

    let user_id = token_data
        .claims
        .sub
        .ok_or_else(|| ApiError::Unauthorized("JWT has no subject".into()))?;

    Ok(AuthUser::new(user_id, AuthType::Jwt))
}

/// Fail with 403 unless `user` holds at least `required` on the panel
pub fn authorize(
    state: &AppState,
    user: &AuthUser,
    panel_id: &str,
    required: Permission,
) -> Result<(), ApiError> {
    if !user.is_acl_bound() {
        return Ok(());
    }
    match state.store.permission_for(panel_id, &user.user_id)? {
        Some(granted) if granted.allows(required) => Ok(()),
        _ => Err(ApiError::Forbidden(format!(
            "{} requires {} access to panel {}",
            user.user_id,
            required.as_str(),
            panel_id
        ))),
    }
}
