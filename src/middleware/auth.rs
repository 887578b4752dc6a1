use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::middleware::error_handling::Result;
use crate::models::user::UserRole;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub user_id: Uuid,
    pub email: String,
    pub full_name: String,
    pub role: UserRole,
    pub exp: usize,
    pub iat: usize,
}

impl Claims {
    pub fn is_staff(&self) -> bool {
        self.role.is_staff()
    }
}

pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_ref()),
            decoding_key: DecodingKey::from_secret(secret.as_ref()),
        }
    }

    pub fn generate_token(
        &self,
        user_id: Uuid,
        email: &str,
        full_name: &str,
        role: UserRole,
    ) -> std::result::Result<String, jsonwebtoken::errors::Error> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as usize;

        // Staff sessions expire sooner
        let exp = if role.is_staff() {
            now + 2 * 60 * 60
        } else {
            now + 24 * 60 * 60
        };

        let claims = Claims {
            sub: user_id.to_string(),
            user_id,
            email: email.to_string(),
            full_name: full_name.to_string(),
            role,
            exp,
            iat: now,
        };

        encode(&Header::default(), &claims, &self.encoding_key)
    }

    pub fn validate_token(&self, token: &str) -> std::result::Result<Claims, jsonwebtoken::errors::Error> {
        decode::<Claims>(token, &self.decoding_key, &Validation::new(Algorithm::HS256))
            .map(|data| data.claims)
    }

    pub fn extract_token_from_header(auth_header: &str) -> Option<&str> {
        auth_header.strip_prefix("Bearer ")
    }
}

/// Resolve a verified identity from a raw token, or an explicit error.
///
/// This is the single identity seam for both HTTP middleware and the
/// WebSocket handshake: callers always get either `Claims` or an
/// `AppError` that already knows its status code, never an overloaded
/// "session or response" value.
pub fn authenticate_token(jwt_secret: &str, token: &str) -> Result<Claims> {
    let claims = JwtService::new(jwt_secret).validate_token(token)?;
    Ok(claims)
}

pub async fn auth_middleware(
    State(config): State<AppConfig>,
    mut request: Request,
    next: Next,
) -> std::result::Result<Response, StatusCode> {
    // Cookie first, Authorization header as fallback for non-browser clients
    let cookie_jar = CookieJar::from_headers(request.headers());
    let token = if let Some(cookie) = cookie_jar.get("auth_token") {
        Some(cookie.value().to_string())
    } else {
        request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(JwtService::extract_token_from_header)
            .map(|t| t.to_string())
    };

    let Some(token) = token else {
        return Err(StatusCode::UNAUTHORIZED);
    };

    match authenticate_token(&config.jwt_secret, &token) {
        Ok(claims) => {
            request.extensions_mut().insert(claims);
            Ok(next.run(request).await)
        }
        Err(_) => Err(StatusCode::UNAUTHORIZED),
    }
}

/// Requires an `assistant` or `admin` identity. Must run after
/// `auth_middleware` in the layer chain.
pub async fn staff_middleware(
    request: Request,
    next: Next,
) -> std::result::Result<Response, StatusCode> {
    let claims = request
        .extensions()
        .get::<Claims>()
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !claims.is_staff() {
        tracing::warn!(
            "Staff access denied for user {} with role {:?}",
            claims.user_id,
            claims.role
        );
        return Err(StatusCode::FORBIDDEN);
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::error_handling::AppError;

    #[test]
    fn test_token_round_trip() {
        let service = JwtService::new("test-secret");
        let user_id = Uuid::new_v4();

        let token = service
            .generate_token(user_id, "ana@example.com", "Ana Almeida", UserRole::User)
            .unwrap();
        let claims = service.validate_token(&token).unwrap();

        assert_eq!(claims.user_id, user_id);
        assert_eq!(claims.email, "ana@example.com");
        assert_eq!(claims.role, UserRole::User);
    }

    #[test]
    fn test_token_rejected_with_wrong_secret() {
        let token = JwtService::new("secret-a")
            .generate_token(Uuid::new_v4(), "x@example.com", "X", UserRole::Admin)
            .unwrap();

        assert!(JwtService::new("secret-b").validate_token(&token).is_err());
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(JwtService::extract_token_from_header("Bearer abc.def"), Some("abc.def"));
        assert_eq!(JwtService::extract_token_from_header("Basic abc"), None);
    }

    #[test]
    fn test_authenticate_token_is_a_result() {
        let err = authenticate_token("secret", "not-a-jwt").unwrap_err();
        assert!(matches!(err, AppError::Jwt(_)));
    }

    #[test]
    fn test_staff_claims() {
        let service = JwtService::new("s");
        let token = service
            .generate_token(Uuid::new_v4(), "staff@example.com", "Staff", UserRole::Assistant)
            .unwrap();
        let claims = service.validate_token(&token).unwrap();
        assert!(claims.is_staff());
    }
}
