use axum::{
    extract::{Extension, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::{Cookie, SameSite};
use time::Duration;
use validator::Validate;

use crate::{
    config::AppConfig,
    middleware::{error_handling::{AppError, Result}, Claims},
    models::user::{CreateUserRequest, LoginRequest, UserResponse},
    repositories::UserRepository,
    services::AuthService,
};

/// httpOnly auth cookie: JavaScript never sees the token, and SameSite
/// keeps it off cross-site requests.
fn create_auth_cookie(token: String, is_production: bool) -> Cookie<'static> {
    Cookie::build(("auth_token", token))
        .path("/")
        .max_age(Duration::days(1))
        .http_only(true)
        .secure(is_production)
        .same_site(SameSite::Strict)
        .build()
}

fn create_logout_cookie() -> Cookie<'static> {
    Cookie::build(("auth_token", ""))
        .path("/")
        .max_age(Duration::ZERO)
        .http_only(true)
        .build()
}

fn is_production() -> bool {
    std::env::var("TLS_ENABLED")
        .unwrap_or_else(|_| "false".to_string())
        .parse()
        .unwrap_or(false)
}

fn with_auth_cookie(user: UserResponse, token: String) -> Result<Response> {
    let cookie = create_auth_cookie(token, is_production());

    let mut response = Json(user).into_response();
    response.headers_mut().insert(
        header::SET_COOKIE,
        cookie
            .to_string()
            .parse()
            .map_err(|err| AppError::Internal(anyhow::anyhow!("invalid cookie header: {}", err)))?,
    );

    Ok(response)
}

pub async fn register(
    State(config): State<AppConfig>,
    Json(request): Json<CreateUserRequest>,
) -> Result<Response> {
    request.validate()?;

    let auth_service = AuthService::new(
        UserRepository::new(config.database_pool.clone()),
        &config.jwt_secret,
    );
    let (user, token) = auth_service.register(request).await?;

    with_auth_cookie(user, token)
}

pub async fn login(
    State(config): State<AppConfig>,
    Json(request): Json<LoginRequest>,
) -> Result<Response> {
    request.validate()?;

    let auth_service = AuthService::new(
        UserRepository::new(config.database_pool.clone()),
        &config.jwt_secret,
    );
    let (user, token) = auth_service.login(request).await?;

    with_auth_cookie(user, token)
}

pub async fn logout() -> Result<Response> {
    let cookie = create_logout_cookie();

    let mut response = Json(serde_json::json!({ "message": "Logged out" })).into_response();
    response.headers_mut().insert(
        header::SET_COOKIE,
        cookie
            .to_string()
            .parse()
            .map_err(|err| AppError::Internal(anyhow::anyhow!("invalid cookie header: {}", err)))?,
    );

    Ok(response)
}

pub async fn get_profile(
    State(config): State<AppConfig>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UserResponse>> {
    let user = UserRepository::new(config.database_pool.clone())
        .find_by_id(claims.user_id)
        .await?
        .ok_or(AppError::NotFound("User not found".to_string()))?;

    Ok(Json(user.into()))
}
