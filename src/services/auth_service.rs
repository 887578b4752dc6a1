use crate::middleware::auth::JwtService;
use crate::middleware::error_handling::{AppError, Result};
use crate::models::user::{CreateUserRequest, LoginRequest, UserResponse};
use crate::repositories::UserRepository;

pub struct AuthService {
    user_repo: UserRepository,
    jwt_service: JwtService,
}

impl AuthService {
    pub fn new(user_repo: UserRepository, jwt_secret: &str) -> Self {
        Self {
            user_repo,
            jwt_service: JwtService::new(jwt_secret),
        }
    }

    pub async fn register(&self, request: CreateUserRequest) -> Result<(UserResponse, String)> {
        if self.user_repo.email_exists(&request.email).await? {
            return Err(AppError::Conflict);
        }

        let password_hash = bcrypt::hash(&request.password, bcrypt::DEFAULT_COST)?;
        let user = self.user_repo.create(&request, &password_hash).await?;
        let token = self
            .jwt_service
            .generate_token(user.id, &user.email, &user.full_name, user.role)?;

        tracing::info!("New user registered: {}", user.id);

        Ok((user.into(), token))
    }

    pub async fn login(&self, request: LoginRequest) -> Result<(UserResponse, String)> {
        let user = self
            .user_repo
            .find_by_email(&request.email)
            .await?
            .ok_or(AppError::Unauthorized)?;

        let is_valid = bcrypt::verify(&request.password, &user.password_hash)?;
        if !is_valid {
            return Err(AppError::Unauthorized);
        }

        let token = self
            .jwt_service
            .generate_token(user.id, &user.email, &user.full_name, user.role)?;

        tracing::info!("User logged in: {}", user.id);

        Ok((user.into(), token))
    }
}
