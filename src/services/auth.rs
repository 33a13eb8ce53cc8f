// =============================================================================
// AUTH SERVICE
// =============================================================================
// Registration, login and token refresh. Passwords are hashed with argon2
// before they reach storage; tokens come from the shared JwtService.
// =============================================================================

use tracing::{info, warn};

use crate::auth::{hash_password, verify_password, JwtService};
use crate::clock::Clock;
use crate::error::{AppError, AppResult};
use crate::models::{LoginRequest, NewUser, RegisterRequest, TokenResponse, User, UserRole};
use crate::store::{Storage, Store};

pub struct AuthService<'a, S: Storage> {
    storage: &'a S,
    jwt: &'a JwtService,
    clock: &'a dyn Clock,
}

impl<'a, S: Storage> AuthService<'a, S> {
    pub fn new(storage: &'a S, jwt: &'a JwtService, clock: &'a dyn Clock) -> Self {
        Self {
            storage,
            jwt,
            clock,
        }
    }

    /// Create a customer account
    pub async fn register(&self, request: &RegisterRequest) -> AppResult<User> {
        let email = request.email.trim().to_lowercase();
        let mut tx = self.storage.begin().await?;

        if tx.find_user_by_email(&email).await?.is_some() {
            return Err(AppError::Conflict("Email already registered".to_string()));
        }
        if tx.find_user_by_username(&request.username).await?.is_some() {
            return Err(AppError::Conflict("Username already taken".to_string()));
        }

        let user = tx
            .insert_user(
                &NewUser {
                    email,
                    username: request.username.clone(),
                    first_name: request.first_name.clone(),
                    last_name: request.last_name.clone(),
                    hashed_password: hash_password(&request.password)?,
                    role: UserRole::Customer,
                },
                self.clock.now(),
            )
            .await?;
        tx.commit().await?;

        info!(user_id = %user.id, username = %user.username, "User registered");
        Ok(user)
    }

    /// Exchange email + password for an access token
    pub async fn login(&self, request: &LoginRequest) -> AppResult<TokenResponse> {
        let email = request.email.trim().to_lowercase();
        let mut tx = self.storage.begin().await?;
        let user = tx.find_user_by_email(&email).await?;
        tx.commit().await?;

        let user = match user {
            Some(user) if verify_password(&request.password, &user.hashed_password) => user,
            _ => {
                warn!(email = %email, "Failed login attempt");
                return Err(AppError::Unauthorized(
                    "Incorrect email or password".to_string(),
                ));
            }
        };
        if !user.is_active {
            return Err(AppError::BadRequest("Inactive user account".to_string()));
        }

        info!(user_id = %user.id, "User logged in");
        self.issue_token(&user)
    }

    /// Fresh token for an already authenticated user
    pub fn issue_token(&self, user: &User) -> AppResult<TokenResponse> {
        let access_token = self.jwt.generate_token(user, self.clock.now())?;
        Ok(TokenResponse {
            access_token,
            token_type: "bearer".to_string(),
            expires_in: self.jwt.expires_in(),
        })
    }

    /// Create the configured admin account unless the email is already taken
    pub async fn ensure_admin(&self, email: &str, password: &str) -> AppResult<Option<User>> {
        let email = email.trim().to_lowercase();
        let mut tx = self.storage.begin().await?;
        if tx.find_user_by_email(&email).await?.is_some() {
            return Ok(None);
        }

        let username = match email.split('@').next() {
            Some(local) if local.len() >= 3 => local.to_string(),
            _ => "admin".to_string(),
        };
        if tx.find_user_by_username(&username).await?.is_some() {
            warn!(%username, "Admin bootstrap skipped, username in use");
            return Ok(None);
        }

        let admin = tx
            .insert_user(
                &NewUser {
                    email,
                    username,
                    first_name: "Admin".to_string(),
                    last_name: "User".to_string(),
                    hashed_password: hash_password(password)?,
                    role: UserRole::Admin,
                },
                self.clock.now(),
            )
            .await?;
        tx.commit().await?;

        info!(user_id = %admin.id, email = %admin.email, "Admin account created");
        Ok(Some(admin))
    }
}
