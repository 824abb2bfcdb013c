use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use axum_extra::extract::WithRejection;
use tracing::info;
use uuid::Uuid;

use hilearn_db::Database;
use hilearn_db::models::NewUser;
use hilearn_gateway::auth::issue_token;
use hilearn_gateway::connection::{GatewayContext, GatewayTimings};
use hilearn_gateway::dispatcher::Dispatcher;
use hilearn_types::api::{LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};
use hilearn_types::models::Role;

use crate::error::ApiError;
use crate::run_db;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub jwt_secret: Arc<str>,
    pub token_ttl_days: i64,
    pub gateway_timings: GatewayTimings,
}

impl AppStateInner {
    pub fn gateway_context(&self) -> GatewayContext {
        GatewayContext {
            db: self.db.clone(),
            dispatcher: self.dispatcher.clone(),
            jwt_secret: self.jwt_secret.clone(),
            timings: self.gateway_timings,
        }
    }
}

pub async fn register(
    State(state): State<AppState>,
    WithRejection(Json(req), _): WithRejection<Json<RegisterRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let name = req.name.trim().to_string();
    let email = normalize_email(&req.email);

    if name.is_empty() || name.chars().count() > 64 {
        return Err(ApiError::Validation("name must be 1-64 characters".into()));
    }
    if !email.contains('@') {
        return Err(ApiError::Validation("invalid email".into()));
    }
    if req.password.chars().count() < 8 {
        return Err(ApiError::Validation("password must be at least 8 characters".into()));
    }

    let password_hash = hash_password(&req.password)?;
    let user_id = Uuid::new_v4();

    // Uniqueness is decided by the insert, not a prior lookup
    let (id, n) = (user_id.to_string(), name.clone());
    let inserted = run_db(&state.db, move |db| {
        db.create_user(&NewUser {
            id: &id,
            name: &n,
            email: &email,
            password_hash: &password_hash,
            role: Role::Student.as_str(),
            division_id: req.division_id.as_deref(),
            avatar: req.avatar.as_deref(),
            is_support: false,
        })
    })
    .await?;
    if !inserted {
        return Err(ApiError::Conflict("email already registered".into()));
    }

    let token = issue_token(&state.jwt_secret, user_id, &name, Role::Student, state.token_ttl_days)?;
    info!("Registered {} ({})", name, user_id);

    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id, token })))
}

pub async fn login(
    State(state): State<AppState>,
    WithRejection(Json(req), _): WithRejection<Json<LoginRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(&req.email);
    let user = run_db(&state.db, move |db| db.get_user_by_email(&email))
        .await?
        .ok_or(ApiError::Unauthenticated)?;

    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| anyhow::anyhow!("stored hash for {} unparsable: {}", user.id, e))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthenticated)?;

    let user_id: Uuid = user.id.parse().map_err(anyhow::Error::from)?;
    let role: Role = user.role.parse().map_err(anyhow::Error::msg)?;

    let token = issue_token(&state.jwt_secret, user_id, &user.name, role, state.token_ttl_days)?;

    Ok(Json(LoginResponse {
        user_id,
        name: user.name,
        role,
        token,
    }))
}

/// Argon2id PHC string with a fresh salt.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?;
    Ok(hash.to_string())
}

/// Make sure a support-flagged admin exists for `email`, creating or
/// promoting the account as needed. Used at startup in place of a seed script.
pub fn ensure_admin(db: &Database, email: &str, password: &str, name: &str) -> anyhow::Result<Uuid> {
    let email = normalize_email(email);

    if let Some(existing) = db.get_user_by_email(&email)? {
        db.update_user_role(&existing.id, Role::Admin.as_str(), true)?;
        info!("Bootstrap admin {} already present", email);
        return Ok(existing.id.parse()?);
    }

    let id = Uuid::new_v4();
    let password_hash = hash_password(password)?;
    let inserted = db.create_user(&NewUser {
        id: &id.to_string(),
        name,
        email: &email,
        password_hash: &password_hash,
        role: Role::Admin.as_str(),
        division_id: None,
        avatar: None,
        is_support: true,
    })?;
    if !inserted {
        anyhow::bail!("bootstrap admin {} was created concurrently", email);
    }

    info!("Created bootstrap admin {} ({})", email, id);
    Ok(id)
}

/// The caller's role as currently stored. Tokens carry the role they were
/// issued with, which goes stale after a promotion or demotion.
pub(crate) fn stored_role(db: &Database, user_id: Uuid) -> anyhow::Result<Option<Role>> {
    db.get_user_by_id(&user_id.to_string())?
        .map(|row| row.role.parse::<Role>().map_err(anyhow::Error::msg))
        .transpose()
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_admin_creates_then_promotes() {
        let db = Database::open_in_memory().unwrap();

        let id = ensure_admin(&db, "Help@HiLearn.test ", "password123", "Support").unwrap();
        let row = db.get_user_by_email("help@hilearn.test").unwrap().unwrap();
        assert_eq!(row.id, id.to_string());
        assert_eq!(row.role, "ADMIN");
        assert!(row.is_support);

        db.update_user_role(&row.id, "STUDENT", false).unwrap();
        let again = ensure_admin(&db, "help@hilearn.test", "ignored", "Support").unwrap();
        assert_eq!(again, id);
        assert_eq!(db.find_support_agent().unwrap().unwrap().id, id.to_string());
    }

    #[test]
    fn hashed_password_verifies() {
        let hash = hash_password("correct horse").unwrap();
        let parsed = PasswordHash::new(&hash).unwrap();
        assert!(Argon2::default().verify_password(b"correct horse", &parsed).is_ok());
        assert!(Argon2::default().verify_password(b"wrong", &parsed).is_err());
    }
}
