use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tonic::{Request, Response, Status};

use crate::db::users;
use crate::error::AppError;
use crate::middleware::authenticated_user;
use crate::models::{AppUser, Role};
use crate::proto::auth::auth_service_server::AuthService;
use crate::proto::auth::{
    AuthResponse, LoginRequest, SignUpRequest, User, ValidateTokenRequest, ValidateTokenResponse,
};
use crate::proto::common::Empty;

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    /// Role at issue time, echoed by `ValidateToken`. Authorization never trusts
    /// it: the middleware reloads the current role on every request.
    pub role: String,
    pub exp: i64,
    pub iat: i64,
}

pub fn decode_token(token: &str, jwt_secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
}

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
}

pub fn verify_password(password: &str, password_hash: &str) -> Result<bool, AppError> {
    let parsed_hash = PasswordHash::new(password_hash)
        .map_err(|_| AppError::Internal("Invalid password hash in database".to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Signup input after normalization.
#[derive(Debug, PartialEq)]
struct SignUpInput {
    email: String,
    name: String,
    role: Role,
}

fn validate_sign_up(req: &SignUpRequest) -> Result<SignUpInput, AppError> {
    let email = req.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::InvalidArgument("A valid email is required".to_string()));
    }
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::InvalidArgument(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::InvalidArgument("name is required".to_string()));
    }
    let role = if req.role.is_empty() {
        Role::Student
    } else {
        req.role.parse()?
    };
    if role == Role::Admin {
        return Err(AppError::Forbidden(
            "Admin accounts cannot be self-registered".to_string(),
        ));
    }
    Ok(SignUpInput { email, name, role })
}

pub struct AuthServiceImpl {
    pool: PgPool,
    jwt_secret: String,
    token_ttl: chrono::Duration,
}

impl AuthServiceImpl {
    pub fn new(pool: PgPool, jwt_secret: String, token_ttl_hours: i64) -> Self {
        Self {
            pool,
            jwt_secret,
            token_ttl: chrono::Duration::hours(token_ttl_hours),
        }
    }

    fn issue_jwt(&self, user: &AppUser) -> Result<(String, chrono::DateTime<Utc>), Status> {
        let now = Utc::now();
        let exp = now + self.token_ttl;
        let claims = Claims {
            sub: user.id.to_string(),
            role: user.role.to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(|e| Status::internal(format!("JWT error: {}", e)))?;
        Ok((token, exp))
    }

    fn auth_response(&self, user: &AppUser) -> Result<AuthResponse, Status> {
        let (token, exp) = self.issue_jwt(user)?;
        Ok(AuthResponse {
            token,
            expires_at: exp.to_rfc3339(),
            user: Some(user_to_proto(user)),
        })
    }
}

fn user_to_proto(user: &AppUser) -> User {
    User {
        id: user.id.to_string(),
        email: user.email.clone(),
        name: user.name.clone(),
        role: user.role.to_string(),
        created_at: user.created_at.to_rfc3339(),
    }
}

#[tonic::async_trait]
impl AuthService for AuthServiceImpl {
    async fn sign_up(
        &self,
        request: Request<SignUpRequest>,
    ) -> Result<Response<AuthResponse>, Status> {
        let req = request.into_inner();
        let input = validate_sign_up(&req)?;
        let password_hash = hash_password(&req.password)?;

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| Status::internal(format!("Database connection error: {}", e)))?;
        let user = users::insert_user(&mut conn, &input.email, &password_hash, &input.name, input.role)
            .await?;

        tracing::info!("Registered {} user {}", user.role, user.id);
        Ok(Response::new(self.auth_response(&user)?))
    }

    async fn login(
        &self,
        request: Request<LoginRequest>,
    ) -> Result<Response<AuthResponse>, Status> {
        let req = request.into_inner();

        if req.email.is_empty() || req.password.is_empty() {
            return Err(Status::invalid_argument("email and password are required"));
        }

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| Status::internal(format!("Database connection error: {}", e)))?;
        let user = users::find_by_email(&mut conn, &req.email.trim().to_lowercase())
            .await?
            .ok_or_else(|| Status::unauthenticated("Invalid email or password"))?;

        if !verify_password(&req.password, &user.password_hash)? {
            return Err(Status::unauthenticated("Invalid email or password"));
        }

        Ok(Response::new(self.auth_response(&user)?))
    }

    async fn validate_token(
        &self,
        request: Request<ValidateTokenRequest>,
    ) -> Result<Response<ValidateTokenResponse>, Status> {
        let req = request.into_inner();

        match decode_token(&req.token, &self.jwt_secret) {
            Ok(claims) => Ok(Response::new(ValidateTokenResponse {
                valid: true,
                user_id: claims.sub,
                role: claims.role,
            })),
            Err(_) => Ok(Response::new(ValidateTokenResponse {
                valid: false,
                user_id: String::new(),
                role: String::new(),
            })),
        }
    }

    async fn me(&self, request: Request<Empty>) -> Result<Response<User>, Status> {
        let auth_user = authenticated_user(&request)?;

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| Status::internal(format!("Database connection error: {}", e)))?;
        let user = users::get_user(&mut conn, auth_user.user_id).await?;

        Ok(Response::new(user_to_proto(&user)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign_up(email: &str, password: &str, name: &str, role: &str) -> SignUpRequest {
        SignUpRequest {
            email: email.to_string(),
            password: password.to_string(),
            name: name.to_string(),
            role: role.to_string(),
        }
    }

    #[test]
    fn test_password_hash_roundtrip() {
        let hash = hash_password("correct horse battery").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse battery", &hash).unwrap());
        assert!(!verify_password("wrong password", &hash).unwrap());
    }

    #[test]
    fn test_token_roundtrip() {
        let now = Utc::now();
        let claims = Claims {
            sub: uuid::Uuid::new_v4().to_string(),
            role: "faculty".to_string(),
            exp: (now + chrono::Duration::hours(1)).timestamp(),
            iat: now.timestamp(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();

        let decoded = decode_token(&token, "test-secret").unwrap();
        assert_eq!(decoded.sub, claims.sub);
        assert_eq!(decoded.role, "faculty");
        assert!(decode_token(&token, "other-secret").is_err());
    }

    #[tokio::test]
    async fn test_validate_token_echoes_role_claim() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/campus_unused")
            .unwrap();
        let service = AuthServiceImpl::new(pool, "test-secret".to_string(), 1);
        let now = Utc::now();
        let claims = Claims {
            sub: uuid::Uuid::new_v4().to_string(),
            role: "faculty".to_string(),
            exp: (now + chrono::Duration::hours(1)).timestamp(),
            iat: now.timestamp(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();

        let res = service
            .validate_token(Request::new(ValidateTokenRequest { token }))
            .await
            .unwrap()
            .into_inner();

        assert!(res.valid);
        assert_eq!(res.user_id, claims.sub);
        assert_eq!(res.role, "faculty");
    }

    #[test]
    fn test_expired_token_rejected() {
        let now = Utc::now();
        let claims = Claims {
            sub: uuid::Uuid::new_v4().to_string(),
            role: "student".to_string(),
            exp: (now - chrono::Duration::hours(2)).timestamp(),
            iat: (now - chrono::Duration::hours(3)).timestamp(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();
        assert!(decode_token(&token, "test-secret").is_err());
    }

    #[test]
    fn test_sign_up_defaults_and_normalizes() {
        let input = validate_sign_up(&sign_up(" Ada@Campus.EDU ", "longenough", " Ada ", "")).unwrap();
        assert_eq!(
            input,
            SignUpInput {
                email: "ada@campus.edu".to_string(),
                name: "Ada".to_string(),
                role: Role::Student,
            }
        );
    }

    #[test]
    fn test_sign_up_validation() {
        assert!(matches!(
            validate_sign_up(&sign_up("nope", "longenough", "A", "")),
            Err(AppError::InvalidArgument(_))
        ));
        assert!(matches!(
            validate_sign_up(&sign_up("a@b.c", "short", "A", "")),
            Err(AppError::InvalidArgument(_))
        ));
        assert!(matches!(
            validate_sign_up(&sign_up("a@b.c", "longenough", "A", "janitor")),
            Err(AppError::InvalidArgument(_))
        ));
        assert!(matches!(
            validate_sign_up(&sign_up("a@b.c", "longenough", "A", "admin")),
            Err(AppError::Forbidden(_))
        ));
        assert_eq!(
            validate_sign_up(&sign_up("a@b.c", "longenough", "A", "faculty"))
                .unwrap()
                .role,
            Role::Faculty
        );
    }
}
