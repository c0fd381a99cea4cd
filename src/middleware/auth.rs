use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use http::header::HeaderValue;
use http::Request as HttpRequest;
use http::Response as HttpResponse;
use http_body_util::combinators::UnsyncBoxBody;
use sqlx::PgPool;
use tonic::Status;
use tower::{Layer, Service};
use uuid::Uuid;

use crate::db::users;
use crate::error::AppResult;
use crate::models::Role;
use crate::services::auth_service::decode_token;

/// Authenticated user info injected by the auth middleware into request extensions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub role: Role,
}

impl AuthenticatedUser {
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

/// Reads the user injected by [`AuthMiddleware`].
pub fn authenticated_user<T>(request: &tonic::Request<T>) -> Result<AuthenticatedUser, Status> {
    request
        .extensions()
        .get::<AuthenticatedUser>()
        .cloned()
        .ok_or_else(|| Status::unauthenticated("Authentication required"))
}

/// The caller on a public path, when a valid token came with the request.
pub fn optional_user<T>(request: &tonic::Request<T>) -> Option<AuthenticatedUser> {
    request.extensions().get::<AuthenticatedUser>().cloned()
}

/// Paths served without a bearer token
const PUBLIC_PATHS: &[&str] = &[
    "/campus.auth.AuthService/SignUp",
    "/campus.auth.AuthService/Login",
    "/campus.auth.AuthService/ValidateToken",
    "/campus.items.ItemsService/ListItems",
    "/campus.items.ItemsService/GetItem",
    "/campus.events.EventsService/ListEvents",
    "/campus.events.EventsService/GetEvent",
    "/campus.events.EventsService/ExportEventIcs",
    "/grpc.health.v1.Health/Check",
    "/grpc.health.v1.Health/Watch",
    "/grpc.reflection.v1.ServerReflection/ServerReflectionInfo",
    "/grpc.reflection.v1alpha.ServerReflection/ServerReflectionInfo",
];

pub fn is_public_path(path: &str) -> bool {
    PUBLIC_PATHS.iter().any(|p| path == *p)
}

fn bearer_token(value: &str) -> Option<&str> {
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[derive(Clone)]
pub struct AuthLayer {
    pool: PgPool,
    jwt_secret: String,
}

impl AuthLayer {
    pub fn new(pool: PgPool, jwt_secret: String) -> Self {
        Self { pool, jwt_secret }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthMiddleware {
            inner,
            pool: self.pool.clone(),
            jwt_secret: self.jwt_secret.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AuthMiddleware<S> {
    inner: S,
    pool: PgPool,
    jwt_secret: String,
}

/// Decides what a request carrying a valid token for `user_id` gets, given the
/// role lookup. Public paths never fail here: they fall back to anonymous.
fn admit(
    public: bool,
    user_id: Uuid,
    lookup: AppResult<Option<Role>>,
) -> Result<Option<AuthenticatedUser>, Status> {
    match lookup {
        Ok(Some(role)) => Ok(Some(AuthenticatedUser { user_id, role })),
        Ok(None) => {
            tracing::warn!("Token for unknown user {}", user_id);
            if public {
                Ok(None)
            } else {
                Err(Status::unauthenticated("Account no longer exists"))
            }
        }
        Err(e) => {
            tracing::error!("Failed to load role for user {}: {}", user_id, e);
            if public {
                Ok(None)
            } else {
                Err(Status::internal("Failed to verify account"))
            }
        }
    }
}

type BoxBody = UnsyncBoxBody<bytes::Bytes, Status>;

fn grpc_status_response(status: Status) -> HttpResponse<BoxBody> {
    let code = status.code() as i32;
    let message = status.message().to_string();

    let mut response = HttpResponse::new(UnsyncBoxBody::default());
    response.headers_mut().insert(
        "content-type",
        HeaderValue::from_static("application/grpc"),
    );
    response
        .headers_mut()
        .insert("grpc-status", HeaderValue::from(code));
    if !message.is_empty() {
        if let Ok(val) = HeaderValue::from_str(&message) {
            response.headers_mut().insert("grpc-message", val);
        }
    }
    response
}

impl<S, ReqBody> Service<HttpRequest<ReqBody>> for AuthMiddleware<S>
where
    S: Service<HttpRequest<ReqBody>, Response = HttpResponse<BoxBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = HttpResponse<BoxBody>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: HttpRequest<ReqBody>) -> Self::Future {
        let mut inner = self.inner.clone();
        std::mem::swap(&mut self.inner, &mut inner);

        let pool = self.pool.clone();
        let jwt_secret = self.jwt_secret.clone();

        Box::pin(async move {
            let path = req.uri().path().to_string();
            let public = is_public_path(&path);

            let claims = req
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(bearer_token)
                .and_then(|token| decode_token(token, &jwt_secret).ok());

            let Some(claims) = claims else {
                if public {
                    return inner.call(req).await;
                }
                return Ok(grpc_status_response(Status::unauthenticated(
                    "Authentication required",
                )));
            };

            let Ok(user_id) = Uuid::parse_str(&claims.sub) else {
                if public {
                    return inner.call(req).await;
                }
                return Ok(grpc_status_response(Status::unauthenticated(
                    "Malformed token subject",
                )));
            };

            // The role is read from the database so demotions apply immediately.
            let lookup = users::current_role(&pool, user_id).await;
            match admit(public, user_id, lookup) {
                Ok(Some(user)) => {
                    req.extensions_mut().insert(user);
                }
                Ok(None) => {}
                Err(status) => return Ok(grpc_status_response(status)),
            }

            inner.call(req).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[test]
    fn test_public_paths() {
        assert!(is_public_path("/campus.auth.AuthService/Login"));
        assert!(is_public_path("/campus.items.ItemsService/ListItems"));
        assert!(is_public_path("/campus.events.EventsService/GetEvent"));
        assert!(!is_public_path("/campus.events.EventsService/Rsvp"));
        assert!(!is_public_path("/campus.items.ItemsService/UpdateClaimStatus"));
        assert!(!is_public_path("/campus.schedules.SchedulesService/FindFreeSlots"));
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token("Bearer abc.def"), Some("abc.def"));
        assert_eq!(bearer_token("bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("Basic abc"), None);
    }

    #[derive(Clone)]
    struct Echo;

    impl Service<HttpRequest<()>> for Echo {
        type Response = HttpResponse<BoxBody>;
        type Error = std::convert::Infallible;
        type Future = std::future::Ready<Result<Self::Response, Self::Error>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: HttpRequest<()>) -> Self::Future {
            let mut response = HttpResponse::new(UnsyncBoxBody::default());
            response
                .headers_mut()
                .insert("x-reached", HeaderValue::from_static("1"));
            std::future::ready(Ok(response))
        }
    }

    fn middleware() -> AuthMiddleware<Echo> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/campus_unused")
            .unwrap();
        AuthLayer::new(pool, "test-secret".to_string()).layer(Echo)
    }

    fn request(path: &str) -> HttpRequest<()> {
        HttpRequest::builder().uri(path).body(()).unwrap()
    }

    #[tokio::test]
    async fn test_public_path_passes_without_token() {
        let response = middleware()
            .call(request("/campus.items.ItemsService/ListItems"))
            .await
            .unwrap();
        assert!(response.headers().get("x-reached").is_some());
    }

    #[tokio::test]
    async fn test_private_path_rejected_without_token() {
        let response = middleware()
            .call(request("/campus.items.ItemsService/UpdateClaimStatus"))
            .await
            .unwrap();
        assert!(response.headers().get("x-reached").is_none());
        assert_eq!(response.headers().get("grpc-status").unwrap(), "16");
    }

    #[tokio::test]
    async fn test_private_path_rejected_with_forged_token() {
        let mut req = request("/campus.schedules.SchedulesService/FindFreeSlots");
        req.headers_mut().insert(
            "authorization",
            HeaderValue::from_static("Bearer not.a.jwt"),
        );
        let response = middleware().call(req).await.unwrap();
        assert!(response.headers().get("x-reached").is_none());
        assert_eq!(response.headers().get("grpc-status").unwrap(), "16");
    }

    #[test]
    fn test_admit_known_user() {
        let id = Uuid::new_v4();
        for public in [true, false] {
            let user = admit(public, id, Ok(Some(Role::Faculty))).unwrap().unwrap();
            assert_eq!(user.user_id, id);
            assert_eq!(user.role, Role::Faculty);
        }
    }

    #[test]
    fn test_admit_deleted_account_on_public_path_is_anonymous() {
        let user = admit(true, Uuid::new_v4(), Ok(None)).unwrap();
        assert!(user.is_none());
    }

    #[test]
    fn test_admit_deleted_account_on_private_path_is_rejected() {
        let status = admit(false, Uuid::new_v4(), Ok(None)).unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unauthenticated);
    }

    #[test]
    fn test_admit_lookup_failure() {
        let failed = || Err(AppError::Internal("pool closed".to_string()));
        assert!(admit(true, Uuid::new_v4(), failed()).unwrap().is_none());
        let status = admit(false, Uuid::new_v4(), failed()).unwrap_err();
        assert_eq!(status.code(), tonic::Code::Internal);
    }

    #[tokio::test]
    async fn test_public_path_passes_with_malformed_subject() {
        let token = jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &crate::services::auth_service::Claims {
                sub: "not-a-uuid".to_string(),
                role: "student".to_string(),
                exp: chrono::Utc::now().timestamp() + 3600,
                iat: chrono::Utc::now().timestamp(),
            },
            &jsonwebtoken::EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();
        let mut req = request("/campus.events.EventsService/ListEvents");
        req.headers_mut().insert(
            "authorization",
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        let response = middleware().call(req).await.unwrap();
        assert!(response.headers().get("x-reached").is_some());
    }

    #[test]
    fn test_grpc_status_response_headers() {
        let response = grpc_status_response(Status::unauthenticated("Authentication required"));
        let headers = response.headers();
        assert_eq!(headers.get("grpc-status").unwrap(), "16");
        assert_eq!(headers.get("grpc-message").unwrap(), "Authentication required");
    }
}
