use std::net::SocketAddr;

use campus_connect::config::Config;
use campus_connect::db::{create_pool, users, RetryConfig};
use campus_connect::middleware::AuthLayer;
use campus_connect::proto::auth::auth_service_server::AuthServiceServer;
use campus_connect::proto::events::events_service_server::EventsServiceServer;
use campus_connect::proto::health::health_server::HealthServer;
use campus_connect::proto::items::items_service_server::ItemsServiceServer;
use campus_connect::proto::notifications::notifications_service_server::NotificationsServiceServer;
use campus_connect::proto::schedules::schedules_service_server::SchedulesServiceServer;
use campus_connect::proto::users::users_service_server::UsersServiceServer;
use campus_connect::services::{
    AuthServiceImpl, EventsServiceImpl, HealthServiceImpl, ItemsServiceImpl,
    NotificationsServiceImpl, SchedulesServiceImpl, UsersServiceImpl,
};

use tonic::transport::Server;
use tonic_reflection::server::Builder as ReflectionBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Include file descriptor for gRPC reflection
pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("campus_descriptor");

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "campus_connect=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()
        .map_err(|e| format!("Failed to load configuration (DATABASE_URL, JWT_SECRET): {}", e))?;

    tracing::info!("Starting campus-connect gRPC server...");
    tracing::info!("Connecting to database...");

    let pool = create_pool(&config.database_url, config.db_max_connections).await?;
    tracing::info!("Database connection established");

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Migrations applied");

    if let Some(ref email) = config.bootstrap_admin_email {
        if users::promote_to_admin(&pool, email).await? {
            tracing::info!("Bootstrap admin: {} has the admin role", email);
        } else {
            tracing::warn!("Bootstrap admin: no account registered as {}", email);
        }
    }

    let retry = RetryConfig::with_max_attempts(config.tx_max_attempts);

    // Create services
    let auth_service = AuthServiceImpl::new(
        pool.clone(),
        config.jwt_secret.clone(),
        config.token_ttl_hours,
    );
    let items_service = ItemsServiceImpl::new(pool.clone(), retry.clone());
    let schedules_service = SchedulesServiceImpl::new(pool.clone(), retry.clone());
    let events_service = EventsServiceImpl::new(pool.clone(), retry);
    let notifications_service = NotificationsServiceImpl::new(pool.clone());
    let users_service = UsersServiceImpl::new(pool.clone());
    let health_service = HealthServiceImpl::new(pool.clone());

    // CORS layer for gRPC-Web
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods(Any)
        .expose_headers(Any);

    let reflection_service = ReflectionBuilder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    let addr: SocketAddr = config.server_addr().parse()?;
    tracing::info!("Listening on {}", addr);

    // Build and run server with gRPC-Web support
    Server::builder()
        .accept_http1(true) // Required for gRPC-Web
        .layer(TraceLayer::new_for_grpc())
        .layer(cors)
        .layer(tonic_web::GrpcWebLayer::new())
        .layer(AuthLayer::new(pool.clone(), config.jwt_secret.clone()))
        .add_service(reflection_service)
        .add_service(AuthServiceServer::new(auth_service))
        .add_service(ItemsServiceServer::new(items_service))
        .add_service(SchedulesServiceServer::new(schedules_service))
        .add_service(EventsServiceServer::new(events_service))
        .add_service(NotificationsServiceServer::new(notifications_service))
        .add_service(UsersServiceServer::new(users_service))
        .add_service(HealthServer::new(health_service))
        .serve(addr)
        .await?;

    Ok(())
}
