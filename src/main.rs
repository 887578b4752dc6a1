use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderValue, Method},
    middleware,
    middleware::Next,
    routing::{get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use haven_realty::config::AppConfig;
use haven_realty::handlers::{
    auth::{get_profile, login, logout, register},
    enquiries::{
        create_enquiry, create_message, get_enquiry_messages, get_unread_count, list_enquiries,
        mark_enquiry_read, update_enquiry_status,
    },
};
use haven_realty::middleware::{auth_middleware, staff_middleware};
use haven_realty::realtime::realtime_ws;

pub fn create_app(config: AppConfig) -> Router {
    // Default to INFO; override with RUST_LOG for debugging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "haven_realty=info,tower_http=info,sqlx=warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cors_origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(header_val) => Some(header_val),
            Err(e) => {
                tracing::error!("Invalid CORS origin '{}': {}", origin, e);
                None
            }
        })
        .collect();

    tracing::info!("CORS configured with {} allowed origins", cors_origins.len());

    let cors = CorsLayer::new()
        .allow_origin(cors_origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_credentials(true) // Required for httpOnly cookies
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::COOKIE,
        ]);

    Router::new()
        .nest(
            "/api/auth",
            Router::new()
                // Public routes (no auth required)
                .route("/register", post(register))
                .route("/login", post(login))
                // Protected routes (auth required)
                .merge(
                    Router::new()
                        .route("/logout", post(logout))
                        .route("/profile", get(get_profile))
                        .layer(middleware::from_fn_with_state(config.clone(), auth_middleware)),
                ),
        )
        .nest(
            "/api/enquiries",
            Router::new()
                .route("/", post(create_enquiry))
                .route("/", get(list_enquiries))
                .route("/unread-count", get(get_unread_count))
                .route("/:id/messages", get(get_enquiry_messages))
                .route("/:id/messages", post(create_message))
                .route("/:id/read", post(mark_enquiry_read))
                // Staff-only status transitions
                .merge(
                    Router::new()
                        .route("/:id/status", put(update_enquiry_status))
                        .layer(middleware::from_fn(staff_middleware)),
                )
                .layer(middleware::from_fn_with_state(config.clone(), auth_middleware)),
        )
        // Realtime gateway; the handshake authenticates itself
        .route("/api/realtime", get(realtime_ws))
        .layer(ServiceBuilder::new().layer(cors))
        .with_state(config)
        .layer(axum::middleware::from_fn(
            |req: Request<Body>, next: Next| async move {
                tracing::info!("{} {}", req.method(), req.uri());
                let response = next.run(req).await;
                tracing::info!("Response status: {}", response.status());
                response
            },
        ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().await?;

    sqlx::migrate!("./migrations").run(&config.database_pool).await?;

    let addr = config.server_address();
    let app = create_app(config);

    tracing::info!("Starting Haven Realty server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
