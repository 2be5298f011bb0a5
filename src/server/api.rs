use crate::content::{ navigation, section_content };
use crate::models::chat::Section;
use axum::{
    extract::Path,
    http::StatusCode,
    response::{ IntoResponse, Response },
    routing::get,
    Json,
    Router,
};
use log::{ error, info };
use serde::Serialize;
use std::error::Error;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::{ Any, CorsLayer };

#[derive(Serialize)]
struct ApiError {
    error: String,
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
}

pub fn router() -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/navigation", get(navigation_handler))
        .route("/api/sections/{section}", get(section_handler))
        .layer(cors)
}

pub async fn start_http_server(http_port: u16) -> Result<(), Box<dyn Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], http_port));
    let listener = TcpListener::bind(addr).await.map_err(|e|
        format!("Failed to bind HTTP API to {}: {}", addr, e)
    )?;
    info!("HTTP API listening on: http://{}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router()).await {
            error!("HTTP server error: {}", e);
        }
    });
    Ok(())
}

async fn health_handler() -> Json<Health> {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn navigation_handler() -> impl IntoResponse {
    Json(navigation())
}

async fn section_handler(Path(name): Path<String>) -> Response {
    let content = name.parse::<Section>().ok().and_then(section_content);
    match content {
        Some(content) => (StatusCode::OK, Json(content)).into_response(),
        None =>
            (
                StatusCode::NOT_FOUND,
                Json(ApiError {
                    error: format!("No static content for section '{}'", name),
                }),
            ).into_response(),
    }
}
