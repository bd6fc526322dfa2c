use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use log::warn;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::normalize_path::{NormalizePath, NormalizePathLayer};
use tower::Layer;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::extraction::ListingAnalyzer;
use crate::notifications::MatchQueue;
use crate::{accounts, analyze, auth, gig, item, wanted};

// Room for multipart boundaries and the other form fields.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pool: DbPool,
    pub analyzer: Option<Arc<dyn ListingAnalyzer>>,
    pub matches: MatchQueue,
}

async fn index() -> Json<serde_json::Value> {
    Json(json!({
        "message": "Campus marketplace API is running.",
        "endpoints": {
            "register": "/api/register",
            "profile": "/api/profile",
            "items": "/api/items",
            "wanted_items": "/api/wanted-items",
            "gigs": "/api/gigs",
            "analyze_image": "/api/analyze-image",
        },
    }))
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    match config.cors_allowed_origin.as_deref() {
        None => CorsLayer::permissive(),
        Some(origin) => match origin.parse::<HeaderValue>() {
            Ok(origin) => CorsLayer::new()
                .allow_origin(origin)
                .allow_methods(Any)
                .allow_headers(Any),
            Err(e) => {
                warn!("Ignoring invalid CORS_ALLOWED_ORIGIN {:?}: {}", origin, e);
                CorsLayer::new()
            }
        },
    }
}

pub fn build_router(state: AppState) -> Router {
    let image_limit = state.config.max_image_bytes + MULTIPART_OVERHEAD_BYTES;

    let api = Router::new()
        .route("/register", post(accounts::register))
        .route("/profile", get(accounts::get_profile).patch(accounts::update_profile))
        .route("/items", get(item::list_items).post(item::create_item))
        .route(
            "/items/:id",
            get(item::get_item)
                .put(item::replace_item)
                .patch(item::update_item)
                .delete(item::delete_item),
        )
        .route("/wanted-items", get(wanted::list_wanted).post(wanted::create_wanted))
        .route(
            "/wanted-items/:id",
            get(wanted::get_wanted)
                .put(wanted::replace_wanted)
                .patch(wanted::update_wanted)
                .delete(wanted::delete_wanted),
        )
        .route("/gigs", get(gig::list_gigs).post(gig::create_gig))
        .route(
            "/gigs/:id",
            get(gig::get_gig)
                .put(gig::replace_gig)
                .patch(gig::update_gig)
                .delete(gig::delete_gig),
        )
        .route(
            "/analyze-image",
            post(analyze::analyze_image).layer(DefaultBodyLimit::max(image_limit)),
        )
        .layer(middleware::from_fn_with_state(state.clone(), auth::authenticate));

    Router::new()
        .route("/", get(index))
        .nest("/api", api)
        .layer(cors_layer(&state.config))
        .with_state(state)
}

/// The router wrapped so `/api/items/` and `/api/items` reach the same handler.
pub fn build_service(state: AppState) -> NormalizePath<Router> {
    NormalizePathLayer::trim_trailing_slash().layer(build_router(state))
}
