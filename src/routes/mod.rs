#![allow(clippy::needless_for_each)]
mod auth_handlers;
mod extract;
mod misc_handlers;
mod student_handlers;
use crate::{
    auth::{TokenManager, jwt_auth_middleware},
    config::AppSettings,
    middleware::apply_axum_middleware,
    model::{Student, Tokens},
    service::{RefreshInput, Service, SignInInput, SignUpInput, UpdateStudentInput},
    state::AppState,
};
use axum::{Json, Router, middleware, routing::get};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{OpenApi, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};
use utoipa_scalar::{Scalar, Servable};

/// Response wrapper for API responses
#[derive(ToSchema, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            code: 0,
            msg: None,
            data: Some(data),
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "auth", description = "Sign-up, sign-in and token refresh"),
        (name = "students", description = "Student records"),
    ),
    components(
        schemas(
            misc_handlers::Health,
            Student,
            Tokens,
            SignUpInput,
            SignInInput,
            RefreshInput,
            UpdateStudentInput,
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// HTTP handler layer. Owns the service and the token manager and produces
/// the request router.
#[derive(Debug, Clone)]
pub struct Handler {
    service: Arc<Service>,
    token_manager: Arc<TokenManager>,
}

impl Handler {
    pub fn new(service: Arc<Service>, token_manager: Arc<TokenManager>) -> Self {
        Self {
            service,
            token_manager,
        }
    }

    /// Builds the router with all routes and middleware applied.
    pub fn init(&self, config: &AppSettings) -> Router {
        let state = AppState {
            service: self.service.clone(),
            token_manager: self.token_manager.clone(),
        };
        apply_axum_middleware(build_router(state), &config.server)
    }
}

pub fn build_router(state: AppState) -> Router {
    // route_layer only wraps routes registered before it
    let protected = OpenApiRouter::new()
        .routes(routes!(student_handlers::list_students))
        .routes(routes!(student_handlers::me))
        .routes(routes!(
            student_handlers::get_student,
            student_handlers::update_student,
            student_handlers::delete_student
        ))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            jwt_auth_middleware,
        ));

    let (api_routes, mut openapi) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        // Health endpoints (no auth required)
        .routes(routes!(misc_handlers::ping))
        .routes(routes!(misc_handlers::health))
        .routes(routes!(auth_handlers::sign_up))
        .routes(routes!(auth_handlers::sign_in))
        .routes(routes!(auth_handlers::refresh))
        .merge(protected)
        .split_for_parts();

    openapi.paths.paths = openapi
        .paths
        .paths
        .into_iter()
        .map(|(path, item)| (format!("/api{path}"), item))
        .collect::<utoipa::openapi::path::PathsMap<_, _>>();
    Router::new()
        .nest("/api", api_routes)
        .merge(Scalar::with_url("/api/scalar", openapi.clone()))
        .route("/api/openapi.json", get(|| async move { Json(openapi) }))
        .with_state(state)
}
