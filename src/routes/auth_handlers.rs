use axum::{Json, debug_handler, extract::State, http::StatusCode};

use crate::{
    error::AppResult,
    routes::extract::AppJson,
    model::{Student, Tokens},
    routes::ApiResponse,
    service::{RefreshInput, SignInInput, SignUpInput},
    state::AppState,
};

/// Register a new student
#[debug_handler]
#[utoipa::path(
    post,
    tag = "auth",
    path = "/auth/sign-up",
    request_body = SignUpInput,
    responses(
        (status = CREATED, description = "Student created", body = ApiResponse<Student>),
        (status = BAD_REQUEST, description = "Invalid input"),
        (status = CONFLICT, description = "Email already registered")
    )
)]
pub async fn sign_up(
    State(state): State<AppState>,
    AppJson(input): AppJson<SignUpInput>,
) -> AppResult<(StatusCode, Json<ApiResponse<Student>>)> {
    let student = state.service.sign_up(input).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(student))))
}

/// Exchange email and password for a token pair
#[debug_handler]
#[utoipa::path(
    post,
    tag = "auth",
    path = "/auth/sign-in",
    request_body = SignInInput,
    responses(
        (status = OK, body = ApiResponse<Tokens>),
        (status = UNAUTHORIZED, description = "Invalid email or password")
    )
)]
pub async fn sign_in(
    State(state): State<AppState>,
    AppJson(input): AppJson<SignInInput>,
) -> AppResult<Json<ApiResponse<Tokens>>> {
    let tokens = state.service.sign_in(input).await?;
    Ok(Json(ApiResponse::ok(tokens)))
}

/// Rotate the refresh token and issue a new access token
#[debug_handler]
#[utoipa::path(
    post,
    tag = "auth",
    path = "/auth/refresh",
    request_body = RefreshInput,
    responses(
        (status = OK, body = ApiResponse<Tokens>),
        (status = UNAUTHORIZED, description = "Unknown or expired refresh token")
    )
)]
pub async fn refresh(
    State(state): State<AppState>,
    AppJson(input): AppJson<RefreshInput>,
) -> AppResult<Json<ApiResponse<Tokens>>> {
    let tokens = state.service.refresh_tokens(&input.refresh_token).await?;
    Ok(Json(ApiResponse::ok(tokens)))
}
