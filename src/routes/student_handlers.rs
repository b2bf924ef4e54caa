use axum::{Extension, Json, debug_handler, extract::State, http::StatusCode};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::{
    auth::CurrentStudent,
    error::{AppError, AppResult},
    model::Student,
    routes::{
        ApiResponse,
        extract::{AppJson, AppPath, AppQuery},
    },
    service::UpdateStudentInput,
    state::AppState,
};

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListQuery {
    /// Page size, defaults to 20 and is capped at 100
    pub limit: Option<i64>,
    /// Number of students to skip
    pub offset: Option<i64>,
}

fn ensure_owner(current: CurrentStudent, id: i64) -> AppResult<()> {
    if current.0 == id {
        Ok(())
    } else {
        Err(AppError::Forbidden("Students may only modify their own record"))
    }
}

/// List students
#[debug_handler]
#[utoipa::path(
    get,
    tag = "students",
    path = "/students",
    params(ListQuery),
    responses(
        (status = OK, body = ApiResponse<Vec<Student>>),
        (status = BAD_REQUEST, description = "Invalid paging parameters"),
        (status = UNAUTHORIZED, description = "Unauthorized")
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_students(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<ListQuery>,
) -> AppResult<Json<ApiResponse<Vec<Student>>>> {
    let students = state.service.students(query.limit, query.offset).await?;
    Ok(Json(ApiResponse::ok(students)))
}

/// The authenticated student
#[debug_handler]
#[utoipa::path(
    get,
    tag = "students",
    path = "/students/me",
    responses(
        (status = OK, body = ApiResponse<Student>),
        (status = UNAUTHORIZED, description = "Unauthorized"),
        (status = NOT_FOUND, description = "Student no longer exists")
    ),
    security(("bearer_auth" = []))
)]
pub async fn me(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentStudent>,
) -> AppResult<Json<ApiResponse<Student>>> {
    let student = state.service.student(current.0).await?;
    Ok(Json(ApiResponse::ok(student)))
}

/// Fetch one student
#[debug_handler]
#[utoipa::path(
    get,
    tag = "students",
    path = "/students/{id}",
    params(("id" = i64, Path, description = "Student id")),
    responses(
        (status = OK, body = ApiResponse<Student>),
        (status = UNAUTHORIZED, description = "Unauthorized"),
        (status = NOT_FOUND, description = "Student not found")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_student(
    State(state): State<AppState>,
    AppPath(id): AppPath<i64>,
) -> AppResult<Json<ApiResponse<Student>>> {
    let student = state.service.student(id).await?;
    Ok(Json(ApiResponse::ok(student)))
}

/// Update the caller's own record
#[debug_handler]
#[utoipa::path(
    put,
    tag = "students",
    path = "/students/{id}",
    params(("id" = i64, Path, description = "Student id")),
    request_body = UpdateStudentInput,
    responses(
        (status = OK, body = ApiResponse<Student>),
        (status = BAD_REQUEST, description = "Invalid input"),
        (status = UNAUTHORIZED, description = "Unauthorized"),
        (status = FORBIDDEN, description = "Not the caller's record"),
        (status = CONFLICT, description = "Email already registered")
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_student(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentStudent>,
    AppPath(id): AppPath<i64>,
    AppJson(input): AppJson<UpdateStudentInput>,
) -> AppResult<Json<ApiResponse<Student>>> {
    ensure_owner(current, id)?;
    let student = state.service.update_student(id, input).await?;
    Ok(Json(ApiResponse::ok(student)))
}

/// Delete the caller's own record
#[debug_handler]
#[utoipa::path(
    delete,
    tag = "students",
    path = "/students/{id}",
    params(("id" = i64, Path, description = "Student id")),
    responses(
        (status = NO_CONTENT, description = "Deleted"),
        (status = UNAUTHORIZED, description = "Unauthorized"),
        (status = FORBIDDEN, description = "Not the caller's record")
    ),
    security(("bearer_auth" = []))
)]
pub async fn delete_student(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentStudent>,
    AppPath(id): AppPath<i64>,
) -> AppResult<StatusCode> {
    ensure_owner(current, id)?;
    state.service.delete_student(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
