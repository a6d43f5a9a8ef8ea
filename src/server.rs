//! JSON API consumed by the dashboard front end.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::analytics;
use crate::error::StoreError;
use crate::models::{
    GradeDistribution, NewStudent, OverviewStats, SearchFilter, StudentPatch, StudentRecord,
    SubjectPerformance,
};
use crate::seed;
use crate::store::StudentStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StudentStore>,
}

#[derive(Debug)]
enum ApiError {
    BadRequest(&'static str),
    Validation(Vec<String>),
    NotFound,
    Internal(&'static str),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, json!({ "message": message }))
            }
            ApiError::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                json!({ "message": "Validation error", "errors": errors }),
            ),
            ApiError::NotFound => (
                StatusCode::NOT_FOUND,
                json!({ "message": "Student not found" }),
            ),
            ApiError::Internal(message) => {
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "message": message }))
            }
        };
        (status, Json(body)).into_response()
    }
}

/// Maps a store failure onto a response; `failure` is the 500 message.
fn store_error(err: StoreError, failure: &'static str) -> ApiError {
    match err {
        StoreError::DuplicateStudentId(_) => ApiError::BadRequest("Student ID already exists"),
        StoreError::InvalidMetrics(invalid) => ApiError::Validation(vec![invalid.to_string()]),
        StoreError::Database(db_err) => {
            error!(error = %db_err, "{failure}");
            ApiError::Internal(failure)
        }
    }
}

fn parse_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest("Invalid student ID"))
}

async fn list_students(
    State(state): State<AppState>,
) -> Result<Json<Vec<StudentRecord>>, ApiError> {
    let students = state
        .store
        .all()
        .await
        .map_err(|e| store_error(e, "Failed to fetch students"))?;
    Ok(Json(students))
}

async fn search_students(
    State(state): State<AppState>,
    Query(filter): Query<SearchFilter>,
) -> Result<Json<Vec<StudentRecord>>, ApiError> {
    let students = state
        .store
        .search(&filter)
        .await
        .map_err(|e| store_error(e, "Failed to search students"))?;
    Ok(Json(students))
}

async fn get_student(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<StudentRecord>, ApiError> {
    let id = parse_id(&raw_id)?;
    state
        .store
        .get(id)
        .await
        .map_err(|e| store_error(e, "Failed to fetch student"))?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

async fn create_student(
    State(state): State<AppState>,
    body: Result<Json<NewStudent>, JsonRejection>,
) -> Result<(StatusCode, Json<StudentRecord>), ApiError> {
    let Json(student) = body.map_err(|rejection| ApiError::Validation(vec![rejection.body_text()]))?;
    let record = state
        .store
        .create(student)
        .await
        .map_err(|e| store_error(e, "Failed to create student"))?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn update_student(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    body: Result<Json<StudentPatch>, JsonRejection>,
) -> Result<Json<StudentRecord>, ApiError> {
    let id = parse_id(&raw_id)?;
    let Json(patch) = body.map_err(|rejection| ApiError::Validation(vec![rejection.body_text()]))?;
    state
        .store
        .update(id, patch)
        .await
        .map_err(|e| store_error(e, "Failed to update student"))?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

async fn delete_student(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&raw_id)?;
    let removed = state
        .store
        .delete(id)
        .await
        .map_err(|e| store_error(e, "Failed to delete student"))?;
    if removed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound)
    }
}

async fn overview(State(state): State<AppState>) -> Result<Json<OverviewStats>, ApiError> {
    let students = state
        .store
        .all()
        .await
        .map_err(|e| store_error(e, "Failed to fetch overview stats"))?;
    Ok(Json(analytics::overview(&students)))
}

async fn grade_distribution(
    State(state): State<AppState>,
) -> Result<Json<GradeDistribution>, ApiError> {
    let students = state
        .store
        .all()
        .await
        .map_err(|e| store_error(e, "Failed to fetch grade distribution"))?;
    Ok(Json(analytics::grade_distribution(&students)))
}

async fn subject_performance(
    State(state): State<AppState>,
) -> Result<Json<Vec<SubjectPerformance>>, ApiError> {
    const FAILURE: &str = "Failed to fetch subject performance";
    let students = state
        .store
        .all()
        .await
        .map_err(|e| store_error(e, FAILURE))?;
    let baseline = state
        .store
        .latest_snapshot(Utc::now().date_naive())
        .await
        .map_err(|e| store_error(e, FAILURE))?;
    Ok(Json(analytics::subject_performance(
        &students,
        baseline.as_ref().map(|s| &s.averages),
    )))
}

async fn load_sample_data(State(state): State<AppState>) -> Json<serde_json::Value> {
    let created = seed::load_sample_data(state.store.as_ref()).await;
    Json(json!({ "message": "Sample data loaded successfully", "created": created }))
}

pub fn router(store: Arc<dyn StudentStore>) -> Router {
    Router::new()
        .route("/api/students", get(list_students).post(create_student))
        .route("/api/students/search", get(search_students))
        .route(
            "/api/students/{id}",
            get(get_student).put(update_student).delete(delete_student),
        )
        .route("/api/analytics/overview", get(overview))
        .route("/api/analytics/grade-distribution", get(grade_distribution))
        .route("/api/analytics/subject-performance", get(subject_performance))
        .route("/api/load-sample-data", post(load_sample_data))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { store })
}

pub async fn serve(store: Arc<dyn StudentStore>, bind: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(%bind, "dashboard API listening");
    axum::serve(listener, router(store)).await?;
    Ok(())
}
