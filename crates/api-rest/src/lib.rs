//! # API REST
//!
//! REST API over the pathway core.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (JSON bodies, status codes, CORS)
//!
//! The API is stateless: every request carries the pathway (and criteria) it operates on.

#![warn(rust_2018_idioms)]

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use pathways_core::export::normalize_pathway;
use pathways_core::{
    ActionCqlReport, BundleFormat, Criteria, Pathway, PathwayError, PathwayService,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    service: Arc<PathwayService>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct HealthRes {
    pub status: String,
    pub version: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ErrorRes {
    pub error: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct CreatePathwayReq {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

/// A request carrying one pathway document.
///
/// The pathway may be an editor document or one written by `/export/pathway`; missing node
/// keys and transition or action ids are restored before use.
#[derive(Serialize, Deserialize, ToSchema)]
pub struct PathwayReq {
    #[schema(value_type = Object)]
    pub pathway: Pathway,
}

#[derive(Clone, Copy, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Yaml,
}

/// A pathway together with the criteria its conditions reference.
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ExportReq {
    #[schema(value_type = Object)]
    pub pathway: Pathway,
    #[serde(default)]
    #[schema(value_type = Vec<Object>)]
    pub criteria: Vec<Criteria>,
    #[serde(default)]
    pub format: ExportFormat,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ValidateRes {
    pub valid: bool,
    pub issues: Vec<String>,
}

/// Maps core errors onto HTTP responses.
pub struct ApiError(PathwayError);

impl From<PathwayError> for ApiError {
    fn from(err: PathwayError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PathwayError::FileRead(_)
            | PathwayError::Serialization(_)
            | PathwayError::IdAllocation(_)
            | PathwayError::Fhir(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNPROCESSABLE_ENTITY,
        };
        if status.is_server_error() {
            tracing::error!("Request failed: {:?}", self.0);
        } else {
            tracing::debug!("Rejected pathway: {}", self.0);
        }
        (
            status,
            Json(ErrorRes {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        create_pathway,
        validate_pathway,
        export_cpg,
        export_camino,
        export_pathway,
        action_cql,
    ),
    components(schemas(
        HealthRes,
        ErrorRes,
        CreatePathwayReq,
        PathwayReq,
        ExportFormat,
        ExportReq,
        ValidateRes,
    ))
)]
struct ApiDoc;

/// Build the REST router around `service`.
pub fn router(service: PathwayService) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/pathways", post(create_pathway))
        .route("/pathways/validate", post(validate_pathway))
        .route("/export/cpg", post(export_cpg))
        .route("/export/camino", post(export_camino))
        .route("/export/pathway", post(export_pathway))
        .route("/cql/actions", post(action_cql))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(AppState {
            service: Arc::new(service),
        })
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
async fn health() -> Json<HealthRes> {
    Json(HealthRes {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

#[utoipa::path(
    post,
    path = "/pathways",
    request_body = CreatePathwayReq,
    responses(
        (status = 201, description = "New pathway holding only the Start node", content_type = "application/json"),
        (status = 422, description = "Blank name or malformed id", body = ErrorRes)
    )
)]
/// Create a new pathway document. Nothing is stored.
async fn create_pathway(
    State(state): State<AppState>,
    Json(req): Json<CreatePathwayReq>,
) -> Result<(StatusCode, Json<Pathway>), ApiError> {
    let pathway = state
        .service
        .create(&req.name, req.description.as_deref(), req.id.as_deref())?;
    Ok((StatusCode::CREATED, Json(pathway)))
}

#[utoipa::path(
    post,
    path = "/pathways/validate",
    request_body = PathwayReq,
    responses(
        (status = 200, description = "Structural problems found in the pathway", body = ValidateRes)
    )
)]
async fn validate_pathway(
    State(state): State<AppState>,
    Json(req): Json<PathwayReq>,
) -> Result<Json<ValidateRes>, ApiError> {
    let pathway = normalize_pathway(req.pathway)?;
    let issues = state.service.validate(&pathway);
    Ok(Json(ValidateRes {
        valid: issues.is_empty(),
        issues,
    }))
}

#[utoipa::path(
    post,
    path = "/export/cpg",
    request_body = ExportReq,
    responses(
        (status = 200, description = "CPG transaction bundle", content_type = "application/fhir+json"),
        (status = 422, description = "Pathway cannot be exported", body = ErrorRes)
    )
)]
/// Compile a pathway into a FHIR transaction bundle, as JSON or YAML.
async fn export_cpg(
    State(state): State<AppState>,
    Json(req): Json<ExportReq>,
) -> Result<Response, ApiError> {
    let (format, content_type) = match req.format {
        ExportFormat::Json => (BundleFormat::Json, "application/fhir+json"),
        ExportFormat::Yaml => (BundleFormat::Yaml, "application/yaml"),
    };
    let pathway = normalize_pathway(req.pathway)?;
    let body = state.service.render_cpg(&pathway, &req.criteria, format)?;
    Ok(([(header::CONTENT_TYPE, content_type)], body).into_response())
}

#[utoipa::path(
    post,
    path = "/export/camino",
    request_body = ExportReq,
    responses(
        (status = 200, description = "Pathway with condition libraries embedded", content_type = "application/json"),
        (status = 422, description = "Pathway cannot be exported", body = ErrorRes)
    )
)]
async fn export_camino(
    State(state): State<AppState>,
    Json(req): Json<ExportReq>,
) -> Result<Json<Pathway>, ApiError> {
    let pathway = normalize_pathway(req.pathway)?;
    Ok(Json(state.service.export_camino(&pathway, &req.criteria)?))
}

#[utoipa::path(
    post,
    path = "/export/pathway",
    request_body = PathwayReq,
    responses(
        (status = 200, description = "Standalone pathway document with combined ELM", content_type = "application/json"),
        (status = 422, description = "Pathway cannot be exported", body = ErrorRes)
    )
)]
async fn export_pathway(
    State(state): State<AppState>,
    Json(req): Json<PathwayReq>,
) -> Result<Response, ApiError> {
    let pathway = normalize_pathway(req.pathway)?;
    let body = state.service.export_pathway(&pathway)?;
    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}

#[utoipa::path(
    post,
    path = "/cql/actions",
    request_body = PathwayReq,
    responses(
        (status = 200, description = "CQL synthesised per action, with the actions that failed", content_type = "application/json")
    )
)]
async fn action_cql(
    State(state): State<AppState>,
    Json(req): Json<PathwayReq>,
) -> Result<Json<ActionCqlReport>, ApiError> {
    let pathway = normalize_pathway(req.pathway)?;
    Ok(Json(state.service.action_cql(&pathway)))
}
