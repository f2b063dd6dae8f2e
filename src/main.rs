//! Survey Builder - compose LimeSurvey questionnaires from a GraphDB
//! knowledge graph.
//!
//! The server fronts two external systems: a GraphDB triple store holding
//! survey metadata and a LimeSurvey installation reachable over its
//! RemoteControl API. Query results are classified and materialized into
//! an in-memory model, which the user then exports or pushes to
//! LimeSurvey as a new survey.

mod columns;
mod config;
mod export;
mod graphdb;
mod limesurvey;
mod lsq;
mod materialize;
mod model;
mod sparql;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use config::{GraphDbUpdate, LimeSurveyUpdate, SettingsStore};
use graphdb::GraphDbClient;
use limesurvey::{push_survey, LimeSurveyClient};
use materialize::{materialize, MaterializeError, MaterializeOptions};
use model::{Group, Question, SurveyModel};
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use sparql::ResultSet;
use std::sync::{Arc, OnceLock, RwLock};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    model: Arc<RwLock<SurveyModel>>,
    settings: Arc<SettingsStore>,
    graphdb: GraphDbClient,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "survey_builder=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Build application state
    let state = AppState {
        model: Arc::new(RwLock::new(SurveyModel::default())),
        settings: Arc::new(SettingsStore::from_env()),
        graphdb: GraphDbClient::new(),
    };

    // Build router
    let app = Router::new()
        .route("/health", get(health))
        .route("/api/graphdb/repositories", get(list_repositories))
        .route("/api/graphdb/repository/create", post(create_repository))
        .route("/api/graphdb/repository/delete", post(delete_repository))
        .route("/api/graphdb/clear", post(clear_repository))
        .route("/api/graphdb/delete/survey", post(delete_survey_data))
        .route("/api/graphdb/delete/question", post(delete_subject_data))
        .route("/api/graphdb/delete/group", post(delete_subject_data))
        .route("/api/graphdb/query", post(run_query))
        .route("/api/sparql/templates", get(sparql_templates))
        .route("/api/config", post(set_graphdb_config))
        .route("/api/limesurvey/config", post(set_limesurvey_config))
        .route("/api/test", get(test_connection))
        .route("/api/groups", get(get_groups))
        .route("/api/questions", get(get_questions))
        .route("/api/query/load", post(load_query))
        .route("/api/model", get(get_model))
        .route("/api/export/json", post(export_json))
        .route("/api/export/csv", post(export_csv))
        .route("/api/export/results-csv", post(export_results_csv))
        .route("/api/limesurvey/surveys", get(list_limesurvey_surveys))
        .route("/api/limesurvey/create", post(create_limesurvey))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    // Run server
    let listener = tokio::net::TcpListener::bind("0.0.0.0:5005").await?;
    info!("Server listening on http://0.0.0.0:5005");
    axum::serve(listener, app).await?;

    Ok(())
}

fn internal(err: anyhow::Error) -> (StatusCode, String) {
    error!("{:#}", err);
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

fn repo_id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9_-]+$").unwrap())
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

#[derive(Deserialize)]
struct RepositoriesQuery {
    url: Option<String>,
}

/// List repositories on the configured (or an explicitly given) instance.
async fn list_repositories(
    State(state): State<AppState>,
    Query(query): Query<RepositoriesQuery>,
) -> Result<Json<Vec<graphdb::RepositoryInfo>>, (StatusCode, String)> {
    let base_url = query.url.unwrap_or_else(|| state.settings.graphdb().base_url);
    state
        .graphdb
        .list_repositories(&base_url)
        .await
        .map(Json)
        .map_err(internal)
}

#[derive(Deserialize)]
struct CreateRepositoryRequest {
    graphdb_url: Option<String>,
    repo_id: String,
    repo_title: Option<String>,
}

async fn create_repository(
    State(state): State<AppState>,
    Json(req): Json<CreateRepositoryRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    if !repo_id_pattern().is_match(&req.repo_id) {
        return Err((
            StatusCode::BAD_REQUEST,
            format!(
                "Invalid repository id '{}': only lowercase letters, digits, '_' and '-' are allowed",
                req.repo_id
            ),
        ));
    }

    let base_url = req
        .graphdb_url
        .unwrap_or_else(|| state.settings.graphdb().base_url);
    let message = state
        .graphdb
        .create_repository(&base_url, &req.repo_id, req.repo_title.as_deref())
        .await
        .map_err(internal)?;

    Ok(Json(json!({ "status": "success", "message": message })))
}

#[derive(Deserialize)]
struct RepositoryRequest {
    graphdb_url: Option<String>,
    repo_id: String,
    context: Option<String>,
}

async fn delete_repository(
    State(state): State<AppState>,
    Json(req): Json<RepositoryRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let base_url = req
        .graphdb_url
        .unwrap_or_else(|| state.settings.graphdb().base_url);
    state
        .graphdb
        .delete_repository(&base_url, &req.repo_id)
        .await
        .map_err(internal)?;

    Ok(Json(json!({
        "status": "success",
        "message": format!("Repository '{}' deleted", req.repo_id),
    })))
}

async fn clear_repository(
    State(state): State<AppState>,
    Json(req): Json<RepositoryRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let base_url = req
        .graphdb_url
        .unwrap_or_else(|| state.settings.graphdb().base_url);
    state
        .graphdb
        .clear_repository(&base_url, &req.repo_id, req.context.as_deref())
        .await
        .map_err(internal)?;

    let target = match &req.context {
        Some(graph) => format!("named graph '{}'", graph),
        None => format!("repository '{}'", req.repo_id),
    };
    Ok(Json(json!({
        "status": "success",
        "message": format!("Cleared {}", target),
    })))
}

#[derive(Deserialize)]
struct DeleteDataRequest {
    graphdb_url: Option<String>,
    repo_id: Option<String>,
    uri: String,
}

impl DeleteDataRequest {
    fn resolve(&self, state: &AppState) -> (String, String) {
        let settings = state.settings.graphdb();
        (
            self.graphdb_url.clone().unwrap_or(settings.base_url),
            self.repo_id.clone().unwrap_or(settings.repository),
        )
    }
}

/// Drop a survey's named graph from the triple store.
async fn delete_survey_data(
    State(state): State<AppState>,
    Json(req): Json<DeleteDataRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let (base_url, repo_id) = req.resolve(&state);
    state
        .graphdb
        .clear_repository(&base_url, &repo_id, Some(&req.uri))
        .await
        .map_err(internal)?;

    Ok(Json(json!({
        "status": "success",
        "message": format!("Deleted survey data in graph '{}'", req.uri),
    })))
}

/// Remove every triple a single question or group is the subject of.
async fn delete_subject_data(
    State(state): State<AppState>,
    Json(req): Json<DeleteDataRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let (base_url, repo_id) = req.resolve(&state);
    state
        .graphdb
        .delete_subject(&base_url, &repo_id, &req.uri)
        .await
        .map_err(internal)?;

    Ok(Json(json!({
        "status": "success",
        "message": format!("Deleted data for '{}'", req.uri),
    })))
}

#[derive(Deserialize)]
struct QueryRequest {
    repo_id: Option<String>,
    query: String,
}

/// Execute an arbitrary SELECT query and return the raw rows.
async fn run_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<ResultSet>, (StatusCode, String)> {
    let mut settings = state.settings.graphdb();
    if let Some(repo) = req.repo_id {
        settings.repository = repo;
    }
    state
        .graphdb
        .execute_query(&settings, &req.query)
        .await
        .map(Json)
        .map_err(internal)
}

/// Canned queries offered in the query editor.
async fn sparql_templates() -> Json<Vec<sparql::QueryTemplate>> {
    Json(sparql::query_templates())
}

async fn set_graphdb_config(
    State(state): State<AppState>,
    Json(update): Json<GraphDbUpdate>,
) -> Json<serde_json::Value> {
    let settings = state.settings.update_graphdb(update);
    Json(json!({
        "status": "ok",
        "graphdb_url": settings.base_url,
        "repository": settings.repository,
    }))
}

async fn set_limesurvey_config(
    State(state): State<AppState>,
    Json(update): Json<LimeSurveyUpdate>,
) -> Json<config::LimeSurveySettings> {
    Json(state.settings.update_limesurvey(update))
}

/// Connection test with repository statistics.
async fn test_connection(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let settings = state.settings.graphdb();
    match state.graphdb.connection_stats(&settings).await {
        Ok(stats) => Ok(Json(json!({
            "status": "success",
            "connection": "OK",
            "repository": stats.repository,
            "total_triples": stats.total_triples,
            "classes": stats.classes,
        }))),
        Err(e) => {
            error!("Connection test failed: {:#}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                format!(
                    "{}. Check that GraphDB is running and the repository contains data",
                    e
                ),
            ))
        }
    }
}

/// Pre-shaped loader: all groups with their main questions.
async fn get_groups(
    State(state): State<AppState>,
) -> Result<Json<SurveyModel>, (StatusCode, String)> {
    let settings = state.settings.graphdb();
    state
        .graphdb
        .get_all_groups(&settings)
        .await
        .map(Json)
        .map_err(internal)
}

/// Pre-shaped loader: all main questions with children.
async fn get_questions(
    State(state): State<AppState>,
) -> Result<Json<Vec<Question>>, (StatusCode, String)> {
    let settings = state.settings.graphdb();
    state
        .graphdb
        .get_all_questions(&settings)
        .await
        .map(Json)
        .map_err(internal)
}

#[derive(Deserialize)]
struct LoadRequest {
    query: String,
    #[serde(default)]
    roles: columns::RoleMap,
    keep_orphans: Option<bool>,
}

/// Execute a query and rebuild the model from its results. On any failure
/// the previous snapshot stays installed.
async fn load_query(
    State(state): State<AppState>,
    Json(req): Json<LoadRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let settings = state.settings.graphdb();
    let result = state
        .graphdb
        .execute_query(&settings, &req.query)
        .await
        .map_err(internal)?;

    let options = MaterializeOptions {
        roles: req.roles,
        keep_orphans: req.keep_orphans.unwrap_or(true),
    };

    let materialized = materialize(&result, &options).map_err(|e| match e {
        MaterializeError::UnknownShape => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
    })?;

    let group_count = materialized.model.groups.len();
    let question_count = materialized.model.questions.len();
    info!(
        groups = group_count,
        questions = question_count,
        orphans = materialized.model.orphan_questions().len(),
        "model snapshot replaced"
    );
    let response = json!({
        "status": "success",
        "classification": materialized.classification,
        "groups": materialized.model.groups,
        "questions": materialized.model.questions,
        "groupCount": group_count,
        "questionCount": question_count,
        "rowCount": result.rows.len(),
    });

    *state.model.write().unwrap() = materialized.model;
    Ok(Json(response))
}

/// Current model snapshot.
async fn get_model(State(state): State<AppState>) -> Json<SurveyModel> {
    Json(state.model.read().unwrap().clone())
}

#[derive(Deserialize)]
struct ExportRequest {
    #[serde(default = "default_title")]
    title: String,
    #[serde(default)]
    groups: Vec<Group>,
    #[serde(default)]
    questions: Vec<Question>,
}

fn default_title() -> String {
    "Exported Survey".to_string()
}

/// Survey JSON document from the selected groups and questions.
async fn export_json(Json(req): Json<ExportRequest>) -> Json<serde_json::Value> {
    Json(export::survey_json(&req.title, &req.groups, &req.questions))
}

/// LimeSurvey-compatible structure CSV download.
async fn export_csv(
    Json(req): Json<ExportRequest>,
) -> Result<([(header::HeaderName, &'static str); 2], String), (StatusCode, String)> {
    let csv = export::limesurvey_csv(&req.title, &req.groups, &req.questions).map_err(internal)?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"survey_structure.csv\"",
            ),
        ],
        csv,
    ))
}

/// Raw query results as CSV, exactly as shown in the query editor.
async fn export_results_csv(
    Json(result): Json<ResultSet>,
) -> ([(header::HeaderName, &'static str); 2], String) {
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"query_results.csv\"",
            ),
        ],
        result.to_csv(),
    )
}

/// Surveys already present on the LimeSurvey side.
async fn list_limesurvey_surveys(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let client = LimeSurveyClient::new(state.settings.limesurvey());
    let session_key = client.get_session_key().await.map_err(internal)?;
    let surveys = client.list_surveys(&session_key).await;
    if let Err(e) = client.release_session_key(&session_key).await {
        error!("Failed to release session key: {:#}", e);
    }
    surveys.map(Json).map_err(internal)
}

#[derive(Deserialize)]
struct CreateSurveyRequest {
    title: String,
    #[serde(default = "default_language")]
    language: String,
    #[serde(default)]
    groups: Vec<Group>,
    #[serde(default)]
    questions: Vec<Question>,
    #[serde(default)]
    activate: bool,
}

fn default_language() -> String {
    "en".to_string()
}

/// Push the selected groups and questions to LimeSurvey as a new survey.
async fn create_limesurvey(
    State(state): State<AppState>,
    Json(req): Json<CreateSurveyRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    if req.title.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Survey title is required".into()));
    }
    if req.groups.is_empty() && req.questions.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "Select at least one group or question".into(),
        ));
    }

    let client = LimeSurveyClient::new(state.settings.limesurvey());
    let report = push_survey(&client, &req.title, &req.groups, &req.questions, &req.language)
        .await
        .map_err(internal)?;

    if req.activate {
        let session_key = client.get_session_key().await.map_err(internal)?;
        let activated = client.activate_survey(&session_key, report.survey_id).await;
        if let Err(e) = client.release_session_key(&session_key).await {
            error!("Failed to release session key: {:#}", e);
        }
        activated.map_err(internal)?;
    }

    let message = if report.failed_questions.is_empty() {
        format!("Survey '{}' created", req.title)
    } else {
        format!(
            "Survey '{}' created ({}/{} questions imported)",
            req.title, report.imported_questions, report.total_questions
        )
    };

    Ok(Json(json!({
        "status": "success",
        "message": message,
        "report": report,
    })))
}
