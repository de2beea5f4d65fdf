pub mod auth;
pub mod logs;
pub mod state;

use crate::application::use_cases::schema_docs::render_markdown;
use crate::domain::connection::ConnectionConfig;
use crate::domain::db_kind::DbKind;
use crate::domain::error::{AppError, Result};
use crate::domain::role::Permission;
use actix_cors::Cors;
use actix_web::{
    delete, dev::Server, get, post, web, App, HttpRequest, HttpResponse, HttpServer,
};
use auth::authorize;
use logs::add_log;
use serde::Deserialize;
use serde_json::json;
use state::AppState;
use std::sync::Arc;
use validator::Validate;

const INDEX_HTML: &str = include_str!("../../../static/index.html");
const HELP_HTML: &str = include_str!("../../../static/help.html");

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    #[serde(rename = "type")]
    pub db_type: String,
    #[serde(default)]
    pub config: ConnectionConfig,
}

impl ConnectRequest {
    fn kind(&self) -> Result<DbKind> {
        self.db_type.parse()
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct AskRequest {
    #[validate(length(max = 4000, message = "Prompt must be at most 4000 characters"))]
    pub prompt: String,
    #[serde(default)]
    pub connection_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SchemaQuery {
    #[serde(default)]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub refresh: bool,
    #[serde(default)]
    pub format: Option<String>,
}

fn html(body: &'static str) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(body)
}

#[get("/")]
async fn index() -> HttpResponse {
    html(INDEX_HTML)
}

#[get("/help")]
async fn help() -> HttpResponse {
    html(HELP_HTML)
}

#[get("/health")]
async fn health(data: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "connections": data.connections.count().await,
    }))
}

#[post("/connect")]
async fn connect(
    data: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<ConnectRequest>,
) -> Result<HttpResponse> {
    let principal = authorize(&req, &data.config.auth, Permission::Connect)?;
    let kind = body.kind()?;

    add_log(
        &data.logs,
        "INFO",
        "HttpApi",
        &format!(
            "{} connecting to {} ({})",
            principal.name,
            kind,
            body.config.display_label(kind)
        ),
    );

    match data.connections.connect(kind, &body.config).await {
        Ok(info) => Ok(HttpResponse::Ok().json(json!({
            "db_type": info.db_type,
            "status": "connected",
            "connection_id": info.id,
        }))),
        Err(e) => {
            add_log(&data.logs, "ERROR", "HttpApi", &format!("Connect failed: {}", e));
            Err(e)
        }
    }
}

#[post("/connections/test")]
async fn test_connection(
    data: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<ConnectRequest>,
) -> Result<HttpResponse> {
    authorize(&req, &data.config.auth, Permission::Connect)?;
    let kind = body.kind()?;
    let result = data.connections.test_connection(kind, &body.config).await;

    add_log(
        &data.logs,
        if result.success { "INFO" } else { "WARN" },
        "HttpApi",
        &format!("Connection test for {}: {}", kind, result.message),
    );
    Ok(HttpResponse::Ok().json(result))
}

#[get("/connections")]
async fn list_connections(data: web::Data<AppState>, req: HttpRequest) -> Result<HttpResponse> {
    authorize(&req, &data.config.auth, Permission::ViewSchema)?;
    Ok(HttpResponse::Ok().json(json!({
        "active": data.connections.active_id().await,
        "connections": data.connections.list().await,
    })))
}

#[delete("/connections/{id}")]
async fn disconnect(
    data: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    authorize(&req, &data.config.auth, Permission::Connect)?;
    let id = path.into_inner();
    data.connections.disconnect(&id).await?;

    add_log(&data.logs, "INFO", "HttpApi", &format!("Disconnected {}", id));
    Ok(HttpResponse::Ok().json(json!({
        "status": "disconnected",
        "connection_id": id,
    })))
}

#[post("/query")]
async fn query(
    data: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<AskRequest>,
) -> Result<HttpResponse> {
    let principal = authorize(&req, &data.config.auth, Permission::Query)?;
    body.validate()
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    add_log(
        &data.logs,
        "INFO",
        "HttpApi",
        &format!("{} asked: {}", principal.name, body.prompt.trim()),
    );

    match data
        .ask_use_case
        .execute(&principal, &body.prompt, body.connection_id.as_deref())
        .await
    {
        Ok(response) => {
            add_log(
                &data.logs,
                "INFO",
                "HttpApi",
                &format!(
                    "Returned {} rows from {}{}",
                    response.row_count,
                    response.db_type,
                    if response.truncated { " (truncated)" } else { "" }
                ),
            );
            Ok(HttpResponse::Ok().json(response))
        }
        Err(e) => {
            add_log(&data.logs, "ERROR", "HttpApi", &format!("Query failed: {}", e));
            Err(e)
        }
    }
}

#[get("/schema")]
async fn schema(
    data: web::Data<AppState>,
    req: HttpRequest,
    params: web::Query<SchemaQuery>,
) -> Result<HttpResponse> {
    authorize(&req, &data.config.auth, Permission::ViewSchema)?;
    let connection = data
        .connections
        .resolve(params.connection_id.as_deref())
        .await?;
    let snapshot = data
        .connections
        .schema_snapshot(&connection, params.refresh)
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "connection_id": connection.info.id,
        "db_type": connection.info.db_type,
        "schema": snapshot,
    })))
}

#[get("/schema/docs")]
async fn schema_docs(
    data: web::Data<AppState>,
    req: HttpRequest,
    params: web::Query<SchemaQuery>,
) -> Result<HttpResponse> {
    authorize(&req, &data.config.auth, Permission::ViewSchema)?;
    let doc = data
        .schema_docs_use_case
        .document(params.connection_id.as_deref(), params.refresh)
        .await?;

    match params.format.as_deref().map(str::to_lowercase).as_deref() {
        None | Some("json") => Ok(HttpResponse::Ok().json(doc)),
        Some("markdown") | Some("md") => Ok(HttpResponse::Ok()
            .content_type("text/markdown; charset=utf-8")
            .body(render_markdown(&doc))),
        Some(other) => Err(AppError::ValidationError(format!(
            "Unsupported format '{}', expected json or markdown",
            other
        ))),
    }
}

#[get("/api/logs")]
async fn get_logs(data: web::Data<AppState>, req: HttpRequest) -> Result<HttpResponse> {
    authorize(&req, &data.config.auth, Permission::ViewLogs)?;
    Ok(HttpResponse::Ok().json(data.logs.snapshot()))
}

#[get("/api/models")]
async fn list_models(data: web::Data<AppState>, req: HttpRequest) -> Result<HttpResponse> {
    authorize(&req, &data.config.auth, Permission::ListModels)?;
    match data.llm_client.list_models(&data.config.llm).await {
        Ok(models) => Ok(HttpResponse::Ok().json(models)),
        Err(e) => {
            add_log(
                &data.logs,
                "ERROR",
                "HttpApi",
                &format!("Failed to list models: {}", e),
            );
            Err(e)
        }
    }
}

/// Routes plus extractor error handlers that answer with `{"error": …}`
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _| AppError::ValidationError(err.to_string()).into()),
    )
    .app_data(
        web::QueryConfig::default()
            .error_handler(|err, _| AppError::ValidationError(err.to_string()).into()),
    )
    .service(index)
    .service(help)
    .service(health)
    .service(connect)
    .service(test_connection)
    .service(list_connections)
    .service(disconnect)
    .service(query)
    .service(schema)
    .service(schema_docs)
    .service(get_logs)
    .service(list_models);
}

fn cors(origins: &[String]) -> Cors {
    if origins.is_empty() {
        return Cors::permissive();
    }
    origins
        .iter()
        .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
        .allow_any_method()
        .allow_any_header()
        .max_age(3600)
}

pub fn start_server(state: Arc<AppState>) -> std::io::Result<Server> {
    let settings = state.config.server.clone();
    let data = web::Data::from(state);

    let origins = settings.cors_origins.clone();
    let mut server = HttpServer::new(move || {
        App::new()
            .wrap(cors(&origins))
            .app_data(data.clone())
            .configure(configure)
    })
    .bind((settings.host.as_str(), settings.port))?;

    if let Some(workers) = settings.workers.filter(|w| *w > 0) {
        server = server.workers(workers);
    }

    Ok(server.run())
}
