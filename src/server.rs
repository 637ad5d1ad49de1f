//!
//! mdwiki HTTP server
//! ------------------
//! This module defines the Axum-based entry surfaces for the wiki:
//! a session-authenticated browser UI and a token-authenticated JSON API.
//! Both resolve a Principal first (session cookie or bearer token), gate the
//! requested operation on the Principal's claims, and only then call into
//! the page store.
//!
//! Responsibilities:
//! - Session login/logout with an HttpOnly cookie.
//! - Token issuance and verification for the /api routes.
//! - Page CRUD handlers delegating to the PageStore.
//! - Markdown preview endpoint and the snippet backup integration.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{delete, get, post, put};
use axum::{Form, Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::identity::{
    BearerResolver, Claim, CredentialResolver, Principal, SessionManager, SessionResolver,
    TokenIssuer, SESSION_COOKIE,
};
use crate::store::PageStore;
use crate::{markdown, security};

const EMPTY_PAGE_MARKDOWN: &str = "# A new page\n\nFeel-free to write in Markdown!\n";
const BACKUP_ENDPOINT: &str = "https://snippets.glot.io/snippets";

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: PageStore,
    pub sessions: Arc<SessionManager>,
    pub tokens: Arc<TokenIssuer>,
}

/// Build the application state: open the database, ensure the page and
/// credential tables exist, seed the default user, and construct the
/// process-wide token issuer and session manager.
pub async fn build_state(config: &Config) -> anyhow::Result<AppState> {
    // For file-backed databases make sure the parent directory exists.
    if let Some(path) = config.db_url.strip_prefix("sqlite:") {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }
    let store = PageStore::connect(&config.db_url, config.db_max_pool_size).await?;
    security::ensure_auth_tables(store.pool()).await?;
    security::ensure_default_users(store.pool()).await?;
    Ok(AppState {
        store,
        sessions: Arc::new(SessionManager::new(std::time::Duration::from_secs(
            config.session_ttl_secs,
        ))),
        tokens: Arc::new(TokenIssuer::new(&config.jwt_secret, config.jwt_ttl_secs)),
    })
}

/// Mount all UI and API routes over the given state.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Browser UI (session-authenticated)
        .route("/", get(index))
        .route("/wiki/{page}", get(page_rendering))
        .route("/action/save", post(page_update))
        .route("/action/create", post(page_create))
        .route("/action/delete", post(page_deletion))
        .route("/action/backup", get(backup))
        .route("/login", get(login_form))
        .route("/login-auth", post(login_auth))
        .route("/logout", get(logout))
        // Public markdown preview
        .route("/app/markdown", post(markdown_preview))
        // JSON API (token-authenticated)
        .route("/api/token", get(api_token))
        .route("/api/pages", get(api_root))
        .route("/api/pages", post(api_create_page))
        .route("/api/pages/{id}", get(api_get_page))
        .route("/api/pages/{id}", put(api_update_page))
        .route("/api/pages/{id}", delete(api_delete_page))
        .with_state(state)
}

/// Start the wiki server bound to the configured port.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let state = build_state(&config).await?;
    let app = router(state);
    let addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Session cookie helpers
// ---------------------------------------------------------------------------

fn set_session_cookie(sid: &str) -> HeaderValue {
    // HttpOnly cookie scoped to path / with SameSite=Strict
    HeaderValue::from_str(&format!(
        "{}={}; HttpOnly; SameSite=Strict; Path=/",
        SESSION_COOKIE, sid
    ))
    .unwrap()
}

fn clear_session_cookie() -> HeaderValue {
    HeaderValue::from_str(&format!(
        "{}=deleted; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly; SameSite=Strict; Path=/",
        SESSION_COOKIE
    ))
    .unwrap()
}

/// Resolve the session Principal, with claims freshly derived from the
/// credential store. `Err` means the caller should be redirected to /login.
async fn ui_principal(state: &AppState, headers: &HeaderMap) -> AppResult<Principal> {
    let resolver = SessionResolver { pool: state.store.pool(), sessions: &state.sessions };
    resolver.resolve(headers).await
}

/// Resolve the bearer Principal from the Authorization header. No
/// credential-store round trip; the token's frozen claims are authoritative.
async fn api_principal(state: &AppState, headers: &HeaderMap) -> AppResult<Principal> {
    let resolver = BearerResolver { issuer: &state.tokens };
    resolver.resolve(headers).await
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

// ---------------------------------------------------------------------------
// Browser UI handlers
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct IndexParams {
    backup: Option<String>,
}

async fn index(
    State(state): State<AppState>,
    axum::extract::Query(params): axum::extract::Query<IndexParams>,
    headers: HeaderMap,
) -> Response {
    let principal = match ui_principal(&state, &headers).await {
        Ok(p) => p,
        Err(_) => return Redirect::to("/login").into_response(),
    };
    match state.store.fetch_all_pages().await {
        Ok(pages) => {
            let mut body = String::new();
            body.push_str("<h1>Wiki home</h1>\n");
            body.push_str(&format!(
                "<p>Logged in as <b>{}</b> &middot; <a href=\"/logout\">Logout</a> &middot; <a href=\"/action/backup\">Backup</a></p>\n",
                html_escape(&principal.username)
            ));
            if let Some(url) = params.backup {
                body.push_str(&format!(
                    "<p>Backup available at <a href=\"{0}\">{0}</a></p>\n",
                    html_escape(&url)
                ));
            }
            body.push_str("<ul>\n");
            for name in &pages {
                body.push_str(&format!(
                    "<li><a href=\"/wiki/{}\">{}</a></li>\n",
                    urlencoding::encode(name),
                    html_escape(name)
                ));
            }
            body.push_str("</ul>\n");
            if principal.claims.can_create {
                body.push_str(
                    "<form action=\"/action/create\" method=\"post\">\
                     <input type=\"text\" name=\"name\" placeholder=\"New page name\">\
                     <button type=\"submit\">Create</button></form>\n",
                );
            }
            Html(page_shell("Wiki home", &body)).into_response()
        }
        Err(e) => ui_error(e),
    }
}

async fn page_rendering(
    State(state): State<AppState>,
    Path(page): Path<String>,
    headers: HeaderMap,
) -> Response {
    if ui_principal(&state, &headers).await.is_err() {
        return Redirect::to("/login").into_response();
    }
    match state.store.fetch_page(&page).await {
        Ok(found) => {
            let (id, raw_content, new_page) = match &found {
                Some(raw) => (raw.id, raw.content.as_str(), "no"),
                None => (-1, EMPTY_PAGE_MARKDOWN, "yes"),
            };
            let rendered = markdown::render(raw_content);
            let body = format!(
                "<h1>{title}</h1>\n{rendered}\n\
                 <form action=\"/action/save\" method=\"post\">\
                 <input type=\"hidden\" name=\"id\" value=\"{id}\">\
                 <input type=\"hidden\" name=\"title\" value=\"{title}\">\
                 <input type=\"hidden\" name=\"newPage\" value=\"{new_page}\">\
                 <textarea name=\"markdown\" rows=\"20\" cols=\"80\">{raw}</textarea><br>\
                 <button type=\"submit\">Save</button></form>\n\
                 <form action=\"/action/delete\" method=\"post\">\
                 <input type=\"hidden\" name=\"id\" value=\"{id}\">\
                 <button type=\"submit\">Delete</button></form>\n\
                 <p><a href=\"/\">Home</a></p>",
                title = html_escape(&page),
                rendered = rendered,
                id = id,
                new_page = new_page,
                raw = html_escape(raw_content),
            );
            Html(page_shell(&page, &body)).into_response()
        }
        Err(e) => ui_error(e),
    }
}

#[derive(Debug, Deserialize)]
struct SavePayload {
    id: Option<i64>,
    title: String,
    markdown: String,
    #[serde(rename = "newPage")]
    new_page: Option<String>,
}

async fn page_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(payload): Form<SavePayload>,
) -> Response {
    let principal = match ui_principal(&state, &headers).await {
        Ok(p) => p,
        Err(_) => return Redirect::to("/login").into_response(),
    };
    let result = if payload.new_page.as_deref() == Some("yes") {
        match principal.require(Claim::Create) {
            Ok(()) => state.store.create_page(&payload.title, &payload.markdown).await,
            Err(e) => Err(e),
        }
    } else {
        let Some(id) = payload.id else {
            return ui_error(AppError::user("missing_id", "save requires an id"));
        };
        match principal.require(Claim::Update) {
            Ok(()) => state.store.save_page(id, &payload.markdown).await,
            Err(e) => Err(e),
        }
    };
    match result {
        Ok(()) => Redirect::to(&format!("/wiki/{}", urlencoding::encode(&payload.title)))
            .into_response(),
        Err(e) => ui_error(e),
    }
}

#[derive(Debug, Deserialize)]
struct CreatePayload {
    name: Option<String>,
}

async fn page_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(payload): Form<CreatePayload>,
) -> Response {
    if ui_principal(&state, &headers).await.is_err() {
        return Redirect::to("/login").into_response();
    }
    // Pure navigation: the page is created when the editor is first saved.
    let location = match payload.name.as_deref() {
        Some(name) if !name.is_empty() => format!("/wiki/{}", urlencoding::encode(name)),
        _ => "/".to_string(),
    };
    Redirect::to(&location).into_response()
}

#[derive(Debug, Deserialize)]
struct DeletePayload {
    id: i64,
}

async fn page_deletion(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(payload): Form<DeletePayload>,
) -> Response {
    let principal = match ui_principal(&state, &headers).await {
        Ok(p) => p,
        Err(_) => return Redirect::to("/login").into_response(),
    };
    // The claim gate runs before storage is touched; a missing claim is a
    // distinct failure from the store's idempotent-delete policy.
    if let Err(e) = principal.require(Claim::Delete) {
        return ui_error(e);
    }
    match state.store.delete_page(payload.id).await {
        Ok(()) => Redirect::to("/").into_response(),
        Err(e) => ui_error(e),
    }
}

async fn backup(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if ui_principal(&state, &headers).await.is_err() {
        return Redirect::to("/login").into_response();
    }
    let pages = match state.store.fetch_all_pages_data().await {
        Ok(pages) => pages,
        Err(e) => return ui_error(e),
    };
    let files: Vec<serde_json::Value> = pages
        .iter()
        .map(|p| json!({"name": p.name, "content": p.content}))
        .collect();
    let payload = json!({
        "files": files,
        "language": "plaintext",
        "title": "mdwiki-backup",
        "public": true,
    });
    let client = reqwest::Client::new();
    match client
        .post(BACKUP_ENDPOINT)
        .header("Content-Type", "application/json")
        .json(&payload)
        .send()
        .await
    {
        Ok(response) if response.status().is_success() => {
            let body: serde_json::Value = match response.json().await {
                Ok(v) => v,
                Err(e) => {
                    error!("Could not parse backup response: {}", e);
                    return ui_error(AppError::internal(
                        "backup_response".into(),
                        e.to_string(),
                    ));
                }
            };
            match snippet_url(&body) {
                Some(url) => {
                    Redirect::to(&format!("/?backup={}", urlencoding::encode(&url)))
                        .into_response()
                }
                None => {
                    error!("Backup response carried no snippet id: {}", body);
                    ui_error(AppError::internal(
                        "backup_response",
                        "snippet service returned no id",
                    ))
                }
            }
        }
        Ok(response) => {
            error!("Could not backup the wiki: {}", response.status());
            (StatusCode::BAD_GATEWAY, Html(page_shell("Backup failed", "<p>Could not backup the wiki.</p>"))).into_response()
        }
        Err(e) => {
            error!("HTTP client error: {}", e);
            ui_error(AppError::internal("backup_client".into(), e.to_string()))
        }
    }
}

/// Extract the public snippet link from the backup service's response.
/// `None` when the response carries no usable id; the caller treats that as
/// a failed backup rather than linking to a nonexistent snippet.
fn snippet_url(body: &serde_json::Value) -> Option<String> {
    let id = body.get("id")?.as_str()?;
    if id.is_empty() {
        return None;
    }
    Some(format!("https://glot.io/snippets/{}", id))
}

async fn login_form() -> Html<String> {
    Html(page_shell(
        "Login",
        "<h1>Login</h1>\
         <form action=\"/login-auth\" method=\"post\">\
         <input type=\"text\" name=\"username\" placeholder=\"Username\"><br>\
         <input type=\"password\" name=\"password\" placeholder=\"Password\"><br>\
         <button type=\"submit\">Login</button></form>",
    ))
}

#[derive(Debug, Deserialize)]
struct LoginPayload {
    username: String,
    password: String,
}

async fn login_auth(
    State(state): State<AppState>,
    Form(payload): Form<LoginPayload>,
) -> Response {
    match security::authenticate(state.store.pool(), &payload.username, &payload.password).await {
        Ok(true) => {
            let session = state.sessions.issue(&payload.username);
            let mut headers = HeaderMap::new();
            headers.insert("Set-Cookie", set_session_cookie(&session.session_id));
            (StatusCode::SEE_OTHER, [("Location", "/")], headers).into_response()
        }
        Ok(false) => (
            StatusCode::UNAUTHORIZED,
            Html(page_shell("Login", "<p>Invalid username or password.</p><p><a href=\"/login\">Try again</a></p>")),
        )
            .into_response(),
        Err(e) => {
            error!("login error: {e}");
            ui_error(e)
        }
    }
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(sid) = crate::identity::parse_cookie(&headers, SESSION_COOKIE) {
        state.sessions.logout(&sid);
    }
    let mut h = HeaderMap::new();
    h.insert("Set-Cookie", clear_session_cookie());
    (StatusCode::FOUND, [("Location", "/")], h).into_response()
}

/// Public preview endpoint: raw markdown in the body, rendered HTML out.
async fn markdown_preview(body: String) -> Response {
    (StatusCode::OK, Html(markdown::render(&body))).into_response()
}

fn page_shell(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><title>{}</title></head><body>{}</body></html>",
        html_escape(title),
        body
    )
}

fn ui_error(err: AppError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Html(page_shell("Error", &format!("<p>{}</p>", html_escape(err.message())))))
        .into_response()
}

// ---------------------------------------------------------------------------
// JSON API handlers
// ---------------------------------------------------------------------------

fn api_error(err: AppError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({"success": false, "error": err.message()}))).into_response()
}

/// GET /api/token: credentials arrive in the `login`/`password` request
/// headers; a successful login returns a signed token as plain text.
async fn api_token(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let login = headers.get("login").and_then(|v| v.to_str().ok());
    let password = headers.get("password").and_then(|v| v.to_str().ok());
    let (Some(login), Some(password)) = (login, password) else {
        return api_error(AppError::auth(
            "missing_credentials",
            "login and password headers are required",
        ));
    };
    match security::authenticate(state.store.pool(), login, password).await {
        Ok(true) => {
            let claims = security::resolve_claims(state.store.pool(), login).await;
            match state.tokens.issue(login, &claims) {
                Ok(token) => (StatusCode::OK, token).into_response(),
                Err(e) => api_error(e),
            }
        }
        Ok(false) => api_error(AppError::auth("bad_credentials", "invalid credentials")),
        Err(e) => api_error(e),
    }
}

/// GET /api/pages: id/name listing of every page.
async fn api_root(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(e) = api_principal(&state, &headers).await {
        return api_error(e);
    }
    match state.store.fetch_all_pages_data().await {
        Ok(pages) => {
            let listing: Vec<serde_json::Value> = pages
                .iter()
                .map(|p| json!({"id": p.id, "name": p.name}))
                .collect();
            (StatusCode::OK, Json(json!({"success": true, "pages": listing}))).into_response()
        }
        Err(e) => api_error(e),
    }
}

/// GET /api/pages/{id}: full page payload with both raw markdown and HTML.
async fn api_get_page(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Response {
    if let Err(e) = api_principal(&state, &headers).await {
        return api_error(e);
    }
    match state.store.fetch_page_by_id(id).await {
        Ok(Some(page)) => {
            let payload = json!({
                "id": page.id,
                "name": page.name,
                "markdown": page.content,
                "html": markdown::render(&page.content),
            });
            (StatusCode::OK, Json(json!({"success": true, "page": payload}))).into_response()
        }
        Ok(None) => api_error(AppError::not_found(
            "page_not_found".into(),
            format!("There is no page with ID {}", id),
        )),
        Err(e) => api_error(e),
    }
}

/// Pull the named string fields out of a JSON body, reporting the missing
/// ones. Never silently defaults a required field.
fn require_fields<'a>(
    body: &'a serde_json::Value,
    expected: &[&str],
) -> AppResult<Vec<&'a str>> {
    let mut values = Vec::with_capacity(expected.len());
    let mut missing = Vec::new();
    for key in expected {
        match body.get(*key).and_then(|v| v.as_str()) {
            Some(v) => values.push(v),
            None => missing.push(*key),
        }
    }
    if missing.is_empty() {
        Ok(values)
    } else {
        Err(AppError::user(
            "bad_payload".into(),
            format!("Bad request payload: missing {}", missing.join(", ")),
        ))
    }
}

/// POST /api/pages: create a page. The create claim is checked before any
/// storage mutation.
async fn api_create_page(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let principal = match api_principal(&state, &headers).await {
        Ok(p) => p,
        Err(e) => return api_error(e),
    };
    if let Err(e) = principal.require(Claim::Create) {
        return api_error(e);
    }
    let (name, markdown) = match require_fields(&body, &["name", "markdown"]) {
        Ok(fields) => (fields[0], fields[1]),
        Err(e) => return api_error(e),
    };
    match state.store.create_page(name, markdown).await {
        Ok(()) => (StatusCode::CREATED, Json(json!({"success": true}))).into_response(),
        Err(e) => api_error(e),
    }
}

/// PUT /api/pages/{id}: overwrite a page's content.
async fn api_update_page(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let principal = match api_principal(&state, &headers).await {
        Ok(p) => p,
        Err(e) => return api_error(e),
    };
    if let Err(e) = principal.require(Claim::Update) {
        return api_error(e);
    }
    let markdown = match require_fields(&body, &["markdown"]) {
        Ok(fields) => fields[0],
        Err(e) => return api_error(e),
    };
    match state.store.save_page(id, markdown).await {
        Ok(()) => (StatusCode::OK, Json(json!({"success": true}))).into_response(),
        Err(e) => api_error(e),
    }
}

/// DELETE /api/pages/{id}: requires the delete claim; deleting an id that
/// never existed still succeeds.
async fn api_delete_page(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Response {
    let principal = match api_principal(&state, &headers).await {
        Ok(p) => p,
        Err(e) => return api_error(e),
    };
    if let Err(e) = principal.require(Claim::Delete) {
        return api_error(e);
    }
    match state.store.delete_page(id).await {
        Ok(()) => (StatusCode::OK, Json(json!({"success": true}))).into_response(),
        Err(e) => api_error(e),
    }
}
