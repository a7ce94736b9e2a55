//!
//! hrdesk HTTP server
//! ------------------
//! Axum front for the role-based pages. The session cookie carries the backend access token;
//! every request gets a backend client bound to it.
//!
//! Responsibilities:
//! - Sign-in / sign-out against the backend's auth endpoints.
//! - `/dashboard`: resolve the role (retry + legacy fallback) and redirect to that role's page.
//! - `/staff`, `/manager`, `/hr`, `/ceo`: render only when the route guard admits the caller.
//! - `/admin/roles`: HR and CEO can write a user's role into the central mapping.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::backend::{BackendClient, BackendConnector, MemoryBackend, RestBackend, Row};
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::identity::{
    spawn_role_warmup, DashboardRedirector, GuardState, RecordingNavigator, Role, RoleResolver, RouteGuard, View,
};

pub const SESSION_COOKIE: &str = "hrdesk_session";

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub connector: Arc<dyn BackendConnector>,
    pub resolver: Arc<RoleResolver>,
    pub secure_cookie: bool,
}

impl AppState {
    pub fn new(connector: Arc<dyn BackendConnector>, resolver: Arc<RoleResolver>, secure_cookie: bool) -> Self {
        Self { connector, resolver, secure_cookie }
    }

    fn client_for(&self, headers: &HeaderMap) -> Arc<dyn BackendClient> {
        let token = parse_cookie(headers, SESSION_COOKIE);
        self.connector.connect(token.as_deref())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(serde_json::json!({"status": "error", "code": self.code_str(), "message": self.message()}))).into_response()
    }
}

/// Roles admitted to each guarded page.
pub fn allow_list(view: View) -> &'static [Role] {
    match view {
        View::Staff => &Role::ALL,
        View::Manager => &[Role::AssistantManager, Role::Manager, Role::Ceo],
        View::Hr => &[Role::Hr, Role::Ceo],
        View::Ceo => &[Role::Ceo],
        View::Login | View::Home | View::Dashboard => &[],
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/login", get(login_page).post(login))
        .route("/logout", post(logout))
        .route("/dashboard", get(dashboard))
        .route("/staff", get(staff_page))
        .route("/manager", get(manager_page))
        .route("/hr", get(hr_page))
        .route("/ceo", get(ceo_page))
        .route("/admin/roles", post(assign_role))
        .with_state(state)
}

fn build_connector(cfg: &AppConfig) -> anyhow::Result<Arc<dyn BackendConnector>> {
    if let Some(url) = &cfg.backend_url {
        info!(target: "startup", "using hosted backend at {}", url);
        let rest = RestBackend::new(url, &cfg.backend_key).with_context(|| format!("While configuring backend {}", url))?;
        return Ok(Arc::new(rest));
    }
    match &cfg.seed_file {
        Some(path) => {
            info!(target: "startup", "using in-process backend seeded from {}", path.display());
            Ok(Arc::new(MemoryBackend::from_seed_file(cfg.names.clone(), path)?))
        }
        None => {
            warn!(target: "startup", "no backend URL or seed file configured; starting with an empty in-process backend");
            Ok(Arc::new(MemoryBackend::with_names(cfg.names.clone())))
        }
    }
}

/// Start the HTTP server with the given configuration.
pub async fn run(cfg: AppConfig) -> anyhow::Result<()> {
    let connector = build_connector(&cfg)?;
    let resolver = Arc::new(RoleResolver::new(cfg.retry, cfg.names.clone()));
    let _warmup = spawn_role_warmup(connector.clone(), resolver.clone());

    let app = router(AppState::new(connector, resolver, cfg.secure_cookie));

    let addr: SocketAddr = format!("0.0.0.0:{}", cfg.http_port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await.with_context(|| format!("While binding {}", addr))?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookie = headers.get("cookie")?;
    let s = cookie.to_str().ok()?;
    for part in s.split(';') {
        let p = part.trim();
        if let Some((k, v)) = p.split_once('=') {
            if k == name && !v.is_empty() { return Some(v.to_string()); }
        }
    }
    None
}

fn session_cookie(token: &str, secure: bool) -> Option<HeaderValue> {
    let secure = if secure { " Secure;" } else { "" };
    HeaderValue::from_str(&format!("{}={}; HttpOnly;{} SameSite=Lax; Path=/", SESSION_COOKIE, token, secure)).ok()
}

fn clear_session_cookie(secure: bool) -> HeaderValue {
    let secure = if secure { " Secure;" } else { "" };
    HeaderValue::from_str(&format!(
        "{}=deleted; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly;{} SameSite=Lax; Path=/",
        SESSION_COOKIE, secure
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("hrdesk_session=deleted; Path=/"))
}

fn page_title(view: View) -> &'static str {
    match view {
        View::Staff => "Staff dashboard",
        View::Manager => "Manager dashboard",
        View::Hr => "HR dashboard",
        View::Ceo => "CEO dashboard",
        View::Home => "hrdesk",
        View::Login => "Sign in",
        View::Dashboard => "Dashboard",
    }
}

fn render_page(view: View, role: Role) -> String {
    format!(
        "<!doctype html><html><head><title>{title}</title></head><body>\
         <h1>{title}</h1><p>Signed in as <strong>{role}</strong>.</p>\
         <form method=\"post\" action=\"/logout\"><button>Sign out</button></form></body></html>",
        title = page_title(view),
        role = role
    )
}

async fn home() -> Html<String> {
    Html(format!(
        "<!doctype html><html><head><title>{t}</title></head><body><h1>{t}</h1>\
         <p><a href=\"/dashboard\">Go to your dashboard</a> or <a href=\"/login\">sign in</a>.</p></body></html>",
        t = page_title(View::Home)
    ))
}

#[derive(Debug, Deserialize)]
struct LoginQuery {
    #[serde(default)]
    error: Option<String>,
}

async fn login_page(Query(q): Query<LoginQuery>) -> Html<String> {
    let notice = match q.error.as_deref() {
        Some("invalid_credentials") => "<p class=\"error\">Invalid email or password.</p>",
        Some(_) => "<p class=\"error\">Sign-in failed, please try again.</p>",
        None => "",
    };
    Html(format!(
        "<!doctype html><html><head><title>{t}</title></head><body><h1>{t}</h1>{notice}\
         <form method=\"post\" action=\"/login\">\
         <input name=\"email\" type=\"email\"><input name=\"password\" type=\"password\">\
         <button>Sign in</button></form></body></html>",
        t = page_title(View::Login),
        notice = notice
    ))
}

#[derive(Debug, Deserialize)]
struct LoginForm {
    email: String,
    password: String,
}

async fn login(State(state): State<AppState>, Form(form): Form<LoginForm>) -> Response {
    let client = state.connector.connect(None);
    match client.sign_in(&form.email, &form.password).await {
        Ok(session) => {
            info!(target: "auth", "auth.login user={}", session.identity);
            let mut headers = HeaderMap::new();
            match session_cookie(&session.access_token, state.secure_cookie) {
                Some(v) => { headers.insert("Set-Cookie", v); }
                None => {
                    error!(target: "auth", "access token for {} is not a valid cookie value", session.identity);
                    return AppError::internal("bad_token", "backend returned an unusable access token").into_response();
                }
            }
            (headers, Redirect::to(View::Dashboard.path())).into_response()
        }
        Err(e) => {
            let app: AppError = e.into();
            warn!(target: "auth", "sign-in failed: {}", app.code_str());
            debug!(target: "auth", "sign-in failed for {}", form.email);
            Redirect::to(&format!("{}?error={}", View::Login.path(), app.code_str())).into_response()
        }
    }
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let client = state.client_for(&headers);
    if let Err(e) = client.sign_out().await {
        warn!(target: "auth", "sign-out failed: {}", e);
    }
    let mut h = HeaderMap::new();
    h.insert("Set-Cookie", clear_session_cookie(state.secure_cookie));
    (h, Redirect::to(View::Login.path())).into_response()
}

async fn dashboard(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let client = state.client_for(&headers);
    let redirector = DashboardRedirector::new(state.resolver.clone());
    let nav = RecordingNavigator::default();
    let target = redirector.dispatch(client.as_ref(), &nav).await.unwrap_or(View::Login);
    Redirect::to(target.path()).into_response()
}

async fn guarded_page(state: &AppState, headers: &HeaderMap, view: View) -> Response {
    let client = state.client_for(headers);
    let guard = RouteGuard::new(allow_list(view), state.resolver.names().clone());
    let nav = RecordingNavigator::default();
    match guard.check(client.as_ref(), &nav).await {
        GuardState::Allowed(role) => Html(render_page(view, role)).into_response(),
        other => {
            let target = nav.last().or(other.redirect_target()).unwrap_or(View::Login);
            Redirect::to(target.path()).into_response()
        }
    }
}

async fn staff_page(State(state): State<AppState>, headers: HeaderMap) -> Response {
    guarded_page(&state, &headers, View::Staff).await
}

async fn manager_page(State(state): State<AppState>, headers: HeaderMap) -> Response {
    guarded_page(&state, &headers, View::Manager).await
}

async fn hr_page(State(state): State<AppState>, headers: HeaderMap) -> Response {
    guarded_page(&state, &headers, View::Hr).await
}

async fn ceo_page(State(state): State<AppState>, headers: HeaderMap) -> Response {
    guarded_page(&state, &headers, View::Ceo).await
}

#[derive(Debug, Deserialize)]
struct RoleAssignment {
    user_id: String,
    role: String,
}

async fn assign_role(State(state): State<AppState>, headers: HeaderMap, Json(payload): Json<RoleAssignment>) -> AppResult<Response> {
    let client = state.client_for(&headers);
    let names = state.resolver.names().clone();
    let guard = RouteGuard::new(&[Role::Hr, Role::Ceo], names.clone());
    let nav = RecordingNavigator::default();
    match guard.check(client.as_ref(), &nav).await {
        GuardState::Allowed(_) => {}
        GuardState::UnauthenticatedRedirected => return Err(AppError::auth("unauthenticated", "sign in required")),
        _ => return Err(AppError::forbidden("forbidden", "role assignment requires hr or ceo")),
    }
    let role = payload.role.parse::<Role>().map_err(|e| AppError::user("invalid_role".to_string(), format!("{}", e)))?;
    let user_id = payload.user_id.trim();
    if user_id.is_empty() {
        return Err(AppError::user("invalid_user", "user_id is required"));
    }
    let mut row = Row::new();
    row.insert(names.central_key.clone(), user_id.into());
    row.insert(names.central_role.clone(), role.as_str().into());
    client.upsert_row(&names.central_table, row, &names.central_key).await.map_err(|e| {
        error!(target: "role", "role assignment for {} failed: {}", user_id, e);
        AppError::from(e)
    })?;
    info!(target: "role", "assigned role {} to {}", role, user_id);
    Ok((StatusCode::OK, Json(serde_json::json!({"status": "ok", "user_id": user_id, "role": role}))).into_response())
}
