//! REST client for the hosted backend (GoTrue style auth under `/auth/v1`, PostgREST style
//! tables and procedures under `/rest/v1`).

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use super::{AuthEvent, AuthSession, BackendClient, BackendConnector, Row, RowFilter};
use crate::error::{BackendError, BackendResult};
use crate::identity::Identity;

/// Shared connection settings; cheap to clone, one per process.
#[derive(Clone)]
pub struct RestBackend {
    base: Url,
    api_key: String,
    http: reqwest::Client,
    events: broadcast::Sender<AuthEvent>,
}

impl RestBackend {
    pub fn new(base: &str, api_key: &str) -> anyhow::Result<Self> {
        let mut base = Url::parse(base).map_err(|e| anyhow::anyhow!("invalid backend URL {}: {}", base, e))?;
        // endpoint paths are joined relative to the base, so a proxy prefix must end in '/'
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let http = reqwest::Client::builder().build()?;
        let (events, _) = broadcast::channel(64);
        Ok(Self { base, api_key: api_key.to_string(), http, events })
    }

    pub fn client(&self, access_token: Option<&str>) -> RestClient {
        RestClient { backend: self.clone(), token: RwLock::new(access_token.map(str::to_string)) }
    }
}

impl BackendConnector for RestBackend {
    fn connect(&self, access_token: Option<&str>) -> Arc<dyn BackendClient> {
        Arc::new(self.client(access_token))
    }
}

#[derive(Debug, Deserialize)]
struct UserBody {
    id: String,
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    access_token: String,
    user: UserBody,
}

pub struct RestClient {
    backend: RestBackend,
    token: RwLock<Option<String>>,
}

impl RestClient {
    fn url(&self, path: &str) -> BackendResult<Url> {
        self.backend.base.join(path.trim_start_matches('/')).map_err(|e| BackendError::Transport(e.to_string()))
    }

    /// `apikey` always; bearer is the user's token when bound, else the api key itself.
    fn headers(&self) -> HeaderMap {
        let mut h = HeaderMap::new();
        if let Ok(v) = HeaderValue::from_str(&self.backend.api_key) {
            h.insert("apikey", v);
        }
        let bearer = self.token.read().clone().unwrap_or_else(|| self.backend.api_key.clone());
        if let Ok(v) = HeaderValue::from_str(&format!("Bearer {}", bearer)) {
            h.insert(AUTHORIZATION, v);
        }
        h
    }

    async fn check(resp: reqwest::Response) -> BackendResult<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(BackendError::Status { status: status.as_u16(), body })
    }
}

/// Procedures may answer with a bare JSON string, null, or a one-element array/object.
fn procedure_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Array(items) => items.first().and_then(procedure_text),
        Value::Object(map) if map.len() == 1 => map.values().next().and_then(procedure_text),
        _ => None,
    }
}

#[async_trait]
impl BackendClient for RestClient {
    async fn get_session(&self) -> BackendResult<Option<Identity>> {
        if self.token.read().is_none() {
            return Ok(None);
        }
        let resp = self.backend.http.get(self.url("/auth/v1/user")?).headers(self.headers()).send().await?;
        // An expired or revoked token is "no session", not a failure.
        if resp.status() == StatusCode::UNAUTHORIZED || resp.status() == StatusCode::FORBIDDEN {
            return Ok(None);
        }
        let user: UserBody = Self::check(resp).await?.json().await?;
        Ok(Some(Identity::new(user.id)))
    }

    async fn call_procedure(&self, name: &str) -> BackendResult<Option<String>> {
        let url = self.url(&format!("/rest/v1/rpc/{}", urlencoding::encode(name)))?;
        let resp = self.backend.http.post(url).headers(self.headers()).json(&serde_json::json!({})).send().await?;
        let v: Value = Self::check(resp).await?.json().await?;
        Ok(procedure_text(&v))
    }

    async fn read_row(&self, table: &str, filter: &RowFilter) -> BackendResult<Option<Row>> {
        let mut url = self.url(&format!("/rest/v1/{}", urlencoding::encode(table)))?;
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair(&filter.column, &format!("eq.{}", filter.value))
            .append_pair("limit", "1");
        let resp = self.backend.http.get(url).headers(self.headers()).send().await?;
        let v: Value = Self::check(resp).await?.json().await?;
        match v {
            Value::Array(rows) => Ok(rows.into_iter().next().and_then(|r| r.as_object().cloned())),
            other => Err(BackendError::Decode(format!("expected array of rows, got {}", other))),
        }
    }

    async fn upsert_row(&self, table: &str, row: Row, conflict_key: &str) -> BackendResult<()> {
        let mut url = self.url(&format!("/rest/v1/{}", urlencoding::encode(table)))?;
        url.query_pairs_mut().append_pair("on_conflict", conflict_key);
        let resp = self
            .backend
            .http
            .post(url)
            .headers(self.headers())
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&Value::Object(row))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BackendError::Write(format!("HTTP {}: {}", status.as_u16(), body)));
        }
        Ok(())
    }

    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<AuthSession> {
        let mut url = self.url("/auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", "password");
        let resp = self
            .backend
            .http
            .post(url)
            .headers(self.headers())
            .json(&serde_json::json!({"email": email, "password": password}))
            .send()
            .await?;
        let body: TokenBody = Self::check(resp).await?.json().await?;
        let identity = Identity::new(body.user.id);
        *self.token.write() = Some(body.access_token.clone());
        debug!(target: "auth", "signed in {}", identity);
        let session = AuthSession { access_token: body.access_token, identity };
        let _ = self.backend.events.send(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> BackendResult<()> {
        let identity = self.get_session().await.ok().flatten();
        if self.token.read().is_none() {
            return Ok(());
        }
        let resp = self.backend.http.post(self.url("/auth/v1/logout")?).headers(self.headers()).send().await?;
        Self::check(resp).await?;
        *self.token.write() = None;
        if let Some(identity) = identity {
            let _ = self.backend.events.send(AuthEvent::SignedOut(identity));
        }
        Ok(())
    }

    fn on_auth_state_change(&self) -> broadcast::Receiver<AuthEvent> {
        self.backend.events.subscribe()
    }
}
