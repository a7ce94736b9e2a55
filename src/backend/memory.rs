//! In-process backend: accounts, sessions and tables kept in memory.
//! Used for local runs (seeded from a JSON file) and as the test double. It can simulate the
//! hosted backend's replication lag, transport failures and rejected writes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use super::{text_field, AuthEvent, AuthSession, BackendClient, BackendConnector, Row, RowFilter};
use crate::error::{BackendError, BackendResult};
use crate::identity::{BackendNames, Identity};

#[derive(Debug, Clone, Deserialize)]
pub struct SeedUser {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub id: Option<String>,
    /// Role stored in the central mapping.
    #[serde(default)]
    pub role: Option<String>,
    /// Role stored only on the legacy profile record.
    #[serde(default)]
    pub legacy_role: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub users: Vec<SeedUser>,
}

#[derive(Debug)]
struct Account {
    password: String,
    identity: Identity,
}

#[derive(Debug, Default)]
struct Inner {
    accounts: HashMap<String, Account>,
    sessions: HashMap<String, Identity>,
    tables: HashMap<String, Vec<Row>>,
    /// Procedure calls per identity that still see an empty central mapping.
    hidden_lookups: HashMap<Identity, u32>,
    /// Procedure calls per identity that still fail with a transport error.
    failing_lookups: HashMap<Identity, u32>,
    fail_writes: bool,
    fail_reads: bool,
    procedure_calls: u32,
    upsert_calls: u32,
    read_calls: u32,
}

fn gen_token() -> BackendResult<String> {
    let mut buf = [0u8; 32];
    getrandom::getrandom(&mut buf).map_err(|e| BackendError::Transport(format!("session token rng: {}", e)))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
}

#[derive(Clone)]
pub struct MemoryBackend {
    names: BackendNames,
    inner: Arc<RwLock<Inner>>,
    events: broadcast::Sender<AuthEvent>,
}

impl Default for MemoryBackend {
    fn default() -> Self { Self::with_names(BackendNames::default()) }
}

impl MemoryBackend {
    pub fn with_names(names: BackendNames) -> Self {
        let (events, _) = broadcast::channel(64);
        Self { names, inner: Arc::new(RwLock::new(Inner::default())), events }
    }

    pub fn from_seed(names: BackendNames, seed: &SeedFile) -> Self {
        let backend = Self::with_names(names);
        for u in &seed.users {
            let identity = match &u.id {
                Some(id) => backend.add_user_with_id(id, &u.email, &u.password),
                None => backend.add_user(&u.email, &u.password),
            };
            if let Some(role) = &u.role { backend.set_central_role(&identity, role); }
            if let Some(role) = &u.legacy_role { backend.set_legacy_role(&identity, role); }
        }
        backend
    }

    pub fn from_seed_file(names: BackendNames, path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("While reading seed file: {}", path.display()))?;
        let seed: SeedFile = serde_json::from_str(&text)
            .with_context(|| format!("While parsing seed file: {}", path.display()))?;
        Ok(Self::from_seed(names, &seed))
    }

    pub fn client(&self, access_token: Option<&str>) -> MemoryClient {
        MemoryClient { backend: self.clone(), token: RwLock::new(access_token.map(str::to_string)) }
    }

    pub fn add_user(&self, email: &str, password: &str) -> Identity {
        self.add_user_with_id(&uuid::Uuid::new_v4().to_string(), email, password)
    }

    pub fn add_user_with_id(&self, id: &str, email: &str, password: &str) -> Identity {
        let identity = Identity::new(id);
        let mut g = self.inner.write();
        g.accounts.insert(
            email.trim().to_ascii_lowercase(),
            Account { password: password.to_string(), identity: identity.clone() },
        );
        identity
    }

    /// Opens a session without a password, for tests and tooling.
    pub fn issue_session(&self, identity: &Identity) -> BackendResult<String> {
        let token = gen_token()?;
        self.inner.write().sessions.insert(token.clone(), identity.clone());
        Ok(token)
    }

    pub fn expire_session(&self, token: &str) -> bool {
        self.inner.write().sessions.remove(token).is_some()
    }

    pub fn set_central_role(&self, identity: &Identity, role: &str) {
        let n = &self.names;
        let row = key_value_row(&n.central_key, identity.as_str(), &n.central_role, role);
        upsert_into(&mut self.inner.write().tables, &n.central_table, row, &n.central_key);
    }

    pub fn set_legacy_role(&self, identity: &Identity, role: &str) {
        let n = &self.names;
        let row = key_value_row(&n.legacy_key, identity.as_str(), &n.legacy_role, role);
        upsert_into(&mut self.inner.write().tables, &n.legacy_table, row, &n.legacy_key);
    }

    pub fn central_role(&self, identity: &Identity) -> Option<String> {
        let n = &self.names;
        let filter = RowFilter::eq(n.central_key.clone(), identity.as_str());
        let g = self.inner.read();
        g.tables
            .get(&n.central_table)
            .and_then(|rows| rows.iter().find(|r| filter.matches(r)))
            .and_then(|r| text_field(r, &n.central_role).map(str::to_string))
    }

    /// The next `calls` role-procedure calls for this identity see an empty central mapping.
    pub fn hide_central_for(&self, identity: &Identity, calls: u32) {
        self.inner.write().hidden_lookups.insert(identity.clone(), calls);
    }

    /// The next `calls` role-procedure calls for this identity fail with a transport error.
    pub fn fail_lookups_for(&self, identity: &Identity, calls: u32) {
        self.inner.write().failing_lookups.insert(identity.clone(), calls);
    }

    pub fn set_fail_writes(&self, fail: bool) { self.inner.write().fail_writes = fail; }

    pub fn set_fail_reads(&self, fail: bool) { self.inner.write().fail_reads = fail; }

    pub fn procedure_calls(&self) -> u32 { self.inner.read().procedure_calls }

    pub fn upsert_calls(&self) -> u32 { self.inner.read().upsert_calls }

    pub fn read_calls(&self) -> u32 { self.inner.read().read_calls }

    fn identity_for(&self, token: Option<&str>) -> Option<Identity> {
        let token = token?;
        self.inner.read().sessions.get(token).cloned()
    }
}

fn key_value_row(key_col: &str, key: &str, value_col: &str, value: &str) -> Row {
    let mut row = Row::new();
    row.insert(key_col.to_string(), Value::String(key.to_string()));
    row.insert(value_col.to_string(), Value::String(value.to_string()));
    row
}

fn upsert_into(tables: &mut HashMap<String, Vec<Row>>, table: &str, row: Row, conflict_key: &str) {
    let rows = tables.entry(table.to_string()).or_default();
    let key = row.get(conflict_key).cloned();
    let existing = key.as_ref().and_then(|k| rows.iter_mut().find(|r| r.get(conflict_key) == Some(k)));
    match existing {
        Some(r) => {
            for (k, v) in row {
                r.insert(k, v);
            }
        }
        None => rows.push(row),
    }
}

impl BackendConnector for MemoryBackend {
    fn connect(&self, access_token: Option<&str>) -> Arc<dyn BackendClient> {
        Arc::new(self.client(access_token))
    }
}

/// A `MemoryBackend` handle bound to one access token.
pub struct MemoryClient {
    backend: MemoryBackend,
    token: RwLock<Option<String>>,
}

impl MemoryClient {
    fn current_identity(&self) -> Option<Identity> {
        let token = self.token.read().clone();
        self.backend.identity_for(token.as_deref())
    }
}

#[async_trait]
impl BackendClient for MemoryClient {
    async fn get_session(&self) -> BackendResult<Option<Identity>> {
        Ok(self.current_identity())
    }

    async fn call_procedure(&self, name: &str) -> BackendResult<Option<String>> {
        let Some(identity) = self.current_identity() else { return Err(BackendError::Unauthenticated); };
        let names = &self.backend.names;
        let mut g = self.backend.inner.write();
        g.procedure_calls += 1;
        if name != names.role_procedure {
            return Err(BackendError::Status { status: 404, body: format!("procedure {} not found", name) });
        }
        if let Some(left) = g.failing_lookups.get_mut(&identity) {
            if *left > 0 {
                *left -= 1;
                return Err(BackendError::Transport("connection reset".into()));
            }
        }
        if let Some(left) = g.hidden_lookups.get_mut(&identity) {
            if *left > 0 {
                *left -= 1;
                debug!(target: "memory", "procedure {} hidden for {} ({} left)", name, identity, *left);
                return Ok(None);
            }
        }
        let filter = RowFilter::eq(names.central_key.clone(), identity.as_str());
        let role = g
            .tables
            .get(&names.central_table)
            .and_then(|rows| rows.iter().find(|r| filter.matches(r)))
            .and_then(|r| text_field(r, &names.central_role).map(str::to_string));
        Ok(role)
    }

    async fn read_row(&self, table: &str, filter: &RowFilter) -> BackendResult<Option<Row>> {
        let mut g = self.backend.inner.write();
        g.read_calls += 1;
        if g.fail_reads {
            return Err(BackendError::Transport("read failed".into()));
        }
        Ok(g.tables.get(table).and_then(|rows| rows.iter().find(|r| filter.matches(r)).cloned()))
    }

    async fn upsert_row(&self, table: &str, row: Row, conflict_key: &str) -> BackendResult<()> {
        let mut g = self.backend.inner.write();
        g.upsert_calls += 1;
        if g.fail_writes {
            return Err(BackendError::Write(format!("upsert into {} rejected", table)));
        }
        if !row.contains_key(conflict_key) {
            return Err(BackendError::Write(format!("row lacks conflict key {}", conflict_key)));
        }
        upsert_into(&mut g.tables, table, row, conflict_key);
        Ok(())
    }

    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<AuthSession> {
        let identity = {
            let g = self.backend.inner.read();
            match g.accounts.get(&email.trim().to_ascii_lowercase()) {
                Some(acct) if acct.password == password => acct.identity.clone(),
                _ => return Err(BackendError::Status { status: 400, body: "invalid_grant".into() }),
            }
        };
        let access_token = self.backend.issue_session(&identity)?;
        *self.token.write() = Some(access_token.clone());
        let session = AuthSession { access_token, identity };
        let _ = self.backend.events.send(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> BackendResult<()> {
        let Some(token) = self.token.write().take() else { return Ok(()); };
        let removed = self.backend.inner.write().sessions.remove(&token);
        if let Some(identity) = removed {
            let _ = self.backend.events.send(AuthEvent::SignedOut(identity));
        }
        Ok(())
    }

    fn on_auth_state_change(&self) -> broadcast::Receiver<AuthEvent> {
        self.backend.events.subscribe()
    }
}
