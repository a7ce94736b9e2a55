//! Generic client for the hosted backend (auth, tables, remote procedures, auth change feed).
//! Everything above this module talks to the backend only through `BackendClient`.

mod memory;
mod rest;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::BackendResult;
use crate::identity::Identity;

pub use memory::{MemoryBackend, MemoryClient, SeedFile, SeedUser};
pub use rest::{RestBackend, RestClient};

/// One table row as returned by the backend.
pub type Row = serde_json::Map<String, Value>;

/// Equality filter on a single column, the only filter shape the role lookups need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFilter {
    pub column: String,
    pub value: String,
}

impl RowFilter {
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self { column: column.into(), value: value.into() }
    }

    pub fn matches(&self, row: &Row) -> bool {
        match row.get(&self.column) {
            Some(Value::String(s)) => s == &self.value,
            Some(other) => other.to_string() == self.value,
            None => false,
        }
    }
}

/// Tokens handed out by a successful sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub access_token: String,
    pub identity: Identity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(AuthSession),
    SignedOut(Identity),
}

/// Capability set of the hosted backend, bound to one (possibly absent) access token.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Identity behind the bound token, `None` when signed out or the token is no longer valid.
    async fn get_session(&self) -> BackendResult<Option<Identity>>;

    /// Calls a server-side function that returns a single text value (or null).
    async fn call_procedure(&self, name: &str) -> BackendResult<Option<String>>;

    async fn read_row(&self, table: &str, filter: &RowFilter) -> BackendResult<Option<Row>>;

    async fn upsert_row(&self, table: &str, row: Row, conflict_key: &str) -> BackendResult<()>;

    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<AuthSession>;

    async fn sign_out(&self) -> BackendResult<()>;

    /// Subscribes to sign-in / sign-out notifications for this backend.
    fn on_auth_state_change(&self) -> broadcast::Receiver<AuthEvent>;
}

/// Hands out clients bound to the access token carried by a request.
pub trait BackendConnector: Send + Sync {
    fn connect(&self, access_token: Option<&str>) -> Arc<dyn BackendClient>;
}

/// Reads a text column from a row, treating null and blank as absent.
pub fn text_field<'a>(row: &'a Row, column: &str) -> Option<&'a str> {
    row.get(column)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
