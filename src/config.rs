//!
//! Runtime configuration
//! ---------------------
//! Settings come from `HRDESK_*` environment variables, overridden by command-line flags.
//! Without a backend URL the server runs against the in-process backend, optionally
//! seeded from a JSON file.

use std::path::PathBuf;

use crate::identity::{BackendNames, RetryPolicy};

pub const DEFAULT_HTTP_PORT: u16 = 7878;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub http_port: u16,
    pub backend_url: Option<String>,
    pub backend_key: String,
    pub seed_file: Option<PathBuf>,
    pub secure_cookie: bool,
    pub names: BackendNames,
    pub retry: RetryPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http_port: DEFAULT_HTTP_PORT,
            backend_url: None,
            backend_key: String::new(),
            seed_file: None,
            secure_cookie: true,
            names: BackendNames::default(),
            retry: RetryPolicy::DEFAULT,
        }
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag && i + 1 < args.len() {
            return Some(args[i + 1].as_str());
        }
        if let Some(v) = args[i].strip_prefix(flag).and_then(|rest| rest.strip_prefix('=')) {
            return Some(v);
        }
        i += 1;
    }
    None
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

fn non_empty(s: String) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

impl AppConfig {
    /// Reads the process environment and the given arguments (without the program name).
    pub fn from_env_and_args(args: &[String]) -> Self {
        Self::from_sources(|k| std::env::var(k).ok(), args)
    }

    pub fn from_sources(env: impl Fn(&str) -> Option<String>, args: &[String]) -> Self {
        let mut cfg = AppConfig::default();

        if let Some(p) = env("HRDESK_HTTP_PORT").and_then(|v| v.trim().parse::<u16>().ok()) {
            cfg.http_port = p;
        }
        cfg.backend_url = env("HRDESK_BACKEND_URL").and_then(non_empty);
        if let Some(k) = env("HRDESK_BACKEND_KEY") {
            cfg.backend_key = k.trim().to_string();
        }
        cfg.seed_file = env("HRDESK_SEED_FILE").and_then(non_empty).map(PathBuf::from);
        if let Some(b) = env("HRDESK_SECURE_COOKIE").as_deref().and_then(parse_bool) {
            cfg.secure_cookie = b;
        }
        if let Some(p) = env("HRDESK_ROLE_PROCEDURE").and_then(non_empty) {
            cfg.names.role_procedure = p;
        }

        if let Some(p) = arg_value(args, "--http-port").and_then(|v| v.parse::<u16>().ok()) {
            cfg.http_port = p;
        }
        if let Some(u) = arg_value(args, "--backend-url") {
            cfg.backend_url = non_empty(u.to_string());
        }
        if let Some(k) = arg_value(args, "--backend-key") {
            cfg.backend_key = k.to_string();
        }
        if let Some(s) = arg_value(args, "--seed") {
            cfg.seed_file = non_empty(s.to_string()).map(PathBuf::from);
        }
        if has_flag(args, "--insecure-cookie") {
            cfg.secure_cookie = false;
        }

        cfg
    }
}
