use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Sqlite,
}

impl StoreBackend {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Some(StoreBackend::Memory),
            "sqlite" => Some(StoreBackend::Sqlite),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub server_bind: String,
    pub store: StoreBackend,
    pub database_url: String,
    pub server_public_url: Option<String>,
    pub seed_demo_data: bool,
    pub max_photo_bytes: usize,
    pub event_buffer: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8080".into(),
            store: StoreBackend::Memory,
            database_url: "sqlite://./data/punchlist.db".into(),
            server_public_url: None,
            seed_demo_data: true,
            max_photo_bytes: 8 * 1024 * 1024,
            event_buffer: 256,
        }
    }
}

impl Settings {
    /// Base URL photo links are built from. Always ends in `/`.
    pub fn public_url(&self) -> anyhow::Result<Url> {
        let raw = self
            .server_public_url
            .clone()
            .unwrap_or_else(|| format!("http://{}", self.server_bind));
        let mut url =
            Url::parse(&raw).with_context(|| format!("invalid server public url '{raw}'"))?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }

    fn apply_file(&mut self, file_cfg: &HashMap<String, String>) {
        if let Some(v) = file_cfg.get("bind_addr") {
            self.server_bind = v.clone();
        }
        if let Some(store) = file_cfg.get("store").and_then(|v| StoreBackend::parse(v)) {
            self.store = store;
        }
        if let Some(v) = file_cfg.get("database_url") {
            self.database_url = v.clone();
        }
        if let Some(v) = file_cfg.get("server_public_url") {
            self.server_public_url = Some(v.clone());
        }
        if let Some(v) = file_cfg.get("seed_demo_data").and_then(|v| parse_bool(v)) {
            self.seed_demo_data = v;
        }
        if let Some(v) = file_cfg.get("max_photo_bytes").and_then(|v| v.parse().ok()) {
            self.max_photo_bytes = v;
        }
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("SERVER_BIND") {
            self.server_bind = v;
        }
        if let Some(v) = env("APP__BIND_ADDR") {
            self.server_bind = v;
        }

        if let Some(store) = env("APP__STORE").and_then(|v| StoreBackend::parse(&v)) {
            self.store = store;
        }

        if let Some(v) = env("DATABASE_URL") {
            self.database_url = v;
        }
        if let Some(v) = env("APP__DATABASE_URL") {
            self.database_url = v;
        }

        if let Some(v) = env("SERVER_PUBLIC_URL") {
            self.server_public_url = Some(v);
        }

        if let Some(v) = env("APP__SEED_DEMO_DATA").and_then(|v| parse_bool(&v)) {
            self.seed_demo_data = v;
        }

        if let Some(v) = env("APP__MAX_PHOTO_BYTES").and_then(|v| v.parse().ok()) {
            self.max_photo_bytes = v;
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("server.toml") {
        match toml::from_str::<HashMap<String, String>>(&raw) {
            Ok(file_cfg) => settings.apply_file(&file_cfg),
            Err(error) => tracing::warn!(%error, "ignoring unreadable server.toml"),
        }
    }

    settings.apply_env(|key| std::env::var(key).ok());
    settings
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    ensure_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

fn ensure_parent_dir_exists(database_url: &str) -> anyhow::Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
