use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use ::config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

pub const SETTINGS_FILE: &str = "server.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server_bind: String,
    pub database_url: String,
    pub max_body_bytes: usize,
    pub event_buffer: usize,
    pub seed_tasks: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:3000".into(),
            database_url: "sqlite://./data/feed.db".into(),
            max_body_bytes: 64 * 1024,
            event_buffer: 256,
            seed_tasks: true,
        }
    }
}

pub fn load_settings() -> anyhow::Result<Settings> {
    load_settings_from(Path::new(SETTINGS_FILE))
}

/// Defaults, then the optional TOML file, then `APP__*` variables, then the
/// bare `SERVER_BIND` / `DATABASE_URL` overrides.
pub fn load_settings_from(path: &Path) -> anyhow::Result<Settings> {
    let defaults = Settings::default();
    let settings = Config::builder()
        .set_default("server_bind", defaults.server_bind)?
        .set_default("database_url", defaults.database_url)?
        .set_default("max_body_bytes", defaults.max_body_bytes as i64)?
        .set_default("event_buffer", defaults.event_buffer as i64)?
        .set_default("seed_tasks", defaults.seed_tasks)?
        .add_source(File::from(path).format(FileFormat::Toml).required(false))
        .add_source(
            Environment::with_prefix("APP")
                .separator("__")
                .try_parsing(true),
        )
        .set_override_option("server_bind", env::var("SERVER_BIND").ok())?
        .set_override_option("database_url", env::var("DATABASE_URL").ok())?
        .build()
        .with_context(|| format!("failed to load settings from '{}'", path.display()))?
        .try_deserialize::<Settings>()
        .context("invalid server settings")?;
    Ok(settings)
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    ensure_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

pub(crate) fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:") || raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    let path = raw_database_url
        .strip_prefix("sqlite:")
        .unwrap_or(raw_database_url)
        .replace('\\', "/");
    format!("sqlite://{path}")
}

fn ensure_parent_dir_exists(database_url: &str) -> anyhow::Result<()> {
    let Some(parent) = sqlite_path(database_url).and_then(|path| path.parent().map(Path::to_path_buf))
    else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    fs::create_dir_all(&parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") {
        return None;
    }

    let path = database_url
        .strip_prefix("sqlite://")?
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(PathBuf::from(path))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
