use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::store::InsertOrder;
use crate::error::{Error, Result};
use crate::session::SessionOptions;
use crate::sync::TableScope;

pub const URL_ENV: &str = "TASKBOARD_URL";
pub const ANON_KEY_ENV: &str = "TASKBOARD_ANON_KEY";

fn default_schema() -> String {
    "public".into()
}

fn default_table() -> String {
    "tasks".into()
}

fn default_bucket() -> String {
    "tasks-images".into()
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Config {
    /// Project URL, e.g. `https://abc.supabase.co`.
    #[serde(default)]
    pub url: String,
    /// Public (anon) API key of the project.
    #[serde(default)]
    pub anon_key: String,
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default = "default_true")]
    pub realtime: bool,
    #[serde(default = "default_true")]
    pub optimistic: bool,
    #[serde(default)]
    pub insert_order: InsertOrder,
    #[serde(default)]
    pub debug_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: String::new(),
            anon_key: String::new(),
            schema: default_schema(),
            table: default_table(),
            bucket: default_bucket(),
            realtime: true,
            optimistic: true,
            insert_order: InsertOrder::Append,
            debug_logging: false,
        }
    }
}

impl Config {
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("taskboard")
            .join("config.json")
    }

    /// Load the config file (defaults when it does not exist) and apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::path())?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::path())
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var(URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.url = url.trim().to_string();
        }
        if let Some(key) = var(ANON_KEY_ENV).filter(|v| !v.trim().is_empty()) {
            self.anon_key = key.trim().to_string();
        }
    }

    /// Fail early when the backend cannot be reached at all.
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(Error::Config(format!(
                "no backend url; set \"url\" in {} or {}",
                Self::path().display(),
                URL_ENV
            )));
        }
        if self.anon_key.trim().is_empty() {
            return Err(Error::Config(format!(
                "no anon key; set \"anon_key\" in {} or {}",
                Self::path().display(),
                ANON_KEY_ENV
            )));
        }
        Ok(())
    }

    pub fn scope(&self) -> TableScope {
        TableScope::new(self.schema.clone(), self.table.clone())
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            optimistic: self.optimistic,
            insert_order: self.insert_order,
        }
    }
}
