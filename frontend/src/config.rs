use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::submit::GENERATE_PATH;

/// Storage key under which eframe persists the settings.
pub const CONFIG_KEY: &str = "deckgen_config";

#[cfg(not(target_arch = "wasm32"))]
const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8000";

/// Connection and output settings. Form inputs are deliberately not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server_url: String,
    /// Native only: where generated decks are written.
    pub output_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            output_dir: None,
        }
    }
}

impl AppConfig {
    /// Restores the persisted settings, then applies environment overrides.
    pub fn load(storage: Option<&dyn eframe::Storage>) -> Self {
        let config: Self = storage
            .and_then(|storage| eframe::get_value(storage, CONFIG_KEY))
            .unwrap_or_default();

        #[cfg(not(target_arch = "wasm32"))]
        let config = config.with_overrides(|key| std::env::var(key).ok());

        config
    }

    pub fn save(&self, storage: &mut dyn eframe::Storage) {
        eframe::set_value(storage, CONFIG_KEY, self);
    }

    /// `DECKGEN_SERVER_URL` and `DECKGEN_OUTPUT_DIR`; empty values are ignored.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup("DECKGEN_SERVER_URL").filter(|v| !v.trim().is_empty()) {
            self.server_url = url;
        }
        if let Some(dir) = lookup("DECKGEN_OUTPUT_DIR").filter(|v| !v.trim().is_empty()) {
            self.output_dir = Some(PathBuf::from(dir));
        }
        self
    }

    pub fn generate_url(&self) -> String {
        format!("{}{}", self.server_url.trim().trim_end_matches('/'), GENERATE_PATH)
    }

    #[cfg(not(target_arch = "wasm32"))]
    pub fn resolved_output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .or_else(dirs::download_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn default_server_url() -> String {
    DEFAULT_SERVER_URL.to_string()
}

/// The page origin, so `/generate` goes to the host that served the app.
#[cfg(target_arch = "wasm32")]
fn default_server_url() -> String {
    web_sys::window()
        .and_then(|window| window.location().origin().ok())
        .unwrap_or_default()
}
