use serde::{Deserialize, Serialize};

pub const DEFAULT_API_URL: &str = "http://localhost:6689";
pub const DEFAULT_TEXT_DEBOUNCE_MS: u32 = 400;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct EditorConfig {
    pub api_url: String,

    /// Debounce for free-text fields and design tokens.
    pub text_debounce_ms: u32,
    /// Debounce for add/delete/reorder; zero means "on the next turn".
    pub structural_debounce_ms: u32,

    /// A commit still running after this long is reported as failed.
    pub commit_timeout_ms: Option<u32>,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            text_debounce_ms: DEFAULT_TEXT_DEBOUNCE_MS,
            structural_debounce_ms: 0,
            commit_timeout_ms: None,
        }
    }
}

impl EditorConfig {
    /// Apply overrides from a key/value source. Unparseable values are ignored.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        // README style first, then the legacy lower-case key.
        if let Some(url) = lookup("API_URL").or_else(|| lookup("api_url")) {
            let url = url.trim();
            if !url.is_empty() {
                self.api_url = url.to_string();
            }
        }

        if let Some(ms) = lookup("TEXT_DEBOUNCE_MS").and_then(|v| v.trim().parse().ok()) {
            self.text_debounce_ms = ms;
        }

        if let Some(v) = lookup("COMMIT_TIMEOUT_MS") {
            // `0` disables the bound.
            self.commit_timeout_ms = match v.trim().parse::<u32>() {
                Ok(0) => None,
                Ok(ms) => Some(ms),
                Err(_) => self.commit_timeout_ms,
            };
        }

        self
    }

    /// Read `window.ENV` in the browser; defaults everywhere else.
    pub fn from_env() -> Self {
        #[cfg(target_arch = "wasm32")]
        {
            if let Some(env) = web_sys::window().and_then(|w| w.get("ENV")) {
                if !env.is_undefined() && env.is_object() {
                    return Self::default().with_overrides(|key| {
                        let v = js_sys::Reflect::get(&env, &key.into()).ok()?;
                        v.as_string().or_else(|| v.as_f64().map(|n| n.to_string()))
                    });
                }
            }
        }

        Self::default()
    }
}
