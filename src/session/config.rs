//! Session configuration.
//!
//! The editor-side configuration parser runs outside this crate; its output
//! arrives pre-validated inside the DAP `launch`/`attach` request and is
//! deserialized here. Default path mappings for bundler and extension URL
//! schemes are injected at that point.

use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Launch,
    Attach,
}

/// One `{url-pattern, path-prefix}` entry. The pattern is either a literal
/// URL prefix or an anchored regular expression.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum UrlPattern {
    Prefix(String),
    Regex { regex: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathMapping {
    pub url: UrlPattern,
    pub path: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TabFilter {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddonConfig {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LaunchConfig {
    pub request: RequestKind,
    pub host: String,
    pub port: u16,
    pub path_mappings: Vec<PathMapping>,
    pub files_to_skip: Vec<String>,
    pub addon: Option<AddonConfig>,
    pub tab_filter: TabFilter,
    /// Close the browser when the session ends.
    pub terminate: bool,
    pub clear_console_on_reload: bool,
    pub show_console_call_location: bool,
    /// Keep the browser alive across editor sessions; the next attach reuses
    /// the same debugger port.
    pub re_attach: bool,
    /// Reload tabs found by the first enumeration after connect.
    pub reload_tabs: bool,
    pub firefox_executable: Option<String>,
    pub firefox_args: Vec<String>,
    pub profile_dir: Option<PathBuf>,
    /// Temporary directories the launcher created; removed at shutdown.
    pub temp_dirs: Vec<PathBuf>,
    pub launch_timeout_ms: u64,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            request: RequestKind::Attach,
            host: "127.0.0.1".to_string(),
            port: 6000,
            path_mappings: Vec::new(),
            files_to_skip: Vec::new(),
            addon: None,
            tab_filter: TabFilter::default(),
            terminate: true,
            clear_console_on_reload: false,
            show_console_call_location: true,
            re_attach: false,
            reload_tabs: false,
            firefox_executable: None,
            firefox_args: Vec::new(),
            profile_dir: None,
            temp_dirs: Vec::new(),
            launch_timeout_ms: 5000,
        }
    }
}

impl LaunchConfig {
    /// Whether an editor disconnect tears the browser down. `reAttach` keeps
    /// it alive so the next session can reuse the debugger port.
    pub fn terminate_on_disconnect(&self) -> bool {
        self.terminate && !self.re_attach
    }

    pub fn from_arguments(arguments: &serde_json::Value) -> Result<Self, serde_json::Error> {
        let mut config: LaunchConfig = serde_json::from_value(arguments.clone())?;
        config.install_default_mappings();
        Ok(config)
    }

    /// Mappings every session gets, appended after the user's own so the
    /// user's entries win (first match wins).
    fn install_default_mappings(&mut self) {
        let defaults = [
            ("webpack:///~/", "${workspaceFolder}/node_modules/"),
            ("webpack:///./", "${workspaceFolder}/"),
        ];
        for (url, path) in defaults {
            let already = self.path_mappings.iter().any(|m| match &m.url {
                UrlPattern::Prefix(p) => p == url,
                UrlPattern::Regex { .. } => false,
            });
            if !already {
                self.path_mappings.push(PathMapping {
                    url: UrlPattern::Prefix(url.to_string()),
                    path: path.to_string(),
                });
            }
        }
        if let Some(addon) = &self.addon {
            // Extension resources resolve into the addon source tree.
            self.path_mappings.push(PathMapping {
                url: UrlPattern::Prefix("moz-extension://".to_string()),
                path: format!("{}/", addon.path.trim_end_matches('/')),
            });
        }
    }
}
