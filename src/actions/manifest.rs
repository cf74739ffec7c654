//! Action plugin manifest (`plugin.toml`).
//!
//! Every plugin directory under the configured plugins dir carries one
//! `plugin.toml` naming the action kind and holding its configuration.
//!
//! # Example `plugin.toml`
//!
//! ```toml
//! kind = "notify"
//! name = "desktop"
//! enabled = true
//!
//! [config]
//! host = "localhost"
//! port = 5000
//! ```

use std::path::Path;

use serde::Deserialize;

use super::error::ActionError;

/// Manifest file name inside a plugin directory.
pub const MANIFEST_FILE: &str = "plugin.toml";

/// Parsed `plugin.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionManifest {
    /// Registered action kind (`command`, `notify`, `sound`, `log`, ...).
    pub kind: String,

    /// Action name; defaults to the plugin directory name.
    #[serde(default)]
    pub name: Option<String>,

    /// Disabled plugins are skipped during discovery.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Kind-specific settings, handed to the kind's constructor untouched.
    #[serde(default)]
    pub config: toml::Table,
}

fn default_enabled() -> bool {
    true
}

impl ActionManifest {
    /// Parse manifest text.
    pub fn parse(content: &str, dir_label: &str) -> Result<Self, ActionError> {
        let manifest: Self = toml::from_str(content).map_err(|e| ActionError::Manifest {
            dir: dir_label.to_owned(),
            reason: e.to_string(),
        })?;
        if manifest.kind.trim().is_empty() {
            return Err(ActionError::Manifest {
                dir: dir_label.to_owned(),
                reason: "`kind` must not be empty".to_owned(),
            });
        }
        Ok(manifest)
    }

    /// Load `plugin.toml` from a plugin directory, filling in the name from
    /// the directory when the manifest omits it.
    pub fn load_from_dir(dir: &Path) -> Result<Self, ActionError> {
        let label = dir.display().to_string();
        let path = dir.join(MANIFEST_FILE);
        let content = std::fs::read_to_string(&path).map_err(|e| ActionError::Manifest {
            dir: label.clone(),
            reason: format!("cannot read {MANIFEST_FILE}: {e}"),
        })?;
        let mut manifest = Self::parse(&content, &label)?;
        if manifest.name.as_deref().is_none_or(|n| n.trim().is_empty()) {
            manifest.name = dir.file_name().map(|n| n.to_string_lossy().into_owned());
        }
        Ok(manifest)
    }

    /// Resolved action name.
    #[must_use]
    pub fn action_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.kind)
    }
}
