//! Trigger actions: discovery, registration and best-effort fan-out.
//!
//! Plugins are plain directories under the plugins dir, each holding a
//! `plugin.toml`. The manifest's `kind` is looked up in an explicit
//! [`ActionFactory`] registration table built at startup, so nothing is
//! loaded at runtime beyond configuration. Discovery runs once; there is no
//! hot-reload.

pub mod builtins;
pub mod error;
pub mod manifest;
pub mod trait_def;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub use error::ActionError;
pub use manifest::ActionManifest;
pub use trait_def::{ActionContext, AlarmAction};

/// Per-action time budget used when none is configured.
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(120);

/// Builds an action from its name and manifest `[config]` table.
pub type ActionConstructor =
    fn(&str, &toml::Table) -> Result<Box<dyn AlarmAction>, ActionError>;

/// Registration table mapping a manifest `kind` to its constructor.
pub struct ActionFactory {
    kinds: HashMap<String, ActionConstructor>,
}

impl ActionFactory {
    /// A table with no kinds registered.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            kinds: HashMap::new(),
        }
    }

    /// A table with the built-in `command`, `notify`, `sound` and `log` kinds.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut factory = Self::empty();
        factory.register_kind("command", builtins::CommandAction::from_config);
        factory.register_kind("notify", builtins::NotifyAction::from_config);
        factory.register_kind("sound", builtins::SoundAction::from_config);
        factory.register_kind("log", builtins::LogAction::from_config);
        factory
    }

    /// Add or replace a kind.
    pub fn register_kind(&mut self, kind: &str, constructor: ActionConstructor) {
        self.kinds.insert(kind.to_owned(), constructor);
    }

    /// Registered kinds, sorted.
    #[must_use]
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.kinds.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Construct the action a manifest describes.
    pub fn build(&self, manifest: &ActionManifest) -> Result<Box<dyn AlarmAction>, ActionError> {
        let constructor = self
            .kinds
            .get(&manifest.kind)
            .ok_or_else(|| ActionError::UnknownKind {
                kind: manifest.kind.clone(),
            })?;
        constructor(manifest.action_name(), &manifest.config)
    }
}

impl Default for ActionFactory {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// The active set of initialized actions.
pub struct ActionRegistry {
    actions: Vec<Arc<dyn AlarmAction>>,
    action_timeout: Duration,
}

impl ActionRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            actions: Vec::new(),
            action_timeout: DEFAULT_ACTION_TIMEOUT,
        }
    }

    /// Budget for a single action's `execute`; overruns are abandoned and logged.
    #[must_use]
    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = timeout;
        self
    }

    /// Scan `plugins_dir` and register every valid, enabled plugin.
    ///
    /// Directories whose names start with `_` or `.` are ignored. Invalid
    /// manifests, unknown kinds and failed initializations are logged and
    /// skipped; they never abort discovery of the remaining plugins.
    pub async fn discover(&mut self, plugins_dir: &Path, factory: &ActionFactory) -> usize {
        let entries = match std::fs::read_dir(plugins_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %plugins_dir.display(), error = %e, "plugins directory unavailable");
                return 0;
            }
        };

        let mut dirs: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_dir())
            .collect();
        dirs.sort();

        let mut registered = 0;
        for dir in dirs {
            let Some(dir_name) = dir.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            if dir_name.starts_with('_') || dir_name.starts_with('.') {
                debug!(plugin = %dir_name, "skipping private plugin directory");
                continue;
            }

            let manifest = match ActionManifest::load_from_dir(&dir) {
                Ok(m) => m,
                Err(e) => {
                    warn!(plugin = %dir_name, error = %e, "skipping plugin");
                    continue;
                }
            };
            if !manifest.enabled {
                info!(plugin = %dir_name, "plugin disabled");
                continue;
            }
            let action = match factory.build(&manifest) {
                Ok(a) => a,
                Err(e) => {
                    warn!(plugin = %dir_name, error = %e, "skipping plugin");
                    continue;
                }
            };
            if self.register(action).await {
                registered += 1;
            }
        }

        info!(dir = %plugins_dir.display(), registered, "action discovery complete");
        registered
    }

    /// Initialize `action` and add it to the active set.
    ///
    /// Returns `false` (and logs) when initialization fails or the name is taken.
    pub async fn register(&mut self, mut action: Box<dyn AlarmAction>) -> bool {
        let name = action.name().to_owned();
        if self.actions.iter().any(|a| a.name() == name) {
            warn!(action = %name, "duplicate action name, keeping the first");
            return false;
        }
        if let Err(e) = action.initialize().await {
            warn!(action = %name, error = %e, "action failed to initialize");
            return false;
        }
        debug!(action = %name, "action registered");
        self.actions.push(Arc::from(action));
        true
    }

    /// Names of the active actions, in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.actions.iter().map(|a| a.name().to_owned()).collect()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn AlarmAction>> {
        self.actions.iter().find(|a| a.name() == name).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Fire every active action (or those named in `allowed`) for `alarm_id`.
    ///
    /// Actions run concurrently, each under the registry's time budget.
    /// Failures, timeouts and panics are logged per action and do not stop
    /// the others. There is no aggregate result.
    pub async fn execute_all(
        &self,
        alarm_id: &str,
        ctx: &ActionContext,
        allowed: Option<&[String]>,
    ) {
        let selected: Vec<Arc<dyn AlarmAction>> = match allowed {
            Some(names) if !names.is_empty() => {
                for name in names {
                    if !self.actions.iter().any(|a| a.name() == name) {
                        warn!(alarm_id, action = %name, "requested action is not active");
                    }
                }
                self.actions
                    .iter()
                    .filter(|a| names.iter().any(|n| n == a.name()))
                    .cloned()
                    .collect()
            }
            _ => self.actions.clone(),
        };

        if selected.is_empty() {
            warn!(alarm_id, "no actions to execute");
            return;
        }

        let timeout = self.action_timeout;
        let mut set = JoinSet::new();
        for action in selected {
            let alarm_id = alarm_id.to_owned();
            let ctx = ctx.clone();
            set.spawn(async move {
                let name = action.name().to_owned();
                match tokio::time::timeout(timeout, action.execute(&alarm_id, &ctx)).await {
                    Ok(Ok(())) => info!(alarm_id = %alarm_id, action = %name, "action executed"),
                    Ok(Err(e)) => error!(alarm_id = %alarm_id, action = %name, error = %e, "action failed"),
                    Err(_) => {
                        let e = ActionError::Timeout {
                            action: name.clone(),
                            timeout_secs: timeout.as_secs(),
                        };
                        error!(alarm_id = %alarm_id, action = %name, error = %e, "action abandoned");
                    }
                }
            });
        }

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                error!(alarm_id, error = %e, "action task panicked");
            }
        }
    }

    /// Run every action's `cleanup`, isolating failures.
    pub async fn cleanup(&self) {
        for action in &self.actions {
            if let Err(e) = action.cleanup().await {
                warn!(action = %action.name(), error = %e, "action cleanup failed");
            }
        }
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
