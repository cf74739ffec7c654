//! Built-in action kinds and their constructors.
//!
//! | kind | behaviour |
//! |------|-----------|
//! | `command` | run a program; `{alarm_id}` and `{message}` are substituted into its args |
//! | `notify` | POST `{"message": ...}` to a notification server |
//! | `sound` | play a sound file through an external player, `repeat` times |
//! | `log` | emit a warning line |

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::error::ActionError;
use super::trait_def::{ActionContext, AlarmAction};

/// Deserialize a manifest `[config]` table into a kind's config struct.
fn parse_config<T: DeserializeOwned>(action: &str, config: &toml::Table) -> Result<T, ActionError> {
    T::deserialize(toml::Value::Table(config.clone())).map_err(|e| ActionError::InvalidConfig {
            action: action.to_owned(),
            reason: e.to_string(),
        })
}

fn substitute(template: &str, alarm_id: &str, ctx: &ActionContext) -> String {
    template
        .replace("{alarm_id}", alarm_id)
        .replace("{message}", &ctx.message)
}

async fn run_program(
    action: &str,
    program: &str,
    args: &[String],
) -> Result<(), ActionError> {
    let status = tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await
        .map_err(|e| ActionError::Execute {
            action: action.to_owned(),
            reason: format!("cannot spawn `{program}`: {e}"),
        })?;
    if status.success() {
        Ok(())
    } else {
        Err(ActionError::Execute {
            action: action.to_owned(),
            reason: format!("`{program}` exited with {status}"),
        })
    }
}

// ---------------------------------------------------------------------------
// command
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct CommandConfig {
    program: String,
    #[serde(default)]
    args: Vec<String>,
}

/// Runs a configured program for every alarm.
pub struct CommandAction {
    name: String,
    config: CommandConfig,
}

impl CommandAction {
    pub fn from_config(name: &str, config: &toml::Table) -> Result<Box<dyn AlarmAction>, ActionError> {
        let config: CommandConfig = parse_config(name, config)?;
        if config.program.trim().is_empty() {
            return Err(ActionError::InvalidConfig {
                action: name.to_owned(),
                reason: "`program` must not be empty".to_owned(),
            });
        }
        Ok(Box::new(Self {
            name: name.to_owned(),
            config,
        }))
    }
}

#[async_trait]
impl AlarmAction for CommandAction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, alarm_id: &str, ctx: &ActionContext) -> Result<(), ActionError> {
        let args: Vec<String> = self
            .config
            .args
            .iter()
            .map(|a| substitute(a, alarm_id, ctx))
            .collect();
        debug!(action = %self.name, program = %self.config.program, "running alarm command");
        run_program(&self.name, &self.config.program, &args).await
    }
}

// ---------------------------------------------------------------------------
// notify
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct NotifyConfig {
    /// Full endpoint URL; overrides `host`/`port` when set.
    url: Option<String>,
    host: String,
    port: u16,
    timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".to_owned(),
            port: 5000,
            timeout_secs: 10,
        }
    }
}

/// Posts the alarm message to a notification server's `/notify` endpoint.
pub struct NotifyAction {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl NotifyAction {
    pub fn from_config(name: &str, config: &toml::Table) -> Result<Box<dyn AlarmAction>, ActionError> {
        let config: NotifyConfig = parse_config(name, config)?;
        let url = config
            .url
            .unwrap_or_else(|| format!("http://{}:{}/notify", config.host, config.port));
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| ActionError::InvalidConfig {
                action: name.to_owned(),
                reason: e.to_string(),
            })?;
        Ok(Box::new(Self {
            name: name.to_owned(),
            url,
            client,
        }))
    }
}

#[async_trait]
impl AlarmAction for NotifyAction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, alarm_id: &str, ctx: &ActionContext) -> Result<(), ActionError> {
        let message = if ctx.message.is_empty() {
            format!("Alarm {alarm_id}")
        } else {
            ctx.message.clone()
        };
        let resp = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "message": message }))
            .send()
            .await
            .map_err(|e| ActionError::Execute {
                action: self.name.clone(),
                reason: e.to_string(),
            })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ActionError::Execute {
                action: self.name.clone(),
                reason: format!("notification server answered HTTP {status}"),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// sound
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct SoundConfig {
    file: PathBuf,
    #[serde(default = "default_player")]
    player: String,
    #[serde(default)]
    player_args: Vec<String>,
    #[serde(default = "default_repeat")]
    repeat: u32,
}

fn default_player() -> String {
    "aplay".to_owned()
}

fn default_repeat() -> u32 {
    1
}

/// Plays a sound file through an external player program.
pub struct SoundAction {
    name: String,
    config: SoundConfig,
}

impl SoundAction {
    pub fn from_config(name: &str, config: &toml::Table) -> Result<Box<dyn AlarmAction>, ActionError> {
        let config: SoundConfig = parse_config(name, config)?;
        Ok(Box::new(Self {
            name: name.to_owned(),
            config,
        }))
    }
}

#[async_trait]
impl AlarmAction for SoundAction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&mut self) -> Result<(), ActionError> {
        if self.config.repeat == 0 {
            return Err(ActionError::Init {
                action: self.name.clone(),
                reason: "`repeat` must be at least 1".to_owned(),
            });
        }
        if !self.config.file.is_file() {
            return Err(ActionError::Init {
                action: self.name.clone(),
                reason: format!("sound file {} not found", self.config.file.display()),
            });
        }
        Ok(())
    }

    async fn execute(&self, _alarm_id: &str, _ctx: &ActionContext) -> Result<(), ActionError> {
        let mut args = self.config.player_args.clone();
        args.push(self.config.file.to_string_lossy().into_owned());
        for _ in 0..self.config.repeat {
            run_program(&self.name, &self.config.player, &args).await?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// log
// ---------------------------------------------------------------------------

/// Writes the alarm to the log. Needs no configuration.
pub struct LogAction {
    name: String,
}

impl LogAction {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
        }
    }

    pub fn from_config(name: &str, _config: &toml::Table) -> Result<Box<dyn AlarmAction>, ActionError> {
        Ok(Box::new(Self::new(name)))
    }
}

#[async_trait]
impl AlarmAction for LogAction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, alarm_id: &str, ctx: &ActionContext) -> Result<(), ActionError> {
        warn!(
            alarm_id,
            message = %ctx.message,
            trigger_time = %ctx.trigger_time,
            "ALARM"
        );
        Ok(())
    }
}
