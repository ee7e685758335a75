use std::io::Write;
use std::path::Path;
use std::process::{Output, Stdio};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};

use crate::markup::format_for_inline;
use crate::{
    DiagramLibrary, LoadError, RenderConfig, RenderFailure, Script, ScriptSource,
    DEFAULT_LOAD_TIMEOUT,
};

/// The mermaid command line renderer.
pub const DEFAULT_COMMAND: &str = "mmdc";

/// Loads the mermaid CLI instead of the browser script: it checks that the command
/// runs and hands its version banner on as the script body.
pub struct CommandScriptSource {
    command: String,
    timeout: Duration,
}

impl CommandScriptSource {
    pub fn new<S: Into<String>>(command: S) -> Self {
        Self {
            command: command.into(),
            timeout: DEFAULT_LOAD_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn version(&self) -> Result<String> {
        let output = Command::new(&self.command)
            .arg("--version")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.command))?;

        if !output.status.success() {
            bail!("{} --version exited with {}", self.command, output.status);
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl Default for CommandScriptSource {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND)
    }
}

impl ScriptSource for CommandScriptSource {
    async fn load(&self, url: &str) -> Result<Script, LoadError> {
        let version = tokio::time::timeout(self.timeout, self.version())
            .await
            .map_err(|_| {
                LoadError::new(
                    url,
                    format!("{} did not answer within {:?}", self.command, self.timeout),
                )
            })?
            .map_err(|e| LoadError::new(url, format!("{e:#}")))?;

        log::debug!("Found {} {version}", self.command);

        Ok(Script::new(url, version))
    }
}

/// Renders diagrams by running the mermaid CLI once per diagram.
pub struct CommandLibrary {
    command: String,
    arguments: Vec<String>,
    config: Mutex<Option<RenderConfig>>,
}

impl CommandLibrary {
    pub fn new<S: Into<String>>(command: S) -> Self {
        Self {
            command: command.into(),
            arguments: vec![],
            config: Mutex::new(None),
        }
    }

    /// Extra arguments passed after the ones this library needs, e.g. a puppeteer config.
    pub fn with_arguments(mut self, arguments: Vec<String>) -> Self {
        self.arguments = arguments;
        self
    }

    fn command_arguments(&self, id: &str, config_file: &Path) -> Vec<String> {
        let mut arguments = [
            "-q", "-i", "-", "-o", "-", "-e", "svg", "-I", id, "-c",
        ]
        .map(str::to_string)
        .to_vec();
        arguments.push(config_file.to_string_lossy().into_owned());
        arguments.extend(self.arguments.iter().cloned());

        arguments
    }

    async fn run(&self, id: &str, source: &str) -> Result<Output> {
        let config = self
            .config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| anyhow!("{} used before it was initialized", self.command))?;

        // lives until the command is done with it
        let mut config_file = tempfile::Builder::new()
            .prefix("mermaid-config-")
            .suffix(".json")
            .tempfile()
            .context("Failed to create the mermaid config file")?;
        serde_json::to_writer(&mut config_file, &config)?;
        config_file.flush()?;

        let output = call_command(
            &self.command,
            &self.command_arguments(id, config_file.path()),
            source,
        )
        .await
        .with_context(|| format!("Failed to run {}", self.command))?
        .wait_with_output()
        .await?;

        Ok(output)
    }
}

impl Default for CommandLibrary {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND)
    }
}

impl DiagramLibrary for CommandLibrary {
    fn initialize(&self, config: &RenderConfig, script: &Script) {
        log::debug!("Rendering with {} {}", self.command, script.body());
        *self.config.lock().unwrap_or_else(PoisonError::into_inner) = Some(config.clone());
    }

    async fn render(&self, id: &str, source: &str) -> Result<String, RenderFailure> {
        let output = self
            .run(id, source)
            .await
            .map_err(|e| RenderFailure::new(format!("{e:#}")))?;

        if output.status.success() {
            String::from_utf8(output.stdout)
                .map(|svg| format_for_inline(&svg))
                .map_err(|e| {
                    RenderFailure::new(format!("{} returned invalid SVG: {e}", self.command))
                })
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = match stderr.trim() {
                "" => format!("{} exited with {}", self.command, output.status),
                stderr => stderr.to_string(),
            };

            Err(RenderFailure::new(message))
        }
    }
}

async fn call_command(command: &str, arguments: &[String], source: &str) -> Result<Child> {
    let mut child = Command::new(command)
        .args(arguments)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(source.as_bytes()).await?;
    }

    Ok(child)
}
