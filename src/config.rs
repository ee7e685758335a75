use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    CommandLibrary, CommandScriptSource, HttpScriptSource, DEFAULT_CDN, DEFAULT_COMMAND,
    DEFAULT_LOAD_TIMEOUT, DEFAULT_RENDER_TIMEOUT,
};

/// The only theme name that changes the library configuration.
pub const DARK_THEME: &str = "dark";

/// Options handed to the library's `initialize`.
///
/// Everything but the theme is fixed; serializes to the library's own option names.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RenderConfig {
    security_level: &'static str,
    alt_font_family: &'static str,
    font_family: &'static str,
    start_on_load: bool,
    flowchart: FlowchartConfig,
    sequence: SequenceConfig,
    gantt: GanttConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    theme: Option<&'static str>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
struct FlowchartConfig {
    html_labels: bool,
    use_max_width: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
struct SequenceConfig {
    use_max_width: bool,
    diagram_margin_x: u32,
    diagram_margin_y: u32,
    box_margin: u32,
    show_sequence_numbers: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
struct GanttConfig {
    left_padding: u32,
    right_padding: u32,
}

impl RenderConfig {
    pub fn for_theme(theme: &str) -> Self {
        Self {
            // html labels need it
            security_level: "loose",
            alt_font_family: "sans-serif",
            font_family: "sans-serif",
            start_on_load: false,
            flowchart: FlowchartConfig {
                html_labels: true,
                use_max_width: true,
            },
            sequence: SequenceConfig {
                use_max_width: true,
                diagram_margin_x: 8,
                diagram_margin_y: 8,
                box_margin: 8,
                show_sequence_numbers: true,
            },
            gantt: GanttConfig {
                left_padding: 75,
                right_padding: 20,
            },
            theme: (theme == DARK_THEME).then_some(DARK_THEME),
        }
    }

    pub fn theme(&self) -> Option<&str> {
        self.theme
    }
}

/// User facing knobs, read from a TOML table.
///
/// ```toml
/// cdn = "https://unpkg.com/vditor@3.11.1"
/// theme = "dark"
/// root = "#preview"
/// render-timeout-ms = 10000
/// command = "mmdc"
/// arguments = ["-p", "puppeteer.json"]
/// ```
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct RenderSettings {
    pub cdn: String,
    pub theme: String,
    pub root: Option<String>,
    pub render_timeout_ms: Option<u64>,
    pub load_timeout_ms: Option<u64>,
    pub command: String,
    pub arguments: Vec<String>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            cdn: DEFAULT_CDN.to_string(),
            theme: "classic".to_string(),
            root: None,
            render_timeout_ms: None,
            load_timeout_ms: None,
            command: DEFAULT_COMMAND.to_string(),
            arguments: vec![],
        }
    }
}

impl RenderSettings {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid mermaid render settings")
    }

    pub fn render_timeout(&self) -> Duration {
        self.render_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_RENDER_TIMEOUT)
    }

    pub fn load_timeout(&self) -> Duration {
        self.load_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_LOAD_TIMEOUT)
    }

    /// Checks that the configured command runs, for [`command_library`](Self::command_library).
    pub fn script_source(&self) -> CommandScriptSource {
        CommandScriptSource::new(&self.command).with_timeout(self.load_timeout())
    }

    /// Downloads the script from the configured CDN, for libraries that evaluate it.
    pub fn http_script_source(&self) -> HttpScriptSource {
        HttpScriptSource::new(self.load_timeout())
    }

    pub fn command_library(&self) -> CommandLibrary {
        CommandLibrary::new(&self.command).with_arguments(self.arguments.clone())
    }
}
