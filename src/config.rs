use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::chart::Chart;
use crate::input::InputSource;
use crate::step::Step;
use crate::tools::DEFAULT_FFMPEG;
use crate::watcher::{DEFAULT_POLL_INTERVAL, DEFAULT_STABLE_POLLS, WatchSettings};

pub const SUPPORTED_VERSION: u32 = 1;

/// A loaded set of named pipelines plus the settings shared between them.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    pub output_root: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloads: Option<DownloadSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog: Option<CatalogSettings>,
    #[serde(default)]
    pub tools: ToolSettings,
    /// Declared order is execution order.
    pub pipelines: IndexMap<String, PipelineSpec>,
}

fn default_version() -> u32 {
    SUPPORTED_VERSION
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_yaml_str(&content)
            .with_context(|| format!("Failed to parse config YAML: {}", path.display()))
    }

    /// Render the chart's template with its values and parse the result.
    pub fn load_chart(chart_path: &Path) -> Result<Self> {
        let chart = Chart::load(chart_path)?;
        let rendered = chart.render()?;
        Self::from_yaml_str(&rendered).with_context(|| {
            format!(
                "Failed to parse config rendered from {}",
                chart.config_template_path.display()
            )
        })
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }

    pub fn pipeline_dir(&self, name: &str) -> PathBuf {
        self.output_root.join(name)
    }

    pub fn uses_manual_download(&self) -> bool {
        self.pipelines
            .values()
            .any(|spec| matches!(spec.input, InputSource::ManualDownload { .. }))
    }

    pub fn uses_catalog(&self) -> bool {
        self.pipelines
            .values()
            .any(|spec| matches!(spec.input, InputSource::CataloguedEpisode { .. }))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineSpec {
    pub input: InputSource,
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Free-form annotations carried into reports untouched.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownloadSettings {
    pub directory: PathBuf,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_stable_polls")]
    pub stable_polls: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_wait_secs: Option<u64>,
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_stable_polls() -> u32 {
    DEFAULT_STABLE_POLLS
}

impl DownloadSettings {
    pub fn watch_settings(&self) -> WatchSettings {
        WatchSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            stable_polls: self.stable_polls,
            max_wait: self.max_wait_secs.map(Duration::from_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CatalogSettings {
    pub library: PathBuf,
    #[serde(default = "default_catalog_pattern")]
    pub pattern: String,
}

fn default_catalog_pattern() -> String {
    "{show}/Season {season:02}/*S{season:02}E{episode:02}*".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolSettings {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: PathBuf,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
        }
    }
}

fn default_ffmpeg() -> PathBuf {
    PathBuf::from(DEFAULT_FFMPEG)
}
