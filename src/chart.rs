use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use minijinja::{Environment, UndefinedBehavior};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A config template plus the values to render it with.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Chart {
    pub config_template_path: PathBuf,
    #[serde(default)]
    pub values: Map<String, Value>,
}

impl Chart {
    /// Load a chart. A relative template path is taken relative to the chart file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read chart file: {}", path.display()))?;
        let mut chart: Chart = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse chart YAML: {}", path.display()))?;
        if chart.config_template_path.is_relative()
            && let Some(parent) = path.parent()
        {
            chart.config_template_path = parent.join(&chart.config_template_path);
        }
        Ok(chart)
    }

    pub fn render(&self) -> Result<String> {
        let template = std::fs::read_to_string(&self.config_template_path).with_context(|| {
            format!(
                "Failed to read config template: {}",
                self.config_template_path.display()
            )
        })?;
        render_template(&template, &self.values).with_context(|| {
            format!(
                "Failed to render config template: {}",
                self.config_template_path.display()
            )
        })
    }
}

/// Render a Jinja template against the chart values. Referencing a value
/// that is not defined is an error rather than an empty string.
pub fn render_template(template: &str, values: &Map<String, Value>) -> Result<String> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);
    let rendered = env.render_str(template, values)?;
    Ok(rendered)
}
