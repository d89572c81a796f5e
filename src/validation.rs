use serde::Serialize;

use crate::config::{PipelineConfig, PipelineSpec, SUPPORTED_VERSION};
use crate::input::InputSource;
use crate::step::Step;

#[derive(Debug, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

/// Checks that must pass before any pipeline starts. Unknown step and input
/// kinds never get this far; they fail when the YAML is parsed.
pub fn validate_config(config: &PipelineConfig) -> ValidationReport {
    let mut report = ValidationReport::default();

    if config.version != SUPPORTED_VERSION {
        report
            .errors
            .push(format!("Unsupported config version: {}", config.version));
    }

    if config.output_root.as_os_str().is_empty() {
        report.errors.push("Output root cannot be empty".into());
    }

    if config.pipelines.is_empty() {
        report
            .errors
            .push("At least one pipeline is required".into());
    }

    if config.uses_manual_download() {
        match &config.downloads {
            None => report.errors.push(
                "Manual download inputs require a 'downloads' section with a directory".into(),
            ),
            Some(downloads) => {
                if downloads.directory.as_os_str().is_empty() {
                    report
                        .errors
                        .push("Downloads directory cannot be empty".into());
                } else if !downloads.directory.is_dir() {
                    report.warnings.push(format!(
                        "Downloads directory '{}' does not exist yet",
                        downloads.directory.display()
                    ));
                }
                if downloads.poll_interval_ms == 0 {
                    report
                        .errors
                        .push("Download poll interval must be greater than zero".into());
                }
                if downloads.stable_polls == 0 {
                    report
                        .errors
                        .push("Download stable polls must be at least 1".into());
                }
                if downloads.max_wait_secs == Some(0) {
                    report
                        .errors
                        .push("Download max wait must be greater than zero when set".into());
                }
            }
        }
    }

    if config.uses_catalog() && config.catalog.is_none() {
        report
            .errors
            .push("Catalogued episode inputs require a 'catalog' section".into());
    }

    for (name, spec) in &config.pipelines {
        report.merge(validate_pipeline(name, spec));
    }

    report
}

fn validate_pipeline(name: &str, spec: &PipelineSpec) -> ValidationReport {
    let mut report = ValidationReport::default();

    if name.trim().is_empty() {
        report.errors.push("Pipeline names cannot be empty".into());
    } else if name.contains(['/', '\\']) || name == "." || name == ".." {
        report.errors.push(format!(
            "Pipeline '{name}' must be usable as a directory name"
        ));
    }

    match &spec.input {
        InputSource::LocalPath { path } => {
            if path.as_os_str().is_empty() {
                report
                    .errors
                    .push(format!("Pipeline '{name}': input path cannot be empty"));
            } else if !path.is_file() {
                report.warnings.push(format!(
                    "Pipeline '{name}': input '{}' does not exist yet",
                    path.display()
                ));
            }
        }
        InputSource::ManualDownload { link } => {
            if link.trim().is_empty() {
                report
                    .errors
                    .push(format!("Pipeline '{name}': download link cannot be empty"));
            } else if !link.contains("://") {
                report.warnings.push(format!(
                    "Pipeline '{name}': download link '{link}' has no scheme"
                ));
            }
        }
        InputSource::CataloguedEpisode { show, episode, .. } => {
            if show.trim().is_empty() {
                report
                    .errors
                    .push(format!("Pipeline '{name}': show cannot be empty"));
            }
            if *episode == 0 {
                report
                    .errors
                    .push(format!("Pipeline '{name}': episodes are numbered from 1"));
            }
        }
    }

    for (idx, step) in spec.steps.iter().enumerate() {
        match step {
            Step::Trim { start, end } => {
                if start >= end {
                    report.errors.push(format!(
                        "Pipeline '{name}' step {idx} (trim): start {start} must be before end {end}"
                    ));
                }
            }
            Step::Upscale { width } => {
                if *width == 0 {
                    report.errors.push(format!(
                        "Pipeline '{name}' step {idx} (upscale): width must be greater than zero"
                    ));
                } else if width % 2 != 0 {
                    report.warnings.push(format!(
                        "Pipeline '{name}' step {idx} (upscale): odd width {width} is rejected by most encoders"
                    ));
                }
            }
        }
    }

    if spec.steps.is_empty() {
        report.warnings.push(format!(
            "Pipeline '{name}' has no steps; its input is the final artifact"
        ));
    }

    report
}
