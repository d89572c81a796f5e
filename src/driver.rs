use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, info, instrument, warn};

use crate::artifact::ArtifactRef;
use crate::cancel::CancellationToken;
use crate::catalog::CatalogResolver;
use crate::config::{PipelineConfig, PipelineSpec};
use crate::digest::compute_sha256;
use crate::error::WatchError;
use crate::executor::StepChainExecutor;
use crate::input::InputSource;
use crate::observability::MetricsCollector;
use crate::tools::{StepTools, UriLauncher};
use crate::watcher::DownloadWatcher;

/// What to do with the remaining pipelines after one fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Stop the whole batch at the first failure.
    #[default]
    Abort,
    /// Record the failure and move on to the next pipeline.
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub name: String,
    pub input: &'static str,
    pub status: PipelineStatus,
    pub steps: usize,
    pub artifact: Option<ArtifactRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriverReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub pipelines: Vec<PipelineOutcome>,
}

impl DriverReport {
    pub fn failed(&self) -> usize {
        self.pipelines
            .iter()
            .filter(|outcome| outcome.status == PipelineStatus::Failed)
            .count()
    }

    pub fn succeeded(&self) -> usize {
        self.pipelines.len() - self.failed()
    }
}

/// Runs every pipeline of a configuration, one after the other.
pub struct PipelineDriver<'a> {
    config: &'a PipelineConfig,
    tools: &'a dyn StepTools,
    launcher: &'a dyn UriLauncher,
    catalog: &'a dyn CatalogResolver,
    cancel: CancellationToken,
    policy: FailurePolicy,
    metrics: MetricsCollector,
    digests: bool,
}

impl<'a> PipelineDriver<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        tools: &'a dyn StepTools,
        launcher: &'a dyn UriLauncher,
        catalog: &'a dyn CatalogResolver,
    ) -> Self {
        Self {
            config,
            tools,
            launcher,
            catalog,
            cancel: CancellationToken::new(),
            policy: FailurePolicy::default(),
            metrics: MetricsCollector::new(),
            digests: false,
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    /// Record a SHA-256 of every final artifact in the report.
    pub fn with_digests(mut self, digests: bool) -> Self {
        self.digests = digests;
        self
    }

    pub fn metrics(&self) -> MetricsCollector {
        self.metrics.clone()
    }

    #[instrument(skip(self), fields(pipelines = self.config.pipelines.len(), policy = ?self.policy))]
    pub fn run_all(&self) -> Result<DriverReport> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut outcomes = Vec::with_capacity(self.config.pipelines.len());

        for (name, spec) in &self.config.pipelines {
            if self.cancel.is_cancelled() {
                self.metrics.record_total_duration(clock.elapsed());
                bail!("Run cancelled before pipeline '{name}'");
            }
            match self.run_pipeline(name, spec) {
                Ok(outcome) => {
                    self.metrics.record_pipeline(true);
                    outcomes.push(outcome);
                }
                Err(err) => {
                    self.metrics.record_pipeline(false);
                    error!(pipeline = name.as_str(), error = %format!("{err:#}"), "Pipeline failed");
                    if self.policy == FailurePolicy::Abort || is_cancellation(&err) {
                        self.metrics.record_total_duration(clock.elapsed());
                        return Err(err.context(format!("Pipeline '{name}' failed")));
                    }
                    outcomes.push(PipelineOutcome {
                        name: name.clone(),
                        input: spec.input.tag(),
                        status: PipelineStatus::Failed,
                        steps: spec.steps.len(),
                        artifact: None,
                        sha256: None,
                        error: Some(format!("{err:#}")),
                        metadata: spec.metadata.clone(),
                    });
                }
            }
        }

        self.metrics.record_total_duration(clock.elapsed());
        Ok(DriverReport {
            started_at,
            finished_at: Utc::now(),
            pipelines: outcomes,
        })
    }

    /// Resolve one pipeline's input and run its steps.
    pub fn run_pipeline(&self, name: &str, spec: &PipelineSpec) -> Result<PipelineOutcome> {
        info!(
            pipeline = name,
            input = spec.input.tag(),
            steps = spec.steps.len(),
            "Starting pipeline"
        );
        let initial = self
            .resolve_input(name, &spec.input)
            .with_context(|| format!("Failed to resolve {} input", spec.input.tag()))?;

        let executor =
            StepChainExecutor::new(self.tools, &self.config.output_root, self.metrics.clone());
        let artifact = executor.run(name, initial, &spec.steps)?;

        let sha256 = if self.digests {
            Some(compute_sha256(&artifact.output_path)?)
        } else {
            None
        };
        info!(
            pipeline = name,
            output = %artifact.output_path.display(),
            "Pipeline completed"
        );
        Ok(PipelineOutcome {
            name: name.to_string(),
            input: spec.input.tag(),
            status: PipelineStatus::Succeeded,
            steps: spec.steps.len(),
            artifact: Some(artifact),
            sha256,
            error: None,
            metadata: spec.metadata.clone(),
        })
    }

    pub fn resolve_input(&self, name: &str, input: &InputSource) -> Result<ArtifactRef> {
        match input {
            InputSource::LocalPath { path } => local_artifact(path),
            InputSource::ManualDownload { link } => {
                let downloads = self.config.downloads.as_ref().ok_or_else(|| {
                    anyhow!("Manual download requires a 'downloads' section in the config")
                })?;
                let watcher = DownloadWatcher::local(
                    &downloads.directory,
                    downloads.watch_settings(),
                    self.cancel.clone(),
                );
                let destination_stem = self.config.pipeline_dir(name).join(input.tag());
                info!(
                    pipeline = name,
                    link = link.as_str(),
                    directory = %downloads.directory.display(),
                    "Waiting for manual download to finish"
                );
                let download = watcher.watch(|| self.launcher.open(link), &destination_stem)?;
                self.metrics.record_download(download.polls, download.waited);
                Ok(download.artifact)
            }
            InputSource::CataloguedEpisode {
                show,
                season,
                episode,
            } => {
                let path = self.catalog.resolve(show, *season, *episode)?;
                info!(
                    pipeline = name,
                    show = show.as_str(),
                    season,
                    episode,
                    path = %path.display(),
                    "Catalog resolved episode"
                );
                local_artifact(&path)
            }
        }
    }
}

fn local_artifact(path: &Path) -> Result<ArtifactRef> {
    if !path.is_file() {
        bail!("Input file not found: {}", path.display());
    }
    let artifact = ArtifactRef::from_path(path);
    if artifact.extension.is_empty() {
        warn!(path = %path.display(), "Input has no extension; step outputs will have none either");
    }
    Ok(artifact)
}

fn is_cancellation(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| matches!(cause.downcast_ref::<WatchError>(), Some(WatchError::Cancelled)))
}
