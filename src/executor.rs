use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::artifact::{ArtifactRef, with_extension_suffix};
use crate::error::ToolError;
use crate::observability::MetricsCollector;
use crate::step::Step;
use crate::tools::{StepTools, TrimRequest, UpscaleRequest};

/// `{output_root}/{pipeline}/step_{index}_{tag}{extension}`
pub fn step_output_path(
    output_root: &Path,
    pipeline: &str,
    index: usize,
    step: &Step,
    extension: &str,
) -> PathBuf {
    let stem = output_root
        .join(pipeline)
        .join(format!("step_{index}_{}", step.tag()));
    with_extension_suffix(&stem, extension)
}

/// Applies a pipeline's steps in order, each consuming the previous output.
pub struct StepChainExecutor<'a> {
    tools: &'a dyn StepTools,
    output_root: &'a Path,
    metrics: MetricsCollector,
}

impl<'a> StepChainExecutor<'a> {
    pub fn new(tools: &'a dyn StepTools, output_root: &'a Path, metrics: MetricsCollector) -> Self {
        Self {
            tools,
            output_root,
            metrics,
        }
    }

    pub fn metrics(&self) -> MetricsCollector {
        self.metrics.clone()
    }

    /// Returns the last step's artifact, or `initial` when there are no steps.
    #[instrument(skip(self, initial, steps), fields(steps = steps.len()))]
    pub fn run(&self, pipeline: &str, initial: ArtifactRef, steps: &[Step]) -> Result<ArtifactRef> {
        let mut current = initial;
        for (index, step) in steps.iter().enumerate() {
            let span = tracing::span!(
                tracing::Level::DEBUG,
                "step",
                index,
                step = step.tag()
            );
            let _span_guard = span.enter();
            current = self
                .apply(pipeline, index, step, &current)
                .with_context(|| {
                    format!(
                        "Pipeline '{}' step {} ({}) failed on {}",
                        pipeline,
                        index,
                        step.tag(),
                        current.output_path.display()
                    )
                })?;
        }
        Ok(current)
    }

    fn apply(
        &self,
        pipeline: &str,
        index: usize,
        step: &Step,
        previous: &ArtifactRef,
    ) -> Result<ArtifactRef> {
        let destination = step_output_path(
            self.output_root,
            pipeline,
            index,
            step,
            &previous.extension,
        );
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create step output directory: {}", parent.display())
            })?;
        }

        let mut timer = self.metrics.start_step(step.tag());
        debug!(
            input = %previous.output_path.display(),
            output = %destination.display(),
            "Dispatching step"
        );
        let outcome = match step {
            Step::Trim { start, end } => self.tools.trim(&TrimRequest {
                input: &previous.output_path,
                output: &destination,
                start: *start,
                end: *end,
            }),
            Step::Upscale { width } => self.tools.upscale(&UpscaleRequest {
                input: &previous.output_path,
                output: &destination,
                width: *width,
            }),
        };
        let outcome = outcome.and_then(|()| {
            if destination.is_file() {
                Ok(())
            } else {
                Err(ToolError::MissingOutput {
                    path: destination.clone(),
                })
            }
        });
        if outcome.is_err() {
            timer.mark_failed();
        }
        outcome?;
        drop(timer);

        info!(
            pipeline,
            index,
            step = step.tag(),
            output = %destination.display(),
            "Step completed"
        );
        // Tools keep the container, so the extension carries over unchanged.
        Ok(ArtifactRef::new(destination, previous.extension.clone()))
    }
}
