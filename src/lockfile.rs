use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::PipelineConfig;
use crate::input::InputSource;
use crate::step::Step;

#[derive(Debug, Serialize)]
pub struct ConfigLock {
    pub config_version: u32,
    pub generated_at: DateTime<Utc>,
    pub output_root: String,
    pub pipelines: Vec<PipelineLock>,
}

#[derive(Debug, Serialize)]
pub struct PipelineLock {
    pub name: String,
    pub input: &'static str,
    pub input_hash: String,
    pub steps: Vec<StepLock>,
}

#[derive(Debug, Serialize)]
pub struct StepLock {
    pub op: &'static str,
    pub params_hash: String,
}

pub fn build_lock(config: &PipelineConfig) -> ConfigLock {
    let pipelines = config
        .pipelines
        .iter()
        .map(|(name, spec)| PipelineLock {
            name: name.clone(),
            input: spec.input.tag(),
            input_hash: hash_input(&spec.input),
            steps: spec
                .steps
                .iter()
                .map(|step| StepLock {
                    op: step.tag(),
                    params_hash: hash_step(step),
                })
                .collect(),
        })
        .collect();

    ConfigLock {
        config_version: config.version,
        generated_at: Utc::now(),
        output_root: config.output_root.to_string_lossy().to_string(),
        pipelines,
    }
}

pub fn generate_lock(config: &PipelineConfig, path: &Path) -> Result<()> {
    let lock = build_lock(config);
    let file = File::create(path)
        .with_context(|| format!("Failed to create lockfile: {}", path.display()))?;
    serde_yaml::to_writer(file, &lock)
        .with_context(|| format!("Failed to write lockfile: {}", path.display()))?;
    Ok(())
}

fn hash_step(step: &Step) -> String {
    let serialized = serde_json::to_vec(step).unwrap_or_default();
    hex_digest(&serialized)
}

fn hash_input(input: &InputSource) -> String {
    let serialized = serde_json::to_vec(input).unwrap_or_default();
    hex_digest(&serialized)
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::Offset;

    #[test]
    fn step_hash_tracks_parameters() {
        let a = Step::Upscale { width: 1280 };
        let b = Step::Upscale { width: 1920 };
        assert_eq!(hash_step(&a), hash_step(&Step::Upscale { width: 1280 }));
        assert_ne!(hash_step(&a), hash_step(&b));

        let trim = Step::Trim {
            start: Offset::from_secs(1),
            end: Offset::from_secs(2),
        };
        assert_eq!(hash_step(&trim).len(), 64);
    }
}
