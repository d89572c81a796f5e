use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::config::{
    CatalogSettings, DownloadSettings, PipelineConfig, PipelineSpec, SUPPORTED_VERSION,
    ToolSettings,
};
use crate::input::InputSource;
use crate::step::{Offset, Step};

pub const PRESETS: &[&str] = &["trim", "download", "episode"];

/// Write a starter configuration for `name` to `destination`.
pub fn generate_preset(name: &str, destination: &Path) -> Result<PathBuf> {
    let preset = match name {
        "trim" => trim_preset(),
        "download" => download_preset(),
        "episode" => episode_preset(),
        other => bail!(
            "Unknown preset '{other}'. Available presets: {}",
            PRESETS.join(", ")
        ),
    };

    let rendered = serde_yaml::to_string(&preset)?;
    if let Some(parent) = destination.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(destination, rendered)
        .with_context(|| format!("Failed to write preset config: {}", destination.display()))?;

    Ok(destination.to_path_buf())
}

fn base_config(pipelines: IndexMap<String, PipelineSpec>) -> PipelineConfig {
    PipelineConfig {
        version: SUPPORTED_VERSION,
        output_root: PathBuf::from("./out"),
        downloads: None,
        catalog: None,
        tools: ToolSettings::default(),
        pipelines,
    }
}

fn trim_preset() -> PipelineConfig {
    let mut pipelines = IndexMap::new();
    pipelines.insert(
        "highlight".to_string(),
        PipelineSpec {
            input: InputSource::LocalPath {
                path: PathBuf::from("./media/input.mkv"),
            },
            steps: vec![trim(10, 60)],
            metadata: Map::new(),
        },
    );
    base_config(pipelines)
}

fn download_preset() -> PipelineConfig {
    let mut pipelines = IndexMap::new();
    pipelines.insert(
        "lecture".to_string(),
        PipelineSpec {
            input: InputSource::ManualDownload {
                link: "https://example.com/lecture".into(),
            },
            steps: vec![trim(30, 1_800), Step::Upscale { width: 1920 }],
            metadata: note("Open the link and start the download; the run waits for it."),
        },
    );
    let mut config = base_config(pipelines);
    config.downloads = Some(DownloadSettings {
        directory: PathBuf::from("./downloads"),
        poll_interval_ms: 500,
        stable_polls: 2,
        max_wait_secs: Some(3_600),
    });
    config
}

fn episode_preset() -> PipelineConfig {
    let mut pipelines = IndexMap::new();
    pipelines.insert(
        "cold-open".to_string(),
        PipelineSpec {
            input: InputSource::CataloguedEpisode {
                show: "Example Show".into(),
                season: 1,
                episode: 1,
            },
            steps: vec![trim(0, 120), Step::Upscale { width: 3840 }],
            metadata: Map::new(),
        },
    );
    let mut config = base_config(pipelines);
    config.catalog = Some(CatalogSettings {
        library: PathBuf::from("./library"),
        pattern: "{show}/Season {season:02}/*S{season:02}E{episode:02}*".into(),
    });
    config
}

fn trim(start: u64, end: u64) -> Step {
    Step::Trim {
        start: Offset::from_secs(start),
        end: Offset::from_secs(end),
    }
}

fn note(text: &str) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("note".into(), Value::String(text.into()));
    metadata
}
