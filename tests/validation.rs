use std::fs;
use std::path::PathBuf;

use indexmap::IndexMap;
use pipe_runner::config::{DownloadSettings, PipelineConfig, PipelineSpec, ToolSettings};
use pipe_runner::input::InputSource;
use pipe_runner::lockfile::{build_lock, generate_lock};
use pipe_runner::step::{Offset, Step};
use pipe_runner::validation::validate_config;
use serde_json::Map;
use tempfile::tempdir;

fn base_config(output_root: PathBuf) -> PipelineConfig {
    PipelineConfig {
        version: 1,
        output_root,
        downloads: None,
        catalog: None,
        tools: ToolSettings::default(),
        pipelines: IndexMap::new(),
    }
}

fn pipeline(input: InputSource, steps: Vec<Step>) -> PipelineSpec {
    PipelineSpec {
        input,
        steps,
        metadata: Map::new(),
    }
}

fn trim(start: u64, end: u64) -> Step {
    Step::Trim {
        start: Offset::from_secs(start),
        end: Offset::from_secs(end),
    }
}

#[test]
fn valid_local_config_passes() {
    let temp = tempdir().unwrap();
    let input = temp.path().join("clip.mp4");
    fs::write(&input, b"clip").unwrap();
    let mut config = base_config(temp.path().join("out"));
    config.pipelines.insert(
        "clip".into(),
        pipeline(
            InputSource::LocalPath { path: input },
            vec![trim(1, 2), Step::Upscale { width: 1280 }],
        ),
    );

    let report = validate_config(&config);
    assert!(report.is_ok(), "unexpected errors: {:?}", report.errors);
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
}

#[test]
fn empty_config_is_rejected() {
    let config = base_config(PathBuf::new());
    let report = validate_config(&config);

    assert!(!report.is_ok());
    assert!(report.errors.iter().any(|e| e.contains("Output root")));
    assert!(report.errors.iter().any(|e| e.contains("At least one pipeline")));
}

#[test]
fn step_parameters_are_checked() {
    let temp = tempdir().unwrap();
    let mut config = base_config(temp.path().join("out"));
    config.pipelines.insert(
        "bad".into(),
        pipeline(
            InputSource::LocalPath {
                path: temp.path().join("later.mp4"),
            },
            vec![trim(60, 10), Step::Upscale { width: 0 }, Step::Upscale { width: 1281 }],
        ),
    );

    let report = validate_config(&config);
    assert_eq!(report.errors.len(), 2, "{:?}", report.errors);
    assert!(report.errors[0].contains("step 0 (trim)"));
    assert!(report.errors[1].contains("step 1 (upscale)"));
    assert!(report.warnings.iter().any(|w| w.contains("odd width 1281")));
    assert!(report.warnings.iter().any(|w| w.contains("does not exist yet")));
}

#[test]
fn manual_downloads_need_a_downloads_section() {
    let temp = tempdir().unwrap();
    let mut config = base_config(temp.path().join("out"));
    config.pipelines.insert(
        "lecture".into(),
        pipeline(
            InputSource::ManualDownload {
                link: "https://example.com/v".into(),
            },
            vec![trim(0, 5)],
        ),
    );

    let report = validate_config(&config);
    assert!(report.errors.iter().any(|e| e.contains("'downloads' section")));

    config.downloads = Some(DownloadSettings {
        directory: temp.path().to_path_buf(),
        poll_interval_ms: 0,
        stable_polls: 0,
        max_wait_secs: Some(0),
    });
    let report = validate_config(&config);
    assert_eq!(report.errors.len(), 3, "{:?}", report.errors);
    assert!(report.errors.iter().any(|e| e.contains("stable polls")));

    if let Some(downloads) = config.downloads.as_mut() {
        downloads.poll_interval_ms = 250;
        downloads.stable_polls = 1;
        downloads.max_wait_secs = None;
    }
    assert!(validate_config(&config).is_ok());
}

#[test]
fn episodes_need_a_catalog_and_pipeline_names_must_be_directories() {
    let temp = tempdir().unwrap();
    let mut config = base_config(temp.path().join("out"));
    config.pipelines.insert(
        "../escape".into(),
        pipeline(
            InputSource::CataloguedEpisode {
                show: "Show".into(),
                season: 1,
                episode: 0,
            },
            Vec::new(),
        ),
    );

    let report = validate_config(&config);
    assert!(report.errors.iter().any(|e| e.contains("'catalog' section")));
    assert!(report.errors.iter().any(|e| e.contains("directory name")));
    assert!(report.errors.iter().any(|e| e.contains("numbered from 1")));
    assert!(report.warnings.iter().any(|w| w.contains("has no steps")));
}

#[test]
fn lockfile_lists_pipelines_in_declared_order() {
    let temp = tempdir().unwrap();
    let mut config = base_config(temp.path().join("out"));
    for name in ["zulu", "alpha", "mike"] {
        config.pipelines.insert(
            name.into(),
            pipeline(
                InputSource::LocalPath {
                    path: temp.path().join(format!("{name}.mp4")),
                },
                vec![trim(0, 10)],
            ),
        );
    }

    let lock = build_lock(&config);
    let names: Vec<&str> = lock.pipelines.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["zulu", "alpha", "mike"]);
    assert_ne!(lock.pipelines[0].input_hash, lock.pipelines[1].input_hash);
    assert_eq!(
        lock.pipelines[0].steps[0].params_hash,
        lock.pipelines[1].steps[0].params_hash
    );

    let lock_path = temp.path().join("pipelines.lock");
    generate_lock(&config, &lock_path).expect("lockfile generated");
    let contents = fs::read_to_string(&lock_path).unwrap();
    assert!(contents.contains("config_version: 1"));
    assert!(contents.contains("op: trim"));
    assert!(contents.contains("input: local_path"));
}
