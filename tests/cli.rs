use std::fs;

use assert_cmd::Command;
use tempfile::tempdir;

fn pipe_runner() -> Command {
    let mut cmd = Command::cargo_bin("pipe-runner").expect("binary present");
    cmd.env_remove("CHART_PATH");
    cmd
}

#[test]
fn list_steps_prints_every_kind() {
    let output = pipe_runner().arg("list-steps").assert().success();
    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    for tag in ["trim", "upscale", "local_path", "manual_download", "catalogued_episode"] {
        assert!(stdout.contains(tag), "missing {tag} in {stdout}");
    }
}

#[test]
fn validate_accepts_quickstart_and_rejects_broken_config() {
    pipe_runner()
        .args(["validate", "recipes/quickstart.yaml"])
        .assert()
        .success();

    let temp = tempdir().unwrap();
    let broken = temp.path().join("broken.yaml");
    fs::write(
        &broken,
        "output_root: ./out\npipelines:\n  x:\n    input:\n      type: local_path\n      path: a.mp4\n    steps:\n      - op: trim\n        start: 20\n        end: 10\n",
    )
    .unwrap();
    pipe_runner()
        .arg("validate")
        .arg(&broken)
        .assert()
        .failure();
}

#[test]
fn unknown_step_kind_fails_to_load() {
    let temp = tempdir().unwrap();
    let config = temp.path().join("unknown.yaml");
    fs::write(
        &config,
        "output_root: ./out\npipelines:\n  x:\n    input:\n      type: local_path\n      path: a.mp4\n    steps:\n      - op: denoise\n",
    )
    .unwrap();

    pipe_runner()
        .arg("validate")
        .arg(&config)
        .assert()
        .failure();
}

#[test]
fn dry_run_touches_nothing() {
    let temp = tempdir().unwrap();
    let config = temp.path().join("dry.yaml");
    fs::write(
        &config,
        format!(
            "output_root: {}\npipelines:\n  x:\n    input:\n      type: local_path\n      path: a.mp4\n    steps:\n      - op: upscale\n        width: 1280\n",
            temp.path().join("out").display()
        ),
    )
    .unwrap();

    pipe_runner()
        .arg("run")
        .arg(&config)
        .arg("--dry-run")
        .assert()
        .success();
    assert!(!temp.path().join("out").exists());
}

#[test]
fn run_processes_empty_chain_and_writes_report() {
    let temp = tempdir().unwrap();
    let input = temp.path().join("clip.mp4");
    fs::write(&input, b"clip").unwrap();
    let config = temp.path().join("run.yaml");
    fs::write(
        &config,
        format!(
            "output_root: {}\npipelines:\n  passthrough:\n    input:\n      type: local_path\n      path: {}\n",
            temp.path().join("out").display(),
            input.display()
        ),
    )
    .unwrap();
    let report = temp.path().join("reports/run.json");
    let metrics = temp.path().join("reports/metrics.prom");

    pipe_runner()
        .arg("run")
        .arg(&config)
        .arg("--report")
        .arg(&report)
        .arg("--metrics-prometheus")
        .arg(&metrics)
        .assert()
        .success();

    let parsed: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(parsed["pipelines"][0]["status"], "succeeded");
    assert_eq!(parsed["pipelines"][0]["artifact"]["extension"], ".mp4");
    assert!(
        fs::read_to_string(&metrics)
            .unwrap()
            .contains("pipe_pipelines_succeeded_total 1")
    );
}

#[test]
fn render_prints_chart_output() {
    let output = pipe_runner()
        .args(["render", "--chart", "recipes/charts/episode.yaml"])
        .assert()
        .success();
    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    assert!(stdout.contains("show: Example Show"));
    assert!(!stdout.contains("{{"));
}

#[test]
fn digest_writes_and_verifies_sidecar() {
    let temp = tempdir().unwrap();
    let file = temp.path().join("abc.txt");
    fs::write(&file, b"abc").unwrap();
    let sidecar = temp.path().join("abc.txt.sha256");

    pipe_runner()
        .arg("digest")
        .arg("--path")
        .arg(&file)
        .arg("--output")
        .arg(&sidecar)
        .assert()
        .success();
    assert!(
        fs::read_to_string(&sidecar)
            .unwrap()
            .starts_with("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
    );

    pipe_runner()
        .arg("digest")
        .arg("--path")
        .arg(&file)
        .arg("--verify")
        .assert()
        .success();
}
