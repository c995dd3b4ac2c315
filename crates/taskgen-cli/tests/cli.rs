use assert_cmd::Command;
use serde_json::Value;
use std::{fs, path::PathBuf};
use tempfile::tempdir;

fn workspace_root() -> PathBuf {
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    manifest_dir
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .to_path_buf()
}

fn realization_dirs(out: &std::path::Path) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = fs::read_dir(out)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    dirs
}

#[test]
fn dry_run_writes_nothing() {
    let temp = tempdir().unwrap();
    let out = temp.path().join("stims");
    let assert = Command::cargo_bin("taskgen")
        .unwrap()
        .args(["-n", "-o", out.to_str().unwrap(), "<60/6> cue=[1](A, 2x B); end=[3]"])
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    assert!(stdout.contains("cue_A_end"));
    assert!(stdout.contains("2 passes x 3 branch visits = 6 trials"));
    assert!(!out.exists());
}

#[test]
fn writes_one_directory_per_iteration() {
    let temp = tempdir().unwrap();
    let out = temp.path().join("stims");
    Command::cargo_bin("taskgen")
        .unwrap()
        .args(["-o", out.to_str().unwrap(), "-i", "2", "--seed", "3", "<10/1> cue=[1]"])
        .assert()
        .success();
    let dirs = realization_dirs(&out);
    assert_eq!(dirs.len(), 2);
    for dir in &dirs {
        let name = dir.file_name().unwrap().to_str().unwrap();
        assert_eq!(name.len(), 18);
        assert!(name.chars().all(|c| c.is_ascii_digit()));
        let events = fs::read_to_string(dir.join("event_onset_duration.tsv")).unwrap();
        assert!(events.starts_with("event\tonset\tduration"));
        assert!(events.contains("cue\t"));
        let timing = fs::read_to_string(dir.join("cue.1D")).unwrap();
        assert_eq!(timing.trim().split(' ').count(), 1);
        assert!(!dir.join("__iti__.1D").exists());
    }
}

#[test]
fn same_seed_same_output() {
    let temp = tempdir().unwrap();
    let run = |name: &str| {
        let out = temp.path().join(name);
        Command::cargo_bin("taskgen")
            .unwrap()
            .args([
                "-o",
                out.to_str().unwrap(),
                "-i",
                "1",
                "--seed",
                "99",
                "<24/8 stepsize:.5> cue=[1](A,B)",
            ])
            .assert()
            .success();
        let dir = realization_dirs(&out).remove(0);
        let events = fs::read_to_string(dir.join("event_onset_duration.tsv")).unwrap();
        (dir.file_name().unwrap().to_owned(), events)
    };
    assert_eq!(run("first"), run("second"));
}

#[test]
fn config_file_supplies_the_run() {
    let temp = tempdir().unwrap();
    let out = temp.path().join("from_config");
    let config = workspace_root().join("test_data/run.toml");
    Command::cargo_bin("taskgen")
        .unwrap()
        .args([
            "--config",
            config.to_str().unwrap(),
            "-o",
            out.to_str().unwrap(),
        ])
        .assert()
        .success();
    let dirs = realization_dirs(&out);
    assert!(!dirs.is_empty() && dirs.len() <= 3);
    let manifest: Value =
        serde_json::from_str(&fs::read_to_string(dirs[0].join("run.json")).unwrap()).unwrap();
    assert_eq!(manifest["total_trials"], 6);
    assert_eq!(manifest["n_rep_branches"], 2);
    assert_eq!(manifest["catch_weighting"], "additive");
    assert_eq!(manifest["settings"]["start_pad"], 2.0);
}

#[test]
fn budget_overrun_fails_without_output() {
    let temp = tempdir().unwrap();
    let out = temp.path().join("stims");
    Command::cargo_bin("taskgen")
        .unwrap()
        .args(["-o", out.to_str().unwrap(), "-i", "2", "<10/4> cue=[2]; end=[2]"])
        .assert()
        .failure()
        .code(1);
    assert!(!out.exists());
}

#[test]
fn output_path_collision_fails() {
    let temp = tempdir().unwrap();
    let out = temp.path().join("stims");
    fs::write(&out, "not a directory").unwrap();
    Command::cargo_bin("taskgen")
        .unwrap()
        .args(["-o", out.to_str().unwrap(), "-i", "1", "<10/1> cue=[1]"])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn syntax_error_is_reported() {
    let assert = Command::cargo_bin("taskgen")
        .unwrap()
        .args(["-n", "<10/1> cue=[1"])
        .assert()
        .failure();
    let stderr = String::from_utf8(assert.get_output().stderr.clone()).unwrap();
    assert!(stderr.contains("syntax error"));
}

#[test]
fn exhausted_shuffles_skip_only_their_realization() {
    let temp = tempdir().unwrap();
    let out = temp.path().join("stims");
    // the average gap fits exactly, so few orders keep every gap within 3s
    Command::cargo_bin("taskgen")
        .unwrap()
        .args([
            "-o",
            out.to_str().unwrap(),
            "-i",
            "5",
            "--seed",
            "8",
            "--max-shuffle",
            "1",
            "<16/4 iti:0-3 stepsize:1> cue=[1]",
        ])
        .assert()
        .success();
    assert!(out.is_dir());
    assert!(realization_dirs(&out).len() < 5);
}
