use std::path::Path;

use predicates::prelude::*;
use serde_json::Value;

const STORY_ARGS: [&str; 18] = [
    "--character-name",
    "Pip",
    "--setting",
    "a mossy forest",
    "--villain",
    "the Bramble Witch",
    "--special-item",
    "a glowing acorn",
    "--character-trait",
    "kind",
    "--goal",
    "wake the sleeping oak",
    "--time-period",
    "once upon a time",
    "--mood",
    "gentle",
    "--theme",
    "friendship",
];

fn storyloom(data_dir: &Path) -> (assert_cmd::Command, String) {
    let cmd = assert_cmd::cargo::cargo_bin_cmd!("storyloom");
    let data_dir = data_dir.to_str().expect("utf-8 data dir").to_string();
    (cmd, data_dir)
}

fn generate_noop(data_dir: &Path, pages: &str) -> Value {
    let (mut cmd, data_dir) = storyloom(data_dir);
    let output = cmd
        .args(["generate", "--data-dir", &data_dir, "--noop-pages", pages])
        .args(STORY_ARGS)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).expect("story json")
}

#[test]
fn generate_with_noop_engines_completes_story() {
    let temp = tempfile::TempDir::new().expect("tempdir");
    let story = generate_noop(temp.path(), "4");

    assert_eq!(story["status"], "COMPLETED");
    assert_eq!(story["input"]["voiceType"], "female");
    let pages = story["pages"].as_array().expect("pages");
    let numbers: Vec<u64> = pages
        .iter()
        .map(|p| p["pageNumber"].as_u64().expect("page number"))
        .collect();
    assert_eq!(numbers, vec![1, 2, 3, 4]);

    let story_id = story["id"].as_str().expect("story id");
    assert_eq!(
        pages[0]["imageUrl"],
        format!("/api/stories/{story_id}/assets/images/page-1.png")
    );
    let story_dir = temp.path().join("stories").join(story_id);
    assert!(story_dir.join("story.json").exists());
    assert!(story_dir.join("images/page-4.png").exists());
    assert!(story_dir.join("audio/narration/page-4.mp3").exists());
}

#[test]
fn show_and_list_read_persisted_stories() {
    let temp = tempfile::TempDir::new().expect("tempdir");
    let first = generate_noop(temp.path(), "1");
    let second = generate_noop(temp.path(), "2");
    let second_id = second["id"].as_str().expect("story id");

    let (mut cmd, data_dir) = storyloom(temp.path());
    let output = cmd
        .args(["show", "--data-dir", &data_dir, "--story-id", second_id])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let shown: Value = serde_json::from_slice(&output).expect("story json");
    assert_eq!(shown, second);

    let (mut cmd, data_dir) = storyloom(temp.path());
    let output = cmd
        .args(["list", "--data-dir", &data_dir])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let summaries: Value = serde_json::from_slice(&output).expect("summaries json");
    let ids: Vec<&str> = summaries
        .as_array()
        .expect("array")
        .iter()
        .map(|s| s["id"].as_str().expect("id"))
        .collect();
    assert_eq!(ids, vec![second_id, first["id"].as_str().expect("id")]);
}

#[test]
fn blank_input_is_rejected_before_generation() {
    let temp = tempfile::TempDir::new().expect("tempdir");
    let (mut cmd, data_dir) = storyloom(temp.path());
    let mut args = STORY_ARGS;
    args[5] = "   ";

    cmd.args(["generate", "--data-dir", &data_dir])
        .args(args)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Villain is required"));
    assert!(!temp.path().join("stories").exists());
}

#[test]
fn show_unknown_story_fails() {
    let temp = tempfile::TempDir::new().expect("tempdir");
    let (mut cmd, data_dir) = storyloom(temp.path());
    cmd.args([
        "show",
        "--data-dir",
        &data_dir,
        "--story-id",
        "00000000-0000-4000-8000-000000000000",
    ])
    .assert()
    .failure()
    .stderr(predicate::str::contains("story not found"));
}

#[test]
fn rust_log_debug_emits_debug_line_to_stderr() {
    let temp = tempfile::TempDir::new().expect("tempdir");
    let (mut cmd, data_dir) = storyloom(temp.path());
    cmd.env("RUST_LOG", "debug")
        .args(["list", "--data-dir", &data_dir])
        .assert()
        .success()
        .stderr(predicate::str::contains("parsed cli"));
}
