//! Tests for the `stepwise` binary

use assert_cmd::Command;
use predicates::prelude::*;

use stepwise::trace::FrameAction;
use stepwise::{SavedTrace, SourceId, TraceFrame};

use super::common::*;

fn stepwise(data: &DataDir) -> Command {
    let mut cmd = Command::cargo_bin("stepwise").expect("binary built");
    cmd.arg("--data-dir").arg(data.path());
    cmd
}

#[test]
fn test_decode_recovers_truncated_response() {
    let data = DataDir::new();
    let file = data.write("response.txt", TRUNCATED);

    stepwise(&data)
        .arg("decode")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""description": "start""#))
        .stdout(predicate::str::contains(r#""id": 1"#).not());
}

#[test]
fn test_decode_garbage_fails() {
    let data = DataDir::new();
    let file = data.write("response.txt", "I would rather not.");

    stepwise(&data)
        .arg("decode")
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Could not decode trace"));
}

#[test]
fn test_decode_issues_all_clear() {
    let data = DataDir::new();
    let file = data.write("review.txt", ALL_CLEAR);

    stepwise(&data)
        .args(["decode", "--issues"])
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::diff("[]\n"));
}

#[test]
fn test_guess_prints_frame() {
    let data = DataDir::new();
    let file = data.write("main.js", "const total = 0;\nlet x = 10;\n");

    stepwise(&data)
        .arg("guess")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("Set x to 10"))
        .stdout(predicate::str::contains(r#""structure": "VARIABLE""#));
}

#[test]
fn test_guess_without_signal_is_not_an_error() {
    let data = DataDir::new();
    let file = data.write("main.py", "print(x)\n");

    stepwise(&data)
        .arg("guess")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn test_replay_plays_every_frame() {
    let data = DataDir::new();
    let frames = vec![
        TraceFrame::new(0, FrameAction::Init, "Start"),
        TraceFrame::new(1, FrameAction::Write, "Set x to 1"),
        TraceFrame::new(2, FrameAction::End, "Done"),
    ];
    let saved = SavedTrace::new("Counter", "variables", Some(SourceId::new("c.py")), frames);
    let path = data.path().join("counter.json");
    saved.save_to(&path).expect("save");

    stepwise(&data)
        .arg("replay")
        .arg(&path)
        .arg("--no-narration")
        .assert()
        .success()
        .stdout(predicate::str::contains("Counter (variables, 3 frames)"))
        .stdout(predicate::str::contains("Set x to 1"))
        .stdout(predicate::str::contains("Done"));
}

#[test]
fn test_replay_rejects_missing_file() {
    let data = DataDir::new();

    stepwise(&data)
        .arg("replay")
        .arg(data.path().join("nope.json"))
        .assert()
        .failure();
}

#[test]
fn test_saved_lists_traces_in_data_dir() {
    let data = DataDir::new();
    let saved = SavedTrace::new(
        "Linked list",
        "lists",
        None,
        vec![TraceFrame::new(0, FrameAction::Init, "Start")],
    );
    saved
        .save_to(&data.path().join("traces").join("list.json"))
        .expect("save");

    stepwise(&data)
        .arg("saved")
        .assert()
        .success()
        .stdout(predicate::str::contains("Linked list"))
        .stdout(predicate::str::contains("1 frames"));
}
