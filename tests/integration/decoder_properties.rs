//! Property tests for the streamed decoder and scenario checks for the
//! live guesser

use proptest::prelude::*;
use serde_json::{json, Value};

use stepwise::trace::{DecodeOutcome, Decoder, LiveGuesser, MemoryValue, StructureKind};
use stepwise::TraceFrame;

use super::common::*;

const ACTIONS: &[&str] = &["INIT", "READ", "WRITE", "COMPARE", "SWAP"];

fn frame_array() -> impl Strategy<Value = String> {
    prop::collection::vec(
        (0..ACTIONS.len(), "[a-z]{1,8}", "[xyz]", 0i64..1000),
        1..8,
    )
    .prop_map(|items| {
        let frames: Vec<Value> = items
            .into_iter()
            .enumerate()
            .map(|(i, (action, description, var, value))| {
                json!({
                    "id": i,
                    "action": ACTIONS[action],
                    "description": description,
                    "memory": { var: value }
                })
            })
            .collect();
        Value::Array(frames).to_string()
    })
}

fn decoded(text: &str) -> Vec<TraceFrame> {
    match Decoder::default().decode_frames(text) {
        DecodeOutcome::Decoded(frames) => frames,
        other => panic!("Expected decoded frames, got {:?}", other),
    }
}

proptest! {
    #[test]
    fn prop_truncation_yields_prefix_or_failure(text in frame_array(), cut in 0usize..2000) {
        let full = decoded(&text);
        let cut = cut.min(text.len());

        match Decoder::default().decode_frames(&text[..cut]) {
            DecodeOutcome::Decoded(frames) => {
                prop_assert!(frames.len() <= full.len());
                prop_assert_eq!(&frames[..], &full[..frames.len()]);
            }
            DecodeOutcome::Failed(_) => {}
            DecodeOutcome::Empty => prop_assert!(false, "truncated frames decoded as empty"),
        }
    }

    #[test]
    fn prop_decode_is_idempotent_on_clean_input(text in frame_array()) {
        let first = decoded(&text);
        let reserialized = serde_json::to_string(&first).unwrap();
        prop_assert_eq!(decoded(&reserialized), first);
    }
}

#[test]
fn test_truncated_mid_object_keeps_first_frame() {
    let frames = decoded(TRUNCATED);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].sequence_index, 0);
    assert_eq!(frames[0].description, "start");
}

#[test]
fn test_plain_all_clear_is_empty() {
    assert_eq!(
        Decoder::default().decode_frames(ALL_CLEAR),
        DecodeOutcome::Empty
    );
}

#[test]
fn test_fenced_response_with_prose() {
    let frames = decoded(BUBBLE_SORT);
    assert_eq!(frames.len(), 6);
    assert_eq!(frames[5].description, "Sorted");
    assert_eq!(frames[0].effective_structure(), Some(StructureKind::Array));
}

#[test]
fn test_guess_variable_assignment() {
    let frame = LiveGuesser::default().guess("let x = 10;").expect("frame");
    assert_eq!(frame.structure_kind, Some(StructureKind::Variable));
    assert_eq!(frame.memory["x"], MemoryValue::text("10"));
}

#[test]
fn test_guess_push_onto_assumed_items() {
    let guesser = LiveGuesser::new(vec!["4".into(), "10".into(), "5".into()]);
    let frame = guesser.guess("arr.push(7)").expect("frame");

    let items: Vec<&str> = frame.memory["arr"]
        .as_list()
        .expect("list")
        .iter()
        .filter_map(MemoryValue::as_text)
        .collect();
    assert_eq!(items, vec!["4", "10", "5", "7"]);
    insta::assert_json_snapshot!(frame.highlight, @r#"
    {
      "indices": [
        3
      ]
    }
    "#);
}
