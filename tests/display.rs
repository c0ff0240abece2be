use daemon_chat::{
    decode_persisted, decode_structured, encode_structured, merge_overlay, DisplayBody,
    DisplayMessage, Fragment, Part, PartialMessage, PersistedMessage, Role,
};
use pretty_assertions::assert_eq;

fn overlay(answer: &str) -> PartialMessage {
    PartialMessage {
        reasoning_text: String::new(),
        parts: vec![Part::answer(answer)],
    }
}

fn overlay_message(answer: &str) -> DisplayMessage {
    DisplayMessage::structured(Role::Assistant, vec![Fragment::answer(answer)])
}

fn decoded(history: &[PersistedMessage]) -> Vec<DisplayMessage> {
    history.iter().map(decode_persisted).collect()
}

#[test]
fn structured_round_trip_puts_reasoning_first() {
    let message = PartialMessage {
        reasoning_text: "R".to_string(),
        parts: vec![Part::tool("T"), Part::answer("A")],
    };

    let encoded = encode_structured(&message).expect("encode");
    assert_eq!(
        encoded,
        r#"{"parts":[{"type":"reasoning","content":"R"},{"type":"tool","content":"T"},{"type":"answer","content":"A"}]}"#
    );
    assert_eq!(
        decode_structured(&encoded),
        Some(vec![
            Fragment::reasoning("R"),
            Fragment::tool("T"),
            Fragment::answer("A"),
        ])
    );
}

#[test]
fn malformed_structured_text_is_plain() {
    let text = r#"{"parts":[{"type":"answer""#;
    let message = PersistedMessage::assistant(text);
    assert_eq!(
        decode_persisted(&message).body,
        DisplayBody::PlainText(text.to_string())
    );
}

#[test]
fn overlay_replaces_single_trailing_assistant() {
    let history = vec![
        PersistedMessage::user("hello"),
        PersistedMessage::assistant("stale draft"),
    ];

    let merged = merge_overlay(&history, Some(&overlay("Hi")), 1);
    assert_eq!(
        merged,
        vec![decode_persisted(&history[0]), overlay_message("Hi")]
    );
}

#[test]
fn overlay_is_appended_after_trailing_user() {
    let history = vec![PersistedMessage::user("hello")];
    let merged = merge_overlay(&history, Some(&overlay("Hi")), 1);
    assert_eq!(
        merged,
        vec![decode_persisted(&history[0]), overlay_message("Hi")]
    );
}

#[test]
fn too_many_trailing_assistants_show_durable_list() {
    let history = vec![
        PersistedMessage::user("hello"),
        PersistedMessage::assistant("one"),
        PersistedMessage::assistant("two"),
    ];

    assert_eq!(
        merge_overlay(&history, Some(&overlay("Hi")), 1),
        decoded(&history)
    );
    assert_eq!(
        merge_overlay(&history, Some(&overlay("Hi")), 2),
        vec![decode_persisted(&history[0]), overlay_message("Hi")]
    );
}

#[test]
fn zero_threshold_only_overlays_after_user() {
    let answered = vec![
        PersistedMessage::user("hello"),
        PersistedMessage::assistant("one"),
    ];
    assert_eq!(
        merge_overlay(&answered, Some(&overlay("Hi")), 0),
        decoded(&answered)
    );

    let pending = vec![PersistedMessage::user("hello")];
    assert_eq!(
        merge_overlay(&pending, Some(&overlay("Hi")), 0),
        vec![decode_persisted(&pending[0]), overlay_message("Hi")]
    );
}

#[test]
fn non_assistant_trailing_message_blocks_overlay() {
    let history = vec![
        PersistedMessage::user("hello"),
        PersistedMessage::new(Role::Tool, "tool output"),
    ];
    assert_eq!(
        merge_overlay(&history, Some(&overlay("Hi")), 1),
        decoded(&history)
    );
}

#[test]
fn empty_or_missing_overlay_shows_durable_list() {
    let history = vec![PersistedMessage::user("hello")];
    assert_eq!(merge_overlay(&history, None, 1), decoded(&history));
    assert_eq!(
        merge_overlay(&history, Some(&PartialMessage::default()), 1),
        decoded(&history)
    );
}

#[test]
fn empty_history_takes_overlay_alone() {
    assert_eq!(
        merge_overlay(&[], Some(&overlay("Hi")), 1),
        vec![overlay_message("Hi")]
    );
}
