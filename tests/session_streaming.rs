//! Response streaming tests
//!
//! Paced reveal of response text, interruption and tolerance of malformed
//! server events, observed through the session's display channel.

mod fixtures;

use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;

use aime_realtime::core::realtime::{ConnectionState, ResponseDisplay};
use fixtures::*;

/// Record every display value published by the session.
fn record_display(harness: &Harness) -> Arc<Mutex<Vec<ResponseDisplay>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let mut display = harness.session.subscribe_display();
    tokio::spawn(async move {
        while display.changed().await.is_ok() {
            let current = display.borrow_and_update().clone();
            sink.lock().push(current);
        }
    });
    seen
}

#[tokio::test(start_paused = true)]
async fn test_deltas_reveal_full_text() {
    let harness = HarnessBuilder::new().spawn();
    let probe = harness.connect().await;
    let seen = record_display(&harness);

    probe.server_event(json!({"type": "response.created"}));
    probe.server_event(json!({"type": "response.text.delta", "delta": "Hel"}));
    probe.server_event(json!({"type": "response.text.delta", "delta": "lo the"}));
    probe.server_event(json!({"type": "response.text.delta", "delta": "re"}));

    wait_until("full reveal", || {
        let display = harness.session.display();
        display.revealed_len == 11 && !display.streaming
    })
    .await;

    let display = harness.session.display();
    assert_eq!(display.text, "Hello there");
    assert_eq!(display.full_len, 11);
    assert!(display.visible);
    assert!(display.responding);

    // Every intermediate value was a growing prefix of the final text
    let seen = seen.lock();
    let mut last = 0;
    for display in seen.iter().filter(|d| !d.text.is_empty()) {
        assert!("Hello there".starts_with(&display.text), "{:?}", display.text);
        assert!(display.revealed_len >= last);
        last = display.revealed_len;
    }
}

#[tokio::test(start_paused = true)]
async fn test_response_done_ends_responding_after_grace() {
    let harness = HarnessBuilder::new().spawn();
    let probe = harness.connect().await;

    probe.server_event(json!({"type": "response.created"}));
    probe.server_event(json!({
        "type": "response.done",
        "response": {
            "output": [{
                "type": "message",
                "role": "assistant",
                "content": [{"type": "text", "text": "Take a seven iron."}]
            }]
        }
    }));

    wait_until("reveal done", || harness.session.display().revealed_len == 18).await;
    wait_until("grace elapsed", || !harness.session.display().responding).await;

    let display = harness.session.display();
    assert_eq!(display.text, "Take a seven iron.");
    assert!(display.visible);
    assert!(probe.sent_types().contains(&"input_audio_buffer.clear".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_cancels_active_response() {
    let harness = HarnessBuilder::new().spawn();
    let probe = harness.connect().await;

    probe.server_event(json!({"type": "response.created"}));
    probe.server_event(json!({
        "type": "response.audio_transcript.delta",
        "delta": "The green slopes hard from back to front, so"
    }));
    wait_until("reveal started", || harness.session.display().streaming).await;

    assert!(harness.session.interrupt().await.unwrap());
    assert_eq!(probe.count_sent("response.cancel"), 1);

    let display = harness.session.display();
    assert_eq!(display.text, "");
    assert_eq!(display.revealed_len, 0);
    assert!(!display.streaming);
    assert!(!display.visible);

    // Nothing left to cancel
    assert!(!harness.session.interrupt().await.unwrap());
    assert_eq!(probe.count_sent("response.cancel"), 1);
}

#[tokio::test]
async fn test_interrupt_when_idle_sends_nothing() {
    let harness = HarnessBuilder::new().spawn();
    let probe = harness.connect().await;
    let before = probe.sent().len();

    assert!(!harness.session.interrupt().await.unwrap());
    assert_eq!(probe.sent().len(), before);
}

#[tokio::test(start_paused = true)]
async fn test_user_speech_interrupts_response() {
    let harness = HarnessBuilder::new().spawn();
    let probe = harness.connect().await;

    probe.server_event(json!({"type": "response.created"}));
    probe.server_event(json!({"type": "response.text.delta", "delta": "Aim at the left edge of the bunker"}));
    wait_until("reveal started", || harness.session.display().streaming).await;

    probe.server_event(json!({"type": "input_audio_buffer.speech_started"}));
    wait_until("display hidden", || !harness.session.display().visible).await;
    assert_eq!(probe.count_sent("response.cancel"), 1);
    assert_eq!(harness.session.display().text, "");
}

#[tokio::test(start_paused = true)]
async fn test_new_response_restarts_reveal() {
    let harness = HarnessBuilder::new().spawn();
    let probe = harness.connect().await;

    probe.server_event(json!({"type": "response.created"}));
    probe.server_event(json!({"type": "response.text.done", "text": "Lay up short."}));
    wait_until("first reveal", || harness.session.display().revealed_len == 13).await;

    probe.server_event(json!({"type": "response.created"}));
    probe.server_event(json!({"type": "response.text.delta", "delta": "Go"}));
    wait_until("second response", || harness.session.display().text == "Go").await;
    assert_eq!(harness.session.display().full_len, 2);
}

#[tokio::test]
async fn test_malformed_events_are_ignored() {
    let harness = HarnessBuilder::new().spawn();
    let probe = harness.connect().await;
    let before = probe.sent().len();

    probe.raw_frame("{not json");
    probe.raw_frame("[]");
    probe.raw_frame(r#"{"no_type": true}"#);
    probe.server_event(json!({"type": "response.text.delta"}));
    probe.server_event(json!({"type": "something.unknown", "payload": 1}));

    // A well-formed event afterwards is still processed
    probe.server_event(json!({"type": "session.created", "session": {"id": "sess_42"}}));
    wait_until("session.created handled", || {
        harness.session.remote_session_id().as_deref() == Some("sess_42")
    })
    .await;

    assert_eq!(harness.session.status(), ConnectionState::Connected);
    assert_eq!(probe.sent().len(), before);
    assert_eq!(harness.session.display(), ResponseDisplay::default());
}
