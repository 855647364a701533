use taskgate_types::{
    ActorType, ArtifactId, Event, EventId, EventPayload, ModelCallCompletedPayload, TaskId,
    TaskStatus, TokenUsage,
};

#[test]
fn model_call_completed_payload_roundtrip() {
    let event = Event {
        event_id: EventId::new(),
        task_id: TaskId::new(),
        task_seq: 5,
        ts: 1_700_000_000_000,
        schema_version: 1,
        actor: ActorType::Worker,
        payload: EventPayload::ModelCallCompleted(ModelCallCompletedPayload {
            model_alias: "main".into(),
            model_name: "claude-3".into(),
            provider: "anthropic".into(),
            response_summary: "hello".into(),
            duration_ms: 120,
            token_usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
            cost_usd: 0.002,
            cost_unavailable: false,
            is_fallback: false,
            artifact_ref: ArtifactId::new(),
        }),
        trace_id: Some("trace-1".into()),
        span_id: None,
        parent_event_id: None,
        idempotency_key: None,
    };

    let json = serde_json::to_string(&event).expect("serialization failed");
    let decoded: Event = serde_json::from_str(&json).expect("deserialization failed");
    assert_eq!(event, decoded);
}

#[test]
fn additive_field_defaults_when_absent() {
    // Simulate an older stored payload missing `cost_unavailable` / `is_fallback`.
    let legacy = serde_json::json!({
        "type": "ModelCallCompleted",
        "model_alias": "main",
        "model_name": "claude-3",
        "provider": "anthropic",
        "response_summary": "hi",
        "duration_ms": 50,
        "artifact_ref": ArtifactId::new().to_string(),
    });
    let payload: EventPayload = serde_json::from_value(legacy).expect("must deserialize");
    match payload {
        EventPayload::ModelCallCompleted(p) => {
            assert!(!p.cost_unavailable);
            assert!(!p.is_fallback);
            assert_eq!(p.token_usage, TokenUsage::default());
        }
        _ => panic!("wrong variant"),
    }
}

#[test]
fn task_status_display_is_screaming_snake_case() {
    assert_eq!(TaskStatus::Running.to_string(), "RUNNING");
    assert_eq!(TaskStatus::Cancelled.to_string(), "CANCELLED");
}
