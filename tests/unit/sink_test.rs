//! Tests for dispatch sinks

use task_dispatcher::core::{
    DispatchEvent, DispatchEventKind, DispatchSink, InMemorySink, NoopSink, RejectReason,
    TaskEnvelope, TracingSink,
};

fn event(kind: DispatchEventKind, task: &str) -> DispatchEvent {
    DispatchEvent::for_envelope(kind, &TaskEnvelope::new(task))
}

#[test]
fn test_in_memory_sink_buffer_is_bounded() {
    let sink = InMemorySink::new(2);
    for task in ["a", "b", "c"] {
        sink.record(&event(DispatchEventKind::Accepted, task));
    }

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].task, "b");
    assert_eq!(events[1].task, "c");
    // Counters survive eviction.
    assert_eq!(sink.count("accepted", "a"), 1);
    assert_eq!(sink.total("accepted"), 3);
}

#[test]
fn test_in_memory_sink_labels_by_kind() {
    let sink = InMemorySink::new(0);
    sink.record(&event(
        DispatchEventKind::Rejected {
            reason: RejectReason::QueueFull,
        },
        "emails.send",
    ));
    sink.record(&event(
        DispatchEventKind::ThresholdExceeded {
            queue_len: 11,
            threshold: 10,
        },
        "emails.send",
    ));

    assert!(sink.events().is_empty());
    assert_eq!(sink.count("rejected", "emails.send"), 1);
    assert_eq!(sink.count("threshold_exceeded", "emails.send"), 1);
    assert_eq!(sink.count("rejected", "other"), 0);
}

#[test]
fn test_event_carries_envelope_identity() {
    let envelope = TaskEnvelope::new("reports.build");
    let event = DispatchEvent::for_envelope(DispatchEventKind::Submitted, &envelope);
    assert_eq!(event.envelope_id, envelope.id());
    assert_eq!(event.task, "reports.build");
    assert!(event.created_at_ms >= envelope.created_at_ms());
}

#[test]
fn test_noop_and_tracing_sinks_accept_everything() {
    let kinds = [
        DispatchEventKind::Submitted,
        DispatchEventKind::Dispatched { attempts: 1 },
        DispatchEventKind::Retried {
            attempt: 1,
            error: "timeout".into(),
        },
        DispatchEventKind::Dropped {
            attempts: 3,
            error: "timeout".into(),
        },
        DispatchEventKind::Failed {
            error: "unknown task".into(),
        },
    ];
    for kind in kinds {
        let e = event(kind, "t");
        NoopSink.record(&e);
        TracingSink.record(&e);
    }
}
