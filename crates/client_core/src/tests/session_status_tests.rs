use super::*;
use crate::{
    event_channel::{LocalEventChannel, StreamError},
    test_support::{RecordingService, ServiceCall},
    training::TrainingRequestCoordinator,
    types::{DatasetFile, TrainingUpload},
};
use serde_json::json;
use shared::error::ProtocolError;
use tokio::sync::broadcast::error::TryRecvError;

fn controller() -> (SessionStatusController, LocalEventChannel) {
    let channel = LocalEventChannel::new(16);
    (
        SessionStatusController::new(Arc::new(channel.clone())),
        channel,
    )
}

fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => return events,
        }
    }
}

fn completions(events: &[SessionEvent]) -> usize {
    events
        .iter()
        .filter(|event| **event == SessionEvent::TrainingCompleted)
        .count()
}

fn vgg16_update() -> TrainingUpdate {
    TrainingUpdate::metric(
        "vgg16",
        json!({ "epoch": "Epoch 3/10", "accuracy": "0.912345", "loss": 0.25 }),
    )
}

fn yolo_update() -> TrainingUpdate {
    TrainingUpdate::metric(
        "yolo",
        json!({
            "epoch": "2/50",
            "gpu_mem": "3.1G",
            "box_loss": "1.234",
            "cls_loss": "0.567",
            "dfl_loss": "1.1",
            "instances": 42,
            "progress": "37",
            "speed": "4.2it/s"
        }),
    )
}

const VGG16_LINE: &str = "Epoch 3/10, accuracy: 0.9123, loss: 0.2500";
const YOLO_LINE: &str =
    "Epoch 2/50, box Loss: 1.234, class loss: 0.567, DFL loss: 1.1, instances: 42, progress: 37%";

#[tokio::test]
async fn initialize_with_active_run_seeds_sentinel_line() {
    let (mut session, channel) = controller();
    let service = RecordingService::running();

    let status = session.initialize(&service).await.expect("initialize");

    assert_eq!(status, TrainingStatus::Training);
    assert_eq!(session.log(), [TRAINING_RUNNING_LINE.to_string()]);
    assert_eq!(session.session().transcript(), "Training is running...\n");
    assert!(session.is_subscribed());
    assert_eq!(channel.active_subscriptions(), 1);
}

#[tokio::test]
async fn initialize_without_active_run_is_idle_with_empty_log() {
    let (mut session, _channel) = controller();
    let service = RecordingService::idle();

    let status = session.initialize(&service).await.expect("initialize");

    assert_eq!(status, TrainingStatus::Idle);
    assert!(session.log().is_empty());
    assert_eq!(service.calls(), vec![ServiceCall::Status]);
}

#[tokio::test]
async fn failed_poll_stays_unknown_until_a_retry_succeeds() {
    let (mut session, _channel) = controller();
    let service = RecordingService::unreachable();

    let err = session.initialize(&service).await.expect_err("poll fails");
    assert!(matches!(err, TransportError::Network(_)));
    assert_eq!(session.status(), TrainingStatus::Unknown);
    assert!(session.is_subscribed(), "subscription survives a failed poll");

    service.set_status(Ok(StatusResponse {
        training_running: false,
    }));
    let status = session.refresh_status(&service).await.expect("retry");
    assert_eq!(status, TrainingStatus::Idle);
}

#[tokio::test]
async fn repeated_subscribe_registers_once_and_shutdown_releases_once() {
    let (mut session, channel) = controller();
    let service = RecordingService::idle();

    session.initialize(&service).await.expect("initialize");
    session.initialize(&service).await.expect("initialize again");
    session.subscribe().await.expect("subscribe again");

    assert_eq!(channel.registrations(), 1);
    assert_eq!(channel.active_subscriptions(), 1);

    session.shutdown();
    session.shutdown();
    assert_eq!(channel.active_subscriptions(), 0);
    assert!(!session.process_next_event().await);
}

#[tokio::test]
async fn dropping_the_controller_releases_the_subscription() {
    let (mut session, channel) = controller();
    session.subscribe().await.expect("subscribe");
    assert_eq!(channel.active_subscriptions(), 1);

    drop(session);
    assert_eq!(channel.active_subscriptions(), 0);
}

#[test]
fn metric_updates_render_per_variant() {
    let (mut session, _channel) = controller();

    assert_eq!(session.handle_update(vgg16_update()).as_deref(), Some(VGG16_LINE));
    assert_eq!(session.handle_update(yolo_update()).as_deref(), Some(YOLO_LINE));
    assert_eq!(
        session
            .handle_update(TrainingUpdate::line("Downloading weights"))
            .as_deref(),
        Some("Downloading weights")
    );
}

#[test]
fn non_numeric_classification_values_pass_through() {
    let (mut session, _channel) = controller();
    let line = session.handle_update(TrainingUpdate::metric(
        "vgg16",
        json!({ "epoch": "1/5", "accuracy": "n/a", "loss": "0.5" }),
    ));
    assert_eq!(line.as_deref(), Some("1/5, accuracy: n/a, loss: 0.5000"));
}

#[test]
fn unrecognized_and_malformed_updates_never_break_the_controller() {
    let (mut session, _channel) = controller();

    assert_eq!(
        session.handle_update(TrainingUpdate::metric("resnet", json!({ "epoch": 1 }))),
        None
    );
    assert!(session.log().is_empty());
    assert_eq!(session.status(), TrainingStatus::Unknown);

    let passed_through = session
        .handle_update(TrainingUpdate::metric("yolo", json!({ "epoch": "1" })))
        .expect("malformed metric is passed through");
    assert!(passed_through.contains("\"epoch\""));

    let odd_output = TrainingUpdate {
        output: Some(json!(17)),
        ..TrainingUpdate::default()
    };
    assert_eq!(session.handle_update(odd_output), None);
    assert_eq!(session.log().len(), 1);
}

#[test]
fn events_are_appended_in_order_regardless_of_poll_position() {
    let updates = [
        TrainingUpdate::line("A"),
        vgg16_update(),
        yolo_update(),
    ];
    let rendered = ["A".to_string(), VGG16_LINE.to_string(), YOLO_LINE.to_string()];

    for training_running in [true, false] {
        for poll_position in 0..=updates.len() {
            let (mut session, _channel) = controller();
            for (index, update) in updates.iter().enumerate() {
                if index == poll_position {
                    session.apply_poll(StatusResponse { training_running });
                }
                session.handle_update(update.clone());
            }
            if poll_position == updates.len() {
                session.apply_poll(StatusResponse { training_running });
            }

            let log = session.log();
            assert!(log.len() >= 3, "poll at {poll_position}: {log:?}");
            assert_eq!(
                &log[log.len() - 3..],
                &rendered,
                "poll at {poll_position}, running={training_running}"
            );
            if poll_position > 0 {
                assert_eq!(session.status(), TrainingStatus::Training);
                assert_eq!(log.len(), 3, "late poll must not seed the log");
            }
        }
    }
}

#[test]
fn late_idle_poll_does_not_demote_a_stream_advanced_session() {
    let (mut session, _channel) = controller();
    session.handle_update(TrainingUpdate::line("Epoch 1"));
    assert_eq!(session.status(), TrainingStatus::Training);

    let status = session.apply_poll(StatusResponse {
        training_running: false,
    });
    assert_eq!(status, TrainingStatus::Training);
}

#[test]
fn done_flag_notifies_exactly_once_per_event() {
    let (mut session, _channel) = controller();
    let mut rx = session.subscribe_events();

    session.handle_update(TrainingUpdate::line("Epoch 10/10"));
    assert_eq!(completions(&drain(&mut rx)), 0);

    session.handle_update(TrainingUpdate::line("Training finished").finished());
    assert_eq!(completions(&drain(&mut rx)), 1);

    let done_only = TrainingUpdate {
        done: Some(true),
        ..TrainingUpdate::default()
    };
    session.handle_update(done_only.clone());
    session.handle_update(done_only);
    assert_eq!(completions(&drain(&mut rx)), 2);

    session.handle_update(TrainingUpdate::metric("resnet", json!({})).finished());
    assert_eq!(completions(&drain(&mut rx)), 1);
}

#[test]
fn done_is_not_a_status_transition() {
    let (mut session, _channel) = controller();
    session.apply_poll(StatusResponse {
        training_running: true,
    });
    session.handle_update(TrainingUpdate::line("finished").finished());
    assert_eq!(session.status(), TrainingStatus::Training);
}

#[test]
fn stream_errors_are_reported_without_changing_status() {
    let (mut session, _channel) = controller();
    session.apply_poll(StatusResponse {
        training_running: false,
    });
    let mut rx = session.subscribe_events();

    session.handle_stream_item(Err(StreamError::Protocol(ProtocolError::InvalidFrame(
        "expected value".to_string(),
    ))));
    session.handle_stream_item(Err(StreamError::Transport("reset".to_string())));

    assert_eq!(session.status(), TrainingStatus::Idle);
    assert!(session.log().is_empty());
    let events = drain(&mut rx);
    assert_eq!(events.len(), 2);
    assert!(events
        .iter()
        .all(|event| matches!(event, SessionEvent::StreamError(_))));
}

#[tokio::test]
async fn published_updates_are_processed_in_arrival_order() {
    let (mut session, channel) = controller();
    let service = RecordingService::idle();
    session.initialize(&service).await.expect("initialize");

    assert_eq!(channel.publish(Ok(TrainingUpdate::line("one"))), 1);
    assert_eq!(channel.publish(Ok(TrainingUpdate::line("two"))), 1);
    assert_eq!(channel.publish(Ok(TrainingUpdate::line("three").finished())), 1);

    let mut rx = session.subscribe_events();
    for _ in 0..3 {
        assert!(session.process_next_event().await);
    }

    assert_eq!(session.log(), ["one", "two", "three"].map(String::from));
    assert_eq!(completions(&drain(&mut rx)), 1);
}

#[test]
fn poll_after_streamed_lines_keeps_the_log_of_an_idle_session() {
    let (mut session, _channel) = controller();
    session.apply_poll(StatusResponse {
        training_running: false,
    });
    session.handle_update(TrainingUpdate::line("A"));
    session.handle_update(TrainingUpdate::line("B"));

    let status = session.apply_poll(StatusResponse {
        training_running: true,
    });

    assert_eq!(status, TrainingStatus::Idle);
    assert_eq!(session.log(), ["A", "B"].map(String::from));
}

#[tokio::test]
async fn poll_after_start_and_streamed_lines_keeps_the_log() {
    let (mut session, _channel) = controller();
    let service = RecordingService::idle();
    session.refresh_status(&service).await.expect("poll");
    TrainingRequestCoordinator::new()
        .start(
            &mut session,
            &service,
            TrainingUpload {
                name: "board-v2".to_string(),
                task_type: Default::default(),
                files: vec![DatasetFile {
                    relative_path: "chess/a.jpg".to_string(),
                    bytes: vec![1],
                }],
            },
        )
        .await
        .expect("start");
    session.handle_update(yolo_update());

    service.set_status(Ok(StatusResponse {
        training_running: true,
    }));
    let status = session.refresh_status(&service).await.expect("late poll");

    assert_eq!(status, TrainingStatus::Training);
    assert_eq!(
        session.log(),
        [STARTING_LINE.to_string(), YOLO_LINE.to_string()]
    );
}

#[test]
fn repeated_running_polls_do_not_reseed_the_log() {
    let (mut session, _channel) = controller();
    session.apply_poll(StatusResponse {
        training_running: true,
    });
    session.append_line(STOPPED_LINE.to_string());

    session.apply_poll(StatusResponse {
        training_running: true,
    });

    assert_eq!(
        session.log(),
        [TRAINING_RUNNING_LINE.to_string(), STOPPED_LINE.to_string()]
    );
}

#[test]
fn event_capacity_bounds_slow_listeners() {
    let channel = LocalEventChannel::new(4);
    let mut session = SessionStatusController::with_event_capacity(Arc::new(channel), 2);
    let mut rx = session.subscribe_events();

    for n in 0..4 {
        session.handle_update(TrainingUpdate::line(format!("line {n}")));
    }

    assert!(matches!(rx.try_recv(), Err(TryRecvError::Lagged(_))));
    assert_eq!(session.log().len(), 4);
}
