mod common;

use common::{RecordingSink, update_report};
use steamlink_bridge_lib::config::link_config::PipelineConfig;
use steamlink_bridge_lib::core::controller::buttons;
use steamlink_bridge_lib::core::pipeline::StreamPipeline;
use steamlink_bridge_lib::mapping::{Button, InputMapper};
use steamlink_bridge_lib::output::{OutputSink, shared};
use tokio::sync::mpsc;

fn start(capacity: usize) -> (StreamPipeline, common::SinkProbe) {
    let (mut sink, probe) = RecordingSink::new();
    sink.connect().unwrap();
    let (signals, _) = mpsc::unbounded_channel();
    let pipeline = StreamPipeline::start(
        &PipelineConfig {
            queue_capacity: capacity,
            ..PipelineConfig::default()
        },
        InputMapper::default(),
        shared(sink),
        signals,
    );
    (pipeline, probe)
}

#[tokio::test]
async fn frames_are_emitted_in_submission_order() {
    let (pipeline, mut probe) = start(16);

    pipeline.submit(update_report(buttons::A));
    pipeline.submit(update_report(buttons::B));
    pipeline.submit(update_report(buttons::X));

    assert_eq!(probe.next_frame().await.pressed(), vec![Button::A]);
    assert_eq!(probe.next_frame().await.pressed(), vec![Button::B]);
    assert_eq!(probe.next_frame().await.pressed(), vec![Button::X]);

    let stats = pipeline.stop().await;
    assert_eq!(stats.emitted, 3);
    assert_eq!(stats.dropped, 0);
}

#[tokio::test]
async fn full_queue_drops_new_reports_without_blocking() {
    let (pipeline, mut probe) = start(4);

    let masks = [
        buttons::A,
        buttons::B,
        buttons::X,
        buttons::Y,
        buttons::NEXT,
        buttons::PREV,
        buttons::HOME,
        buttons::DPAD_UP,
        buttons::DPAD_DOWN,
        buttons::DPAD_LEFT,
    ];
    // The worker cannot run until this task yields, so the queue fills up.
    let accepted: Vec<bool> = masks
        .iter()
        .map(|mask| pipeline.submit(update_report(*mask)))
        .collect();
    assert_eq!(accepted, [true, true, true, true, false, false, false, false, false, false]);
    assert_eq!(pipeline.stats().dropped, 6);

    // The oldest reports survive; the ones that found the queue full are gone.
    for expected in [Button::A, Button::B, Button::X, Button::Y] {
        assert_eq!(probe.next_frame().await.pressed(), vec![expected]);
    }
    let stats = pipeline.stop().await;
    assert_eq!(stats.submitted, 10);
    assert_eq!(stats.emitted, 4);
    assert_eq!(stats.dropped, 6);
}

#[tokio::test]
async fn malformed_reports_do_not_stop_the_worker() {
    let (pipeline, mut probe) = start(16);

    pipeline.submit(Vec::new());
    pipeline.submit(vec![0x01; 5]);
    let mut unknown = vec![0u8; 18];
    unknown[0] = 0x7f;
    pipeline.submit(unknown);
    pipeline.submit(update_report(buttons::NEXT));

    assert_eq!(probe.next_frame().await.pressed(), vec![Button::Start]);
    let stats = pipeline.stop().await;
    assert_eq!(stats.decode_errors, 3);
    assert_eq!(stats.emitted, 1);
}

#[tokio::test]
async fn stop_abandons_queued_reports() {
    let (pipeline, probe) = start(16);

    for _ in 0..5 {
        pipeline.submit(update_report(buttons::A));
    }
    let stats = pipeline.stop().await;

    assert_eq!(stats.submitted, 5);
    assert_eq!(stats.emitted, 0);
    assert!(probe.log.lock().unwrap().frames.is_empty());
}
