//! Report pipeline
//! Raw reports are queued by the transport callback and drained by a single worker that
//! decodes, maps and emits them in arrival order. The callback never blocks: when the
//! queue is full the incoming report is dropped and counted.

use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::link_config::PipelineConfig;
use crate::core::bluetooth::transport::ReportHandler;
use crate::core::controller::{BatteryEvent, ConnectionEvent, DecodedEvent, decode};
use crate::mapping::mapper::InputMapper;
use crate::output::SharedSink;

/// Bytes of one notification, exactly as delivered.
pub type RawReport = Vec<u8>;

/// Events the worker passes up to whoever owns the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineSignal {
    Connection(ConnectionEvent),
    Battery(BatteryEvent),
    EmitFailed { consecutive: u32, error: String },
    EmitRecovered,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    dropped: AtomicU64,
    decoded: AtomicU64,
    decode_errors: AtomicU64,
    emitted: AtomicU64,
    emit_failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            decoded: self.decoded.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            emitted: self.emitted.load(Ordering::Relaxed),
            emit_failures: self.emit_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub submitted: u64,
    pub dropped: u64,
    pub decoded: u64,
    pub decode_errors: u64,
    pub emitted: u64,
    pub emit_failures: u64,
}

/// Producer side of the pipeline. Cheap to clone; safe to call from any thread.
#[derive(Clone)]
pub struct ReportSubmitter {
    tx: mpsc::Sender<RawReport>,
    counters: Arc<Counters>,
}

impl ReportSubmitter {
    /// Queues a report without waiting. Returns `false` when it was dropped.
    pub fn submit(&self, report: RawReport) -> bool {
        Counters::bump(&self.counters.submitted);
        match self.tx.try_send(report) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let dropped = Counters::bump(&self.counters.dropped);
                if dropped.is_power_of_two() {
                    warn!("Report queue full, {} report(s) dropped so far", dropped);
                }
                false
            }
            Err(TrySendError::Closed(_)) => {
                Counters::bump(&self.counters.dropped);
                trace!("Report submitted after pipeline stop");
                false
            }
        }
    }
}

impl ReportHandler for ReportSubmitter {
    fn on_notification(&self, _characteristic: Uuid, data: Vec<u8>) {
        self.submit(data);
    }
}

pub struct StreamPipeline {
    submitter: ReportSubmitter,
    counters: Arc<Counters>,
    cancel_token: CancellationToken,
    worker: Option<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl StreamPipeline {
    /// Starts the worker. Signals are sent without blocking the worker.
    pub fn start(
        config: &PipelineConfig,
        mapper: InputMapper,
        sink: SharedSink,
        signals: mpsc::UnboundedSender<PipelineSignal>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let counters = Arc::new(Counters::default());
        let cancel_token = CancellationToken::new();

        let worker = Worker {
            rx,
            mapper,
            sink,
            signals,
            counters: counters.clone(),
            consecutive_failures: 0,
        };
        let handle = tokio::spawn(worker.run(cancel_token.clone()));

        Self {
            submitter: ReportSubmitter {
                tx,
                counters: counters.clone(),
            },
            counters,
            cancel_token,
            worker: Some(handle),
            shutdown_timeout: config.shutdown_timeout(),
        }
    }

    pub fn submitter(&self) -> ReportSubmitter {
        self.submitter.clone()
    }

    pub fn submit(&self, report: RawReport) -> bool {
        self.submitter.submit(report)
    }

    pub fn stats(&self) -> PipelineStats {
        self.counters.snapshot()
    }

    /// Stops the worker. Reports still queued are abandoned.
    ///
    /// Waits at most the configured shutdown timeout for the worker to finish its
    /// current report. Returns the final counters.
    pub async fn stop(mut self) -> PipelineStats {
        self.cancel_token.cancel();

        if let Some(mut handle) = self.worker.take() {
            match timeout(self.shutdown_timeout, &mut handle).await {
                Ok(Ok(())) => debug!("Pipeline worker finished."),
                Ok(Err(e)) => error!("Pipeline worker ended abnormally: {:?}", e),
                Err(_) => {
                    warn!(
                        "Pipeline worker did not stop within {:?}, aborting",
                        self.shutdown_timeout
                    );
                    handle.abort();
                }
            }
        }

        let stats = self.stats();
        info!(
            "Pipeline stopped: {} submitted, {} dropped, {} emitted, {} decode errors",
            stats.submitted, stats.dropped, stats.emitted, stats.decode_errors
        );
        stats
    }
}

impl Drop for StreamPipeline {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

struct Worker {
    rx: mpsc::Receiver<RawReport>,
    mapper: InputMapper,
    sink: SharedSink,
    signals: mpsc::UnboundedSender<PipelineSignal>,
    counters: Arc<Counters>,
    consecutive_failures: u32,
}

impl Worker {
    async fn run(mut self, cancel_token: CancellationToken) {
        info!("Report pipeline worker started.");
        loop {
            let report = tokio::select! {
                biased;
                _ = cancel_token.cancelled() => break,
                report = self.rx.recv() => match report {
                    Some(report) => report,
                    None => break,
                },
            };
            self.process(&report);
        }
        self.rx.close();
        info!("Report pipeline worker stopped.");
    }

    fn process(&mut self, report: &[u8]) {
        match decode(report) {
            Ok(DecodedEvent::Update(update)) => {
                Counters::bump(&self.counters.decoded);
                let state = self.mapper.map(&update);
                let result = self
                    .sink
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .emit(&state);
                match result {
                    Ok(()) => {
                        Counters::bump(&self.counters.emitted);
                        if self.consecutive_failures > 0 {
                            info!(
                                "Virtual gamepad recovered after {} failed emit(s)",
                                self.consecutive_failures
                            );
                            self.consecutive_failures = 0;
                            self.signal(PipelineSignal::EmitRecovered);
                        }
                    }
                    Err(e) => {
                        Counters::bump(&self.counters.emit_failures);
                        self.consecutive_failures += 1;
                        warn!("Failed to emit gamepad state: {}", e);
                        self.signal(PipelineSignal::EmitFailed {
                            consecutive: self.consecutive_failures,
                            error: e.to_string(),
                        });
                    }
                }
            }
            Ok(DecodedEvent::Connection(event)) => {
                Counters::bump(&self.counters.decoded);
                debug!("Controller connection event: {:?}", event.message);
                self.signal(PipelineSignal::Connection(event));
            }
            Ok(DecodedEvent::Battery(event)) => {
                Counters::bump(&self.counters.decoded);
                debug!("Controller battery: {} mV", event.voltage);
                self.signal(PipelineSignal::Battery(event));
            }
            Err(e) => {
                Counters::bump(&self.counters.decode_errors);
                debug!("Discarding report ({} bytes): {}", report.len(), e);
            }
        }
    }

    fn signal(&self, signal: PipelineSignal) {
        // The owner may already be gone during shutdown.
        let _ = self.signals.send(signal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{LogSink, OutputSink, shared};

    fn update_report(buttons: u32) -> RawReport {
        let mut report = vec![0u8; 20];
        report[0] = 0x01;
        report[4..7].copy_from_slice(&buttons.to_le_bytes()[..3]);
        report
    }

    fn connected_sink() -> SharedSink {
        let mut sink = LogSink::new();
        sink.connect().unwrap();
        shared(sink)
    }

    #[tokio::test]
    async fn counts_decoded_and_rejected_reports() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let pipeline = StreamPipeline::start(
            &PipelineConfig::default(),
            InputMapper::default(),
            connected_sink(),
            tx,
        );

        assert!(pipeline.submit(update_report(0)));
        assert!(pipeline.submit(vec![0x01, 0x02]));
        let mut battery = vec![0u8; 17];
        battery[0] = 0x04;
        battery[1..3].copy_from_slice(&3100u16.to_le_bytes());
        assert!(pipeline.submit(battery));

        assert_eq!(
            rx.recv().await,
            Some(PipelineSignal::Battery(BatteryEvent { voltage: 3100 }))
        );

        let stats = pipeline.stop().await;
        assert_eq!(stats.submitted, 3);
        assert_eq!(stats.decoded, 2);
        assert_eq!(stats.decode_errors, 1);
        assert_eq!(stats.emitted, 1);
    }

    #[tokio::test]
    async fn emit_failures_are_signalled_and_recover() {
        let sink = shared(LogSink::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let pipeline =
            StreamPipeline::start(&PipelineConfig::default(), InputMapper::default(), sink.clone(), tx);

        pipeline.submit(update_report(0));
        pipeline.submit(update_report(0));
        assert!(matches!(
            rx.recv().await,
            Some(PipelineSignal::EmitFailed { consecutive: 1, .. })
        ));
        assert!(matches!(
            rx.recv().await,
            Some(PipelineSignal::EmitFailed { consecutive: 2, .. })
        ));

        sink.lock().unwrap().connect().unwrap();
        pipeline.submit(update_report(0));
        assert_eq!(rx.recv().await, Some(PipelineSignal::EmitRecovered));

        let stats = pipeline.stop().await;
        assert_eq!(stats.emit_failures, 2);
        assert_eq!(stats.emitted, 1);
    }

    #[tokio::test]
    async fn submit_after_stop_is_dropped() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let pipeline = StreamPipeline::start(
            &PipelineConfig::default(),
            InputMapper::default(),
            connected_sink(),
            tx,
        );
        let submitter = pipeline.submitter();
        pipeline.stop().await;
        assert!(!submitter.submit(update_report(0)));
    }
}
