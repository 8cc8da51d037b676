//! Cancellable background measurement

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vxi_core::{InstrumentError, InstrumentEvent, InstrumentResult, StatusSource};

use crate::instrument::{publish_status, InstrumentState};

/// Timing of one measurement
#[derive(Debug, Clone, Copy)]
pub(crate) struct MeasurementTiming {
    pub duration: Duration,
    /// Time a cancelled measurement takes to wind down
    pub abort_latency: Duration,
}

/// Handle to a running (or finished) measurement task
pub(crate) struct MeasurementTask {
    device: String,
    id: u64,
    state: Arc<Mutex<InstrumentState>>,
    events: broadcast::Sender<InstrumentEvent>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl MeasurementTask {
    /// Spawn a measurement on the current runtime
    ///
    /// The caller marks the state as measuring before spawning.
    pub(crate) fn spawn(
        device: String,
        id: u64,
        state: Arc<Mutex<InstrumentState>>,
        events: broadcast::Sender<InstrumentEvent>,
        timing: MeasurementTiming,
    ) -> InstrumentResult<Self> {
        let runtime = Handle::try_current()
            .map_err(|_| InstrumentError::Io("no async runtime for measurement".to_string()))?;

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let (task_device, task_state, task_events) = (device.clone(), state.clone(), events.clone());

        let handle = runtime.spawn(async move {
            let (device, state, events) = (task_device, task_state, task_events);
            let completed = tokio::select! {
                _ = token.cancelled() => false,
                _ = tokio::time::sleep(timing.duration) => true,
            };

            if !completed {
                debug!(device = %device, "Measurement cancelled");
                tokio::time::sleep(timing.abort_latency).await;
            }

            finish(&device, id, &state, &events, completed);
        });

        Ok(Self {
            device,
            id,
            state,
            events,
            cancel,
            handle,
        })
    }

    /// Request cancellation without waiting
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel and wait up to `timeout` for the task to stop
    pub(crate) async fn stop(mut self, timeout: Duration) -> InstrumentResult<()> {
        self.cancel.cancel();
        match tokio::time::timeout(timeout, &mut self.handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(InstrumentError::Io(format!("measurement task failed: {}", e))),
            Err(_) => {
                warn!(
                    device = %self.device,
                    timeout_ms = timeout.as_millis() as u64,
                    "Measurement did not stop in time"
                );
                self.handle.abort();
                // The aborted task never reaches its own bookkeeping
                finish(&self.device, self.id, &self.state, &self.events, false);
                Err(InstrumentError::Io(
                    "measurement did not stop in time".to_string(),
                ))
            }
        }
    }
}

impl Drop for MeasurementTask {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

/// End the operation: store a reading if it completed, clear the
/// measuring flag and report operation complete
///
/// Does nothing if the operation was already finished.
fn finish(
    device: &str,
    id: u64,
    state: &Mutex<InstrumentState>,
    events: &broadcast::Sender<InstrumentEvent>,
    completed: bool,
) {
    let change = {
        let mut state = state.lock();
        if !state.measuring {
            return;
        }
        if completed {
            let reading = sample(state.voltage_range);
            state.last_reading = Some(reading);
            debug!(device = %device, reading, "Measurement complete");
        }
        state.measuring = false;
        state.registers.operation_finished()
    };
    publish_status(events, change, StatusSource::Operation(id));
}

/// Simulated reading within the configured range
pub(crate) fn sample(range: f64) -> f64 {
    let mut rng = rand::thread_rng();
    let range = range.abs().max(f64::EPSILON);
    rng.gen_range(-range..=range)
}
