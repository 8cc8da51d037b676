//! Simulated SCPI instrument
//!
//! Interprets commands through a static command table, maintains IEEE 488.2
//! status registers and publishes status changes and log activity on a
//! broadcast channel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use vxi_core::{
    BusInterface, DeviceErrorCode, Instrument, InstrumentError, InstrumentEvent, InstrumentResult,
    StatusSource,
};

use crate::commands;
use crate::config::InstrumentConfig;
use crate::gpib::GpibInterface;
use crate::log::{MessageLog, MessageLogEntry};
use crate::measurement::{MeasurementTask, MeasurementTiming};
use crate::registers::{StatusChange, StatusRegisters};

/// Broadcast capacity for instrument events
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Mutable measurement and register state
#[derive(Debug)]
pub(crate) struct InstrumentState {
    pub registers: StatusRegisters,
    pub voltage_range: f64,
    pub last_reading: Option<f64>,
    pub measuring: bool,
}

/// Publish a status change, ignoring the absence of subscribers
pub(crate) fn publish_status(
    events: &broadcast::Sender<InstrumentEvent>,
    change: Option<StatusChange>,
    source: StatusSource,
) {
    if let Some(change) = change {
        let _ = events.send(InstrumentEvent::StatusChanged {
            status: change.status,
            service_requested: change.service_requested,
            source,
        });
    }
}

/// A simulated instrument
pub struct SimulatedInstrument {
    pub(crate) name: String,
    pub(crate) config: InstrumentConfig,
    pub(crate) state: Arc<Mutex<InstrumentState>>,
    events: broadcast::Sender<InstrumentEvent>,
    log: Mutex<MessageLog>,
    remote: Arc<AtomicBool>,
    operation: Mutex<Option<MeasurementTask>>,
    /// Id of the most recently started operation
    operation_seq: AtomicU64,
    gpib: Option<GpibInterface>,
}

impl SimulatedInstrument {
    /// Create an instrument serving `name`
    pub fn new(name: impl Into<String>, config: InstrumentConfig) -> Self {
        let name = name.into();
        let state = Arc::new(Mutex::new(InstrumentState {
            registers: StatusRegisters::new(config.error_queue_capacity),
            voltage_range: config.voltage_range,
            last_reading: None,
            measuring: false,
        }));
        let remote = Arc::new(AtomicBool::new(false));
        let gpib = config
            .gpib
            .as_ref()
            .map(|gpib| GpibInterface::new(gpib, state.clone(), remote.clone()));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        info!(
            device = %name,
            identity = %config.identity,
            gpib = gpib.is_some(),
            "Created simulated instrument"
        );

        Self {
            name,
            log: Mutex::new(MessageLog::new(config.log_capacity)),
            config,
            state,
            events,
            remote,
            operation: Mutex::new(None),
            operation_seq: AtomicU64::new(0),
            gpib,
        }
    }

    /// Snapshot of the message log, oldest first
    pub fn log_entries(&self) -> Vec<MessageLogEntry> {
        self.log.lock().entries().cloned().collect()
    }

    /// Total number of exchanges handled
    pub fn message_count(&self) -> u64 {
        self.log.lock().count()
    }

    /// Whether a triggered measurement is still running
    pub fn is_measuring(&self) -> bool {
        self.state.lock().measuring
    }

    /// Apply a register mutation and publish the resulting change
    pub(crate) fn update_registers<T>(
        &self,
        f: impl FnOnce(&mut StatusRegisters) -> (T, Option<StatusChange>),
    ) -> T {
        let (value, change) = {
            let mut state = self.state.lock();
            f(&mut state.registers)
        };
        self.publish(change);
        value
    }

    pub(crate) fn publish(&self, change: Option<StatusChange>) {
        publish_status(&self.events, change, StatusSource::Command);
    }

    /// Start a measurement unless one is already running
    pub(crate) fn start_measurement(&self) -> InstrumentResult<()> {
        let mut operation = self.operation.lock();
        {
            let mut state = self.state.lock();
            if state.measuring {
                debug!(device = %self.name, "Measurement already running");
                return Ok(());
            }
            state.measuring = true;
        }

        let timing = MeasurementTiming {
            duration: Duration::from_millis(self.config.measurement_ms),
            abort_latency: Duration::from_millis(self.config.abort_latency_ms),
        };
        let id = self.operation_seq.fetch_add(1, Ordering::SeqCst) + 1;
        match MeasurementTask::spawn(
            self.name.clone(),
            id,
            self.state.clone(),
            self.events.clone(),
            timing,
        ) {
            Ok(task) => {
                debug!(device = %self.name, id, duration_ms = self.config.measurement_ms, "Measurement started");
                *operation = Some(task);
                let _ = self.events.send(InstrumentEvent::OperationStarted { id });
                Ok(())
            }
            Err(e) => {
                self.state.lock().measuring = false;
                Err(e)
            }
        }
    }

    /// Signal the running measurement to stop without waiting
    pub(crate) fn cancel_measurement(&self) {
        if let Some(task) = self.operation.lock().as_ref() {
            if !task.is_finished() {
                debug!(device = %self.name, "Cancelling measurement");
            }
            task.cancel();
        }
    }

    /// Whether the remote flag is set
    pub(crate) fn remote_flag(&self) -> bool {
        self.remote.load(Ordering::SeqCst)
    }

    fn record_error(&self, err: &InstrumentError) {
        let (error, event_bit) = commands::scpi_error(err);
        debug!(device = %self.name, code = error.code, message = %error.message, "Queued SCPI error");
        self.update_registers(|regs| ((), regs.push_error(error, event_bit)));
    }

    fn log_exchange(&self, command: &str, result: &InstrumentResult<Option<String>>) {
        let count = {
            let mut log = self.log.lock();
            match result {
                Ok(reply) => log.push(command, reply.as_deref(), None),
                Err(e) => log.push(command, None, Some(DeviceErrorCode::from(e.clone()))),
            }
        };
        let _ = self.events.send(InstrumentEvent::MessageLogged { count });
    }
}

#[async_trait]
impl Instrument for SimulatedInstrument {
    fn name(&self) -> &str {
        &self.name
    }

    fn identity(&self) -> &str {
        &self.config.identity
    }

    fn execute(&self, command: &str) -> InstrumentResult<Option<String>> {
        let result = commands::dispatch(self, command);
        match &result {
            Ok(reply) => debug!(device = %self.name, command, reply = ?reply, "Executed"),
            Err(e) => {
                warn!(device = %self.name, command, error = %e, "Command failed");
                self.record_error(e);
            }
        }
        self.log_exchange(command, &result);
        result
    }

    fn read_status_byte(&self) -> u8 {
        let mut state = self.state.lock();
        state.registers.take_status_byte()
    }

    fn trigger(&self) -> InstrumentResult<()> {
        self.start_measurement()
    }

    fn clear(&self) -> InstrumentResult<()> {
        self.cancel_measurement();
        self.state.lock().registers.reset();
        debug!(device = %self.name, "Device clear");
        Ok(())
    }

    fn set_remote_enabled(&self, enabled: bool) {
        self.remote.store(enabled, Ordering::SeqCst);
        debug!(device = %self.name, enabled, "Remote state changed");
    }

    fn is_remote_enabled(&self) -> bool {
        self.remote_flag()
    }

    fn interface(&self) -> Option<&dyn BusInterface> {
        self.gpib.as_ref().map(|gpib| gpib as &dyn BusInterface)
    }

    fn subscribe(&self) -> broadcast::Receiver<InstrumentEvent> {
        self.events.subscribe()
    }

    async fn abort(&self, timeout: Duration) -> InstrumentResult<()> {
        let task = self.operation.lock().take();
        match task {
            Some(task) => {
                info!(device = %self.name, timeout_ms = timeout.as_millis() as u64, "Aborting measurement");
                task.stop(timeout).await
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vxi_core::status::{event_status, status_byte};

    fn instrument() -> SimulatedInstrument {
        let mut config = InstrumentConfig::named("inst0");
        config.identity = "ACME,Model 42,SN0001,1.0".to_string();
        config.log_capacity = 3;
        config.measurement_ms = 200;
        SimulatedInstrument::new("inst0", config)
    }

    #[test]
    fn test_identity_query() {
        let inst = instrument();
        let reply = inst.execute("*IDN?").unwrap();
        assert_eq!(reply.as_deref(), Some("ACME,Model 42,SN0001,1.0"));
        assert_eq!(inst.message_count(), 1);
    }

    #[test]
    fn test_undefined_header_sets_command_error() {
        let inst = instrument();
        inst.execute("*CLS").unwrap();

        let err = inst.execute("FOO:BAR").unwrap_err();
        assert!(matches!(err, InstrumentError::UndefinedHeader(_)));

        let esr = inst.execute("*ESR?").unwrap().unwrap();
        assert_eq!(esr, event_status::COMMAND_ERROR.to_string());
        let error = inst.execute("SYST:ERR?").unwrap().unwrap();
        assert_eq!(error, "-113,\"Undefined header\"");
    }

    #[test]
    fn test_log_is_bounded() {
        let inst = instrument();
        for _ in 0..5 {
            inst.execute("*IDN?").unwrap();
        }
        let _ = inst.execute("BOGUS");
        let entries = inst.log_entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries.last().unwrap().sequence, 6);
        assert_eq!(
            entries.last().unwrap().error,
            Some(DeviceErrorCode::SyntaxError)
        );
    }

    #[test]
    fn test_status_change_published() {
        let inst = instrument();
        let mut rx = inst.subscribe();
        inst.execute("*CLS").unwrap();
        inst.execute("*SRE 32").unwrap();
        inst.execute("*ESE 1").unwrap();
        inst.execute("*OPC").unwrap();

        let mut requested = false;
        while let Ok(event) = rx.try_recv() {
            if let InstrumentEvent::StatusChanged {
                service_requested: true,
                status,
                source,
            } = event
            {
                assert_ne!(status & status_byte::EVENT_SUMMARY, 0);
                assert_eq!(source, StatusSource::Command);
                requested = true;
            }
        }
        assert!(requested);

        let stb = inst.read_status_byte();
        assert_eq!(stb, status_byte::EVENT_SUMMARY | status_byte::REQUEST_SERVICE);
        assert_eq!(inst.read_status_byte(), 0);
    }

    #[test]
    fn test_remote_flag() {
        let inst = instrument();
        assert_eq!(inst.execute("SYST:REM?").unwrap().as_deref(), Some("0"));
        inst.set_remote_enabled(true);
        assert!(inst.is_remote_enabled());
        assert_eq!(inst.execute("SYST:REM?").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn test_no_interface_without_gpib() {
        assert!(instrument().interface().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_measurement_and_opc() {
        let inst = instrument();
        inst.execute("*CLS").unwrap();
        inst.execute("INIT").unwrap();
        assert!(inst.is_measuring());
        assert_eq!(inst.execute("*OPC?").unwrap().as_deref(), Some("0"));
        inst.execute("*OPC").unwrap();
        assert_eq!(inst.execute("*ESR?").unwrap().as_deref(), Some("0"));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!inst.is_measuring());
        assert_eq!(inst.execute("*OPC?").unwrap().as_deref(), Some("1"));
        assert_eq!(inst.execute("*ESR?").unwrap().as_deref(), Some("1"));
        assert!(inst.execute("FETC?").unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_operation_events_carry_id() {
        let inst = instrument();
        inst.execute("*CLS").unwrap();
        inst.execute("*ESE 1").unwrap();
        inst.execute("*SRE 32").unwrap();
        let mut rx = inst.subscribe();

        inst.execute("INIT").unwrap();
        inst.execute("*OPC").unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(events.contains(&InstrumentEvent::OperationStarted { id: 1 }));
        assert!(events.iter().any(|e| matches!(
            e,
            InstrumentEvent::StatusChanged {
                service_requested: true,
                source: StatusSource::Operation(1),
                ..
            }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_stops_measurement() {
        let inst = instrument();
        inst.trigger().unwrap();
        assert!(inst.is_measuring());
        inst.abort(Duration::from_millis(50)).await.unwrap();
        assert!(!inst.is_measuring());
        // Nothing left to abort
        inst.abort(Duration::from_millis(50)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_times_out_on_slow_wind_down() {
        let mut config = InstrumentConfig::named("inst0");
        config.measurement_ms = 10_000;
        config.abort_latency_ms = 1_000;
        let inst = SimulatedInstrument::new("inst0", config);
        inst.execute("INIT").unwrap();

        let err = inst.abort(Duration::from_millis(100)).await.unwrap_err();
        assert_eq!(DeviceErrorCode::from(err), DeviceErrorCode::IoError);

        // The instrument is usable again straight away
        assert!(!inst.is_measuring());
        assert_eq!(inst.execute("*OPC?").unwrap().as_deref(), Some("1"));
        assert_eq!(inst.execute("FETC?").unwrap().as_deref(), Some(commands::NOT_A_NUMBER));

        inst.execute("INIT").unwrap();
        assert!(inst.is_measuring());
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert!(!inst.is_measuring());
        assert_ne!(inst.execute("FETC?").unwrap().as_deref(), Some(commands::NOT_A_NUMBER));
    }
}
