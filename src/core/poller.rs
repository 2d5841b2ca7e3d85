//! Acquisition cycle.
//!
//! The poller owns the console session and the live [`BatteryStack`]. Each
//! cycle reads `pwr` for per-module state, then `bat` for the cell dump,
//! falling back to `pwrsys` when the dump's current is zero. Readers get
//! cloned snapshots, either on demand or as [`PollEvent`]s.

use flume::{Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, Instant},
};

use pylonmon_protocol::{
    decode_cell_dump, decode_legacy_frame, decode_module_line, decode_module_table,
    decode_present_modules, decode_system_current, LegacyReading,
};

use super::{
    aggregate::{self, ModuleDetail},
    error::{MonitorError, Result},
    persistence::HistoryPersistence,
    stack::BatteryStack,
};
use crate::protocol::{
    channel::ConsoleChannel,
    transaction::{ConsoleSession, RawReply},
};

const EVENT_BACKLOG: usize = 32;
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct AcquisitionSettings {
    /// Budget for `pwr` and `bat`.
    pub command_timeout: Duration,
    /// Budget for `bat <id>` in a module view.
    pub module_timeout: Duration,
    /// Budget for the `pwrsys` current fallback.
    pub fallback_timeout: Duration,
    pub legacy_timeout: Duration,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_millis(4000),
            module_timeout: Duration::from_millis(3000),
            fallback_timeout: Duration::from_millis(3000),
            legacy_timeout: crate::protocol::LEGACY_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub enum PollEvent {
    Snapshot(Box<BatteryStack>),
    /// Number of samples appended to the history.
    HistoryRecorded(usize),
}

/// What one acquisition cycle saw.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub modules_seen: usize,
    pub cells_seen: usize,
    pub used_current_fallback: bool,
    /// Commands whose reply never reached a prompt.
    pub incomplete: Vec<String>,
}

pub struct Poller<C: ConsoleChannel> {
    session: Mutex<ConsoleSession<C>>,
    stack: RwLock<BatteryStack>,
    persistence: Box<dyn HistoryPersistence>,
    settings: AcquisitionSettings,
    event_tx: Sender<PollEvent>,
    event_rx: Receiver<PollEvent>,
}

impl<C: ConsoleChannel> Poller<C> {
    pub fn new(
        session: ConsoleSession<C>,
        stack: BatteryStack,
        persistence: Box<dyn HistoryPersistence>,
        settings: AcquisitionSettings,
    ) -> Self {
        let (event_tx, event_rx) = flume::bounded(EVENT_BACKLOG);
        Self {
            session: Mutex::new(session),
            stack: RwLock::new(stack),
            persistence,
            settings,
            event_tx,
            event_rx,
        }
    }

    pub fn settings(&self) -> &AcquisitionSettings {
        &self.settings
    }

    /// Run one console command. Calls from several threads are serialised.
    pub fn execute(&self, command: &str, timeout: Duration) -> Result<RawReply> {
        self.session.lock().execute(command, timeout)
    }

    fn execute_tracked(
        &self,
        command: &str,
        timeout: Duration,
        report: &mut CycleReport,
    ) -> Result<RawReply> {
        let reply = self.execute(command, timeout)?;
        if !reply.is_complete() {
            report.incomplete.push(command.to_string());
        }
        Ok(reply)
    }

    /// Run one acquisition cycle and publish the resulting snapshot.
    pub fn refresh(&self) -> Result<CycleReport> {
        let mut report = CycleReport::default();
        let timeout = self.settings.command_timeout;

        let pwr = self.execute_tracked("pwr", timeout, &mut report)?;
        let rows = decode_module_table(pwr.text());
        report.modules_seen = rows.len();
        self.stack.write().apply_module_table(&rows);

        let bat = self.execute_tracked("bat", timeout, &mut report)?;
        let cells = decode_cell_dump(bat.text());
        report.cells_seen = cells.len();
        let mut agg = aggregate::fold_cell_dump(&cells);

        if agg.needs_current_fallback() {
            let sys =
                self.execute_tracked("pwrsys", self.settings.fallback_timeout, &mut report)?;
            if let Some(current_ma) = decode_system_current(sys.text()) {
                log::debug!("cell dump current is zero, using pwrsys {current_ma} mA");
                agg.apply_system_current(current_ma);
                report.used_current_fallback = true;
            }
        }

        self.stack.write().apply_cell_aggregate(&agg);
        log::debug!(
            "cycle: {} modules, {} cells, incomplete {:?}",
            report.modules_seen,
            report.cells_seen,
            report.incomplete
        );
        self.publish(PollEvent::Snapshot(Box::new(self.snapshot())));
        Ok(report)
    }

    /// Ids of the modules the controller reports as present.
    pub fn present_modules(&self) -> Result<Vec<u8>> {
        let pwr = self.execute("pwr", self.settings.command_timeout)?;
        Ok(decode_present_modules(pwr.text()))
    }

    /// Detailed view of one module from `pwr` and its own cell dump.
    pub fn module_view(&self, module_id: u8) -> Result<ModuleDetail> {
        let pwr = self.execute("pwr", self.settings.command_timeout)?;
        let Some(reading) = decode_module_line(pwr.text(), module_id) else {
            log::warn!("module {module_id} not found in the power summary");
            return Err(MonitorError::ModuleNotFound(module_id));
        };
        let bat = self.execute(&format!("bat {module_id}"), self.settings.module_timeout)?;
        let cells = decode_cell_dump(bat.text());
        Ok(aggregate::module_detail(&reading, &cells))
    }

    /// Ask with the legacy `^P003FDC` query and apply a decodable reply.
    pub fn query_legacy(&self) -> Result<Option<LegacyReading>> {
        let reply = self
            .session
            .lock()
            .execute_legacy(self.settings.legacy_timeout)?;
        let Some(reading) = decode_legacy_frame(reply.text()) else {
            log::debug!("no decodable legacy frame in {:?}", reply.text());
            return Ok(None);
        };
        self.stack.write().apply_legacy(&reading);
        self.publish(PollEvent::Snapshot(Box::new(self.snapshot())));
        Ok(Some(reading))
    }

    /// Copy of the live stack.
    pub fn snapshot(&self) -> BatteryStack {
        self.stack.read().clone()
    }

    /// Record balance samples when the history policy says so, then save.
    ///
    /// The samples stay in memory even when saving fails.
    pub fn record_if_due(&self, now: u32) -> Result<usize> {
        let (appended, history) = {
            let mut stack = self.stack.write();
            if !stack.should_record_history(now) {
                return Ok(0);
            }
            let appended = stack.record_balance_history(now);
            (appended, stack.history.clone())
        };
        log::info!("recorded {appended} balance samples at {now}");
        self.publish(PollEvent::HistoryRecorded(appended));
        self.persistence.save(&history)?;
        Ok(appended)
    }

    pub fn load_history(&self) -> Result<()> {
        let mut stack = self.stack.write();
        self.persistence.load(&mut stack.history)
    }

    pub fn save_history(&self) -> Result<()> {
        let history = self.stack.read().history.clone();
        self.persistence.save(&history)
    }

    pub fn persistence(&self) -> &dyn HistoryPersistence {
        self.persistence.as_ref()
    }

    /// Receiver for snapshot and history events.
    ///
    /// Receivers share one queue, so each event reaches a single subscriber.
    /// Events are dropped while the queue is full.
    pub fn subscribe(&self) -> Receiver<PollEvent> {
        self.event_rx.clone()
    }

    fn publish(&self, event: PollEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => log::trace!("event queue full, dropping event"),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Poll every `interval` until `stop` is set, then save the history.
    ///
    /// Cycle errors are logged and the loop carries on; only the final save
    /// can fail the call.
    pub fn run(&self, stop: &AtomicBool, interval: Duration) -> Result<()> {
        log::info!(
            "polling every {interval:?}, history in {}",
            self.persistence.describe()
        );
        while !stop.load(Ordering::SeqCst) {
            let started = Instant::now();
            if let Err(err) = self.refresh() {
                log::warn!("acquisition cycle failed: {err}");
            }
            if let Err(err) = self.record_if_due(unix_now()) {
                log::warn!("history save failed: {err}");
            }
            while started.elapsed() < interval && !stop.load(Ordering::SeqCst) {
                thread::sleep(STOP_CHECK_INTERVAL.min(interval));
            }
        }
        log::info!("stopping, saving history");
        self.save_history()
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> u32 {
    u32::try_from(chrono::Utc::now().timestamp()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::{history::HistoryStore, persistence::NullBacked},
        protocol::{channel::ScriptedChannel, transaction::SessionSettings},
    };

    const PWR: &str = "pwr\r\n@\r\n\
        Power Volt  Curr  Tempr Tlow  Thigh Vlow Vhigh Base.St Volt.St Curr.St Temp.St Coulomb Time                B.V.St B.T.St\r\n\
        1     49735 -1547 23000 22000 23000 3314 3318  Dischg  Normal  Normal  Normal  86%     2021-06-11 20:08:28 Normal Normal\r\n\
        2     -     -     -     -     -     -    -     Absent  -       -       -       -       -                   -      -\r\n\
        $$\r\npylon>";

    const BAT_IDLE: &str = "bat\r\n@\r\n\
        1  3350  0  2800  85%\r\n\
        2  3410  0  2900  86%\r\n\
        $$\r\npylon>";

    const PWRSYS: &str = "pwrsys\r\n@\r\nSystem Curr : -3067 mA\r\n$$\r\npylon>";

    fn poller(channel: ScriptedChannel) -> Poller<ScriptedChannel> {
        let settings = SessionSettings {
            resync_timeout: Duration::from_millis(30),
            poll_interval: Duration::from_millis(1),
            ..Default::default()
        };
        let acquisition = AcquisitionSettings {
            command_timeout: Duration::from_millis(200),
            module_timeout: Duration::from_millis(200),
            fallback_timeout: Duration::from_millis(200),
            legacy_timeout: Duration::from_millis(50),
        };
        Poller::new(
            ConsoleSession::new(channel, settings),
            BatteryStack::new(HistoryStore::new(1_000)),
            Box::new(NullBacked),
            acquisition,
        )
    }

    #[test]
    fn test_refresh_uses_pwrsys_when_cell_current_is_zero() {
        let poller = poller(
            ScriptedChannel::new()
                .with_reply("pwr", PWR)
                .with_reply("bat", BAT_IDLE)
                .with_reply("pwrsys", PWRSYS),
        );
        let events = poller.subscribe();

        let report = poller.refresh().unwrap();
        assert_eq!(report.modules_seen, 2);
        assert_eq!(report.cells_seen, 2);
        assert!(report.used_current_fallback);
        assert!(report.incomplete.is_empty());

        let stack = poller.snapshot();
        assert_eq!(stack.current_ma, -3067);
        assert_eq!(stack.avg_voltage_mv, 6760);
        assert_eq!(stack.balance.unwrap().imbalance_mv, 60);
        assert_eq!(stack.battery_count, 1);

        assert!(matches!(events.try_recv(), Ok(PollEvent::Snapshot(_))));
    }

    #[test]
    fn test_refresh_reports_incomplete_replies() {
        let poller = poller(ScriptedChannel::new().with_reply("pwr", PWR));
        let report = poller.refresh().unwrap();
        assert_eq!(report.incomplete, vec!["bat".to_string(), "pwrsys".to_string()]);
        assert_eq!(report.cells_seen, 0);
        assert_eq!(poller.snapshot().avg_voltage_mv, 0);
    }

    #[test]
    fn test_module_view_missing_module() {
        let poller = poller(ScriptedChannel::new().with_reply("pwr", PWR));
        let err = poller.module_view(2).unwrap_err();
        assert!(matches!(err, MonitorError::ModuleNotFound(2)));
    }

    #[test]
    fn test_module_view_combines_pwr_and_cells() {
        let poller = poller(
            ScriptedChannel::new()
                .with_reply("pwr", PWR)
                .with_reply("bat 1", BAT_IDLE),
        );
        let detail = poller.module_view(1).unwrap();
        assert_eq!(detail.id, 1);
        assert!((detail.voltage_v - 49.735).abs() < 1e-9);
        assert!((detail.temperature_c - 2.85).abs() < 1e-9);
        assert_eq!(detail.soc_percent, 86);
    }

    #[test]
    fn test_record_if_due_after_grace() {
        let poller = poller(ScriptedChannel::new().with_reply("pwr", PWR));
        poller.refresh().unwrap();
        let events = poller.subscribe();
        while events.try_recv().is_ok() {}

        assert_eq!(poller.record_if_due(1_010).unwrap(), 0);
        assert_eq!(poller.record_if_due(1_031).unwrap(), 1);
        assert_eq!(poller.record_if_due(1_100).unwrap(), 0);
        assert!(matches!(events.try_recv(), Ok(PollEvent::HistoryRecorded(1))));
        assert_eq!(poller.snapshot().history.len(), 1);
    }

    #[test]
    fn test_query_legacy_without_reply() {
        let poller = poller(ScriptedChannel::new());
        assert_eq!(poller.query_legacy().unwrap(), None);
    }

    #[test]
    fn test_query_legacy_applies_frame() {
        let frame = format!("^D{}49735-1547086{}\r", "0".repeat(50), "0".repeat(7));
        let poller = poller(ScriptedChannel::new().with_reply("^P003FDC", &frame));
        let events = poller.subscribe();

        let reading = poller.query_legacy().unwrap().unwrap();
        assert_eq!(reading.voltage_mv, 49_735);

        let stack = poller.snapshot();
        let slot = stack.batteries.get(1).unwrap();
        assert!(slot.is_present);
        assert_eq!(slot.voltage_mv, 49_735);
        assert_eq!(slot.current_ma, -1547);
        assert_eq!(slot.soc_percent, 86);
        assert_eq!(stack.avg_voltage_mv, 49_735);
        assert_eq!(stack.current_ma, -1547);
        assert_eq!(stack.soc_percent, 86);
        assert_eq!(stack.base_state, crate::core::stack::StackState::Dischg);
        assert!(matches!(events.try_recv(), Ok(PollEvent::Snapshot(_))));
    }

    #[test]
    fn test_run_exits_when_stopped() {
        let poller = poller(ScriptedChannel::new());
        let stop = AtomicBool::new(true);
        poller.run(&stop, Duration::from_millis(10)).unwrap();
    }
}
