use std::time::Duration;

use pylonmon::{
    core::{
        history::HistoryStore, AcquisitionSettings, BatteryStack, FilesystemBacked, NullBacked,
        Poller, StackState,
    },
    protocol::{ConsoleSession, ScriptedChannel, SessionSettings},
    StackView,
};

const PWR: &str = "pwr\r\n@\r\n\
    Power Volt  Curr  Tempr Tlow  Thigh Vlow Vhigh Base.St Volt.St Curr.St Temp.St Coulomb Time                B.V.St B.T.St\r\n\
    1     49735 -1547 23000 22000 23000 3314 3318  Dischg  Normal  Normal  Normal  86%     2021-06-11 20:08:28 Normal Normal\r\n\
    2     49730 -1520 24000 23000 24000 3300 3362  Dischg  Normal  Normal  Normal  84%     2021-06-11 20:08:28 Normal Normal\r\n\
    3     -     -     -     -     -     -    -     Absent  -       -       -       -       -                   -      -\r\n\
    $$\r\npylon>";

const BAT: &str = "bat\r\n@\r\n\
    1  3314  -1547  23000  86%\r\n\
    2  3318  -1547  22000  86%\r\n\
    3  3300  -1520  24000  84%\r\n\
    4  3362  -1520  23000  84%\r\n\
    $$\r\npylon>";

fn fast_session() -> SessionSettings {
    SessionSettings {
        resync_timeout: Duration::from_millis(30),
        poll_interval: Duration::from_millis(1),
        ..Default::default()
    }
}

fn fast_acquisition() -> AcquisitionSettings {
    AcquisitionSettings {
        command_timeout: Duration::from_millis(200),
        module_timeout: Duration::from_millis(200),
        fallback_timeout: Duration::from_millis(200),
        legacy_timeout: Duration::from_millis(50),
    }
}

fn console() -> ScriptedChannel {
    ScriptedChannel::new()
        .with_reply("pwr", PWR)
        .with_reply("bat", BAT)
        .with_reply("bat 2", BAT)
}

#[test]
fn test_full_cycle_builds_stack() {
    let poller = Poller::new(
        ConsoleSession::new(console(), fast_session()),
        BatteryStack::new(HistoryStore::new(1_000)),
        Box::new(NullBacked),
        fast_acquisition(),
    );

    let report = poller.refresh().unwrap();
    assert!(report.incomplete.is_empty());
    assert!(!report.used_current_fallback);
    assert_eq!(report.modules_seen, 3);
    assert_eq!(report.cells_seen, 4);

    let stack = poller.snapshot();
    assert_eq!(stack.battery_count, 2);
    assert_eq!(stack.base_state, StackState::Dischg);
    assert!(stack.power_dc_w() < 0);
    assert_eq!(stack.power_in_w(), 0.0);
    assert!(stack.power_out_w() > 0.0);

    let balance = stack.balance.expect("cell dump gives a balance");
    assert_eq!(balance.imbalance_mv, 62);
    assert_eq!(balance.max_cell, 4);
    assert_eq!(balance.min_cell, 3);

    let view = serde_json::to_value(StackView::from(&stack)).unwrap();
    assert_eq!(view["baseState"], "Dischg");
    assert_eq!(view["batteryCount"], 2);
    assert_eq!(view["batteries"].as_array().unwrap().len(), 2);
}

#[test]
fn test_module_view_and_present_modules() {
    let poller = Poller::new(
        ConsoleSession::new(console(), fast_session()),
        BatteryStack::new(HistoryStore::new(1_000)),
        Box::new(NullBacked),
        fast_acquisition(),
    );

    assert_eq!(poller.present_modules().unwrap(), vec![1, 2]);
    let detail = poller.module_view(2).unwrap();
    assert_eq!(detail.id, 2);
    assert_eq!(detail.soc_percent, 84);
    assert_eq!(detail.balance.unwrap().imbalance_mv, 62);
    assert!(poller.module_view(3).is_err());
}

#[test]
fn test_history_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("balance_history.dat");

    let first = Poller::new(
        ConsoleSession::new(console(), fast_session()),
        BatteryStack::new(HistoryStore::new(1_000)),
        Box::new(FilesystemBacked::new(&path)),
        fast_acquisition(),
    );
    first.load_history().unwrap();
    first.refresh().unwrap();
    assert_eq!(first.record_if_due(1_031).unwrap(), 2);
    assert!(path.exists());

    let second = Poller::new(
        ConsoleSession::new(console(), fast_session()),
        BatteryStack::new(HistoryStore::new(2_000)),
        Box::new(FilesystemBacked::new(&path)),
        fast_acquisition(),
    );
    second.load_history().unwrap();

    let history = second.snapshot().history;
    assert_eq!(history.len(), 2);
    assert_eq!(history.last_record_time(), 1_031);
    let entries: Vec<_> = history.iter().collect();
    assert_eq!(entries[0].battery_id, 1);
    assert_eq!(entries[0].balance_mv, 4);
    assert_eq!(entries[1].battery_id, 2);
    assert_eq!(entries[1].balance_mv, 62);
    assert_eq!(entries[1].soc_percent, 84);

    // Next sample is not due until the interval has passed.
    assert!(!second.snapshot().should_record_history(1_500));
    assert!(second.snapshot().should_record_history(1_031 + 900));
}
