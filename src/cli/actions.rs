use anyhow::{Context, Result};
use serde::Serialize;
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};

use clap::ArgMatches;

use super::config::MonitorConfig;
use crate::{
    api::{HistoryDebugView, HistoryView, ModuleView, StackView},
    core::{
        history::HistoryStore, unix_now, BatteryStack, FilesystemBacked, HistoryPersistence,
        MonitorError, NullBacked, PollEvent, Poller,
    },
    protocol::{self, ConsoleChannel, ConsoleSession},
};

/// Handle `--list-ports`. Returns true when it ran.
pub fn run_one_shot_actions(matches: &ArgMatches) -> Result<bool> {
    if !matches.get_flag("list-ports") {
        return Ok(false);
    }
    let ports = protocol::available_ports().context("Failed to enumerate serial ports")?;
    if matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&ports)?);
    } else {
        for port in &ports {
            println!("{port}");
        }
    }
    Ok(true)
}

/// Merge the config file (if any) with command line overrides.
pub fn load_config(matches: &ArgMatches) -> Result<MonitorConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => MonitorConfig::from_file(path)?,
        None => MonitorConfig::default(),
    };
    if let Some(port) = matches.get_one::<String>("port") {
        config.port_name = Some(port.clone());
    }
    if let Some(baud) = matches.get_one::<u32>("baud-rate") {
        config.baud_rate = *baud;
    }
    if let Some(path) = matches.get_one::<String>("history-file") {
        config.history_file = Some(PathBuf::from(path));
    }
    config.validate()?;
    Ok(config)
}

pub fn persistence_for(config: &MonitorConfig) -> Box<dyn HistoryPersistence> {
    match &config.history_file {
        Some(path) => Box::new(FilesystemBacked::new(path)),
        None => Box::new(NullBacked),
    }
}

/// Fresh stack with the configured history policy.
pub fn new_stack(config: &MonitorConfig) -> BatteryStack {
    BatteryStack::new(HistoryStore::with_policy(
        unix_now(),
        config.history_interval_secs,
        config.startup_grace_secs,
    ))
}

fn print_output<T: Serialize>(value: &T, json: bool, text: impl FnOnce(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        text(value);
    }
    Ok(())
}

/// Entry point after logging is up.
pub fn run(matches: &ArgMatches) -> Result<()> {
    if run_one_shot_actions(matches)? {
        return Ok(());
    }
    let config = load_config(matches)?;
    let json = matches.get_flag("json");

    if matches.get_flag("history") || matches.get_flag("history-debug") {
        return show_history(&config, matches.get_flag("history-debug"), json);
    }

    let port_name = config
        .port_name
        .clone()
        .context("No serial port given: use --port or set port_name in the config file")?;
    let port = protocol::open_console(&port_name, &config.serial())
        .with_context(|| format!("Failed to open {port_name}"))?;
    let poller = Poller::new(
        ConsoleSession::new(port, config.session_settings()),
        new_stack(&config),
        persistence_for(&config),
        config.acquisition_settings(),
    );
    dispatch(&poller, &config, matches)
}

fn show_history(config: &MonitorConfig, debug: bool, json: bool) -> Result<()> {
    let persistence = persistence_for(config);
    let mut store = new_stack(config).history;
    persistence
        .load(&mut store)
        .with_context(|| format!("Failed to load history from {}", persistence.describe()))?;

    if debug {
        let view = HistoryDebugView::new(&store, unix_now());
        return print_output(&view, json, |v| {
            println!("now:               {}", v.now);
            println!("last save:         {}", v.last_save_time);
            println!("since last save:   {} s", v.seconds_since_save);
            println!("should record:     {}", v.should_record);
            println!("cursor:            {}", v.cursor);
            println!("entries:           {}/{}", v.count, v.capacity);
        });
    }
    print_output(&HistoryView::from(&store), json, |v| {
        for entry in &v.data {
            let when = chrono::DateTime::from_timestamp(i64::from(entry.timestamp), 0)
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| entry.timestamp.to_string());
            println!(
                "{when}  battery {:>2}  {:>4} mV  {:>3}%  {}",
                entry.battery_id, entry.balance_mv, entry.soc_percent, entry.status
            );
        }
    })
}

/// Run the requested mode against an opened console.
pub fn dispatch<C: ConsoleChannel>(
    poller: &Poller<C>,
    config: &MonitorConfig,
    matches: &ArgMatches,
) -> Result<()> {
    let json = matches.get_flag("json");

    if let Some(command) = matches.get_one::<String>("cmd") {
        let reply = poller.execute(command, poller.settings().command_timeout)?;
        print!("{}", reply.text());
        if !reply.is_complete() {
            eprintln!("\n(no prompt received before the timeout)");
        }
        return Ok(());
    }

    if matches.get_flag("modules") {
        let modules = poller.present_modules()?;
        return print_output(&modules, json, |ids| {
            for id in ids {
                println!("{id}");
            }
        });
    }

    if let Some(&module_id) = matches.get_one::<u8>("module") {
        let detail = match poller.module_view(module_id) {
            Ok(detail) => detail,
            Err(MonitorError::ModuleNotFound(id)) => {
                anyhow::bail!("Battery module {id} is not available")
            }
            Err(err) => return Err(err.into()),
        };
        return print_output(&ModuleView::from(&detail), json, print_module);
    }

    if matches.get_flag("legacy") {
        return match poller.query_legacy()? {
            Some(_) => print_output(&StackView::from(&poller.snapshot()), json, print_stack),
            None => anyhow::bail!("No legacy frame received"),
        };
    }

    if let Err(err) = poller.load_history() {
        log::warn!("starting with empty history: {err}");
    }

    if matches.get_flag("once") {
        let report = poller.refresh()?;
        if !report.incomplete.is_empty() {
            log::warn!("incomplete replies: {:?}", report.incomplete);
        }
        return print_output(&StackView::from(&poller.snapshot()), json, print_stack);
    }

    poll_until_interrupted(poller, config, json)
}

fn poll_until_interrupted<C: ConsoleChannel>(
    poller: &Poller<C>,
    config: &MonitorConfig,
    json: bool,
) -> Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
            .context("Failed to install Ctrl-C handler")?;
    }

    let events = poller.subscribe();
    thread::spawn(move || {
        for event in events.iter() {
            match event {
                PollEvent::Snapshot(stack) => {
                    let view = StackView::from(stack.as_ref());
                    if json {
                        if let Ok(line) = serde_json::to_string(&view) {
                            println!("{line}");
                        }
                    } else {
                        print_stack(&view);
                    }
                }
                PollEvent::HistoryRecorded(n) => log::debug!("{n} history samples recorded"),
            }
        }
    });

    poller.run(&stop, config.poll_interval())?;
    Ok(())
}

fn print_stack(view: &StackView) {
    println!(
        "{:<7} SOC {:>3}%  {:>7.3} V  {:>8.3} A  {:>6} W (AC ~{} W)  {:>5.1} °C  {} batteries",
        view.base_state,
        view.soc,
        view.voltage,
        view.current,
        view.power_dc,
        view.est_power_ac,
        view.temperature,
        view.battery_count
    );
    if let Some(balance) = &view.balance {
        println!(
            "        cells {}: {} (max #{} {} mV, min #{} {} mV)",
            balance.cell_count,
            balance.message,
            balance.max_cell_id,
            balance.max_cell_voltage,
            balance.min_cell_id,
            balance.min_cell_voltage
        );
    }
    for battery in &view.batteries {
        println!(
            "        #{:<2} {:<7} SOC {:>3}%  {:>7.3} V  {:>8.3} A  balance {} mV{}",
            battery.id,
            battery.base_state.as_deref().unwrap_or("-"),
            battery.soc,
            battery.voltage,
            battery.current,
            battery.balance_mv,
            if battery.is_normal { "" } else { "  (!)" }
        );
    }
}

fn print_module(view: &ModuleView) {
    println!(
        "module {}: SOC {}%  {:.3} V  {:.3} A  {:.1} W  {:.1} °C",
        view.id, view.soc, view.voltage, view.current, view.power, view.temperature
    );
    match &view.balance {
        Some(balance) => println!(
            "  {} cells: {} (max #{} {} mV, min #{} {} mV)",
            balance.cell_count,
            balance.message,
            balance.max_cell_id,
            balance.max_cell_voltage,
            balance.min_cell_id,
            balance.min_cell_voltage
        ),
        None => println!("  no cell data"),
    }
}
