pub mod actions;
pub mod config;

use clap::{Arg, ArgMatches, Command};

const ONE_SHOT_MODES: [&str; 7] = [
    "once",
    "cmd",
    "module",
    "modules",
    "legacy",
    "history",
    "history-debug",
];

fn others(mode: &str) -> Vec<&'static str> {
    ONE_SHOT_MODES
        .iter()
        .copied()
        .filter(|other| *other != mode)
        .collect()
}

pub fn command() -> Command {
    Command::new("pylonmon")
        .about("Telemetry monitor for Pylontech battery stacks over the serial console")
        .arg(
            Arg::new("list-ports")
                .long("list-ports")
                .short('l')
                .help("List all available serial ports and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .short('j')
                .help("Print results as JSON (JSON lines while polling)")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("JSON configuration file")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .short('p')
                .help("Serial port of the controller console")
                .value_name("PORT"),
        )
        .arg(
            Arg::new("baud-rate")
                .long("baud-rate")
                .help("Serial port baud rate (default 115200)")
                .value_name("BAUD")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("history-file")
                .long("history-file")
                .help("Balance history file; history stays in memory when unset")
                .value_name("PATH"),
        )
        .arg(
            Arg::new("once")
                .long("once")
                .help("Run one acquisition cycle, print the stack and exit")
                .action(clap::ArgAction::SetTrue)
                .conflicts_with_all(others("once")),
        )
        .arg(
            Arg::new("cmd")
                .long("cmd")
                .help("Send one console command and print the raw reply")
                .value_name("COMMAND")
                .conflicts_with_all(others("cmd")),
        )
        .arg(
            Arg::new("module")
                .long("module")
                .short('m')
                .help("Show one module from its power row and cell dump")
                .value_name("ID")
                .value_parser(clap::value_parser!(u8).range(1..))
                .conflicts_with_all(others("module")),
        )
        .arg(
            Arg::new("modules")
                .long("modules")
                .help("List the ids of the present modules")
                .action(clap::ArgAction::SetTrue)
                .conflicts_with_all(others("modules")),
        )
        .arg(
            Arg::new("legacy")
                .long("legacy")
                .help("Query with the legacy ^P003FDC frame")
                .action(clap::ArgAction::SetTrue)
                .conflicts_with_all(others("legacy")),
        )
        .arg(
            Arg::new("history")
                .long("history")
                .help("Print the stored balance history and exit")
                .action(clap::ArgAction::SetTrue)
                .conflicts_with_all(others("history")),
        )
        .arg(
            Arg::new("history-debug")
                .long("history-debug")
                .help("Print the history recording state and exit")
                .action(clap::ArgAction::SetTrue)
                .conflicts_with_all(others("history-debug")),
        )
}

/// Parse command line arguments and return ArgMatches.
pub fn parse_args() -> ArgMatches {
    command().get_matches()
}
