pub mod channel;
pub mod runtime;
pub mod transaction;

pub use channel::{ConsoleChannel, ScriptedChannel};
pub use runtime::{available_ports, open_console, SerialConfig};
pub use transaction::{
    ConsoleSession, LineEnding, RawReply, SessionSettings, DEFAULT_COMMAND_TIMEOUT,
    DEFAULT_PROMPTS, DEFAULT_RESYNC_TIMEOUT, LEGACY_TIMEOUT,
};

pub use pylonmon_protocol::*;
