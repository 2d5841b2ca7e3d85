//! Request/response exchanges over the controller console.
//!
//! One [`ConsoleSession`] owns the channel, so `&mut self` on
//! [`ConsoleSession::execute`] is what keeps transactions from overlapping.
//! Share a session behind a mutex when several callers need the console.

use serde::{Deserialize, Serialize};
use std::{
    thread,
    time::{Duration, Instant},
};

use pylonmon_protocol::{is_legacy_frame_complete, LEGACY_QUERY};

use super::channel::ConsoleChannel;
use crate::core::error::Result;

/// Prompts printed by the controller when it is ready for input.
pub const DEFAULT_PROMPTS: [&str; 2] = ["pylon>", "pylon_debug>"];

/// Budget for an ordinary console command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(3000);
/// How long the wake-up waits for a prompt before sending anyway.
pub const DEFAULT_RESYNC_TIMEOUT: Duration = Duration::from_millis(700);
/// Budget for the legacy `^P003FDC` query.
pub const LEGACY_TIMEOUT: Duration = Duration::from_millis(300);

const READ_CHUNK: usize = 256;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineEnding {
    #[default]
    Cr,
    Crlf,
}

impl LineEnding {
    pub fn as_str(self) -> &'static str {
        match self {
            LineEnding::Cr => "\r",
            LineEnding::Crlf => "\r\n",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub line_ending: LineEnding,
    /// Literal suffixes that mark a reply as complete.
    pub prompts: Vec<String>,
    pub resync_timeout: Duration,
    /// Sleep between empty reads, so the caller's thread yields.
    pub poll_interval: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            line_ending: LineEnding::Cr,
            prompts: DEFAULT_PROMPTS.iter().map(|p| p.to_string()).collect(),
            resync_timeout: DEFAULT_RESYNC_TIMEOUT,
            poll_interval: Duration::from_millis(2),
        }
    }
}

/// Text captured by one transaction.
///
/// When the deadline passed first, `terminator` is `None` and `text` holds
/// whatever arrived, possibly nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReply {
    text: String,
    terminator: Option<String>,
    elapsed: Duration,
}

impl RawReply {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    /// The prompt (or frame terminator) that ended the reply.
    pub fn terminator(&self) -> Option<&str> {
        self.terminator.as_deref()
    }

    /// False when the transaction ran into its timeout.
    pub fn is_complete(&self) -> bool {
        self.terminator.is_some()
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

pub struct ConsoleSession<C: ConsoleChannel> {
    channel: C,
    settings: SessionSettings,
}

impl<C: ConsoleChannel> std::fmt::Debug for ConsoleSession<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleSession")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl<C: ConsoleChannel> ConsoleSession<C> {
    pub fn new(channel: C, settings: SessionSettings) -> Self {
        Self { channel, settings }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn into_inner(self) -> C {
        self.channel
    }

    /// Run one console command and capture its reply.
    ///
    /// Stale input is dropped, a bare line terminator wakes the console and
    /// resynchronises on its prompt, and then `command` is sent. Bytes are
    /// accumulated until the text ends with a known prompt or `timeout`
    /// elapses. Only channel I/O failures are errors.
    pub fn execute(&mut self, command: &str, timeout: Duration) -> Result<RawReply> {
        let dropped = self.channel.discard_input()?;
        if dropped > 0 {
            log::trace!("discarded {dropped} stale bytes before {command:?}");
        }

        let ending = self.settings.line_ending.as_str();
        self.channel.send(ending.as_bytes())?;
        let (_, woke) = read_until(
            &mut self.channel,
            self.settings.resync_timeout,
            self.settings.poll_interval,
            |acc| matching_prompt(&self.settings.prompts, acc).is_some(),
        )?;
        if !woke {
            log::debug!("no prompt after wake-up, sending {command:?} anyway");
        }
        self.channel.discard_input()?;

        let mut request = Vec::with_capacity(command.len() + ending.len());
        request.extend_from_slice(command.as_bytes());
        request.extend_from_slice(ending.as_bytes());
        log::trace!("-> {command:?}");

        let prompts = &self.settings.prompts;
        let reply = exchange(
            &mut self.channel,
            &request,
            timeout,
            self.settings.poll_interval,
            |acc| matching_prompt(prompts, acc).map(str::to_string),
        )?;
        if !reply.is_complete() {
            log::warn!(
                "{command:?}: no prompt within {timeout:?} ({} bytes captured)",
                reply.text.len()
            );
        }
        Ok(reply)
    }

    /// Send the legacy `^P003FDC` query.
    ///
    /// No wake-up is sent; the reply is complete at the first carriage
    /// return once it is longer than ten characters.
    pub fn execute_legacy(&mut self, timeout: Duration) -> Result<RawReply> {
        self.channel.discard_input()?;
        log::trace!("-> {LEGACY_QUERY:?}");
        let reply = exchange(
            &mut self.channel,
            LEGACY_QUERY.as_bytes(),
            timeout,
            self.settings.poll_interval,
            |acc| {
                let text = std::str::from_utf8(acc).ok()?;
                is_legacy_frame_complete(text).then(|| "\r".to_string())
            },
        )?;
        if !reply.is_complete() {
            log::warn!("legacy query: no complete frame within {timeout:?}");
        }
        Ok(reply)
    }
}

/// Send `request`, then read until `terminator` recognises the accumulated
/// bytes or the deadline passes.
fn exchange<C: ConsoleChannel>(
    channel: &mut C,
    request: &[u8],
    timeout: Duration,
    poll_interval: Duration,
    mut terminator: impl FnMut(&[u8]) -> Option<String>,
) -> Result<RawReply> {
    channel.send(request)?;
    let started = Instant::now();
    let mut matched = None;
    let (bytes, _) = read_until(channel, timeout, poll_interval, |acc| {
        matched = terminator(acc);
        matched.is_some()
    })?;
    let text = String::from_utf8_lossy(&bytes).into_owned();
    log::trace!("<- {} bytes: {text:?}", text.len());
    Ok(RawReply {
        text,
        terminator: matched,
        elapsed: started.elapsed(),
    })
}

/// Accumulate bytes until `done` returns true or `timeout` elapses.
///
/// Bytes that arrive in the same chunk after the terminator are dropped;
/// the next transaction discards any later chatter.
fn read_until<C: ConsoleChannel>(
    channel: &mut C,
    timeout: Duration,
    poll_interval: Duration,
    mut done: impl FnMut(&[u8]) -> bool,
) -> Result<(Vec<u8>, bool)> {
    let started = Instant::now();
    let mut acc = Vec::with_capacity(1024);
    let mut buf = [0u8; READ_CHUNK];
    while started.elapsed() < timeout {
        let n = channel.receive(&mut buf)?;
        if n == 0 {
            thread::sleep(poll_interval);
            continue;
        }
        for (i, &byte) in buf[..n].iter().enumerate() {
            acc.push(byte);
            if done(&acc) {
                let trailing = n - i - 1;
                if trailing > 0 {
                    log::trace!("dropping {trailing} bytes after terminator");
                }
                return Ok((acc, true));
            }
        }
    }
    Ok((acc, false))
}

fn matching_prompt<'a>(prompts: &'a [String], acc: &[u8]) -> Option<&'a str> {
    prompts
        .iter()
        .find(|prompt| acc.ends_with(prompt.as_bytes()))
        .map(String::as_str)
}
