//! Byte channel under a console session.
//!
//! [`ConsoleChannel`] is the only thing a transaction needs from the wire:
//! drop stale input, write bytes, and read whatever has arrived without
//! blocking for long. The serial implementation lives here; tests and demos
//! use [`ScriptedChannel`].

use std::{
    collections::{HashMap, VecDeque},
    io::{self, Read, Write},
};

use serialport::SerialPort;

pub trait ConsoleChannel: Send {
    /// Drop every byte already buffered on the input side, returning how many.
    fn discard_input(&mut self) -> io::Result<usize>;

    /// Write `bytes` in full.
    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Read what is available into `buf`. `Ok(0)` means nothing has arrived yet.
    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

impl ConsoleChannel for Box<dyn SerialPort> {
    fn discard_input(&mut self) -> io::Result<usize> {
        let mut dropped = 0;
        let mut scratch = [0u8; 64];
        loop {
            let pending = self.bytes_to_read()? as usize;
            if pending == 0 {
                break;
            }
            let want = pending.min(scratch.len());
            match self.read(&mut scratch[..want]) {
                Ok(0) => break,
                Ok(n) => dropped += n,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) => return Err(e),
            }
        }
        Ok(dropped)
    }

    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_all(bytes)?;
        self.flush()
    }

    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let pending = self.bytes_to_read()? as usize;
        if pending == 0 {
            return Ok(0);
        }
        let want = pending.min(buf.len());
        match self.read(&mut buf[..want]) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }
}

/// In-memory controller double.
///
/// Each complete command line written to it queues the scripted reply for
/// that command. A bare line terminator queues the idle prompt, the same way
/// the real console answers a wake-up. Unknown commands get no reply at all,
/// which exercises the timeout path.
#[derive(Debug)]
pub struct ScriptedChannel {
    replies: HashMap<String, Vec<u8>>,
    wake_reply: Vec<u8>,
    pending: VecDeque<u8>,
    line: Vec<u8>,
    chunk: usize,
    sent: Vec<String>,
}

impl ScriptedChannel {
    pub fn new() -> Self {
        Self {
            replies: HashMap::new(),
            wake_reply: b"\r\npylon>".to_vec(),
            pending: VecDeque::new(),
            line: Vec::new(),
            chunk: 16,
            sent: Vec::new(),
        }
    }

    /// Script the reply for `command` (matched without its line terminator).
    pub fn with_reply(mut self, command: &str, reply: &str) -> Self {
        self.replies
            .insert(command.to_string(), reply.as_bytes().to_vec());
        self
    }

    /// Bytes that are already waiting before the first command.
    pub fn with_stale_input(mut self, stale: &str) -> Self {
        self.pending.extend(stale.bytes());
        self
    }

    /// What a bare line terminator produces.
    pub fn with_wake_reply(mut self, reply: &str) -> Self {
        self.wake_reply = reply.as_bytes().to_vec();
        self
    }

    /// Commands received so far, in order, without terminators.
    pub fn sent_commands(&self) -> &[String] {
        &self.sent
    }

    fn complete_line(&mut self) {
        let command = String::from_utf8_lossy(&self.line).into_owned();
        self.line.clear();
        if command.is_empty() {
            self.pending.extend(self.wake_reply.iter().copied());
            return;
        }
        if let Some(reply) = self.replies.get(&command) {
            self.pending.extend(reply.iter().copied());
        }
        self.sent.push(command);
    }
}

impl Default for ScriptedChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleChannel for ScriptedChannel {
    fn discard_input(&mut self) -> io::Result<usize> {
        let dropped = self.pending.len();
        self.pending.clear();
        Ok(dropped)
    }

    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        for &byte in bytes {
            match byte {
                b'\r' => self.complete_line(),
                b'\n' => {}
                other => self.line.push(other),
            }
        }
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.chunk).min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}
