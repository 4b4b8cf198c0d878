//! Outbound command queue.
//!
//! A bounded FIFO drained by its own task. Producers never wait: a full
//! queue drops the command and counts it.

use heapless::{Deque, String};

use super::HttpTransport;
use crate::config::{COMMAND_PATH_MAX, COMMAND_QUEUE_LEN, GCODE_MAX_LEN};
use crate::error::{Error, Result};

/// Semantic operations sent to Moonraker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Pause,
    Cancel,
    FirmwareRestart,
    Gcode(String<GCODE_MAX_LEN>),
}

impl Command {
    /// Build a gcode command, rejecting scripts longer than the queue slot.
    pub fn gcode(script: &str) -> Option<Self> {
        let mut s = String::new();
        s.push_str(script).ok()?;
        Some(Command::Gcode(s))
    }

    /// Request path, URL-safe (spaces as `%20`).
    pub fn path(&self) -> Result<String<COMMAND_PATH_MAX>> {
        let mut out = String::new();
        match self {
            Command::Pause => out.push_str("/printer/print/pause"),
            Command::Cancel => out.push_str("/printer/print/cancel"),
            Command::FirmwareRestart => out.push_str("/printer/firmware_restart"),
            Command::Gcode(script) => out
                .push_str("/printer/gcode/script?script=")
                .and_then(|_| {
                    script.chars().try_for_each(|c| match c {
                        ' ' => out.push_str("%20"),
                        '\n' => out.push_str("%0A"),
                        c => out.push(c).map_err(|_| ()),
                    })
                }),
        }
        .map_err(|_| Error::BufferOverflow)?;
        Ok(out)
    }

    fn label(&self) -> &str {
        match self {
            Command::Pause => "pause",
            Command::Cancel => "cancel",
            Command::FirmwareRestart => "firmware_restart",
            Command::Gcode(script) => script.as_str(),
        }
    }
}

/// Bounded command FIFO.
pub struct CommandQueue {
    items: Deque<Command, COMMAND_QUEUE_LEN>,
    dropped: u32,
}

impl CommandQueue {
    pub const fn new() -> Self {
        Self {
            items: Deque::new(),
            dropped: 0,
        }
    }

    /// Queue a command. Returns [`Error::QueueFull`] and counts the drop
    /// when the queue is full.
    pub fn enqueue_command(&mut self, cmd: Command) -> Result<()> {
        match self.items.push_back(cmd) {
            Ok(()) => {
                debug!("Queue: queued ({} pending)", self.items.len());
                Ok(())
            }
            Err(cmd) => {
                self.dropped = self.dropped.saturating_add(1);
                warn!(
                    "Queue: overflow, dropped {} ({} total)",
                    cmd.label(),
                    self.dropped
                );
                Err(Error::QueueFull)
            }
        }
    }

    pub fn pause(&mut self) -> Result<()> {
        self.enqueue_command(Command::Pause)
    }

    pub fn cancel(&mut self) -> Result<()> {
        self.enqueue_command(Command::Cancel)
    }

    pub fn pop(&mut self) -> Option<Command> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Commands dropped on overflow since boot.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// POST one command. A transport error here does not say anything about
/// reachability: long gcode such as `G28` routinely outlives the timeout.
pub async fn send_command<T: HttpTransport>(
    cmd: &Command,
    transport: &mut T,
    buf: &mut [u8],
) -> Result<()> {
    let path = cmd.path()?;
    match transport.post(&path, buf).await {
        Ok(_) => {
            info!("Queue: sent {}", cmd.label());
            Ok(())
        }
        Err(e) => {
            warn!("Queue: {} failed ({:?})", cmd.label(), e);
            Err(e)
        }
    }
}

/// Send at most one queued command. `None` when the queue was empty.
pub async fn drain_one<T: HttpTransport>(
    queue: &mut CommandQueue,
    transport: &mut T,
    buf: &mut [u8],
) -> Option<Result<()>> {
    let cmd = queue.pop()?;
    Some(send_command(&cmd, transport, buf).await)
}
