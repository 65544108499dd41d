//! In-memory inverter for exercising the protocol stack without hardware.

use std::{
    collections::{HashMap, VecDeque},
    io::{self, Read, Write},
    sync::{Arc, Mutex, MutexGuard},
};

use crate::{protocol::frame::TERMINATOR, transport::Connector};

#[derive(Default)]
struct State {
    replies: HashMap<String, VecDeque<Vec<u8>>>,
    read_queue: VecDeque<u8>,
    stale: Vec<u8>,
    pending: Vec<u8>,
    read_size: Option<usize>,
    min_write: usize,
    fail_open: bool,
    n_failing_opens: usize,
    n_opens: usize,
    writes: Vec<Vec<u8>>,
    requests: Vec<String>,
}

/// Scripted device: answers each complete request frame with the reply registered for its command.
#[derive(Clone, Default)]
pub struct Simulator(Arc<Mutex<State>>);

impl Simulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for the command, the last one is repeated forever.
    pub fn respond(self, command: &str, reply: &[u8]) -> Self {
        self.state().replies.entry(command.to_owned()).or_default().push_back(reply.to_vec());
        self
    }

    /// Bytes waiting to be read at every open.
    pub fn stale(self, bytes: &[u8]) -> Self {
        self.state().stale = bytes.to_vec();
        self
    }

    pub fn read_size(self, read_size: usize) -> Self {
        self.state().read_size = Some(read_size);
        self
    }

    /// Reject writes shorter than this.
    pub fn min_write(self, min_write: usize) -> Self {
        self.state().min_write = min_write;
        self
    }

    pub fn fail_open(self) -> Self {
        self.state().fail_open = true;
        self
    }

    /// Fail only the next `n` opens, as if the device node appeared later.
    pub fn fail_opens(self, n: usize) -> Self {
        self.state().n_failing_opens = n;
        self
    }

    pub fn n_opens(&self) -> usize {
        self.state().n_opens
    }

    /// Accepted writes, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state().writes.clone()
    }

    /// Commands of the complete frames received.
    pub fn requests(&self) -> Vec<String> {
        self.state().requests.clone()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.0.lock().unwrap()
    }
}

impl Connector for Simulator {
    type Link = Link;

    fn open(&self) -> io::Result<Link> {
        let mut state = self.state();
        state.n_opens += 1;
        if state.fail_open || state.n_failing_opens != 0 {
            state.n_failing_opens = state.n_failing_opens.saturating_sub(1);
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such device"));
        }
        let stale = state.stale.clone();
        state.read_queue.extend(stale);
        state.pending.clear();
        drop(state);
        Ok(Link(self.clone()))
    }
}

pub struct Link(Simulator);

impl Read for Link {
    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        let mut state = self.0.state();
        if state.read_queue.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n_read =
            state.read_size.unwrap_or(buffer.len()).min(buffer.len()).min(state.read_queue.len());
        for (slot, byte) in buffer.iter_mut().zip(state.read_queue.drain(..n_read)) {
            *slot = byte;
        }
        Ok(n_read)
    }
}

impl Write for Link {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        let mut state = self.0.state();
        if bytes.len() < state.min_write {
            return Err(io::Error::other("write shorter than a block"));
        }
        state.writes.push(bytes.to_vec());
        state.pending.extend_from_slice(bytes);
        if let Some(end) = state.pending.iter().position(|byte| *byte == TERMINATOR) {
            let frame = state.pending[..end].to_vec();
            state.pending.clear();
            let command =
                String::from_utf8_lossy(&frame[..frame.len().saturating_sub(2)]).into_owned();
            let reply = state.replies.get_mut(&command).and_then(|replies| {
                if replies.len() > 1 {
                    replies.pop_front()
                } else {
                    replies.front().cloned()
                }
            });
            if let Some(reply) = reply {
                state.read_queue.extend(reply);
            }
            state.requests.push(command);
        }
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
