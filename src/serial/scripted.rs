use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{Result, SerialPortIO};

type Reply = Vec<Vec<u8>>;

#[derive(Default)]
struct ScriptState {
    input: VecDeque<Vec<u8>>,
    out_buf: Vec<u8>,
    next: VecDeque<Reply>,
    once: HashMap<String, VecDeque<Reply>>,
    always: HashMap<String, Reply>,
    written: Vec<String>,
    written_frames: Vec<Vec<u8>>,
}

/// In-memory serial channel that answers commands from a script.
///
/// Each flushed write is one command. Its reply is chosen in this order: a
/// one-shot reply registered for that command, the next generic reply, a
/// standing reply for that command, or silence. Reply chunks are handed out
/// one per read, so chunk boundaries behave like separate arrivals on the wire.
/// Clones share the same script, which lets a test keep a handle after the
/// port has been moved into a [`super::SerialInterface`].
#[derive(Clone, Default)]
pub struct ScriptedPort {
    state: Arc<Mutex<ScriptState>>,
}

fn chunks_of(chunks: &[&str]) -> Reply {
    chunks.iter().map(|c| c.as_bytes().to_vec()).collect()
}

fn command_key(command: &str) -> String {
    command.trim().to_string()
}

impl ScriptedPort {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reply to whatever command comes next.
    pub fn reply_next(&self, chunks: &[&str]) {
        self.state().next.push_back(chunks_of(chunks));
    }

    /// Binary variant of [`reply_next`](Self::reply_next).
    pub fn reply_bytes_next(&self, chunks: Vec<Vec<u8>>) {
        self.state().next.push_back(chunks);
    }

    /// Reply once to `command` (compared without surrounding whitespace).
    pub fn reply_once(&self, command: &str, chunks: &[&str]) {
        self.state()
            .once
            .entry(command_key(command))
            .or_default()
            .push_back(chunks_of(chunks));
    }

    /// Reply to every occurrence of `command` not covered by a queued reply.
    pub fn reply_always(&self, command: &str, chunks: &[&str]) {
        self.state()
            .always
            .insert(command_key(command), chunks_of(chunks));
    }

    /// Put bytes in the input buffer as if left over from an earlier exchange.
    pub fn inject_stale(&self, bytes: &[u8]) {
        self.state().input.push_back(bytes.to_vec());
    }

    /// Commands written so far, as text.
    pub fn written(&self) -> Vec<String> {
        self.state().written.clone()
    }

    /// Commands written so far, as raw frames.
    pub fn written_frames(&self) -> Vec<Vec<u8>> {
        self.state().written_frames.clone()
    }

    /// Number of written commands containing `needle`.
    pub fn count_written(&self, needle: &str) -> usize {
        self.state()
            .written
            .iter()
            .filter(|c| c.contains(needle))
            .count()
    }

    /// True once every other handle, normally the one owned by a channel, is gone.
    pub fn is_closed(&self) -> bool {
        Arc::strong_count(&self.state) == 1
    }
}

impl SerialPortIO for ScriptedPort {
    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.state().out_buf.extend_from_slice(data);
        Ok(())
    }

    fn flush_output(&mut self) -> Result<()> {
        let mut state = self.state();
        if state.out_buf.is_empty() {
            return Ok(());
        }
        let frame = std::mem::take(&mut state.out_buf);
        let text = String::from_utf8_lossy(&frame).to_string();
        let key = command_key(&text);

        let mut reply = state.once.get_mut(&key).and_then(|queue| queue.pop_front());
        if reply.is_none() {
            reply = state.next.pop_front();
        }
        if reply.is_none() {
            reply = state.always.get(&key).cloned();
        }

        state.written.push(text);
        state.written_frames.push(frame);
        if let Some(chunks) = reply {
            state.input.extend(chunks);
        }
        Ok(())
    }

    fn bytes_available(&mut self) -> Result<usize> {
        Ok(self.state().input.front().map_or(0, Vec::len))
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state();
        let Some(mut chunk) = state.input.pop_front() else {
            return Ok(0);
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            state.input.push_front(chunk.split_off(n));
        }
        Ok(n)
    }

    fn clear_input(&mut self) -> Result<()> {
        self.state().input.clear();
        Ok(())
    }
}
