//! Line-only input for when no raw-mode driver can be used
//!
//! Input arrives a whole line at a time from a background reader. Single
//! character reads are faked by handing out one line's characters across
//! successive calls, separately for each calling thread.

use std::collections::{HashMap, VecDeque};
use std::io::{self, BufRead};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use super::driver::{DEFAULT_HEIGHT, DEFAULT_WIDTH};

#[derive(Debug, Default)]
struct LineState {
    /// Bumped for every line published
    generation: u64,
    /// Latest line, kept until every caller waiting for it has a copy
    line: Option<String>,
    /// Callers that still have to take `line`
    unclaimed: usize,
    closed: bool,
    /// Callers blocked waiting for a line
    waiting: usize,
    /// Rest of the last line, per reading thread
    pending: HashMap<ThreadId, VecDeque<char>>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<LineState>,
    line_ready: Condvar,
}

impl Shared {
    fn publish(&self, line: Option<String>) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        match line {
            Some(line) => {
                state.generation += 1;
                state.unclaimed = state.waiting;
                state.line = (state.waiting > 0).then_some(line);
            }
            None => state.closed = true,
        }
        self.line_ready.notify_all();
    }

    /// Wait for the next line published after this call
    fn next_line<'a>(&'a self, mut state: MutexGuard<'a, LineState>) -> (MutexGuard<'a, LineState>, Option<String>) {
        let seen = state.generation;
        state.waiting += 1;

        while state.generation == seen && !state.closed {
            state = match self.line_ready.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => {
                    let mut state = poisoned.into_inner();
                    state.waiting -= 1;
                    return (state, None);
                }
            };
        }

        state.waiting -= 1;
        if state.generation == seen {
            return (state, None);
        }

        state.unclaimed = state.unclaimed.saturating_sub(1);
        let line = if state.unclaimed == 0 {
            state.line.take()
        } else {
            state.line.clone()
        };
        (state, line)
    }
}

/// Fallback terminal fed by a line reader
#[derive(Debug, Clone)]
pub struct LineBufferedTerminal {
    shared: Arc<Shared>,
}

impl LineBufferedTerminal {
    /// Read lines from stdin
    pub fn stdin() -> io::Result<Self> {
        Self::spawn(io::BufReader::new(io::stdin()))
    }

    /// Read lines from `reader` on a background thread
    pub fn spawn<R>(reader: R) -> io::Result<Self>
    where
        R: BufRead + Send + 'static,
    {
        let terminal = Self::detached();
        let shared = Arc::clone(&terminal.shared);

        thread::Builder::new()
            .name("console-line-reader".to_string())
            .spawn(move || {
                for line in reader.lines() {
                    match line {
                        Ok(line) => shared.publish(Some(line)),
                        Err(e) => {
                            tracing::debug!("Line reader failed: {}", e);
                            break;
                        }
                    }
                }
                shared.publish(None);
            })?;

        Ok(terminal)
    }

    /// A terminal with no reader attached
    pub(crate) fn detached() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
        }
    }

    /// Next character for the calling thread
    ///
    /// Each new line is handed out one character per call. An empty line
    /// reads as a single `\n`. `None` once closed.
    pub fn read(&self) -> Option<char> {
        let mut state = self.shared.state.lock().ok()?;
        let me = thread::current().id();

        if let Some(queue) = state.pending.get_mut(&me) {
            let ch = queue.pop_front();
            if queue.is_empty() {
                state.pending.remove(&me);
            }
            if ch.is_some() {
                return ch;
            }
        }

        let (mut state, line) = self.shared.next_line(state);
        let line = line?;
        if line.is_empty() {
            return Some('\n');
        }

        let mut chars: VecDeque<char> = line.chars().collect();
        let first = chars.pop_front();
        if !chars.is_empty() {
            state.pending.insert(me, chars);
        }
        first
    }

    /// Next whole line. An empty line reads as `['\n']`; empty once closed.
    pub fn read_line(&self) -> Vec<char> {
        let Ok(state) = self.shared.state.lock() else {
            return Vec::new();
        };

        match self.shared.next_line(state).1 {
            Some(line) if line.is_empty() => vec!['\n'],
            Some(line) => line.chars().collect(),
            None => Vec::new(),
        }
    }

    pub fn width(&self) -> u16 {
        DEFAULT_WIDTH
    }

    pub fn height(&self) -> u16 {
        DEFAULT_HEIGHT
    }

    /// Wake every waiter with no data
    pub fn close(&self) {
        self.shared.publish(None);
    }

    #[cfg(test)]
    pub(crate) fn publish(&self, line: &str) {
        self.shared.publish(Some(line.to_string()));
    }

    #[cfg(test)]
    pub(crate) fn waiting(&self) -> usize {
        self.shared.state.lock().map_or(0, |s| s.waiting)
    }

    #[cfg(test)]
    fn retained(&self) -> (usize, bool) {
        self.shared
            .state
            .lock()
            .map_or((0, false), |s| (s.pending.len(), s.line.is_some()))
    }
}
