//! Concurrent character and line input
//!
//! One reader thread pulls characters from an [`InputSource`] and hands each
//! one to every waiting caller. Callers of [`InputMultiplexer::read`] all see
//! the same next character; callers of [`InputMultiplexer::read_line`] each
//! collect their own copy of the line until `\n`.
//!
//! Character and line waiters have separate locks and condition variables so
//! one kind never holds up the other.

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use super::driver::InputSource;

const BACKSPACE: char = '\u{8}';
const DELETE: char = '\u{7f}';

/// Cells the terminal uses to show `ch` when echoing it
///
/// Control characters print as `^X`, 8-bit characters as `M-x` or `M-^X`.
pub fn printable_width(ch: char) -> usize {
    match u32::from(ch) {
        32..=126 => 1,
        0..=31 | 127 => 2,
        160..=254 => 3,
        _ => 4,
    }
}

#[derive(Debug, Default)]
struct CharWaiters {
    next_id: u64,
    /// Slot per waiter, filled by the reader thread
    slots: HashMap<u64, Option<char>>,
}

#[derive(Debug, Default)]
struct LineSlot {
    buffer: Vec<char>,
    complete: bool,
}

#[derive(Debug, Default)]
struct LineWaiters {
    next_id: u64,
    slots: HashMap<u64, LineSlot>,
}

/// Broadcasts one input stream to any number of blocked readers
pub struct InputMultiplexer {
    chars: Mutex<CharWaiters>,
    char_ready: Condvar,
    lines: Mutex<LineWaiters>,
    line_ready: Condvar,
    closed: AtomicBool,
    enable_backspace: bool,
    /// Where backspace redraw sequences go; `None` when ANSI output is off
    redraw: Option<Mutex<Box<dyn Write + Send>>>,
}

impl InputMultiplexer {
    pub fn new(enable_backspace: bool, redraw: Option<Box<dyn Write + Send>>) -> Self {
        Self {
            chars: Mutex::new(CharWaiters::default()),
            char_ready: Condvar::new(),
            lines: Mutex::new(LineWaiters::default()),
            line_ready: Condvar::new(),
            closed: AtomicBool::new(false),
            enable_backspace,
            redraw: redraw.map(Mutex::new),
        }
    }

    /// Block for the next character. `None` once closed.
    pub fn read(&self) -> Option<char> {
        let mut waiters = self.chars.lock().ok()?;
        if self.is_closed() {
            return None;
        }

        let id = waiters.next_id;
        waiters.next_id += 1;
        waiters.slots.insert(id, None);

        loop {
            waiters = match self.char_ready.wait(waiters) {
                Ok(guard) => guard,
                Err(_) => return None,
            };

            if let Some(Some(ch)) = waiters.slots.get(&id).copied() {
                waiters.slots.remove(&id);
                return Some(ch);
            }
            if self.is_closed() {
                waiters.slots.remove(&id);
                return None;
            }
        }
    }

    /// Block until the next `\n` and return what was typed before it, without
    /// the newline. Empty once closed.
    pub fn read_line(&self) -> Vec<char> {
        let Ok(mut waiters) = self.lines.lock() else {
            return Vec::new();
        };
        if self.is_closed() {
            return Vec::new();
        }

        let id = waiters.next_id;
        waiters.next_id += 1;
        waiters.slots.insert(id, LineSlot::default());

        loop {
            waiters = match self.line_ready.wait(waiters) {
                Ok(guard) => guard,
                Err(_) => return Vec::new(),
            };

            if waiters.slots.get(&id).is_some_and(|slot| slot.complete) {
                return waiters.slots.remove(&id).map(|slot| slot.buffer).unwrap_or_default();
            }
            if self.is_closed() {
                waiters.slots.remove(&id);
                return Vec::new();
            }
        }
    }

    /// Route one character from the input source to every waiter
    pub fn deliver(&self, ch: char) {
        // Character waiters first; they see backspace and newline too
        if let Ok(mut waiters) = self.chars.lock() {
            // A waiter keeps the first character it was given
            for slot in waiters.slots.values_mut().filter(|slot| slot.is_none()) {
                *slot = Some(ch);
            }
            self.char_ready.notify_all();
        }

        match ch {
            BACKSPACE | DELETE if self.enable_backspace => self.backspace(),
            '\n' => self.complete_lines(),
            '\r' => {}
            _ => {
                if let Ok(mut waiters) = self.lines.lock() {
                    for slot in waiters.slots.values_mut().filter(|slot| !slot.complete) {
                        slot.buffer.push(ch);
                    }
                }
            }
        }
    }

    fn complete_lines(&self) {
        if let Ok(mut waiters) = self.lines.lock() {
            for slot in waiters.slots.values_mut() {
                slot.complete = true;
            }
            self.line_ready.notify_all();
        }
    }

    /// Drop the last character of every pending line and repaint over it
    fn backspace(&self) {
        // (column, cells) for the longest line
        let mut repaint: Option<(usize, usize)> = None;

        {
            let Ok(mut waiters) = self.lines.lock() else {
                return;
            };

            for slot in waiters.slots.values_mut().filter(|slot| !slot.complete) {
                // The echoed ^? takes two cells
                let mut cells = 2;
                if let Some(erased) = slot.buffer.pop() {
                    cells += printable_width(erased);
                }
                let column = slot.buffer.iter().map(|c| printable_width(*c)).sum::<usize>() + 1;

                if repaint.map_or(true, |(longest, _)| column >= longest) {
                    repaint = Some((column, cells));
                }
            }
        }

        if let (Some((column, cells)), Some(redraw)) = (repaint, &self.redraw) {
            let mut out = redraw.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(e) = write_repaint(&mut **out, column, cells) {
                tracing::debug!("Backspace redraw failed: {}", e);
            }
        }
    }

    /// Wake every waiter with no data. Later reads return immediately.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);

        let chars = self.chars.lock().unwrap_or_else(PoisonError::into_inner);
        self.char_ready.notify_all();
        drop(chars);

        let lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        self.line_ready.notify_all();
        drop(lines);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Callers currently blocked in [`read`](Self::read)
    pub fn char_waiters(&self) -> usize {
        self.chars.lock().map_or(0, |w| w.slots.len())
    }

    /// Callers currently blocked in [`read_line`](Self::read_line)
    pub fn line_waiters(&self) -> usize {
        self.lines.lock().map_or(0, |w| w.slots.values().filter(|s| !s.complete).count())
    }
}

/// Move to `column`, blank `cells` cells, move back
fn write_repaint(out: &mut dyn Write, column: usize, cells: usize) -> io::Result<()> {
    write!(out, "\x1b[{}G{:width$}\x1b[{}G", column, "", column, width = cells)?;
    out.flush()
}

/// Start the background thread feeding `mux` from `source`
///
/// The thread stops at end of input (closing `mux`) or at the first
/// character after `mux` was closed. It is never joined; a read blocked in
/// the source must not hold up process exit.
pub fn spawn_reader<S>(source: Arc<S>, mux: Arc<InputMultiplexer>) -> io::Result<JoinHandle<()>>
where
    S: InputSource + ?Sized + 'static,
{
    thread::Builder::new()
        .name("console-input-reader".to_string())
        .spawn(move || {
            while let Some(ch) = source.read_char() {
                if mux.is_closed() {
                    break;
                }
                tracing::trace!("READ: {:?} ({})", ch, u32::from(ch));
                mux.deliver(ch);
            }

            tracing::debug!("Console input reader stopped");
            mux.close();
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Barrier;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    /// Hands out queued characters, then reports end of input
    struct QueueSource(Mutex<VecDeque<char>>);

    impl InputSource for QueueSource {
        fn read_char(&self) -> Option<char> {
            self.0.lock().unwrap().pop_front()
        }
    }

    fn wait_for(mut ready: impl FnMut() -> bool) {
        for _ in 0..1000 {
            if ready() {
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
        panic!("waiters never registered");
    }

    fn line_after(mux: &Arc<InputMultiplexer>, input: &str) -> Vec<char> {
        let reader = {
            let mux = Arc::clone(mux);
            thread::spawn(move || mux.read_line())
        };
        wait_for(|| mux.line_waiters() == 1);
        for ch in input.chars() {
            mux.deliver(ch);
        }
        reader.join().unwrap()
    }

    #[test]
    fn test_printable_width() {
        assert_eq!(printable_width('a'), 1);
        assert_eq!(printable_width('~'), 1);
        assert_eq!(printable_width('\u{1}'), 2);
        assert_eq!(printable_width('\u{7f}'), 2);
        assert_eq!(printable_width('\u{80}'), 4);
        assert_eq!(printable_width('\u{a0}'), 3);
        assert_eq!(printable_width('\u{fe}'), 3);
        assert_eq!(printable_width('\u{ff}'), 4);
    }

    #[test]
    fn test_character_broadcast() {
        const READERS: usize = 4;
        let mux = Arc::new(InputMultiplexer::new(true, None));
        let barrier = Arc::new(Barrier::new(READERS + 1));

        let handles: Vec<_> = (0..READERS)
            .map(|_| {
                let mux = Arc::clone(&mux);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    mux.read()
                })
            })
            .collect();

        barrier.wait();
        wait_for(|| mux.char_waiters() == READERS);
        mux.deliver('x');

        for handle in handles {
            assert_eq!(handle.join().unwrap(), Some('x'));
        }
        assert_eq!(mux.char_waiters(), 0);
    }

    #[test]
    fn test_burst_delivers_first_character() {
        let mux = Arc::new(InputMultiplexer::new(true, None));

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let mux = Arc::clone(&mux);
                thread::spawn(move || mux.read())
            })
            .collect();

        wait_for(|| mux.char_waiters() == 3);
        // Arrow key: all three bytes land before any waiter wakes
        mux.deliver('\x1b');
        mux.deliver('[');
        mux.deliver('A');

        for handle in handles {
            assert_eq!(handle.join().unwrap(), Some('\x1b'));
        }
    }

    #[test]
    fn test_close_releases_all_waiters() {
        let mux = Arc::new(InputMultiplexer::new(true, None));

        let chars: Vec<_> = (0..3)
            .map(|_| {
                let mux = Arc::clone(&mux);
                thread::spawn(move || mux.read())
            })
            .collect();
        let lines: Vec<_> = (0..2)
            .map(|_| {
                let mux = Arc::clone(&mux);
                thread::spawn(move || mux.read_line())
            })
            .collect();

        wait_for(|| mux.char_waiters() == 3 && mux.line_waiters() == 2);
        mux.close();

        for handle in chars {
            assert_eq!(handle.join().unwrap(), None);
        }
        for handle in lines {
            assert!(handle.join().unwrap().is_empty());
        }

        assert_eq!(mux.read(), None);
        assert!(mux.read_line().is_empty());
    }

    #[test]
    fn test_line_excludes_newline_and_carriage_return() {
        let mux = Arc::new(InputMultiplexer::new(true, None));
        assert_eq!(line_after(&mux, "hi\n"), vec!['h', 'i']);
        assert_eq!(line_after(&mux, "ok\r\n"), vec!['o', 'k']);
    }

    #[test]
    fn test_backspace_edits_line() {
        let mux = Arc::new(InputMultiplexer::new(true, None));
        assert_eq!(line_after(&mux, "h\u{8}i\n"), vec!['i']);
        assert_eq!(line_after(&mux, "ab\u{7f}c\n"), vec!['a', 'c']);
    }

    #[test]
    fn test_backspace_disabled_keeps_character() {
        let mux = Arc::new(InputMultiplexer::new(false, None));
        assert_eq!(line_after(&mux, "a\u{8}\n"), vec!['a', '\u{8}']);
    }

    #[test]
    fn test_backspace_redraw_column() {
        let out = SharedBuf::default();
        let mux = Arc::new(InputMultiplexer::new(true, Some(Box::new(out.clone()))));

        let reader = {
            let mux = Arc::clone(&mux);
            thread::spawn(move || mux.read_line())
        };
        wait_for(|| mux.line_waiters() == 1);

        mux.deliver('a');
        mux.deliver('b');
        mux.deliver('\u{8}');
        // width of "a" is 1, so the cursor goes back to column 2; ^? plus "b" is 3 cells
        assert_eq!(out.contents(), "\x1b[2G   \x1b[2G");

        mux.deliver('\n');
        assert_eq!(reader.join().unwrap(), vec!['a']);
    }

    #[test]
    fn test_no_redraw_without_line_waiters() {
        let out = SharedBuf::default();
        let mux = InputMultiplexer::new(true, Some(Box::new(out.clone())));
        mux.deliver('\u{8}');
        assert!(out.contents().is_empty());
    }

    #[test]
    fn test_reader_thread_closes_at_end_of_input() {
        let mux = Arc::new(InputMultiplexer::new(true, None));
        let source = Arc::new(QueueSource(Mutex::new(VecDeque::new())));

        let handle = spawn_reader(source, Arc::clone(&mux)).unwrap();
        handle.join().unwrap();

        assert!(mux.is_closed());
        assert_eq!(mux.read(), None);
    }
}
