use parking_lot::Mutex;
use std::sync::Arc;

/// A shared, mutex-guarded text buffer.
///
/// Wires carry gene content and queue bytes between neurons. Concurrent
/// append and line extraction are safe; observers copy before inspecting.
#[derive(Debug, Clone, Default)]
pub struct Wire(Arc<Mutex<String>>);

impl Wire {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_text(text: &str) -> Self {
        Self(Arc::new(Mutex::new(text.to_string())))
    }

    pub fn assign(&self, text: &str) {
        let mut s = self.0.lock();
        s.clear();
        s.push_str(text);
    }

    pub fn append(&self, text: &str) {
        self.0.lock().push_str(text);
    }

    pub fn append_wire(&self, other: &Wire) {
        // copy first so appending a wire to itself cannot deadlock
        let text = other.snapshot();
        self.0.lock().push_str(&text);
    }

    pub fn snapshot(&self) -> String {
        self.0.lock().clone()
    }

    pub fn print_into(&self, into: &mut String) {
        into.push_str(&self.0.lock());
    }

    pub fn avail(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    pub fn erase(&self) {
        self.0.lock().clear();
    }

    /// Drop the first `count` bytes; returns true when the wire emptied.
    pub fn expire(&self, count: usize) -> bool {
        let mut s = self.0.lock();
        let count = count.min(s.len());
        s.drain(..count);
        s.is_empty()
    }

    /// Extract one line (or the whole remainder when no newline is present)
    /// into `into`, consuming it. A trailing `\r` is stripped. Returns false
    /// when the wire was empty.
    pub fn extract_line(&self, into: &mut String) -> bool {
        let mut s = self.0.lock();
        if s.is_empty() {
            return false;
        }
        match s.find('\n') {
            Some(offset) => {
                let mut end = offset;
                if end > 0 && s.as_bytes()[end - 1] == b'\r' {
                    end -= 1;
                }
                into.push_str(&s[..end]);
                s.drain(..=offset);
            }
            None => {
                into.push_str(&s);
                s.clear();
            }
        }
        true
    }

    pub fn same(&self, other: &Wire) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
