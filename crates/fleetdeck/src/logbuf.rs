use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::log_sanitize::sanitize_line;

const MAX_LINES: usize = 2000;

/// Shared, bounded log pane backing store. Appends arrive from worker
/// threads; the UI takes snapshots at render time.
#[derive(Clone, Default)]
pub struct LogBuffer {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    lines: VecDeque<String>,
    /// Offset from the newest line; 0 means pinned to the tail.
    scroll: usize,
    /// Pinned to the tail. Cleared when the operator scrolls back, so
    /// appends stop yanking the view to the newest line.
    follow: bool,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            lines: VecDeque::new(),
            scroll: 0,
            follow: true,
        }
    }
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends with an `HH:MM:SS` stamp. Control sequences are stripped
    /// before storage so stale escapes never reach the terminal.
    pub fn append(&self, line: &str) {
        let stamp = chrono::Local::now().format("%H:%M:%S");
        self.push(format!("{stamp} {}", sanitize_line(line)));
    }

    /// Appends without a timestamp, for continuation output where the
    /// leading command line already carries the stamp.
    pub fn append_raw(&self, line: &str) {
        self.push(sanitize_line(line));
    }

    pub fn info(&self, line: &str) {
        self.append(&format!("ℹ {line}"));
    }

    pub fn success(&self, line: &str) {
        self.append(&format!("✓ {line}"));
    }

    pub fn error(&self, line: &str) {
        self.append(&format!("✗ {line}"));
    }

    pub fn warn(&self, line: &str) {
        self.append(&format!("⚠ {line}"));
    }

    fn push(&self, line: String) {
        let mut inner = self.inner.lock().unwrap();
        inner.lines.push_back(line);
        while inner.lines.len() > MAX_LINES {
            inner.lines.pop_front();
        }
        // New output snaps the view back to the tail only while following;
        // an operator who scrolled back keeps their place.
        if inner.follow {
            inner.scroll = 0;
        }
    }

    pub fn snapshot(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner.lines.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.lines.clear();
        inner.scroll = 0;
        inner.follow = true;
    }

    pub fn scroll(&self) -> usize {
        self.inner.lock().unwrap().scroll
    }

    pub fn set_scroll(&self, offset: usize) {
        let mut inner = self.inner.lock().unwrap();
        let max = inner.lines.len().saturating_sub(1);
        inner.scroll = offset.min(max);
        inner.follow = inner.scroll == 0;
    }

    /// Positive delta scrolls toward older lines. Reaching the tail
    /// resumes following.
    pub fn scroll_by(&self, delta: isize) {
        let mut inner = self.inner.lock().unwrap();
        let max = inner.lines.len().saturating_sub(1);
        let next = if delta >= 0 {
            inner.scroll.saturating_add(delta as usize)
        } else {
            inner.scroll.saturating_sub(delta.unsigned_abs())
        };
        inner.scroll = next.min(max);
        inner.follow = inner.scroll == 0;
    }

    pub fn following(&self) -> bool {
        self.inner.lock().unwrap().follow
    }

    pub fn set_following(&self, follow: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.follow = follow;
        if follow {
            inner.scroll = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_at_max_lines() {
        let buf = LogBuffer::new();
        for i in 0..(MAX_LINES + 50) {
            buf.append_raw(&format!("line {i}"));
        }
        assert_eq!(buf.len(), MAX_LINES);
        let snap = buf.snapshot();
        assert_eq!(snap[0], "line 50");
        assert_eq!(snap[MAX_LINES - 1], format!("line {}", MAX_LINES + 49));
    }

    #[test]
    fn append_stamps_and_raw_does_not() {
        let buf = LogBuffer::new();
        buf.append("hello");
        buf.append_raw("world");
        let snap = buf.snapshot();
        // HH:MM:SS prefix followed by the message.
        assert_eq!(snap[0].len(), "00:00:00 hello".len());
        assert!(snap[0].ends_with(" hello"));
        assert_eq!(snap[1], "world");
    }

    #[test]
    fn scrollback_survives_appends() {
        let buf = LogBuffer::new();
        for i in 0..30 {
            buf.append_raw(&format!("{i}"));
        }
        buf.set_scroll(10);
        assert!(!buf.following());
        buf.append_raw("stream line");
        assert_eq!(buf.scroll(), 10);
        buf.append("worker line");
        assert_eq!(buf.scroll(), 10);
    }

    #[test]
    fn append_follows_tail_until_scrolled_back() {
        let buf = LogBuffer::new();
        buf.append_raw("a");
        assert!(buf.following());
        buf.append_raw("b");
        assert_eq!(buf.scroll(), 0);

        // Scrolling down to the tail resumes following.
        buf.set_scroll(1);
        buf.scroll_by(-1);
        assert!(buf.following());
        buf.append_raw("c");
        assert_eq!(buf.scroll(), 0);
    }

    #[test]
    fn scroll_is_clamped() {
        let buf = LogBuffer::new();
        for i in 0..5 {
            buf.append_raw(&format!("{i}"));
        }
        buf.set_scroll(100);
        assert_eq!(buf.scroll(), 4);
        buf.scroll_by(-100);
        assert_eq!(buf.scroll(), 0);
        buf.scroll_by(3);
        assert_eq!(buf.scroll(), 3);
    }

    #[test]
    fn severity_helpers_prefix_glyphs() {
        let buf = LogBuffer::new();
        buf.success("done");
        buf.error("failed");
        let snap = buf.snapshot();
        assert!(snap[0].contains("✓ done"));
        assert!(snap[1].contains("✗ failed"));
    }

    #[test]
    fn follow_snaps_to_tail() {
        let buf = LogBuffer::new();
        for i in 0..10 {
            buf.append_raw(&format!("{i}"));
        }
        buf.set_scroll(4);
        buf.set_following(true);
        assert!(buf.following());
        assert_eq!(buf.scroll(), 0);
    }
}
