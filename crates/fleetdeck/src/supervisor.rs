use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::logbuf::LogBuffer;
use crate::remote::{CancelFlag, CmdOutput};

const REFRESH_INTERVAL: Duration = Duration::from_millis(80);

const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Spinner frame for an operation that has been running for `elapsed`.
/// Derived at render time, no timer thread.
pub fn spinner_frame(elapsed: Duration) -> &'static str {
    let idx = (elapsed.as_millis() / 80) as usize % SPINNER_FRAMES.len();
    SPINNER_FRAMES[idx]
}

pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms < 1000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{:.1}s", d.as_secs_f64())
    } else {
        let secs = d.as_secs();
        format!("{}m{:02}s", secs / 60, secs % 60)
    }
}

/// Coalesces redraw requests to at most one per interval. Buffer appends
/// are never throttled, only the wakeup.
pub struct Throttle {
    last: Mutex<Option<Instant>>,
    interval: Duration,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            last: Mutex::new(None),
            interval,
        }
    }

    /// True when enough time has passed since the last accepted fire.
    pub fn fire(&self) -> bool {
        let mut last = self.last.lock().unwrap();
        let now = Instant::now();
        match *last {
            Some(prev) if now.duration_since(prev) < self.interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

#[derive(Default)]
struct OpState {
    label: String,
    started_at: Option<Instant>,
    running: bool,
    streaming: bool,
    cancel: Option<CancelFlag>,
}

/// Copy of the supervisor state for the render loop.
#[derive(Debug, Clone, Default)]
pub struct OpSnapshot {
    pub label: String,
    pub running: bool,
    pub streaming: bool,
    pub elapsed: Duration,
}

impl OpSnapshot {
    pub fn busy(&self) -> bool {
        self.running || self.streaming
    }
}

/// Runs named operations on short-lived worker threads and tracks the
/// active one for the header line. Results and errors land in the shared
/// log buffer; nothing propagates back to the event loop.
#[derive(Clone)]
pub struct Supervisor {
    state: Arc<Mutex<OpState>>,
    log: LogBuffer,
    refresh: Arc<Throttle>,
    notify: Arc<dyn Fn() + Send + Sync>,
}

impl Supervisor {
    pub fn new(log: LogBuffer) -> Self {
        Self::with_notifier(log, Arc::new(|| {}))
    }

    /// `notify` is the throttled redraw wakeup invoked as stream lines
    /// arrive.
    pub fn with_notifier(log: LogBuffer, notify: Arc<dyn Fn() + Send + Sync>) -> Self {
        Self {
            state: Arc::new(Mutex::new(OpState::default())),
            log,
            refresh: Arc::new(Throttle::new(REFRESH_INTERVAL)),
            notify,
        }
    }

    pub fn snapshot(&self) -> OpSnapshot {
        let state = self.state.lock().unwrap();
        OpSnapshot {
            label: state.label.clone(),
            running: state.running,
            streaming: state.streaming,
            elapsed: state
                .started_at
                .map(|t| t.elapsed())
                .unwrap_or(Duration::ZERO),
        }
    }

    pub fn is_busy(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.running || state.streaming
    }

    /// Runs a blocking remote command on a worker. Returns false without
    /// starting anything if an operation is already active.
    pub fn run_operation<F>(&self, label: &str, op: F) -> bool
    where
        F: FnOnce() -> Result<CmdOutput> + Send + 'static,
    {
        {
            let mut state = self.state.lock().unwrap();
            if state.running || state.streaming {
                return false;
            }
            state.running = true;
            state.streaming = false;
            state.label = label.to_string();
            state.started_at = Some(Instant::now());
        }

        let sup = self.clone();
        let label = label.to_string();
        std::thread::spawn(move || {
            sup.log.append(&format!("▶ {label}"));
            let started = Instant::now();

            match op() {
                Ok(out) => {
                    for line in out.lines() {
                        sup.log.append_raw(&line);
                    }
                    let took = format_duration(started.elapsed());
                    if out.exit_code == 0 {
                        sup.log.success(&format!("{label} ({took})"));
                    } else {
                        sup.log
                            .error(&format!("{label} failed (exit {}, {took})", out.exit_code));
                    }
                }
                Err(e) => {
                    let took = format_duration(started.elapsed());
                    sup.log.error(&format!("{label}: {e} ({took})"));
                }
            }

            sup.clear_active();
            (sup.notify)();
        });
        true
    }

    /// Runs a long-lived streaming command on a worker. The stream ends on
    /// process exit or `cancel()`.
    pub fn run_streaming<F>(&self, label: &str, stream: F) -> bool
    where
        F: FnOnce(&dyn Fn(String), &CancelFlag) -> Result<()> + Send + 'static,
    {
        let cancel = CancelFlag::new();
        {
            let mut state = self.state.lock().unwrap();
            if state.running || state.streaming {
                return false;
            }
            state.streaming = true;
            state.running = false;
            state.label = label.to_string();
            state.started_at = Some(Instant::now());
            state.cancel = Some(cancel.clone());
        }

        let sup = self.clone();
        let label = label.to_string();
        std::thread::spawn(move || {
            sup.log.append(&format!("▶ {label} (Esc to stop)"));
            let started = Instant::now();

            let on_line = {
                let sup = sup.clone();
                move |line: String| {
                    sup.log.append_raw(&line);
                    if sup.refresh.fire() {
                        (sup.notify)();
                    }
                }
            };

            match stream(&on_line, &cancel) {
                Ok(()) => {
                    let took = format_duration(started.elapsed());
                    if cancel.is_set() {
                        sup.log.info(&format!("{label} stopped ({took})"));
                    } else {
                        sup.log.success(&format!("{label} ended ({took})"));
                    }
                }
                Err(e) => {
                    let took = format_duration(started.elapsed());
                    sup.log.error(&format!("{label}: {e} ({took})"));
                }
            }

            sup.clear_active();
            (sup.notify)();
        });
        true
    }

    /// Stops the active stream if one exists. Safe to call repeatedly.
    pub fn cancel(&self) {
        let flag = {
            let state = self.state.lock().unwrap();
            if !state.streaming {
                return;
            }
            state.cancel.clone()
        };
        if let Some(flag) = flag {
            if !flag.is_set() {
                flag.trigger();
                self.log.info("stopping stream");
            }
        }
    }

    fn clear_active(&self) {
        let mut state = self.state.lock().unwrap();
        state.running = false;
        state.streaming = false;
        state.started_at = None;
        state.cancel = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn wait_idle(sup: &Supervisor) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while sup.is_busy() {
            assert!(Instant::now() < deadline, "supervisor never went idle");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn completion_clears_running_and_logs_duration() {
        let log = LogBuffer::new();
        let sup = Supervisor::new(log.clone());
        assert!(sup.run_operation("list apps", || {
            Ok(CmdOutput {
                stdout: "one\ntwo".into(),
                ..Default::default()
            })
        }));
        wait_idle(&sup);
        let snap = log.snapshot();
        assert!(snap.iter().any(|l| l.contains("one")));
        assert!(snap.iter().any(|l| l.contains("✓ list apps (")));
    }

    #[test]
    fn nonzero_exit_is_a_failed_completion_not_an_error() {
        let log = LogBuffer::new();
        let sup = Supervisor::new(log.clone());
        sup.run_operation("stop web", || {
            Ok(CmdOutput {
                exit_code: 3,
                ..Default::default()
            })
        });
        wait_idle(&sup);
        assert!(
            log.snapshot()
                .iter()
                .any(|l| l.contains("✗ stop web failed (exit 3"))
        );
    }

    #[test]
    fn worker_error_is_logged_not_propagated() {
        let log = LogBuffer::new();
        let sup = Supervisor::new(log.clone());
        sup.run_operation("probe", || Err(Error::transport("no route to host")));
        wait_idle(&sup);
        assert!(
            log.snapshot()
                .iter()
                .any(|l| l.contains("✗ probe: transport: no route to host"))
        );
    }

    #[test]
    fn second_operation_while_busy_is_rejected() {
        let log = LogBuffer::new();
        let sup = Supervisor::new(log.clone());
        assert!(sup.run_operation("slow", || {
            std::thread::sleep(Duration::from_millis(200));
            Ok(CmdOutput::default())
        }));
        assert!(!sup.run_operation("second", || Ok(CmdOutput::default())));
        wait_idle(&sup);
    }

    #[test]
    fn double_cancel_never_panics_and_ends_idle() {
        let log = LogBuffer::new();
        let sup = Supervisor::new(log.clone());

        // Cancel with nothing running is a no-op.
        sup.cancel();
        sup.cancel();
        assert!(!sup.is_busy());

        sup.run_streaming("follow logs", |on_line, cancel| {
            while !cancel.is_set() {
                on_line("tick".into());
                std::thread::sleep(Duration::from_millis(10));
            }
            Ok(())
        });
        std::thread::sleep(Duration::from_millis(30));
        sup.cancel();
        sup.cancel();
        wait_idle(&sup);
        assert!(
            log.snapshot()
                .iter()
                .any(|l| l.contains("follow logs stopped"))
        );
    }

    #[test]
    fn stream_lines_wake_the_notifier_coalesced() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let log = LogBuffer::new();
        let notifies = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notifies);
        let sup = Supervisor::with_notifier(
            log.clone(),
            Arc::new(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            }),
        );

        sup.run_streaming("burst", |on_line, _cancel| {
            for i in 0..200 {
                on_line(format!("line {i}"));
            }
            Ok(())
        });
        wait_idle(&sup);

        // Every line landed in the buffer, but the wakeups were coalesced
        // to far fewer than one per line.
        let n = notifies.load(Ordering::Relaxed);
        assert!(n >= 1, "notifier never fired");
        assert!(n < 200, "notifier fired per line: {n}");
        assert_eq!(
            log.snapshot().iter().filter(|l| l.starts_with("line ")).count(),
            200
        );
    }

    #[test]
    fn throttle_coalesces_rapid_fires() {
        let t = Throttle::new(Duration::from_millis(50));
        assert!(t.fire());
        assert!(!t.fire());
        assert!(!t.fire());
        std::thread::sleep(Duration::from_millis(60));
        assert!(t.fire());
    }

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(Duration::from_millis(123)), "123ms");
        assert_eq!(format_duration(Duration::from_millis(4200)), "4.2s");
        assert_eq!(format_duration(Duration::from_secs(62)), "1m02s");
    }
}
