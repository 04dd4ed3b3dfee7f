use std::io::{BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Cooperative stop signal for streaming operations. Triggering twice is a
/// no-op; the stream loop observes it between line reads.
#[derive(Clone, Default)]
pub struct CancelFlag {
    inner: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.inner.store(true, Ordering::Relaxed);
    }

    pub fn is_set(&self) -> bool {
        self.inner.load(Ordering::Relaxed)
    }
}

/// Captured result of one blocking remote command. A non-zero exit is data,
/// not an error; callers render it with the exit code.
#[derive(Debug, Clone, Default)]
pub struct CmdOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CmdOutput {
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    pub fn lines(&self) -> Vec<String> {
        let s = self.combined();
        let s = s.trim_end_matches('\n');
        if s.is_empty() {
            return Vec::new();
        }
        s.lines().map(|l| l.to_string()).collect()
    }
}

/// The remote command/stream transport. The session core only depends on
/// this trait; tests substitute a scripted implementation.
pub trait RemoteExec: Send + Sync {
    /// Runs a command to completion with a bounded timeout. Errors only
    /// for transport failures (cannot launch the shell, timeout).
    fn run(&self, command: &str, timeout: Duration) -> Result<CmdOutput>;

    /// Runs a long-lived command, delivering each output line (stdout and
    /// stderr interleaved) to `on_line` until the process exits or `cancel`
    /// fires. On cancel the underlying process is terminated before return.
    fn stream(&self, command: &str, on_line: &dyn Fn(String), cancel: &CancelFlag) -> Result<()>;

    /// Connection probe.
    fn check(&self) -> Result<()> {
        self.run("echo ok", DEFAULT_TIMEOUT).map(|_| ())
    }
}

/// One addressable remote host, `user@host:port` with user and port optional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub user: Option<String>,
    pub port: u16,
}

impl SshTarget {
    pub fn parse(spec: &str) -> Result<Self> {
        let mut rest = spec.trim();
        if rest.is_empty() {
            return Err(Error::msg("empty host"));
        }
        let user = match rest.split_once('@') {
            Some((u, h)) => {
                rest = h;
                Some(u.to_string())
            }
            None => None,
        };
        let (host, port) = match rest.split_once(':') {
            Some((h, p)) => {
                let port = p
                    .parse::<u16>()
                    .map_err(|_| Error::msg(format!("invalid port '{p}' in '{spec}'")))?;
                (h, port)
            }
            None => (rest, 22),
        };
        if host.is_empty() {
            return Err(Error::msg(format!("missing host in '{spec}'")));
        }
        Ok(Self {
            host: host.to_string(),
            user,
            port,
        })
    }

    pub fn display(&self) -> String {
        match &self.user {
            Some(u) => format!("{u}@{}", self.host),
            None => self.host.clone(),
        }
    }
}

/// Shells out to the system `ssh` binary. Connection multiplexing via
/// ControlMaster keeps repeated commands against the same host cheap.
pub struct SshClient {
    target: SshTarget,
}

impl SshClient {
    pub fn new(target: SshTarget) -> Self {
        Self { target }
    }

    pub fn target(&self) -> &SshTarget {
        &self.target
    }

    fn base_args(&self) -> Vec<String> {
        let control_path = format!("/tmp/fleetdeck-ssh-{}", self.target.host);
        let mut args = vec![
            "-o".into(),
            "BatchMode=yes".into(),
            "-o".into(),
            "StrictHostKeyChecking=accept-new".into(),
            "-o".into(),
            "ConnectTimeout=10".into(),
            "-o".into(),
            "ControlMaster=auto".into(),
            "-o".into(),
            format!("ControlPath={control_path}"),
            "-o".into(),
            "ControlPersist=60".into(),
        ];
        if self.target.port != 22 {
            args.push("-p".into());
            args.push(self.target.port.to_string());
        }
        args.push(self.target.display());
        args
    }

    fn spawn(&self, command: &str) -> Result<Child> {
        let mut cmd = Command::new("ssh");
        cmd.args(self.base_args()).arg(command);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group so cancellation can kill the whole ssh subtree.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            unsafe {
                cmd.pre_exec(|| {
                    if libc::setpgid(0, 0) != 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        cmd.spawn()
            .map_err(|e| Error::transport(format!("failed to launch ssh: {e}")))
    }
}

impl RemoteExec for SshClient {
    fn run(&self, command: &str, timeout: Duration) -> Result<CmdOutput> {
        tracing::debug!(host = %self.target.host, %command, "remote run");
        let mut child = self.spawn(command)?;
        let pgid = child.id();

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_handle = std::thread::spawn(move || read_all(stdout));
        let err_handle = std::thread::spawn(move || read_all(stderr));

        let deadline = Instant::now() + timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        kill_pgroup(pgid, false);
                        kill_pgroup(pgid, true);
                        let _ = child.wait();
                        return Err(Error::timeout(format!(
                            "command timed out after {}s",
                            timeout.as_secs()
                        )));
                    }
                    std::thread::sleep(Duration::from_millis(25));
                }
                Err(e) => {
                    return Err(Error::transport(format!("wait failed: {e}")));
                }
            }
        };

        let stdout = out_handle.join().unwrap_or_default();
        let stderr = err_handle.join().unwrap_or_default();
        Ok(CmdOutput {
            stdout,
            stderr,
            exit_code: status.code().unwrap_or(-1),
        })
    }

    fn stream(&self, command: &str, on_line: &dyn Fn(String), cancel: &CancelFlag) -> Result<()> {
        tracing::debug!(host = %self.target.host, %command, "remote stream");
        let mut child = self.spawn(command)?;
        let pgid = child.id();

        let (tx, rx) = mpsc::channel::<String>();
        if let Some(out) = child.stdout.take() {
            let tx = tx.clone();
            std::thread::spawn(move || read_lines(out, tx));
        }
        if let Some(err) = child.stderr.take() {
            let tx = tx.clone();
            std::thread::spawn(move || read_lines(err, tx));
        }
        drop(tx);

        // Reader threads close the channel on EOF; a cancel wakes us at the
        // next recv timeout even when no output is flowing.
        loop {
            if cancel.is_set() {
                kill_pgroup(pgid, false);
                kill_pgroup(pgid, true);
                break;
            }
            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(line) => on_line(line),
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        // Drain what the readers got out before the kill.
        while let Ok(line) = rx.try_recv() {
            on_line(line);
        }

        child
            .wait()
            .map_err(|e| Error::transport(format!("wait failed: {e}")))?;
        Ok(())
    }
}

fn kill_pgroup(pgid: u32, force: bool) {
    #[cfg(unix)]
    {
        let sig = if force { libc::SIGKILL } else { libc::SIGTERM };
        // Negative pid targets the whole process group.
        let _ = unsafe { libc::kill(-(pgid as i32), sig) };
    }
    #[cfg(not(unix))]
    {
        let _ = (pgid, force);
    }
}

fn read_all<R: Read>(reader: Option<R>) -> String {
    let mut buf = String::new();
    if let Some(mut r) = reader {
        let _ = r.read_to_string(&mut buf);
    }
    buf
}

fn read_lines<R: Read>(reader: R, tx: mpsc::Sender<String>) {
    const MAX_PENDING_BYTES: usize = 16 * 1024;
    let mut r = BufReader::new(reader);
    let mut buf = [0u8; 8192];
    let mut pending = Vec::with_capacity(1024);

    loop {
        let n = match r.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(_) => break,
        };
        for b in &buf[..n] {
            if *b == b'\n' || *b == b'\r' {
                if pending.is_empty() {
                    continue;
                }
                let line = String::from_utf8_lossy(&pending).into_owned();
                pending.clear();
                if tx.send(line).is_err() {
                    return;
                }
            } else {
                pending.push(*b);
                if pending.len() >= MAX_PENDING_BYTES {
                    let line = String::from_utf8_lossy(&pending).into_owned();
                    pending.clear();
                    if tx.send(line).is_err() {
                        return;
                    }
                }
            }
        }
    }

    if !pending.is_empty() {
        let line = String::from_utf8_lossy(&pending).into_owned();
        let _ = tx.send(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_target_spec() {
        let t = SshTarget::parse("deploy@box.example.com:2222").unwrap();
        assert_eq!(t.user.as_deref(), Some("deploy"));
        assert_eq!(t.host, "box.example.com");
        assert_eq!(t.port, 2222);
        assert_eq!(t.display(), "deploy@box.example.com");
    }

    #[test]
    fn parses_bare_host_with_defaults() {
        let t = SshTarget::parse("box").unwrap();
        assert_eq!(t.user, None);
        assert_eq!(t.port, 22);
        assert_eq!(t.display(), "box");
    }

    #[test]
    fn rejects_bad_port_and_empty_host() {
        assert!(SshTarget::parse("host:notaport").is_err());
        assert!(SshTarget::parse("").is_err());
        assert!(SshTarget::parse("user@:22").is_err());
    }

    #[test]
    fn cancel_flag_is_idempotent() {
        let c = CancelFlag::new();
        assert!(!c.is_set());
        c.trigger();
        c.trigger();
        assert!(c.is_set());
    }

    #[test]
    fn cmd_output_combines_and_splits_lines() {
        let out = CmdOutput {
            stdout: "a\nb\n".into(),
            stderr: "c".into(),
            exit_code: 0,
        };
        assert_eq!(out.lines(), vec!["a", "b", "c"]);

        let empty = CmdOutput::default();
        assert!(empty.lines().is_empty());
    }
}
