//! Helpers for running child processes with timeouts and bounded output.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// How long to keep draining pipes after the child exits or is killed.
///
/// Grandchildren that inherited the pipes can keep them open indefinitely.
const IO_CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Kills and reaps the child unless it was already waited on.
struct ChildGuard {
    child: Child,
    /// The child leads its own process group; kill the whole group.
    group: bool,
    reaped: bool,
}

impl ChildGuard {
    /// Must run before the child is reaped so its pid still names the group.
    fn kill(&mut self) -> std::io::Result<()> {
        if self.group {
            kill_process_group(self.child.id());
        }
        self.child.kill()
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        if let Err(e) = self.kill() {
            debug!(err = %e, "kill on drop failed (child likely exited)");
        }
        let _ = self.child.wait();
    }
}

#[cfg(unix)]
fn place_in_own_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn place_in_own_group(_cmd: &mut Command) {}

#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    let target = format!("-{pgid}");
    let result = Command::new("kill")
        .args(["-KILL", "--", &target])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match result {
        Ok(status) if status.success() => debug!(pgid, "killed process group"),
        Ok(status) => debug!(pgid, exit_code = ?status.code(), "process group kill failed"),
        Err(e) => debug!(pgid, err = %e, "could not run kill for process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
/// When `stream_path` is set, every stdout line is also appended to that file as it arrives.
///
/// The child is killed if it outlives `timeout` or if any step after spawning fails.
/// With `own_process_group` (unix) the child leads a new process group and the whole
/// group is killed, so shell pipelines do not leave grandchildren holding the pipes.
/// Such children no longer receive terminal signals like Ctrl-C.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes, own_process_group, streaming = stream_path.is_some()))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
    stream_path: Option<&Path>,
    own_process_group: bool,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    if own_process_group {
        place_in_own_group(&mut cmd);
    }

    let stream_file = match stream_path {
        Some(path) => Some(open_stream_file(path)?),
        None => None,
    };

    debug!("spawning child process");
    let child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };
    let mut guard = ChildGuard {
        child,
        group: own_process_group,
        reaped: false,
    };

    let stdout = guard
        .child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = guard
        .child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_rx =
        spawn_reader(move || read_lines_limited(stdout, output_limit_bytes, stream_file));
    let stderr_rx = spawn_reader(move || read_stream_limited(stderr, output_limit_bytes));

    if let Some(input) = stdin {
        let mut child_stdin = guard
            .child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        child_stdin.write_all(input).context("write stdin")?;
    }

    let mut timed_out = false;
    let status = match guard.child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            guard.kill().context("kill command")?;
            guard.child.wait().context("wait command after kill")?
        }
    };
    guard.reaped = true;

    let (stdout, stdout_truncated) = collect_output(&stdout_rx).context("collect stdout")?;
    let (stderr, stderr_truncated) = collect_output(&stderr_rx).context("collect stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

fn open_stream_file(path: &Path) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create stream dir {}", parent.display()))?;
    }
    let file =
        File::create(path).with_context(|| format!("create stream file {}", path.display()))?;
    Ok(BufWriter::new(file))
}

type ReadResult = Result<(Vec<u8>, usize)>;

fn spawn_reader<F>(read: F) -> Receiver<ReadResult>
where
    F: FnOnce() -> ReadResult + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        // The receiver may have given up already; nothing to report then.
        let _ = tx.send(read());
    });
    rx
}

fn collect_output(rx: &Receiver<ReadResult>) -> Result<(Vec<u8>, usize)> {
    match rx.recv_timeout(IO_CAPTURE_TIMEOUT) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            warn!(
                wait_secs = IO_CAPTURE_TIMEOUT.as_secs(),
                "output pipe still open after exit, abandoning reader"
            );
            Ok((Vec::new(), 0))
        }
        Err(RecvTimeoutError::Disconnected) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Read a stream line by line with a size limit, optionally tee-ing each line to a file.
fn read_lines_limited<R: Read>(
    reader: R,
    limit: usize,
    mut stream_file: Option<BufWriter<File>>,
) -> Result<(Vec<u8>, usize)> {
    let mut buf_reader = BufReader::new(reader);
    let mut collected = Vec::new();
    let mut truncated = 0usize;

    loop {
        let mut line = Vec::new();
        let n = buf_reader
            .read_until(b'\n', &mut line)
            .context("read line")?;
        if n == 0 {
            break;
        }

        if let Some(writer) = stream_file.as_mut() {
            // Flush per line so the transcript is readable while the child runs.
            if let Err(e) = writer.write_all(&line).and_then(|()| writer.flush()) {
                warn!(err = %e, "failed to write stream file, disabling tee");
                stream_file = None;
            }
        }

        let remaining = limit.saturating_sub(collected.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            collected.extend_from_slice(&line[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((collected, truncated))
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_stdout_and_stderr() {
        let output = run_command_with_timeout(
            sh("echo out; echo err >&2; exit 3"),
            None,
            Duration::from_secs(10),
            1000,
            None,
            false,
        )
        .expect("run");
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.stdout_lossy().trim(), "out");
        assert_eq!(output.stderr_lossy().trim(), "err");
        assert!(!output.timed_out);
    }

    #[test]
    fn kills_child_on_timeout() {
        let output = run_command_with_timeout(
            sh("exec sleep 30"),
            None,
            Duration::from_millis(200),
            1000,
            None,
            false,
        )
        .expect("run");
        assert!(output.timed_out);
        assert!(!output.status.success());
    }

    #[test]
    fn truncates_output_beyond_limit() {
        let output = run_command_with_timeout(
            sh("printf 'abcdefghij'"),
            None,
            Duration::from_secs(10),
            4,
            None,
            false,
        )
        .expect("run");
        assert_eq!(output.stdout, b"abcd");
        assert_eq!(output.stdout_truncated, 6);
    }

    #[test]
    fn feeds_stdin_and_tees_stdout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let transcript = temp.path().join("logs/transcript.log");
        let output = run_command_with_timeout(
            sh("cat"),
            Some(b"line one\nline two\n"),
            Duration::from_secs(10),
            1000,
            Some(&transcript),
            false,
        )
        .expect("run");
        assert_eq!(output.stdout_lossy(), "line one\nline two\n");
        let teed = std::fs::read_to_string(&transcript).expect("read transcript");
        assert_eq!(teed, "line one\nline two\n");
    }

    #[test]
    fn timeout_kills_whole_pipeline_when_grouped() {
        let started = std::time::Instant::now();
        let output = run_command_with_timeout(
            sh("sleep 30 | cat"),
            None,
            Duration::from_millis(200),
            1000,
            None,
            true,
        )
        .expect("run");
        assert!(output.timed_out);
        // Surviving grandchildren would hold the pipes until IO_CAPTURE_TIMEOUT.
        assert!(started.elapsed() < IO_CAPTURE_TIMEOUT);
    }
}
