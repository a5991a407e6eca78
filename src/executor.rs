use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use getset::Getters;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, trace, warn};

/// Exit code reported when the command ran out of time.
pub const TIMEOUT_EXIT_CODE: i32 = 124;
/// Exit code reported when the command could not be spawned or awaited.
pub const ERROR_EXIT_CODE: i32 = 1;
/// Line appended to stderr of a timed out command.
pub const TIMEOUT_MARKER: &str = "[queuectl] timeout reached";

/// Per stream capture limit. Output past it is read and discarded.
const MAX_CAPTURE_BYTES: usize = 1024 * 1024;
const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Result of one command execution.
///
/// A non-zero exit code is ordinary data here, not an error.
#[derive(Getters, Serialize, Debug, Clone, PartialEq, Eq)]
#[getset(get = "pub")]
pub struct CommandOutput {
    exit_code: i32,
    stdout: String,
    stderr: String,
    /// The command was killed because it exceeded its time budget
    timed_out: bool,
}

impl CommandOutput {
    pub fn is_success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    fn error(message: String) -> Self {
        CommandOutput {
            exit_code: ERROR_EXIT_CODE,
            stdout: String::new(),
            stderr: message,
            timed_out: false,
        }
    }
}

enum Resolution {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
}

/// Runs `command` through the platform shell.
///
/// Exactly one of natural exit, timeout or error resolves the call. Whichever
/// wins, the command's process group is killed and the child reaped before
/// returning, so nothing it started outlives the call. A `timeout` of `None`
/// or zero means no time limit.
pub async fn run_command(command: &str, timeout: Option<Duration>) -> CommandOutput {
    let start = Instant::now();
    let mut cmd = shell_command(command);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(error = %e, command, "Failed to spawn command");
            return CommandOutput::error(e.to_string());
        }
    };
    let pid = child.id();
    trace!(?pid, command, "Command spawned");

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let mut stdout_buf = Vec::new();
    let mut stderr_buf = Vec::new();

    let resolution = {
        let run = async {
            let (status, _, _) = tokio::join!(
                child.wait(),
                drain(stdout, &mut stdout_buf),
                drain(stderr, &mut stderr_buf)
            );
            status
        };
        tokio::pin!(run);

        match timeout.filter(|t| !t.is_zero()) {
            Some(limit) => tokio::select! {
                status = &mut run => Resolution::Exited(status),
                _ = tokio::time::sleep(limit) => Resolution::TimedOut,
            },
            None => Resolution::Exited(run.await),
        }
    };

    terminate(pid, &mut child).await;

    let stdout = String::from_utf8_lossy(&stdout_buf).into_owned();
    let stderr = String::from_utf8_lossy(&stderr_buf).into_owned();

    let output = match resolution {
        Resolution::Exited(Ok(status)) => CommandOutput {
            exit_code: exit_code(status),
            stdout,
            stderr,
            timed_out: false,
        },
        Resolution::Exited(Err(e)) => {
            warn!(error = %e, command, "Failed to wait for command");
            CommandOutput {
                exit_code: ERROR_EXIT_CODE,
                stdout,
                stderr: e.to_string(),
                timed_out: false,
            }
        }
        Resolution::TimedOut => {
            let mut stderr = stderr.trim_end().to_string();
            if !stderr.is_empty() {
                stderr.push('\n');
            }
            stderr.push_str(TIMEOUT_MARKER);
            CommandOutput {
                exit_code: TIMEOUT_EXIT_CODE,
                stdout,
                stderr,
                timed_out: true,
            }
        }
    };

    debug!(
        command,
        exit_code = output.exit_code,
        timed_out = output.timed_out,
        duration_ms = start.elapsed().as_millis() as u64,
        "Command finished"
    );

    output
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

#[cfg(not(windows))]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    // The shell leads a new group so a timeout reaches its descendants too.
    #[cfg(unix)]
    cmd.process_group(0);
    cmd
}

/// Reads `reader` to the end, keeping at most `MAX_CAPTURE_BYTES`.
///
/// Uses plain `read` calls, which are cancel safe: bytes already appended to
/// `buf` stay there when the surrounding future is dropped on timeout.
async fn drain<R: AsyncRead + Unpin>(reader: Option<R>, buf: &mut Vec<u8>) {
    let Some(mut reader) = reader else {
        return;
    };

    let mut chunk = [0u8; READ_CHUNK_BYTES];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let room = MAX_CAPTURE_BYTES.saturating_sub(buf.len());
                buf.extend_from_slice(&chunk[..n.min(room)]);
            }
            Err(e) => {
                debug!(error = %e, "Stopped reading command output");
                break;
            }
        }
    }
}

/// Best effort kill of everything the command started, then reap the child.
async fn terminate(pid: Option<u32>, child: &mut Child) {
    #[cfg(unix)]
    if let Some(pgid) = pid.and_then(|p| i32::try_from(p).ok()) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Err(e) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
            trace!(pgid, error = %e, "Process group already gone");
        }
    }
    #[cfg(not(unix))]
    let _ = pid;

    // Errors once the child has been reaped, which is the common case.
    if let Err(e) = child.kill().await {
        trace!(error = %e, "Child already exited");
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    ERROR_EXIT_CODE
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_output_of_a_successful_command() {
        let output = run_command("echo hello; echo oops >&2", None).await;
        assert_eq!(*output.exit_code(), 0);
        assert_eq!(output.stdout(), "hello\n");
        assert_eq!(output.stderr(), "oops\n");
        assert!(!output.timed_out());
        assert!(output.is_success());
    }

    #[tokio::test]
    async fn reports_the_real_exit_code() {
        let output = run_command("exit 3", Some(Duration::from_secs(10))).await;
        assert_eq!(*output.exit_code(), 3);
        assert!(!output.is_success());

        let output = run_command("false", None).await;
        assert_eq!(*output.exit_code(), 1);
    }

    #[tokio::test]
    async fn times_out_with_124_and_a_marker() {
        let start = Instant::now();
        let output = run_command("echo started; sleep 5", Some(Duration::from_millis(200))).await;

        assert!(start.elapsed() < Duration::from_secs(4));
        assert_eq!(*output.exit_code(), TIMEOUT_EXIT_CODE);
        assert!(output.timed_out());
        assert_eq!(output.stdout(), "started\n");
        assert!(output.stderr().ends_with(TIMEOUT_MARKER));
    }

    #[tokio::test]
    async fn zero_timeout_means_no_limit() {
        let output = run_command("sleep 0.2; echo done", Some(Duration::ZERO)).await;
        assert_eq!(*output.exit_code(), 0);
        assert_eq!(output.stdout(), "done\n");
    }

    #[tokio::test]
    async fn spawn_errors_are_folded_into_exit_code_1() {
        // Interior NUL bytes are rejected before the process is created.
        let output = run_command("echo \0", None).await;
        assert_eq!(*output.exit_code(), ERROR_EXIT_CODE);
        assert!(!output.stderr().is_empty());
        assert!(!output.timed_out());
    }

    #[tokio::test]
    async fn signal_deaths_map_to_128_plus_signal() {
        let output = run_command("kill -9 $$", None).await;
        assert_eq!(*output.exit_code(), 128 + 9);
    }

    #[tokio::test]
    async fn large_output_is_capped() {
        let output = run_command("head -c 3000000 /dev/zero", None).await;
        assert_eq!(*output.exit_code(), 0);
        assert_eq!(output.stdout().len(), MAX_CAPTURE_BYTES);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn timeout_kills_background_children() {
        let output = run_command("sleep 30 & echo $!; wait", Some(Duration::from_millis(300))).await;
        assert!(output.timed_out());

        let pid: u32 = output.stdout().trim().parse().expect("background pid");
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let stat = std::fs::read_to_string(format!("/proc/{pid}/stat"));
            let alive = match stat {
                Err(_) => false,
                // A zombie is dead, only waiting for its new parent to reap it.
                Ok(stat) => !stat
                    .rsplit(')')
                    .next()
                    .is_some_and(|rest| rest.trim_start().starts_with('Z')),
            };
            if !alive {
                break;
            }
            assert!(Instant::now() < deadline, "background child {pid} survived");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}
