use std::{
    env,
    io::{self, Read, Write},
    mem,
    os::unix::process::CommandExt,
    path::PathBuf,
    process::{Command, Stdio},
    sync::{
        mpsc::{channel, Receiver, RecvTimeoutError},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    probe::ProcessProbe,
    tree::{next_run_tag, ProcessTree, RUN_TAG},
};

/// An argv-style command, optionally run from a working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    pub argv: Vec<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

impl Invocation {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv, cwd: None }
    }

    pub fn in_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn program(&self) -> Result<&str> {
        self.argv
            .first()
            .map(String::as_str)
            .ok_or_else(|| Error::Argument("empty command".into()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLimits {
    pub wall_clock_ms: u64,
    pub memory_kb: u64,
    /// Cap on captured stdout and stderr, each, in KB.
    pub output_kb: u64,
}

impl ExecutionLimits {
    pub fn memory_exceeded(&self, peak_memory_kb: u64) -> bool {
        self.memory_kb > 0 && peak_memory_kb > self.memory_kb
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub cpu_time_ms: u64,
    pub wall_time_ms: u64,
    pub peak_memory_kb: u64,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub timed_out: bool,
    pub crashed: bool,
    pub output_truncated: bool,
}

impl ExecutionResult {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Runs one program for one input under limits.
pub trait Sandbox {
    fn execute(
        &self,
        invocation: &Invocation,
        input: &[u8],
        limits: &ExecutionLimits,
    ) -> Result<ExecutionResult>;
}

/// Sandbox backed by a plain child process in its own process group.
#[derive(Debug, Default, Clone)]
pub struct ProcessSandbox;

impl ProcessSandbox {
    pub fn new() -> Self {
        Self
    }
}

impl Sandbox for ProcessSandbox {
    fn execute(
        &self,
        invocation: &Invocation,
        input: &[u8],
        limits: &ExecutionLimits,
    ) -> Result<ExecutionResult> {
        let program = invocation.program()?;
        let cwd = match &invocation.cwd {
            Some(cwd) => cwd.clone(),
            None => env::current_dir()?,
        };
        let resolved = which::which_in(program, env::var_os("PATH"), &cwd).map_err(|err| {
            Error::Spawn {
                program: program.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, err.to_string()),
            }
        })?;

        let tag = next_run_tag();
        let rlimits = ResourceLimits::from(limits);
        let mut command = Command::new(&resolved);
        command
            .args(&invocation.argv[1..])
            .current_dir(&cwd)
            .env(RUN_TAG, &tag)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        unsafe {
            command.pre_exec(move || rlimits.apply());
        }

        let mut child = command.spawn().map_err(|source| Error::Spawn {
            program: program.to_string(),
            source,
        })?;
        let pid = child.id();
        let started = Instant::now();

        let probe = match ProcessProbe::new(pid) {
            Ok(probe) => probe,
            Err(err) => {
                ProcessTree::new(pid, &tag).kill();
                let _ = child.wait();
                return Err(err);
            }
        };

        let cap = (limits.output_kb as usize).saturating_mul(1024);
        let stdout = drain(child.stdout.take(), cap);
        let stderr = drain(child.stderr.take(), cap);
        feed(child.stdin.take(), input.to_vec());

        // the monitor stops at the deadline, on a memory breach, or when
        // `stop` is signalled or dropped
        let (stop, stopped) = channel::<()>();
        let monitor = {
            let mut tree = ProcessTree::new(pid, &tag);
            let deadline = started + Duration::from_millis(limits.wall_clock_ms);
            let memory_kb = limits.memory_kb;
            thread::spawn(move || {
                let mut watch = Watch::default();
                while let Err(RecvTimeoutError::Timeout) = stopped.recv_timeout(SAMPLE_INTERVAL) {
                    watch.peak_memory_kb = watch.peak_memory_kb.max(tree.sample());
                    if memory_kb > 0 && watch.peak_memory_kb > memory_kb {
                        watch.memory_exceeded = true;
                        tree.kill();
                        break;
                    }
                    if Instant::now() >= deadline {
                        watch.deadline_passed = true;
                        tree.kill();
                        break;
                    }
                }
                (watch, tree)
            })
        };

        // the leader stays a zombie until `watching`, so its pid and group
        // cannot be reused while the monitor or the cleanup signal them
        let exited = probe.wait_exit();
        let wall_time_ms = started.elapsed().as_millis() as u64;
        let _ = stop.send(());
        let (watch, mut tree) = monitor.join().map_err(|_| {
            Error::IO(io::Error::new(io::ErrorKind::Other, "process monitor panicked"))
        })?;
        // descendants must not outlive the call
        tree.kill();
        let bio = probe.watching();
        exited?;
        let bio = bio?;

        let grace = Instant::now() + OUTPUT_GRACE;
        let stdout = stdout.finish(grace)?;
        let stderr = stderr.finish(grace)?;

        let cpu_time_ms = bio.get_time_usage();
        let peak_memory_kb = bio.get_peak_memory().max(watch.peak_memory_kb);
        let timed_out = watch.timed_out(wall_time_ms, cpu_time_ms, bio.signal(), limits);
        let output_truncated = stdout.truncated || stderr.truncated;
        let memory_exceeded = watch.memory_exceeded || limits.memory_exceeded(peak_memory_kb);
        let crashed = !timed_out && !memory_exceeded && (!bio.success() || output_truncated);

        let result = ExecutionResult {
            stdout: stdout.bytes,
            stderr: stderr.bytes,
            cpu_time_ms,
            wall_time_ms,
            peak_memory_kb,
            exit_code: bio.exit_code(),
            signal: bio.signal(),
            timed_out,
            crashed,
            output_truncated,
        };
        debug!(
            "{:?}: exit {:?} signal {:?} cpu {}ms wall {}ms mem {}KB timed_out {} crashed {}",
            invocation.argv,
            result.exit_code,
            result.signal,
            result.cpu_time_ms,
            result.wall_time_ms,
            result.peak_memory_kb,
            result.timed_out,
            result.crashed
        );
        Ok(result)
    }
}

const SAMPLE_INTERVAL: Duration = Duration::from_millis(10);
const OUTPUT_GRACE: Duration = Duration::from_millis(200);

/// What the monitor saw while the program ran.
#[derive(Debug, Default)]
struct Watch {
    peak_memory_kb: u64,
    memory_exceeded: bool,
    deadline_passed: bool,
}

impl Watch {
    /// A monitor that reached the deadline only counts when the program was
    /// still running then, it may wake up just after the exit.
    fn timed_out(
        &self,
        wall_time_ms: u64,
        cpu_time_ms: u64,
        signal: Option<i32>,
        limits: &ExecutionLimits,
    ) -> bool {
        (self.deadline_passed && wall_time_ms >= limits.wall_clock_ms)
            || cpu_time_ms > limits.wall_clock_ms
            || signal == Some(libc::SIGXCPU)
    }
}

#[derive(Debug, Clone, Copy)]
struct ResourceLimits {
    cpu_seconds: u64,
}

impl From<&ExecutionLimits> for ResourceLimits {
    fn from(limits: &ExecutionLimits) -> Self {
        Self {
            cpu_seconds: (limits.wall_clock_ms + 1000) / 1000,
        }
    }
}

impl ResourceLimits {
    /// Runs between fork and exec, must stay async-signal-safe.
    fn apply(&self) -> io::Result<()> {
        set_rlimit(libc::RLIMIT_CPU, self.cpu_seconds)?;
        set_rlimit(libc::RLIMIT_CORE, 0)
    }
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
type Resource = libc::__rlimit_resource_t;
#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
type Resource = libc::c_int;

fn set_rlimit(resource: Resource, value: u64) -> io::Result<()> {
    let lim = libc::rlimit {
        rlim_cur: value as libc::rlim_t,
        rlim_max: value as libc::rlim_t,
    };
    if unsafe { libc::setrlimit(resource, &lim) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

/// Output of one pipe, filled by a reader thread.
struct Capture {
    buffer: Arc<Mutex<Captured>>,
    done: Receiver<io::Result<()>>,
}

impl Capture {
    /// Takes what was read, waiting for end of file no longer than
    /// `deadline`. A pipe still held open by a process that escaped the kill
    /// is left to its reader thread.
    fn finish(self, deadline: Instant) -> Result<Captured> {
        match self.done.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(read) => read?,
            Err(RecvTimeoutError::Timeout) => warn!("output pipe still open after the run"),
            Err(RecvTimeoutError::Disconnected) => {
                return Err(Error::IO(io::Error::new(
                    io::ErrorKind::Other,
                    "output reader panicked",
                )))
            }
        }
        let mut captured = self.buffer.lock().map_err(|_| {
            Error::IO(io::Error::new(io::ErrorKind::Other, "output reader panicked"))
        })?;
        Ok(mem::take(&mut *captured))
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>, cap: usize) -> Capture {
    let buffer = Arc::new(Mutex::new(Captured::default()));
    let (done, finished) = channel();
    let shared = buffer.clone();
    thread::spawn(move || {
        let read = match pipe {
            Some(pipe) => pump(pipe, cap, &shared),
            None => Ok(()),
        };
        let _ = done.send(read);
    });
    Capture {
        buffer,
        done: finished,
    }
}

fn pump<R: Read>(mut pipe: R, cap: usize, buffer: &Mutex<Captured>) -> io::Result<()> {
    let mut buf = [0u8; 8192];
    loop {
        let len = match pipe.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(len) => len,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        let mut captured = buffer
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "output buffer poisoned"))?;
        // keep reading past the cap so the writer never blocks
        let room = cap.saturating_sub(captured.bytes.len());
        if len > room {
            captured.truncated = true;
        }
        captured.bytes.extend_from_slice(&buf[..len.min(room)]);
    }
}

/// Writes the input from its own thread. The thread is never joined, a
/// descendant that escaped the kill may hold the pipe without reading.
fn feed<W: Write + Send + 'static>(pipe: Option<W>, input: Vec<u8>) {
    let mut cin = match pipe {
        Some(cin) => cin,
        None => return,
    };
    thread::spawn(move || {
        match cin.write_all(&input).and_then(|_| cin.flush()) {
            Ok(()) => {}
            // the program is free to exit without reading its input
            Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {}
            Err(err) => warn!("failed to feed input: {}", err),
        }
    });
}
