//! External command execution with deadlines
//!
//! Every `zfs`, `ssh` and `virsh` call goes through here. A command that
//! outlives its deadline is killed and reported as timed out; callers map
//! that onto a driver or transport error depending on the call site.
//!
//! Children run in their own process group so a terminal interrupt reaches
//! only zretain, which then lets in-flight transfers finish.

use std::io::Read;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Captured result of a finished command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Why a command produced no output
#[derive(Error, Debug)]
pub enum ExecFailure {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("failed waiting for {program}: {source}")]
    Wait {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} timed out")]
    TimedOut { program: String },
}

fn program_name(cmd: &Command) -> String {
    cmd.get_program().to_string_lossy().into_owned()
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut pipe) = pipe {
            // Non UTF-8 output is reported as read so far
            let _ = pipe.read_to_string(&mut buf);
        }
        buf
    })
}

fn collect(handle: JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

/// Wait for every child until `deadline`, killing all of them on expiry
fn wait_all(children: &mut [(&str, &mut Child)], deadline: Instant) -> Result<Vec<ExitStatus>, ExecFailure> {
    let mut statuses: Vec<Option<ExitStatus>> = vec![None; children.len()];
    loop {
        for (idx, (program, child)) in children.iter_mut().enumerate() {
            if statuses[idx].is_none() {
                statuses[idx] = child.try_wait().map_err(|source| ExecFailure::Wait {
                    program: program.to_string(),
                    source,
                })?;
            }
        }
        if statuses.iter().all(Option::is_some) {
            return Ok(statuses.into_iter().flatten().collect());
        }
        if Instant::now() >= deadline {
            let mut first_running = String::new();
            for (idx, (program, child)) in children.iter_mut().enumerate() {
                if statuses[idx].is_none() {
                    if first_running.is_empty() {
                        first_running = program.to_string();
                    }
                    let _ = child.kill();
                    let _ = child.wait();
                }
            }
            return Err(ExecFailure::TimedOut {
                program: first_running,
            });
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Run `cmd` to completion or until `timeout` elapses
pub fn run(mut cmd: Command, timeout: Duration) -> Result<CommandOutput, ExecFailure> {
    let program = program_name(&cmd);
    cmd.process_group(0)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|source| ExecFailure::Spawn {
        program: program.clone(),
        source,
    })?;
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let statuses = wait_all(&mut [(program.as_str(), &mut child)], deadline)?;
    let status = statuses[0];

    Ok(CommandOutput {
        success: status.success(),
        code: status.code(),
        stdout: collect(stdout),
        stderr: collect(stderr),
    })
}

/// Result of a `producer | consumer` pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutput {
    pub producer: CommandOutput,
    pub consumer: CommandOutput,
}

impl PipelineOutput {
    pub fn success(&self) -> bool {
        self.producer.success && self.consumer.success
    }

    /// Combined stderr of both sides, for error messages
    pub fn stderr(&self) -> String {
        [self.producer.stderr.trim(), self.consumer.stderr.trim()]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Run `producer | consumer` under one deadline
///
/// The producer's stdout is connected directly to the consumer's stdin.
pub fn run_pipeline(
    mut producer: Command,
    mut consumer: Command,
    timeout: Duration,
) -> Result<PipelineOutput, ExecFailure> {
    let producer_name = program_name(&producer);
    let consumer_name = program_name(&consumer);

    producer
        .process_group(0)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut producer_child = producer.spawn().map_err(|source| ExecFailure::Spawn {
        program: producer_name.clone(),
        source,
    })?;

    let stream = match producer_child.stdout.take() {
        Some(out) => Stdio::from(out),
        None => Stdio::null(),
    };
    consumer
        .process_group(0)
        .stdin(stream)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut consumer_child = match consumer.spawn() {
        Ok(child) => child,
        Err(source) => {
            let _ = producer_child.kill();
            let _ = producer_child.wait();
            return Err(ExecFailure::Spawn {
                program: consumer_name,
                source,
            });
        }
    };

    let producer_err = drain(producer_child.stderr.take());
    let consumer_out = drain(consumer_child.stdout.take());
    let consumer_err = drain(consumer_child.stderr.take());

    let deadline = Instant::now() + timeout;
    let statuses = wait_all(
        &mut [
            (producer_name.as_str(), &mut producer_child),
            (consumer_name.as_str(), &mut consumer_child),
        ],
        deadline,
    )?;

    Ok(PipelineOutput {
        producer: CommandOutput {
            success: statuses[0].success(),
            code: statuses[0].code(),
            stdout: String::new(),
            stderr: collect(producer_err),
        },
        consumer: CommandOutput {
            success: statuses[1].success(),
            code: statuses[1].code(),
            stdout: collect(consumer_out),
            stderr: collect(consumer_err),
        },
    })
}
