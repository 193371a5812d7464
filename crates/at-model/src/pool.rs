//! Worker pool configuration and the per-call process pool.

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

use at_types::{PoolError, TuningOptions};

/// Name of the worker executable built from this crate.
pub const WORKER_BINARY: &str = "at-restart-worker";

/// Environment variable overriding the worker executable path.
pub const WORKER_ENV: &str = "AT_RESTART_WORKER";

/// Resource configuration for restart fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Worker processes per distributed call.
    pub processes: usize,

    /// Threads in the shared-memory pool.
    pub threads: usize,

    /// Worker executable; resolved from the environment when `None`.
    pub program: Option<PathBuf>,

    /// Environment variables set on every worker process.
    pub env_vars: HashMap<String, String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            processes: 1,
            threads: 1,
            program: None,
            env_vars: HashMap::new(),
        }
    }
}

impl PoolConfig {
    pub fn from_options(options: &TuningOptions) -> Self {
        Self {
            processes: options.model_restart_processes,
            threads: options.model_restart_threads,
            program: options.worker_program.clone(),
            env_vars: HashMap::new(),
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = Some(program.into());
        self
    }

    /// Worker count for a call with `restarts` restarts: never more
    /// processes than restarts.
    pub fn members_for(&self, restarts: usize) -> usize {
        self.processes.min(restarts).max(1)
    }

    /// Locate the worker executable: explicit path, then `AT_RESTART_WORKER`,
    /// then next to the current executable.
    pub fn resolve_program(&self) -> Result<PathBuf, PoolError> {
        if let Some(program) = &self.program {
            return existing(program.clone());
        }
        if let Ok(program) = std::env::var(WORKER_ENV) {
            return existing(PathBuf::from(program));
        }

        let file_name = format!("{WORKER_BINARY}{}", std::env::consts::EXE_SUFFIX);
        let exe = std::env::current_exe().map_err(|e| PoolError::ProgramNotFound {
            path: e.to_string(),
        })?;
        let mut dir = exe.parent().map(PathBuf::from);
        while let Some(candidate_dir) = dir {
            let candidate = candidate_dir.join(&file_name);
            if candidate.is_file() {
                return Ok(candidate);
            }
            // test binaries live one level down, in `deps/`
            dir = if candidate_dir.ends_with("deps") {
                candidate_dir.parent().map(PathBuf::from)
            } else {
                None
            };
        }
        Err(PoolError::ProgramNotFound { path: file_name })
    }
}

fn existing(path: PathBuf) -> Result<PathBuf, PoolError> {
    if path.is_file() {
        Ok(path)
    } else {
        Err(PoolError::ProgramNotFound {
            path: path.display().to_string(),
        })
    }
}

/// What one member left behind after the gather.
#[derive(Debug)]
pub struct MemberOutput {
    pub rank: usize,
    /// Raw reply bytes, or why no reply could be read or delivered.
    pub stdout: Result<Vec<u8>, String>,
    pub status: Option<ExitStatus>,
}

type ReaderMessage = (usize, Result<Vec<u8>, String>);

/// A set of worker processes owned by exactly one distributed call.
///
/// Each member's stdout is drained by a reader thread from the moment it is
/// spawned. Children that are still alive when the pool is dropped are
/// killed and reaped, so teardown happens on every exit path.
pub struct WorkerPool {
    children: Vec<Child>,
    readers: Vec<JoinHandle<()>>,
    replies: Receiver<ReaderMessage>,
    /// Per rank: why its bundle could not be written, if it could not.
    undelivered: Vec<Option<String>>,
}

impl WorkerPool {
    /// Spawn `size` worker processes.
    pub fn spawn(config: &PoolConfig, size: usize) -> Result<Self, PoolError> {
        if size == 0 {
            return Err(PoolError::InvalidSize { size });
        }
        let program = config.resolve_program()?;

        let (tx, rx) = unbounded();
        let mut pool = Self {
            children: Vec::with_capacity(size),
            readers: Vec::with_capacity(size),
            replies: rx,
            undelivered: vec![None; size],
        };
        for rank in 0..size {
            let mut child = Command::new(&program)
                .envs(&config.env_vars)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::inherit())
                .spawn()
                .map_err(|e| PoolError::SpawnFailed {
                    rank,
                    message: e.to_string(),
                })?;
            let stdout = child.stdout.take();
            pool.children.push(child);
            pool.readers.push(spawn_reader(rank, stdout, tx.clone()));
        }

        info!(size, program = %program.display(), "worker pool spawned");
        Ok(pool)
    }

    pub fn size(&self) -> usize {
        self.children.len()
    }

    /// Write one pre-serialized payload to each member, by rank, and close
    /// its input.
    ///
    /// A member that cannot take its payload (typically because it already
    /// exited) is recorded and reported by [`WorkerPool::gather`]; the other
    /// members still receive theirs.
    pub fn broadcast(&mut self, payloads: &[String]) -> Result<(), PoolError> {
        if payloads.len() != self.children.len() {
            return Err(PoolError::InvalidSize {
                size: payloads.len(),
            });
        }
        for (rank, (child, payload)) in self.children.iter_mut().zip(payloads).enumerate() {
            let written = match child.stdin.take() {
                // dropping stdin at the end of the arm closes the member's input
                Some(mut stdin) => stdin.write_all(payload.as_bytes()).map_err(|e| e.to_string()),
                None => Err("stdin already closed".to_string()),
            };
            if let Err(message) = written {
                warn!(rank, error = %message, "bundle not delivered");
                self.undelivered[rank] = Some(message);
            }
        }
        debug!(members = self.children.len(), "bundles broadcast");
        Ok(())
    }

    /// Collect every member's output, ordered by rank, then reap the members.
    pub fn gather(mut self) -> Vec<MemberOutput> {
        let mut outputs: Vec<MemberOutput> = Vec::with_capacity(self.children.len());
        while outputs.len() < self.children.len() {
            match self.replies.recv() {
                Ok((rank, stdout)) => outputs.push(MemberOutput {
                    rank,
                    stdout,
                    status: None,
                }),
                Err(_) => break,
            }
        }
        for reader in self.readers.drain(..) {
            let _ = reader.join();
        }

        for output in &mut outputs {
            if let Some(message) = self.undelivered[output.rank].take() {
                output.stdout = Err(format!("bundle not delivered: {message}"));
            }
            match self.children[output.rank].wait() {
                Ok(status) => output.status = Some(status),
                Err(e) => warn!(rank = output.rank, error = %e, "failed to reap worker"),
            }
        }
        self.children.clear();

        outputs.sort_by_key(|output| output.rank);
        outputs
    }
}

fn spawn_reader(
    rank: usize,
    stdout: Option<ChildStdout>,
    tx: Sender<ReaderMessage>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let result = match stdout {
            Some(mut pipe) => {
                let mut buffer = Vec::new();
                pipe.read_to_end(&mut buffer)
                    .map(|_| buffer)
                    .map_err(|e| e.to_string())
            }
            None => Err("stdout unavailable".to_string()),
        };
        // the pool may already be gone if the call was abandoned
        let _ = tx.send((rank, result));
    })
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for child in &mut self.children {
            if let Ok(None) = child.try_wait() {
                let _ = child.kill();
            }
            let _ = child.wait();
        }
        if !self.children.is_empty() {
            debug!(members = self.children.len(), "worker pool torn down");
        }
    }
}
