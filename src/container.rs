//! The lifecycle engine: `create`, `start`, `kill`, `state`, `delete`. Each
//! method corresponds to one OCI lifecycle operation and leaves the state
//! store in a consistent, re-loadable shape even if a later step fails.

use std::convert::Infallible;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use nix::sys::signal::{kill as send_signal, Signal};
use nix::unistd::{dup2, Pid};
use thiserror::Error;

use crate::cgroup::{CgroupError, CgroupManager};
use crate::namespaces;
use crate::pipe::{PipeError, SpecPipe};
use crate::process::fork;
use crate::process::init::{self, InitError};
use crate::spec::{ContainerSpec, SpecError};
use crate::state::{ContainerState, ContainerStatus, StateError, StateStore};
use crate::syscall::linux::LinuxSyscall;
use crate::tty::{self, TtyError, ANNOTATION_PTY_MASTER_FD, ANNOTATION_PTY_SLAVE, PTY_MASTER_FD_SLOT};

/// How long `delete` waits for a killed container to actually exit before
/// giving up, polled once a second (§4.5, §8 E4).
const DELETE_POLL_ATTEMPTS: u32 = 5;
const DELETE_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Spec(#[from] SpecError),
    #[error(transparent)]
    Cgroup(#[from] CgroupError),
    #[error(transparent)]
    Pipe(#[from] PipeError),
    #[error(transparent)]
    Tty(#[from] TtyError),
    #[error(transparent)]
    Init(#[from] InitError),
    #[error("container {0} already exists")]
    AlreadyExists(String),
    #[error("container {id} is {status}, which cannot be {action}")]
    WrongState {
        id: String,
        status: ContainerStatus,
        action: &'static str,
    },
    #[error("failed to spawn the init process: {0}")]
    Clone(anyhow::Error),
    #[error("failed to wire up fd {fd} in the init process: {source}")]
    ChildFd {
        fd: RawFd,
        #[source]
        source: nix::Error,
    },
    #[error("failed to signal container {id}: {source}")]
    Signal {
        id: String,
        #[source]
        source: nix::Error,
    },
    #[error("container {0} did not exit within the delete timeout")]
    StillRunning(String),
}

/// Owns no global state: every method takes the runtime root and cgroup root
/// it was constructed with, so tests can point both at a scratch directory
/// (§9 — no process-wide statics).
pub struct Engine {
    state: StateStore,
    cgroup_root: PathBuf,
}

impl Engine {
    pub fn new(state_root: PathBuf, cgroup_root: PathBuf) -> Self {
        Self {
            state: StateStore::new(state_root),
            cgroup_root,
        }
    }

    fn cgroup_for(&self, id: &str) -> CgroupManager {
        CgroupManager::new(&self.cgroup_root, id)
    }

    fn require_status(
        &self,
        state: &ContainerState,
        ok: bool,
        action: &'static str,
    ) -> Result<(), ContainerError> {
        if ok {
            Ok(())
        } else {
            Err(ContainerError::WrongState {
                id: state.id.clone(),
                status: state.status,
                action,
            })
        }
    }

    /// Loads the spec, reserves the container's cgroup, and clones a new init
    /// process into the requested namespaces. The child blocks on the real
    /// `SIGCONT` before doing anything destructive, so `create` always
    /// returns with the container sitting in `created`, never `running`.
    pub fn create(&self, id: &str, bundle: &Path) -> Result<(), ContainerError> {
        self.state.init_dir()?;
        if self.state.load(id).is_ok() {
            return Err(ContainerError::AlreadyExists(id.to_string()));
        }

        let spec = ContainerSpec::load(bundle)?;
        let mut state = ContainerState::new(id, bundle);
        self.state.save(&state)?;

        let cgroup = self.cgroup_for(id);
        cgroup.setup(spec.resources())?;

        let clone_flags = namespaces::clone_flags(spec.namespaces());
        let pipe = SpecPipe::new()?;

        let wants_terminal = spec.wants_terminal();
        let pty = if wants_terminal {
            Some(tty::pair()?)
        } else {
            None
        };
        let slave_fd = pty.as_ref().map(|(_, slave, _)| slave.as_raw_fd());
        let master_fd = pty.as_ref().map(|(master, _, _)| master.as_raw_fd());
        let slave_name = pty.as_ref().map(|(_, _, name)| name.clone());

        let child_syscall = LinuxSyscall::default();
        let child_fn = move || -> isize {
            match run_child(pipe, slave_fd, master_fd, &child_syscall) {
                Ok(never) => match never {},
                Err(e) => {
                    log::error!("init trampoline for new container failed: {}", e);
                    1
                }
            }
        };

        let pid = fork::clone(Box::new(child_fn), clone_flags).map_err(ContainerError::Clone)?;

        // The parent only ever needed the PTY to learn its fds; the live
        // handles it no longer touches directly (stdio lives in the child,
        // `attach` reopens the master through /proc later).
        drop(pty);

        // Persist the PID before the spec goes down the pipe (§9 ordering
        // guarantee b): if anything below fails, `delete` can still find and
        // reap an orphaned child.
        state.pid = pid.as_raw();
        if master_fd.is_some() {
            state
                .annotations
                .insert(ANNOTATION_PTY_MASTER_FD.to_string(), PTY_MASTER_FD_SLOT.to_string());
        }
        if let Some(name) = slave_name {
            state
                .annotations
                .insert(ANNOTATION_PTY_SLAVE.to_string(), name);
        }
        self.state.save(&state)?;

        cgroup.join(pid)?;

        pipe.send(&spec)?;

        state.status = ContainerStatus::Created;
        self.state.save(&state)?;
        Ok(())
    }

    /// Releases the init process from its `SIGCONT` gate.
    pub fn start(&self, id: &str) -> Result<(), ContainerError> {
        let mut state = self.state.load(id)?;
        self.require_status(&state, state.status.can_start(), "started")?;

        send_signal(Pid::from_raw(state.pid), Signal::SIGCONT).map_err(|source| {
            ContainerError::Signal {
                id: id.to_string(),
                source,
            }
        })?;

        state.status = ContainerStatus::Running;
        self.state.save(&state)?;
        Ok(())
    }

    /// Sends `signal` to the container's process. Only `created` and
    /// `running` containers accept signals.
    pub fn kill(&self, id: &str, signal: Signal) -> Result<(), ContainerError> {
        let state = self.state.load(id)?;
        self.require_status(&state, state.status.can_kill(), "signaled")?;

        send_signal(Pid::from_raw(state.pid), signal).map_err(|source| ContainerError::Signal {
            id: id.to_string(),
            source,
        })
    }

    /// Returns the current state record, first self-correcting `status` to
    /// `stopped` if the process is no longer alive (§4.5).
    pub fn state(&self, id: &str) -> Result<ContainerState, ContainerError> {
        let mut state = self.state.load(id)?;
        if state.status != ContainerStatus::Stopped && !is_alive(state.pid) {
            state.status = ContainerStatus::Stopped;
            self.state.save(&state)?;
        }
        Ok(state)
    }

    /// Lists every known container, in whatever order the state store
    /// enumerates them.
    pub fn list(&self) -> Result<Vec<ContainerState>, ContainerError> {
        Ok(self.state.list()?)
    }

    /// Forces the container to stop (if it hasn't already) and removes its
    /// cgroup and state record. A container whose process is already gone is
    /// not an error: `ESRCH` on the initial `SIGKILL` just skips the wait.
    pub fn delete(&self, id: &str) -> Result<(), ContainerError> {
        let state = self.state.load(id)?;

        match send_signal(Pid::from_raw(state.pid), Signal::SIGKILL) {
            Ok(()) => {
                let mut exited = false;
                for _ in 0..DELETE_POLL_ATTEMPTS {
                    if !is_alive(state.pid) {
                        exited = true;
                        break;
                    }
                    thread::sleep(DELETE_POLL_INTERVAL);
                }
                if !exited {
                    return Err(ContainerError::StillRunning(id.to_string()));
                }
            }
            Err(nix::errno::Errno::ESRCH) => {}
            Err(source) => {
                return Err(ContainerError::Signal {
                    id: id.to_string(),
                    source,
                })
            }
        }

        self.cgroup_for(id).clean()?;
        self.state.delete(id)?;
        Ok(())
    }
}

fn is_alive(pid: i32) -> bool {
    send_signal(Pid::from_raw(pid), None).is_ok()
}

/// Runs inside the cloned child, before the trampoline takes over: relocates
/// the spec pipe onto its fixed slot and, if a terminal was requested, wires
/// the PTY slave onto stdio and the master onto its own fixed slot (§9's
/// fd-inheritance ABI).
fn run_child(
    pipe: SpecPipe,
    slave_fd: Option<RawFd>,
    master_fd: Option<RawFd>,
    syscall: &LinuxSyscall,
) -> Result<Infallible, ContainerError> {
    pipe.relocate_read_end()?;

    if let Some(slave) = slave_fd {
        for target in [0, 1, 2] {
            dup2(slave, target).map_err(|source| ContainerError::ChildFd {
                fd: target,
                source,
            })?;
        }
    }
    if let Some(master) = master_fd {
        dup2(master, PTY_MASTER_FD_SLOT).map_err(|source| ContainerError::ChildFd {
            fd: PTY_MASTER_FD_SLOT,
            source,
        })?;
    }

    init::run(syscall).map_err(ContainerError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::tempdir;

    fn engine(state_root: &Path) -> Engine {
        Engine::new(state_root.to_path_buf(), state_root.join("cgroup"))
    }

    /// A pid guaranteed to be gone: spawn a trivial child and wait for it.
    fn dead_pid() -> i32 {
        let mut child = Command::new("true").spawn().expect("spawn /bin/true");
        let pid = child.id() as i32;
        child.wait().expect("wait for child");
        pid
    }

    fn stub_state(id: &str, status: ContainerStatus, pid: i32) -> ContainerState {
        let mut state = ContainerState::new(id, Path::new("/bundles/foo"));
        state.status = status;
        state.pid = pid;
        state
    }

    #[test]
    fn kill_refuses_a_stopped_container() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());
        engine.state.init_dir().unwrap();
        engine
            .state
            .save(&stub_state("c1", ContainerStatus::Stopped, dead_pid()))
            .unwrap();

        let err = engine.kill("c1", Signal::SIGTERM).unwrap_err();
        assert!(matches!(err, ContainerError::WrongState { .. }));
    }

    #[test]
    fn start_refuses_a_running_container() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());
        engine.state.init_dir().unwrap();
        engine
            .state
            .save(&stub_state("c1", ContainerStatus::Running, dead_pid()))
            .unwrap();

        let err = engine.start("c1").unwrap_err();
        assert!(matches!(err, ContainerError::WrongState { .. }));
    }

    #[test]
    fn state_flips_to_stopped_once_the_process_is_gone() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());
        engine.state.init_dir().unwrap();
        engine
            .state
            .save(&stub_state("c1", ContainerStatus::Running, dead_pid()))
            .unwrap();

        let state = engine.state("c1").unwrap();
        assert_eq!(state.status, ContainerStatus::Stopped);

        let reloaded = engine.state.load("c1").unwrap();
        assert_eq!(reloaded.status, ContainerStatus::Stopped);
    }

    #[test]
    fn delete_of_an_already_gone_process_succeeds_immediately() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());
        engine.state.init_dir().unwrap();
        engine
            .state
            .save(&stub_state("c1", ContainerStatus::Stopped, dead_pid()))
            .unwrap();

        engine.delete("c1").unwrap();
        assert!(matches!(
            engine.state.load("c1"),
            Err(StateError::NotFound(_))
        ));
    }

    #[test]
    fn create_refuses_a_duplicate_id() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());
        engine.state.init_dir().unwrap();
        engine
            .state
            .save(&stub_state("c1", ContainerStatus::Created, dead_pid()))
            .unwrap();

        let err = engine.create("c1", Path::new("/nonexistent")).unwrap_err();
        assert!(matches!(err, ContainerError::AlreadyExists(id) if id == "c1"));
    }
}
