//! The init trampoline: runs inside the freshly cloned namespaces, decodes
//! its spec, waits to be released, and execs the user program. Once step 9
//! runs there is no coming back into this code (`execve` replaces the image),
//! so nothing here is written expecting to run "after" it.

use std::convert::Infallible;
use std::ffi::CString;

use nix::sys::signal::{SigSet, Signal};
use nix::unistd::execvp;
use thiserror::Error;

use crate::pipe::{self, PipeError};
use crate::rootfs::{self, RootfsError};
use crate::spec::ContainerSpec;
use crate::syscall::{Syscall, SyscallError};

#[derive(Error, Debug)]
pub enum InitError {
    #[error("failed to receive spec over the control pipe: {0}")]
    Pipe(#[from] PipeError),
    #[error("failed to block waiting for the release signal: {0}")]
    ReleaseWait(#[source] nix::Error),
    #[error(transparent)]
    Syscall(#[from] SyscallError),
    #[error(transparent)]
    Rootfs(#[from] RootfsError),
    #[error("invalid process argv: {0}")]
    InvalidArgv(String),
    #[error("exec of {0:?} failed: {1}")]
    Exec(String, #[source] nix::Error),
}

/// Blocks until the real `SIGCONT` is delivered; this is the release gate
/// the parent's `start` pulls.
fn wait_for_release() -> Result<(), InitError> {
    let mut set = SigSet::empty();
    set.add(Signal::SIGCONT);
    set.thread_block().map_err(InitError::ReleaseWait)?;
    set.wait().map_err(InitError::ReleaseWait)?;
    Ok(())
}

fn exec_process(spec: &ContainerSpec) -> Result<Infallible, InitError> {
    let argv = &spec.process.args;
    let program = argv
        .first()
        .ok_or_else(|| InitError::InvalidArgv("process.args is empty".to_string()))?;

    let program_c = CString::new(program.as_bytes())
        .map_err(|e| InitError::InvalidArgv(e.to_string()))?;
    let argv_c: Vec<CString> = argv
        .iter()
        .map(|a| CString::new(a.as_bytes()))
        .collect::<Result<_, _>>()
        .map_err(|e| InitError::InvalidArgv(e.to_string()))?;

    execvp(&program_c, &argv_c).map_err(|e| InitError::Exec(program.clone(), e))
}

/// Runs the full trampoline sequence. Returns only on failure: success means
/// `execve` has already replaced this process's image.
pub fn run(syscall: &dyn Syscall) -> Result<Infallible, InitError> {
    let spec = pipe::recv_spec_from_slot()?;

    wait_for_release()?;

    if let Some(hostname) = &spec.hostname {
        syscall.set_hostname(hostname)?;
    }

    rootfs::make_root_private(syscall)?;
    rootfs::pivot_into(syscall, &spec.root.path)?;
    rootfs::apply_mounts(syscall, &spec.mounts)?;

    exec_process(&spec)
}
