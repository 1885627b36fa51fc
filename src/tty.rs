//! PTY allocation (`pair`) and the terminal bridge (`attach`). No console
//! socket, no SCM_RIGHTS hand-off: the master stays inside the container
//! process and is reopened later through `/proc/<pid>/fd/<slot>`.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use nix::fcntl::OFlag;
use nix::pty::{grantpt, posix_openpt, ptsname_r, unlockpt, PtyMaster, Winsize};
use nix::sys::signal::{self, kill, SigHandler, SigSet, Signal};
use nix::sys::termios::{self, SetArg, Termios};
use nix::unistd::{isatty, Pid};
use thiserror::Error;

use crate::state::ContainerState;

pub const ANNOTATION_PTY_MASTER_FD: &str = "containeruntime/pty-master-fd";
pub const ANNOTATION_PTY_SLAVE: &str = "containeruntime/pty-slave";

/// The fd slot the container's init process dups its PTY master onto, right
/// after the spec pipe's read end (§9 file-descriptor-inheritance ABI).
pub const PTY_MASTER_FD_SLOT: RawFd = crate::pipe::SPEC_PIPE_FD + 1;

const FORWARDED_SIGNALS: [Signal; 6] = [
    Signal::SIGINT,
    Signal::SIGTERM,
    Signal::SIGQUIT,
    Signal::SIGHUP,
    Signal::SIGTSTP,
    Signal::SIGCONT,
];

#[derive(Error, Debug)]
pub enum TtyError {
    #[error("failed to open /dev/ptmx: {0}")]
    OpenMaster(#[source] nix::Error),
    #[error("failed to grant access to the pty slave: {0}")]
    Grant(#[source] nix::Error),
    #[error("failed to unlock the pty slave: {0}")]
    Unlock(#[source] nix::Error),
    #[error("failed to resolve the pty slave name: {0}")]
    SlaveName(#[source] nix::Error),
    #[error("failed to open pty slave {path}: {source}")]
    OpenSlave {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("container state has no {} annotation", ANNOTATION_PTY_MASTER_FD)]
    MissingAnnotation,
    #[error("pty master slot annotation {0:?} is not a valid fd number")]
    InvalidSlot(String),
    #[error("failed to reopen pty master at {path}: {source}")]
    OpenProcFd {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read terminal attributes: {0}")]
    GetAttr(#[source] nix::Error),
    #[error("failed to set terminal attributes: {0}")]
    SetAttr(#[source] nix::Error),
    #[error("window-size ioctl failed: {0}")]
    Ioctl(#[source] nix::Error),
    #[error("failed to clone the pty master handle: {0}")]
    CloneMaster(#[source] std::io::Error),
    #[error("failed to block forwarded signals: {0}")]
    SignalMask(#[source] nix::Error),
    #[error("failed to install the SIGWINCH handler: {0}")]
    SignalInstall(#[source] nix::Error),
}

nix::ioctl_read_bad!(tiocgwinsz, libc::TIOCGWINSZ, Winsize);
nix::ioctl_write_ptr_bad!(tiocswinsz, libc::TIOCSWINSZ, Winsize);

/// Opens `/dev/ptmx`, unlocks the slave (`TIOCSPTLCK`), resolves its index
/// (`TIOCGPTN`) and opens `/dev/pts/<n>`. Returns the slave's device path
/// alongside the pair so the caller can record it in annotations.
pub fn pair() -> Result<(PtyMaster, File, String), TtyError> {
    let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY).map_err(TtyError::OpenMaster)?;
    grantpt(&master).map_err(TtyError::Grant)?;
    unlockpt(&master).map_err(TtyError::Unlock)?;
    let slave_name = ptsname_r(&master).map_err(TtyError::SlaveName)?;
    let slave = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&slave_name)
        .map_err(|source| TtyError::OpenSlave {
            path: slave_name.clone(),
            source,
        })?;
    Ok((master, slave, slave_name))
}

fn master_slot(state: &ContainerState) -> Result<RawFd, TtyError> {
    let raw = state
        .annotations
        .get(ANNOTATION_PTY_MASTER_FD)
        .ok_or(TtyError::MissingAnnotation)?;
    raw.parse::<RawFd>()
        .map_err(|_| TtyError::InvalidSlot(raw.clone()))
}

struct RawModeGuard {
    original: Termios,
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = termios::tcsetattr(0, SetArg::TCSANOW, &self.original);
    }
}

/// Restores SIGWINCH's previous disposition on every exit path from
/// `attach`, the same way `RawModeGuard` restores the terminal mode.
struct SigwinchGuard {
    previous: signal::SigAction,
}

impl Drop for SigwinchGuard {
    fn drop(&mut self) {
        let _ = unsafe { signal::sigaction(Signal::SIGWINCH, &self.previous) };
    }
}

fn copy_winsize(to: RawFd) -> Result<(), TtyError> {
    let mut winsize = Winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    unsafe { tiocgwinsz(0, &mut winsize) }.map_err(TtyError::Ioctl)?;
    unsafe { tiocswinsz(to, &winsize) }.map_err(TtyError::Ioctl)?;
    Ok(())
}

static WINCH_RECEIVED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_winch(_: libc::c_int) {
    WINCH_RECEIVED.store(true, Ordering::SeqCst);
}

fn watch_winsize(master_fd: RawFd) {
    loop {
        if WINCH_RECEIVED.swap(false, Ordering::SeqCst) {
            let _ = copy_winsize(master_fd);
        }
        thread::sleep(Duration::from_millis(100));
    }
}

fn forward_signals(pid: i32) {
    let mut set = SigSet::empty();
    for signal in FORWARDED_SIGNALS {
        set.add(signal);
    }
    loop {
        match set.wait() {
            Ok(signal) => match kill(Pid::from_raw(-pid), signal) {
                Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
                Err(e) => log::warn!("failed to forward {:?} to container: {}", signal, e),
            },
            Err(_) => break,
        }
    }
}

fn copy_loop<R: Read, W: Write>(mut src: R, mut dst: W, label: &str, done: mpsc::Sender<()>) {
    let mut buf = [0u8; 4096];
    loop {
        match src.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if dst.write_all(&buf[..n]).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                if e.raw_os_error() != Some(libc::EIO) {
                    log::debug!("{} copy loop ended: {}", label, e);
                }
                break;
            }
        }
    }
    let _ = done.send(());
}

/// Bridges the caller's terminal to the container's PTY master until either
/// copy direction terminates. A no-op if the caller's stdin/stdout aren't
/// terminals.
pub fn attach(state: &ContainerState) -> Result<(), TtyError> {
    if !isatty(0).unwrap_or(false) || !isatty(1).unwrap_or(false) {
        return Ok(());
    }

    let slot = master_slot(state)?;
    let path = format!("/proc/{}/fd/{}", state.pid, slot);
    let master = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&path)
        .map_err(|source| TtyError::OpenProcFd {
            path: path.clone(),
            source,
        })?;
    let master_fd = master.as_raw_fd();

    let original = termios::tcgetattr(0).map_err(TtyError::GetAttr)?;
    let mut raw = original.clone();
    termios::cfmakeraw(&mut raw);
    termios::tcsetattr(0, SetArg::TCSANOW, &raw).map_err(TtyError::SetAttr)?;
    let _restore_on_exit = RawModeGuard { original };

    copy_winsize(master_fd)?;

    let mut winch_set = SigSet::empty();
    winch_set.add(Signal::SIGWINCH);
    let previous_winch = unsafe {
        signal::sigaction(
            Signal::SIGWINCH,
            &signal::SigAction::new(
                SigHandler::Handler(on_winch),
                signal::SaFlags::SA_RESTART,
                winch_set,
            ),
        )
    }
    .map_err(TtyError::SignalInstall)?;
    let _restore_winch_on_exit = SigwinchGuard {
        previous: previous_winch,
    };

    let mut forward_set = SigSet::empty();
    for signal in FORWARDED_SIGNALS {
        forward_set.add(signal);
    }
    forward_set
        .thread_block()
        .map_err(TtyError::SignalMask)?;

    let pid = state.pid;
    thread::spawn(move || forward_signals(pid));
    thread::spawn(move || watch_winsize(master_fd));

    let (tx, rx) = mpsc::channel();
    let master_for_input = master.try_clone().map_err(TtyError::CloneMaster)?;
    let tx_input = tx.clone();
    thread::spawn(move || {
        copy_loop(std::io::stdin(), master_for_input, "stdin->master", tx_input)
    });
    thread::spawn(move || copy_loop(master, std::io::stdout(), "master->stdout", tx));

    let _ = rx.recv();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn sample_state(annotations: HashMap<String, String>) -> ContainerState {
        let mut state = ContainerState::new("c1", &PathBuf::from("/bundle"));
        state.pid = 1234;
        state.annotations = annotations;
        state
    }

    #[test]
    fn pair_produces_a_usable_master_and_slave() {
        let (_master, slave, slave_name) = pair().unwrap();
        assert!(slave.metadata().is_ok());
        assert!(slave_name.starts_with("/dev/pts/"));
    }

    #[test]
    fn master_slot_requires_the_annotation() {
        let state = sample_state(HashMap::new());
        assert!(matches!(
            master_slot(&state),
            Err(TtyError::MissingAnnotation)
        ));
    }

    #[test]
    fn master_slot_parses_the_recorded_fd() {
        let mut annotations = HashMap::new();
        annotations.insert(ANNOTATION_PTY_MASTER_FD.to_string(), "4".to_string());
        let state = sample_state(annotations);
        assert_eq!(master_slot(&state).unwrap(), 4);
    }

    #[test]
    fn master_slot_rejects_garbage() {
        let mut annotations = HashMap::new();
        annotations.insert(ANNOTATION_PTY_MASTER_FD.to_string(), "not-a-number".to_string());
        let state = sample_state(annotations);
        assert!(matches!(master_slot(&state), Err(TtyError::InvalidSlot(_))));
    }
}
