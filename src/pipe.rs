//! The parent/child spec channel: a single pipe carrying the JSON-encoded
//! spec, closed once read. Release past that point is the real `SIGCONT`,
//! not a second pipe message (§9).

use std::io::{Read, Write};
use std::os::unix::io::{FromRawFd, RawFd};

use nix::unistd::{self, close, dup2};
use thiserror::Error;

use crate::spec::ContainerSpec;

/// The fd slot the init trampoline expects its spec pipe's read end on,
/// inherited across `execve`-free `clone`. This is an ABI between parent and
/// child: the parent must `dup2` the read end here before spawning.
pub const SPEC_PIPE_FD: RawFd = 3;

#[derive(Error, Debug)]
pub enum PipeError {
    #[error("failed to create spec pipe: {0}")]
    Create(#[source] nix::Error),
    #[error("failed to dup fd {from} to slot {to}: {source}")]
    Dup {
        from: RawFd,
        to: RawFd,
        #[source]
        source: nix::Error,
    },
    #[error("failed to encode spec for the pipe: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to write spec into pipe: {0}")]
    Write(#[source] std::io::Error),
    #[error("failed to read spec from pipe: {0}")]
    Read(#[source] std::io::Error),
    #[error("failed to decode spec read from pipe: {0}")]
    Decode(#[source] serde_json::Error),
}

#[derive(Debug, Clone, Copy)]
pub struct SpecPipe {
    read_fd: RawFd,
    write_fd: RawFd,
}

impl SpecPipe {
    pub fn new() -> Result<Self, PipeError> {
        let (read_fd, write_fd) = unistd::pipe().map_err(PipeError::Create)?;
        Ok(Self { read_fd, write_fd })
    }

    pub fn read_fd(&self) -> RawFd {
        self.read_fd
    }

    pub fn write_fd(&self) -> RawFd {
        self.write_fd
    }

    /// Dups the read end onto the well-known slot the child inherits and
    /// closes this process's copy of the write end. Called in the child
    /// after `clone`, before the trampoline runs — without closing the
    /// child's own write-end copy, its own read would never observe EOF.
    pub fn relocate_read_end(&self) -> Result<(), PipeError> {
        if self.read_fd != SPEC_PIPE_FD {
            dup2(self.read_fd, SPEC_PIPE_FD).map_err(|source| PipeError::Dup {
                from: self.read_fd,
                to: SPEC_PIPE_FD,
                source,
            })?;
            let _ = close(self.read_fd);
        }
        let _ = close(self.write_fd);
        Ok(())
    }

    /// Encodes `spec` and writes it into the pipe, then closes this
    /// process's copy of the write end so the reader observes EOF once
    /// every other copy (there should be none left by now) is also closed.
    pub fn send(self, spec: &ContainerSpec) -> Result<(), PipeError> {
        let encoded = serde_json::to_vec(spec).map_err(PipeError::Encode)?;
        let mut file = unsafe { std::fs::File::from_raw_fd(self.write_fd) };
        file.write_all(&encoded).map_err(PipeError::Write)?;
        drop(file);
        Ok(())
    }
}

/// Reads and decodes the spec from the fd at [`SPEC_PIPE_FD`], then closes it.
/// Called by the init trampoline as its first action.
pub fn recv_spec_from_slot() -> Result<ContainerSpec, PipeError> {
    recv_spec(SPEC_PIPE_FD)
}

fn recv_spec(fd: RawFd) -> Result<ContainerSpec, PipeError> {
    let mut file = unsafe { std::fs::File::from_raw_fd(fd) };
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).map_err(PipeError::Read)?;
    drop(file);
    serde_json::from_slice(&buf).map_err(PipeError::Decode)
}
