#[cfg(test)]
#[macro_use]
extern crate quickcheck;

pub mod cgroup;
pub mod commands;
pub mod container;
pub mod logger;
pub mod namespaces;
pub mod pipe;
pub mod process;
pub mod rootfs;
pub mod signal;
pub mod spec;
pub mod state;
pub mod syscall;
pub mod tty;
