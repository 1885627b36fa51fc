//! cgroup v2 unified-hierarchy manager. One directory per container under
//! `/sys/fs/cgroup/<id>`. No v1, no systemd delegation: the host is assumed to
//! run cgroup v2 only.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use nix::unistd::Pid;
use thiserror::Error;

use crate::spec::Resources;

const SUBTREE_CONTROL: &str = "cgroup.subtree_control";
const CGROUP_PROCS: &str = "cgroup.procs";

#[derive(Error, Debug)]
pub enum CgroupError {
    #[error("failed to create cgroup directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to enable controller {controller} in {path:?}: {source}")]
    EnableController {
        controller: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {file} for controller {controller}: {source}")]
    WriteFile {
        controller: &'static str,
        file: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to join cgroup at {path:?}: {source}")]
    Join {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to remove cgroup directory {path:?}: {source}")]
    RemoveDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn write_file(path: &Path, value: &str) -> Result<(), std::io::Error> {
    OpenOptions::new()
        .write(true)
        .truncate(false)
        .open(path)?
        .write_all(value.as_bytes())
}

/// Manages the cgroup directory for a single container.
pub struct CgroupManager {
    dir: PathBuf,
}

impl CgroupManager {
    pub fn new(cgroup_root: &Path, id: &str) -> Self {
        Self {
            dir: cgroup_root.join(id),
        }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Creates the container's cgroup directory, enables the requested
    /// controllers, then writes each sub-controller's files in declaration
    /// order. Safe to call more than once, though the engine only ever calls
    /// it once per `create`.
    pub fn setup(&self, resources: Option<&Resources>) -> Result<(), CgroupError> {
        if !self.dir.exists() {
            fs::create_dir(&self.dir).map_err(|source| CgroupError::CreateDir {
                path: self.dir.clone(),
                source,
            })?;
        }

        let resources = match resources {
            Some(r) => r,
            None => return Ok(()),
        };

        for controller in self.requested_controllers(resources) {
            write_file(
                &self.dir.join(SUBTREE_CONTROL),
                &format!("+{}", controller),
            )
            .map_err(|source| CgroupError::EnableController {
                controller: controller.to_string(),
                path: self.dir.clone(),
                source,
            })?;
        }

        if let Some(memory) = &resources.memory {
            self.apply_memory(memory)?;
        }
        if let Some(cpu) = &resources.cpu {
            self.apply_cpu(cpu)?;
        }
        if let Some(pids) = &resources.pids {
            self.apply_pids(pids)?;
        }
        self.apply_hugetlb(&resources.hugepage_limits)?;
        self.apply_rdma(&resources.rdma)?;

        Ok(())
    }

    fn requested_controllers<'a>(&self, resources: &'a Resources) -> Vec<&'static str> {
        let mut controllers = Vec::new();
        if resources.memory.is_some() {
            controllers.push("memory");
        }
        if resources.cpu.is_some() {
            controllers.push("cpu");
        }
        if resources.pids.is_some() {
            controllers.push("pids");
        }
        if !resources.hugepage_limits.is_empty() {
            controllers.push("hugetlb");
        }
        if !resources.rdma.is_empty() {
            controllers.push("rdma");
        }
        controllers
    }

    fn write(&self, controller: &'static str, file: &str, value: String) -> Result<(), CgroupError> {
        write_file(&self.dir.join(file), &value).map_err(|source| CgroupError::WriteFile {
            controller,
            file: file.to_string(),
            source,
        })
    }

    fn apply_memory(&self, memory: &crate::spec::MemoryResources) -> Result<(), CgroupError> {
        if let Some(v) = memory.min {
            self.write("memory", "memory.min", v.to_string())?;
        }
        if let Some(v) = memory.low {
            self.write("memory", "memory.low", v.to_string())?;
        }
        if let Some(v) = memory.high {
            self.write("memory", "memory.high", v.to_string())?;
        }
        if let Some(v) = memory.max {
            self.write("memory", "memory.max", v.to_string())?;
        }
        if let Some(v) = memory.peak {
            self.write("memory", "memory.peak", v.to_string())?;
        }
        if let Some(v) = memory.oom_group {
            self.write("memory", "memory.oom.group", (v as i32).to_string())?;
        }
        if let Some(v) = memory.swap_high {
            self.write("memory", "memory.swap.high", v.to_string())?;
        }
        if let Some(v) = memory.swap_peak {
            self.write("memory", "memory.swap.peak", v.to_string())?;
        }
        if let Some(v) = memory.swap_max {
            self.write("memory", "memory.swap.max", v.to_string())?;
        }
        if let Some(v) = memory.zswap_max {
            self.write("memory", "memory.zswap.max", v.to_string())?;
        }
        if let Some(v) = memory.zswap_writeback {
            self.write("memory", "memory.zswap.writeback", (v as i32).to_string())?;
        }
        Ok(())
    }

    fn apply_cpu(&self, cpu: &crate::spec::CpuResources) -> Result<(), CgroupError> {
        if let Some(v) = cpu.weight {
            self.write("cpu", "cpu.weight", v.to_string())?;
        }
        if let Some(max) = &cpu.max {
            let quota = if max.quota <= 0 {
                "max".to_string()
            } else {
                max.quota.to_string()
            };
            self.write("cpu", "cpu.max", format!("{} {}", quota, max.period))?;
        }
        if let Some(v) = cpu.max_burst {
            self.write("cpu", "cpu.max.burst", v.to_string())?;
        }
        if let Some(v) = cpu.idle {
            self.write("cpu", "cpu.idle", (v as i32).to_string())?;
        }
        Ok(())
    }

    fn apply_pids(&self, pids: &crate::spec::PidsResources) -> Result<(), CgroupError> {
        if let Some(v) = pids.max {
            let value = if v < 0 { "max".to_string() } else { v.to_string() };
            self.write("pids", "pids.max", value)?;
        }
        Ok(())
    }

    fn apply_hugetlb(
        &self,
        hugepage_limits: &std::collections::HashMap<String, i64>,
    ) -> Result<(), CgroupError> {
        for (page_size, limit) in hugepage_limits {
            self.write(
                "hugetlb",
                &format!("hugetlb.{}.max", page_size),
                limit.to_string(),
            )?;
        }
        Ok(())
    }

    fn apply_rdma(
        &self,
        rdma: &std::collections::HashMap<String, crate::spec::RdmaEntry>,
    ) -> Result<(), CgroupError> {
        for (device, entry) in rdma {
            let handles = entry
                .hca_handles
                .map(|v| v.to_string())
                .unwrap_or_else(|| "max".to_string());
            let objects = entry
                .hca_objects
                .map(|v| v.to_string())
                .unwrap_or_else(|| "max".to_string());
            self.write(
                "rdma",
                "rdma.max",
                format!("{} hca_handle={} hca_object={}", device, handles, objects),
            )?;
        }
        Ok(())
    }

    /// Writes `pid` into `cgroup.procs`.
    pub fn join(&self, pid: Pid) -> Result<(), CgroupError> {
        write_file(&self.dir.join(CGROUP_PROCS), &pid.to_string()).map_err(|source| {
            CgroupError::Join {
                path: self.dir.clone(),
                source,
            }
        })
    }

    /// Moves any remaining processes out, gives the kernel a moment to drain
    /// them, then removes the directory. Absence is not an error, but any
    /// other removal failure (e.g. the kernel hasn't released the last
    /// process reference yet) is surfaced rather than swallowed.
    pub fn clean(&self) -> Result<(), CgroupError> {
        if !self.dir.exists() {
            return Ok(());
        }
        let _ = write_file(&self.dir.join(CGROUP_PROCS), "");
        thread::sleep(Duration::from_millis(50));
        match fs::remove_dir(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CgroupError::RemoveDir {
                path: self.dir.clone(),
                source,
            }),
        }
    }
}
