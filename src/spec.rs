//! Reads the bundle's `config.json`. This is an external contract (the OCI
//! runtime-configuration schema): only the fields the engine actually consults
//! are modeled here, and the document is never rewritten.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpecError {
    #[error("failed to open config document {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode config document {path:?}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("config document {path:?} has no linux.rootfs path")]
    MissingRoot { path: PathBuf },
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Process {
    #[serde(default)]
    pub terminal: bool,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Root {
    pub path: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Mount {
    pub destination: PathBuf,
    #[serde(rename = "type")]
    pub typ: String,
    pub source: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceType {
    Pid,
    Uts,
    Mount,
    Ipc,
    Network,
    User,
    Cgroup,
    Time,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Namespace {
    #[serde(rename = "type")]
    pub typ: NamespaceType,
}

/// cgroup v2 memory sub-controller, one optional field per file (§4.2).
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct MemoryResources {
    pub min: Option<i64>,
    pub low: Option<i64>,
    pub high: Option<i64>,
    pub max: Option<i64>,
    pub peak: Option<i64>,
    #[serde(rename = "oomGroup")]
    pub oom_group: Option<bool>,
    #[serde(rename = "swapHigh")]
    pub swap_high: Option<i64>,
    #[serde(rename = "swapPeak")]
    pub swap_peak: Option<i64>,
    #[serde(rename = "swapMax")]
    pub swap_max: Option<i64>,
    #[serde(rename = "zswapMax")]
    pub zswap_max: Option<i64>,
    #[serde(rename = "zswapWriteback")]
    pub zswap_writeback: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct CpuMax {
    pub quota: i64,
    pub period: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct CpuResources {
    pub weight: Option<u64>,
    pub max: Option<CpuMax>,
    #[serde(rename = "maxBurst")]
    pub max_burst: Option<u64>,
    pub idle: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct PidsResources {
    pub max: Option<i64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RdmaEntry {
    #[serde(rename = "hcaHandles")]
    pub hca_handles: Option<u32>,
    #[serde(rename = "hcaObjects")]
    pub hca_objects: Option<u32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Resources {
    #[serde(default)]
    pub memory: Option<MemoryResources>,
    #[serde(default)]
    pub cpu: Option<CpuResources>,
    #[serde(default)]
    pub pids: Option<PidsResources>,
    /// page-size token (e.g. "2MB") -> byte limit.
    #[serde(default, rename = "hugepageLimits")]
    pub hugepage_limits: HashMap<String, i64>,
    /// device name -> max/current handle and object counts.
    #[serde(default)]
    pub rdma: HashMap<String, RdmaEntry>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Linux {
    #[serde(default)]
    pub namespaces: Vec<Namespace>,
    #[serde(default)]
    pub resources: Option<Resources>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ContainerSpec {
    #[serde(default, rename = "ociVersion")]
    pub oci_version: String,
    #[serde(default)]
    pub hostname: Option<String>,
    pub process: Process,
    pub root: Root,
    #[serde(default)]
    pub mounts: Vec<Mount>,
    #[serde(default)]
    pub linux: Option<Linux>,
}

impl ContainerSpec {
    /// Loads `<bundle>/config.json` and resolves the rootfs path relative to
    /// the bundle directory.
    pub fn load(bundle: &Path) -> Result<Self, SpecError> {
        let config_path = bundle.join("config.json");
        let file = File::open(&config_path).map_err(|source| SpecError::Open {
            path: config_path.clone(),
            source,
        })?;
        let mut spec: ContainerSpec =
            serde_json::from_reader(file).map_err(|source| SpecError::Decode {
                path: config_path.clone(),
                source,
            })?;

        if spec.root.path.is_relative() {
            spec.root.path = bundle.join(&spec.root.path);
        }
        if spec.root.path.as_os_str().is_empty() {
            return Err(SpecError::MissingRoot { path: config_path });
        }

        Ok(spec)
    }

    pub fn wants_terminal(&self) -> bool {
        self.process.terminal
    }

    pub fn namespaces(&self) -> &[Namespace] {
        self.linux
            .as_ref()
            .map(|l| l.namespaces.as_slice())
            .unwrap_or_default()
    }

    pub fn resources(&self) -> Option<&Resources> {
        self.linux.as_ref().and_then(|l| l.resources.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn loads_minimal_config_and_resolves_rootfs() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("rootfs")).unwrap();
        fs::write(
            dir.path().join("config.json"),
            r#"{
                "ociVersion": "1.0.2",
                "process": { "terminal": false, "args": ["/bin/true"] },
                "root": { "path": "rootfs" },
                "hostname": "box",
                "linux": { "namespaces": [{"type": "pid"}] }
            }"#,
        )
        .unwrap();

        let spec = ContainerSpec::load(dir.path()).unwrap();
        assert_eq!(spec.root.path, dir.path().join("rootfs"));
        assert_eq!(spec.process.args, vec!["/bin/true".to_string()]);
        assert!(!spec.wants_terminal());
        assert_eq!(spec.namespaces().len(), 1);
    }

    #[test]
    fn unconfigured_resource_fields_stay_none() {
        let json = r#"{ "pids": { } }"#;
        let resources: Resources = serde_json::from_str(json).unwrap();
        assert!(resources.pids.unwrap().max.is_none());
    }

    #[test]
    fn zero_is_distinct_from_absent() {
        let json = r#"{ "pids": { "max": 0 } }"#;
        let resources: Resources = serde_json::from_str(json).unwrap();
        assert_eq!(resources.pids.unwrap().max, Some(0));
    }

    #[test]
    fn missing_config_is_a_spec_error() {
        let dir = tempdir().unwrap();
        assert!(ContainerSpec::load(dir.path()).is_err());
    }
}
