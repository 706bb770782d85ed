//! Staging of the cgroup directories for one sandboxed process.
//!
//! ```no_run
//! use libcgset::{Controller, GroupSetBuilder};
//!
//! let groups = GroupSetBuilder::new("judge")
//!     .with_cpu()
//!     .with_cpuacct()
//!     .with_memory()
//!     .with_pids()
//!     .filter_by_environment()?
//!     .build()?;
//! let memory = groups.get(Controller::Memory);
//! # let _ = memory;
//! groups.destroy()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
use std::{
    collections::HashMap,
    fmt::Display,
    path::{Path, PathBuf},
};

use crate::common::{WrappedIoError, DEFAULT_CGROUP_ROOT, DEFAULT_DIR_MODE};
use crate::controller::{Controller, CONTROLLERS};
use crate::cpuset::{self, CpusetInitError};
use crate::group::{GroupHandle, GroupSet};
use crate::registry::{self, CachedRegistry, EnvironmentError};
use crate::staging;

#[derive(thiserror::Error, Debug)]
pub enum BuildError {
    #[error("environment: {0}")]
    Environment(#[from] EnvironmentError),
    #[error("failed to stage {controller} cgroup: {source}")]
    Staging {
        controller: Controller,
        #[source]
        source: WrappedIoError,
    },
    #[error("failed to init cpuset cgroup {path}: {source}")]
    CpusetInit {
        path: PathBuf,
        #[source]
        source: CpusetInitError,
    },
}

pub struct GroupSetBuilder<'a> {
    prefix: String,
    root: PathBuf,
    dir_mode: u32,
    registry: &'a CachedRegistry,

    cpu: bool,
    cpuset: bool,
    cpuacct: bool,
    memory: bool,
    pids: bool,
}

impl GroupSetBuilder<'static> {
    /// A builder without any controller, resolved against `/proc/cgroups`
    /// and rooted at `/sys/fs/cgroup`.
    pub fn new<S: Into<String>>(prefix: S) -> Self {
        Self {
            prefix: prefix.into(),
            root: PathBuf::from(DEFAULT_CGROUP_ROOT),
            dir_mode: DEFAULT_DIR_MODE,
            registry: registry::proc_cgroups(),
            cpu: false,
            cpuset: false,
            cpuacct: false,
            memory: false,
            pids: false,
        }
    }
}

impl<'a> GroupSetBuilder<'a> {
    pub fn with_registry<'b>(self, registry: &'b CachedRegistry) -> GroupSetBuilder<'b> {
        GroupSetBuilder {
            prefix: self.prefix,
            root: self.root,
            dir_mode: self.dir_mode,
            registry,
            cpu: self.cpu,
            cpuset: self.cpuset,
            cpuacct: self.cpuacct,
            memory: self.memory,
            pids: self.pids,
        }
    }

    pub fn with_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_dir_mode(mut self, mode: u32) -> Self {
        self.dir_mode = mode;
        self
    }

    pub fn with_cpu(mut self) -> Self {
        self.cpu = true;
        self
    }

    pub fn with_cpuset(mut self) -> Self {
        self.cpuset = true;
        self
    }

    pub fn with_cpuacct(mut self) -> Self {
        self.cpuacct = true;
        self
    }

    pub fn with_memory(mut self) -> Self {
        self.memory = true;
        self
    }

    pub fn with_pids(mut self) -> Self {
        self.pids = true;
        self
    }

    pub fn is_enabled(&self, controller: Controller) -> bool {
        match controller {
            Controller::Cpu => self.cpu,
            Controller::CpuSet => self.cpuset,
            Controller::CpuAcct => self.cpuacct,
            Controller::Memory => self.memory,
            Controller::Pids => self.pids,
        }
    }

    /// Drops every requested controller the host doesn't have enabled.
    /// `cpu` is passed through unchecked.
    pub fn filter_by_environment(mut self) -> Result<Self, EnvironmentError> {
        let enabled = self.registry.snapshot()?.enabled();

        self.cpuset = self.cpuset && enabled.contains("cpuset");
        self.cpuacct = self.cpuacct && enabled.contains("cpuacct");
        self.memory = self.memory && enabled.contains("memory");
        self.pids = self.pids && enabled.contains("pids");

        tracing::debug!("{}", self);
        Ok(self)
    }

    /// Creates one directory per distinct hierarchy among the requested
    /// controllers. Nothing stays on disk if any step fails.
    pub fn build(&self) -> Result<GroupSet, BuildError> {
        let hierarchies = self.registry.snapshot()?.hierarchies();

        let mut staged = Vec::new();
        let result = self.stage(&hierarchies, &mut staged);
        if result.is_err() {
            self.rollback(&staged);
        }
        let by_controller = result?;

        Ok(GroupSet::new(self.prefix.clone(), by_controller, staged))
    }

    fn stage(
        &self,
        hierarchies: &HashMap<&str, i32>,
        staged: &mut Vec<GroupHandle>,
    ) -> Result<HashMap<Controller, usize>, BuildError> {
        // staged index by hierarchy id
        let mut by_hierarchy: HashMap<i32, usize> = HashMap::new();
        let mut by_controller = HashMap::new();

        for &controller in CONTROLLERS {
            if !self.is_enabled(controller) {
                continue;
            }

            // unknown controllers fall into hierarchy 0
            let hierarchy = hierarchies
                .get(controller.as_ref())
                .copied()
                .unwrap_or_default();
            let index = match by_hierarchy.get(&hierarchy) {
                Some(&index) => index,
                None => {
                    let mount_point = self.root.join(controller.as_ref());
                    let path = staging::create_staging_dir(
                        [mount_point.as_path(), Path::new(&self.prefix)],
                        self.dir_mode,
                    )
                    .map_err(|source| BuildError::Staging { controller, source })?;

                    staged.push(GroupHandle::new(path, mount_point, hierarchy));
                    by_hierarchy.insert(hierarchy, staged.len() - 1);
                    staged.len() - 1
                }
            };
            by_controller.insert(controller, index);
        }

        if let Some(&index) = by_controller.get(&Controller::CpuSet) {
            let handle = &staged[index];
            cpuset::init_cpuset(handle.mount_point(), handle.path()).map_err(|source| {
                BuildError::CpusetInit {
                    path: handle.path().to_path_buf(),
                    source,
                }
            })?;
        }

        Ok(by_controller)
    }

    fn rollback(&self, staged: &[GroupHandle]) {
        if let Err(err) = staging::remove_all(staged.iter().map(GroupHandle::path)) {
            tracing::warn!("failed to roll back staged cgroups: {}", err);
        }
    }
}

impl Display for GroupSetBuilder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = CONTROLLERS
            .iter()
            .filter(|&&c| c != Controller::Cpu && self.is_enabled(c))
            .map(|c| c.as_ref())
            .collect();
        write!(f, "cgroup builder: [{}]", names.join(", "))
    }
}
