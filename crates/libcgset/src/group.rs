use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use nix::unistd::Pid;

use crate::common::{self, WrappedIoError, CGROUP_PROCS};
use crate::controller::{Controller, CONTROLLERS};
use crate::staging;

/// One staged cgroup directory in a single hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupHandle {
    path: PathBuf,
    mount_point: PathBuf,
    hierarchy: i32,
}

impl GroupHandle {
    pub(crate) fn new(path: PathBuf, mount_point: PathBuf, hierarchy: i32) -> Self {
        Self {
            path,
            mount_point,
            hierarchy,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Controller directory the group was staged under.
    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    pub fn hierarchy(&self) -> i32 {
        self.hierarchy
    }

    /// Moves the process into this group.
    pub fn add_task(&self, pid: Pid) -> Result<(), WrappedIoError> {
        common::write_cgroup_file(self.path.join(CGROUP_PROCS), pid)
    }

    pub fn read_file(&self, name: &str) -> Result<String, WrappedIoError> {
        common::read_cgroup_file(self.path.join(name))
    }

    pub fn write_file<T: ToString>(&self, name: &str, value: T) -> Result<(), WrappedIoError> {
        common::write_cgroup_file(self.path.join(name), value)
    }
}

/// The groups staged for one sandboxed process. Controllers mounted on the
/// same hierarchy point at the same handle.
#[derive(Debug)]
pub struct GroupSet {
    prefix: String,
    by_controller: HashMap<Controller, usize>,
    distinct: Vec<GroupHandle>,
}

impl GroupSet {
    pub(crate) fn new(
        prefix: String,
        by_controller: HashMap<Controller, usize>,
        distinct: Vec<GroupHandle>,
    ) -> Self {
        Self {
            prefix,
            by_controller,
            distinct,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn get(&self, controller: Controller) -> Option<&GroupHandle> {
        self.by_controller
            .get(&controller)
            .map(|&index| &self.distinct[index])
    }

    /// Controllers that resolved to a group, in staging order.
    pub fn controllers(&self) -> impl Iterator<Item = Controller> + '_ {
        CONTROLLERS
            .iter()
            .copied()
            .filter(move |c| self.by_controller.contains_key(c))
    }

    /// Every staged group exactly once.
    pub fn distinct(&self) -> &[GroupHandle] {
        &self.distinct
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.distinct.iter().map(GroupHandle::path)
    }

    pub fn add_task(&self, pid: Pid) -> Result<(), WrappedIoError> {
        for handle in &self.distinct {
            tracing::debug!("add {} to {:?}", pid, handle.path());
            handle.add_task(pid)?;
        }
        Ok(())
    }

    /// Removes every staged directory and consumes the set. All removals are
    /// attempted, the first failure is returned.
    pub fn destroy(self) -> Result<(), WrappedIoError> {
        tracing::debug!("destroy cgroups with prefix {}", self.prefix);
        staging::remove_all(self.paths())
    }
}
