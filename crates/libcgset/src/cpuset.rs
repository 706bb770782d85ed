use std::path::{Path, PathBuf, StripPrefixError};

use crate::common::{self, WrappedIoError};

pub const CGROUP_CPUSET_CPUS: &str = "cpuset.cpus";
pub const CGROUP_CPUSET_MEMS: &str = "cpuset.mems";

#[derive(thiserror::Error, Debug)]
pub enum CpusetInitError {
    #[error("io error: {0}")]
    WrappedIo(#[from] WrappedIoError),
    #[error("bad cgroup path {path}: {err}")]
    BadCgroupPath {
        err: StripPrefixError,
        path: PathBuf,
    },
    #[error("cpuset parent value is empty at {0}")]
    EmptyParent(PathBuf),
}

/// Fills `cpuset.cpus` and `cpuset.mems` of a freshly created group.
///
/// A new cpuset group starts with empty masks and refuses tasks until they
/// are set. Walking down from the cpuset mount point, every directory on the
/// way to `cgroup_path` whose mask is empty receives the mask of its parent.
pub fn init_cpuset(mount_point: &Path, cgroup_path: &Path) -> Result<(), CpusetInitError> {
    tracing::debug!("init cpuset cgroup {:?}", cgroup_path);
    inherit_from_parent(mount_point, cgroup_path, CGROUP_CPUSET_CPUS)?;
    inherit_from_parent(mount_point, cgroup_path, CGROUP_CPUSET_MEMS)?;
    Ok(())
}

fn inherit_from_parent(
    mount_point: &Path,
    cgroup_path: &Path,
    interface_file: &str,
) -> Result<(), CpusetInitError> {
    let relative_cgroup_path =
        cgroup_path
            .strip_prefix(mount_point)
            .map_err(|err| CpusetInitError::BadCgroupPath {
                err,
                path: cgroup_path.to_path_buf(),
            })?;

    let mut current = mount_point.to_path_buf();
    for component in relative_cgroup_path.components() {
        let parent_value = common::read_cgroup_file(current.join(interface_file))?;
        if parent_value.trim().is_empty() {
            return Err(CpusetInitError::EmptyParent(current.join(interface_file)));
        }

        current.push(component);
        let child_path = current.join(interface_file);
        // the value can carry a trailing newline, an untrimmed value is never empty
        if common::read_cgroup_file(&child_path)?.trim().is_empty() {
            common::write_cgroup_file(&child_path, parent_value.trim())?;
        }
    }

    Ok(())
}
