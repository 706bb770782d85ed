//! Control group staging for a single sandboxed process.
//! Discovers which cgroup v1 controllers the host supports, creates one
//! directory per distinct hierarchy for a run and removes them again once the
//! run is over.
#[cfg(test)]
#[macro_use]
extern crate quickcheck;


pub mod builder;
pub mod common;
pub mod controller;
pub mod cpuset;
pub mod group;
pub mod registry;
pub mod staging;

pub use builder::{BuildError, GroupSetBuilder};
pub use controller::Controller;
pub use group::{GroupHandle, GroupSet};
pub use registry::{CachedRegistry, ControllerInfo, EnvironmentError, Registry};
