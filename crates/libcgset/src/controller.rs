use std::fmt::Display;
use std::str::FromStr;

#[derive(Hash, PartialEq, Eq, Debug, Clone, Copy, PartialOrd, Ord)]
pub enum Controller {
    Cpu,
    CpuSet,
    CpuAcct,
    Memory,
    Pids,
}

impl Display for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

impl AsRef<str> for Controller {
    fn as_ref(&self) -> &str {
        match *self {
            Self::Cpu => "cpu",
            Self::CpuSet => "cpuset",
            Self::CpuAcct => "cpuacct",
            Self::Memory => "memory",
            Self::Pids => "pids",
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("unknown cgroup controller {0}")]
pub struct UnknownControllerError(pub String);

impl FromStr for Controller {
    type Err = UnknownControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CONTROLLERS
            .iter()
            .find(|c| c.as_ref() == s)
            .copied()
            .ok_or_else(|| UnknownControllerError(s.to_owned()))
    }
}

/// Controllers in the order directories are staged for them.
pub const CONTROLLERS: &[Controller] = &[
    Controller::Cpu,
    Controller::CpuSet,
    Controller::CpuAcct,
    Controller::Memory,
    Controller::Pids,
];
