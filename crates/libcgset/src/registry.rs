//! Host controller registry as exposed by `/proc/cgroups`.
//!
//! The file lists one controller per line:
//!
//! ```text
//! #subsys_name    hierarchy       num_cgroups     enabled
//! cpuset          4               1               1
//! cpu             2               60              1
//! cpuacct         2               60              1
//! ```
//!
//! Controllers that share a hierarchy id are co-mounted and therefore share a
//! single directory tree.
use std::{
    collections::{HashMap, HashSet},
    fs::File,
    io::{BufRead, BufReader},
    num::ParseIntError,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use once_cell::sync::{Lazy, OnceCell};

use crate::common::PROC_CGROUPS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerInfo {
    pub hierarchy: i32,
    pub num_groups: i64,
    pub enabled: bool,
}

#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("failed to read {path}: {err}")]
    Io { err: std::io::Error, path: PathBuf },
    #[error("line {line}: invalid {field} {value:?}: {err}")]
    Parse {
        line: usize,
        field: &'static str,
        value: String,
        err: ParseIntError,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum EnvironmentError {
    #[error("cgroup registry {path} is unavailable")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: Arc<RegistryError>,
    },
    #[error("cgroup environment info was not initialized")]
    NotInitialized,
}

/// Snapshot of the controller registry keyed by controller name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
    controllers: HashMap<String, ControllerInfo>,
}

impl Registry {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| RegistryError::Io {
            err,
            path: path.to_path_buf(),
        })?;

        Self::parse(BufReader::new(file)).map_err(|err| match err {
            RegistryError::Io { err, .. } => RegistryError::Io {
                err,
                path: path.to_path_buf(),
            },
            parse => parse,
        })
    }

    /// Parses registry lines. Comments, empty lines and lines with fewer
    /// than four fields are skipped, a non numeric hierarchy or group count
    /// fails the whole parse.
    pub fn parse<R: BufRead>(reader: R) -> Result<Self, RegistryError> {
        let mut controllers = HashMap::new();

        for (index, line) in reader.lines().enumerate() {
            let line = line.map_err(|err| RegistryError::Io {
                err,
                path: PathBuf::new(),
            })?;
            if line.starts_with('#') {
                continue;
            }

            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                continue;
            }

            controllers.insert(
                fields[0].to_owned(),
                ControllerInfo {
                    hierarchy: parse_field(index + 1, "hierarchy", fields[1])?,
                    num_groups: parse_field(index + 1, "num_cgroups", fields[2])?,
                    enabled: fields[3] != "0",
                },
            );
        }

        Ok(Self { controllers })
    }

    pub fn get(&self, name: &str) -> Option<&ControllerInfo> {
        self.controllers.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ControllerInfo)> {
        self.controllers.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Names of all controllers the kernel has enabled.
    pub fn enabled(&self) -> HashSet<&str> {
        self.iter()
            .filter(|(_, info)| info.enabled)
            .map(|(name, _)| name)
            .collect()
    }

    /// Hierarchy id of every enabled controller.
    pub fn hierarchies(&self) -> HashMap<&str, i32> {
        self.iter()
            .filter(|(_, info)| info.enabled)
            .map(|(name, info)| (name, info.hierarchy))
            .collect()
    }
}

fn parse_field<T>(line: usize, field: &'static str, value: &str) -> Result<T, RegistryError>
where
    T: FromStr<Err = ParseIntError>,
{
    value.parse::<T>().map_err(|err| RegistryError::Parse {
        line,
        field,
        value: value.to_owned(),
        err,
    })
}

/// A registry source that is read at most once. Whatever the first read
/// produces, snapshot or failure, is returned for the rest of its lifetime.
#[derive(Debug)]
pub struct CachedRegistry {
    path: PathBuf,
    cache: OnceCell<Result<Registry, Arc<RegistryError>>>,
}

impl CachedRegistry {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            cache: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the cached snapshot, loading it on first use. Only the caller
    /// that performed a failed load sees the cause; everyone else gets
    /// `NotInitialized`.
    pub fn snapshot(&self) -> Result<&Registry, EnvironmentError> {
        let mut loaded_here = false;
        let cached = self.cache.get_or_init(|| {
            loaded_here = true;
            tracing::debug!("loading cgroup registry from {:?}", self.path);
            Registry::load(&self.path).map_err(|err| {
                tracing::warn!("cgroup registry {:?} is unusable: {}", self.path, err);
                Arc::new(err)
            })
        });

        match cached {
            Ok(registry) => Ok(registry),
            Err(err) if loaded_here => Err(EnvironmentError::Unavailable {
                path: self.path.clone(),
                source: Arc::clone(err),
            }),
            Err(_) => Err(EnvironmentError::NotInitialized),
        }
    }
}

static PROC_REGISTRY: Lazy<CachedRegistry> = Lazy::new(|| CachedRegistry::new(PROC_CGROUPS));

/// The process-wide registry backed by `/proc/cgroups`.
pub fn proc_cgroups() -> &'static CachedRegistry {
    &PROC_REGISTRY
}

pub fn snapshot() -> Result<&'static Registry, EnvironmentError> {
    proc_cgroups().snapshot()
}

#[cfg(test)]
mod tests {
    use std::{fs, sync::Barrier, thread};

    use super::*;
    use crate::test::{set_fixture, set_registry_fixture};

    const PROC_CGROUPS_SAMPLE: &str = "#subsys_name\thierarchy\tnum_cgroups\tenabled
cpuset\t4\t1\t1
cpu\t2\t60\t1
cpuacct\t2\t60\t1
memory\t7\t95\t1
pids\t0\t1\t0
";

    #[test]
    fn test_parse_registry() {
        let registry = Registry::parse(PROC_CGROUPS_SAMPLE.as_bytes()).expect("parse registry");

        assert_eq!(
            registry.get("cpu"),
            Some(&ControllerInfo {
                hierarchy: 2,
                num_groups: 60,
                enabled: true
            })
        );
        assert_eq!(registry.get("pids").map(|i| i.enabled), Some(false));
        assert_eq!(registry.iter().count(), 5);
    }

    #[test]
    fn test_derived_views_skip_disabled() {
        let registry = Registry::parse(PROC_CGROUPS_SAMPLE.as_bytes()).expect("parse registry");

        let enabled = registry.enabled();
        assert!(enabled.contains("memory"));
        assert!(!enabled.contains("pids"));

        let hierarchies = registry.hierarchies();
        assert_eq!(hierarchies.get("cpu"), Some(&2));
        assert_eq!(hierarchies.get("cpuacct"), Some(&2));
        assert_eq!(hierarchies.get("pids"), None);
    }

    #[test]
    fn test_any_non_zero_token_is_enabled() {
        let registry = Registry::parse("memory 3 1 yes\n".as_bytes()).expect("parse registry");
        assert_eq!(registry.get("memory").map(|i| i.enabled), Some(true));
    }

    #[test]
    fn test_short_and_empty_lines_are_skipped() {
        let input = "\ncpu 1 1\nmemory 2 1 1\n";
        let registry = Registry::parse(input.as_bytes()).expect("parse registry");

        assert!(registry.get("cpu").is_none());
        assert!(registry.get("memory").is_some());
    }

    #[test]
    fn test_non_numeric_hierarchy_fails() {
        let input = "cpu 1 1 1\nmemory x 1 1\n";
        let err = Registry::parse(input.as_bytes()).unwrap_err();

        match err {
            RegistryError::Parse { line, field, .. } => {
                assert_eq!(line, 2);
                assert_eq!(field, "hierarchy");
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_negative_numbers_are_integers() {
        let registry = Registry::parse("cpu -1 1 1\n".as_bytes()).expect("parse registry");
        assert_eq!(registry.get("cpu").map(|i| i.hierarchy), Some(-1));
    }

    #[test]
    fn test_non_numeric_group_count_fails() {
        let err = Registry::parse("cpu 1 many 1\n".as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Parse {
                field: "num_cgroups",
                ..
            }
        ));
    }

    #[test]
    fn test_snapshot_is_sticky() {
        let tmp = tempfile::tempdir().unwrap();
        let path = set_registry_fixture(tmp.path(), &[("cpu", 1, true), ("memory", 2, true)])
            .expect("set registry fixture");
        let cached = CachedRegistry::new(&path);

        let first = cached.snapshot().expect("first snapshot");
        fs::remove_file(&path).unwrap();
        set_fixture(tmp.path(), "cgroups", "pids 5 1 1\n").unwrap();
        let second = cached.snapshot().expect("second snapshot");

        assert!(std::ptr::eq(first, second));
        assert!(second.get("pids").is_none());
        assert_eq!(second.hierarchies().get("memory"), Some(&2));
    }

    #[test]
    fn test_failure_is_sticky() {
        let tmp = tempfile::tempdir().unwrap();
        let cached = CachedRegistry::new(tmp.path().join("cgroups"));

        let first = cached.snapshot().unwrap_err();
        assert!(matches!(first, EnvironmentError::Unavailable { .. }));

        set_registry_fixture(tmp.path(), &[("cpu", 1, true)]).unwrap();
        let second = cached.snapshot().unwrap_err();
        assert!(matches!(second, EnvironmentError::NotInitialized));
    }

    #[test]
    fn test_parse_failure_is_unavailable() {
        let tmp = tempfile::tempdir().unwrap();
        let path = set_fixture(tmp.path(), "cgroups", "cpu one 1 1\n").unwrap();
        let cached = CachedRegistry::new(path);

        match cached.snapshot().unwrap_err() {
            EnvironmentError::Unavailable { source, .. } => {
                assert!(matches!(*source, RegistryError::Parse { .. }))
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_concurrent_first_access() {
        let tmp = tempfile::tempdir().unwrap();
        let path = set_registry_fixture(tmp.path(), &[("cpu", 1, true)]).unwrap();
        let cached = CachedRegistry::new(path);
        let barrier = Barrier::new(8);

        let snapshots: Vec<usize> = thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        cached.snapshot().expect("snapshot") as *const Registry as usize
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(snapshots.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_proc_registry_is_memoized() {
        let first = snapshot().map(|r| r as *const Registry);
        let second = snapshot().map(|r| r as *const Registry);

        match (first, second) {
            (Ok(a), Ok(b)) => assert_eq!(a, b),
            (Err(_), Err(err)) => assert!(matches!(err, EnvironmentError::NotInitialized)),
            _ => panic!("registry outcome changed between calls"),
        }
    }
}
