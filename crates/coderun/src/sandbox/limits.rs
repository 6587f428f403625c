//! Kernel resource limits for sandboxed children.
//!
//! The plan is computed in the parent and applied by the child between fork
//! and exec, so the ceilings are in force before the first instruction of the
//! target program runs.
//!
//! | Limit | Source field | Unit in config |
//! |-------|--------------|----------------|
//! | `RLIMIT_CPU` | `cpu_time` | seconds |
//! | `RLIMIT_AS` | `memory_limit` | kilobytes |
//! | `RLIMIT_FSIZE` | `max_file_size` | kilobytes |
//! | `RLIMIT_NOFILE` | `max_open_files` | count |

use std::io;

use crate::types::ResourceLimits;

#[cfg(all(target_os = "linux", target_env = "gnu"))]
type Resource = libc::__rlimit_resource_t;
#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
type Resource = libc::c_int;

/// Concrete `setrlimit` calls to make in the child
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RlimitPlan {
    entries: Vec<(Resource, libc::rlim_t)>,
}

impl RlimitPlan {
    pub(crate) fn from_limits(limits: &ResourceLimits) -> Self {
        let mut entries = Vec::with_capacity(4);
        if let Some(seconds) = limits.cpu_time {
            entries.push((libc::RLIMIT_CPU as Resource, seconds as libc::rlim_t));
        }
        if let Some(kb) = limits.memory_limit {
            entries.push((libc::RLIMIT_AS as Resource, kb.saturating_mul(1024) as libc::rlim_t));
        }
        if let Some(kb) = limits.max_file_size {
            entries.push((libc::RLIMIT_FSIZE as Resource, kb.saturating_mul(1024) as libc::rlim_t));
        }
        if let Some(count) = limits.max_open_files {
            entries.push((libc::RLIMIT_NOFILE as Resource, count as libc::rlim_t));
        }
        Self { entries }
    }

    /// Apply every limit to the calling process.
    ///
    /// Runs in the forked child, so it must not allocate.
    pub(crate) fn apply(&self) -> io::Result<()> {
        for &(resource, limit) in &self.entries {
            set_rlimit(resource, limit)?;
        }
        Ok(())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Set both soft and hard limit, never above the current hard limit
fn set_rlimit(resource: Resource, limit: libc::rlim_t) -> io::Result<()> {
    let mut current = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: current is a valid, writable rlimit and resource is a libc constant.
    if unsafe { libc::getrlimit(resource, &mut current) } != 0 {
        return Err(io::Error::last_os_error());
    }

    let limit = limit.min(current.rlim_max);
    let rlim = libc::rlimit {
        rlim_cur: limit,
        rlim_max: limit,
    };
    // SAFETY: rlim is valid, resource is a libc constant.
    if unsafe { libc::setrlimit(resource, &rlim) } != 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}
