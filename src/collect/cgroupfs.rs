//! A cgroup-v2 stats provider.
//!
//! Tracks the direct child cgroups of a root directory (one entity per
//! child), keeps their stat files open across passes and rewinds them instead
//! of reopening, and drops entities whose files can no longer be read.
//!
//! Read per entity, when present:
//!
//! - `cpu.stat` (`usage_usec` field)
//! - `memory.current`

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::PathBuf;

use dashmap::DashMap;

use super::{EntityStats, StatsProvider};

#[derive(Debug)]
pub struct CgroupStatsProvider {
    root: PathBuf,
    tracked: DashMap<String, EntityFiles>,
}

impl CgroupStatsProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            tracked: DashMap::new(),
        }
    }

    /// Scans the root for child cgroups that are not tracked yet.
    fn track_new(&self) {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) => {
                log::error!(
                    target: "cgroup provider",
                    "failed to scan cgroup root {}: {}",
                    self.root.display(),
                    err
                );
                return;
            }
        };
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if self.tracked.contains_key(&name) {
                continue;
            }
            log::debug!(target: "cgroup provider", "tracking cgroup {}", name);
            self.tracked.insert(name, EntityFiles::open(&entry.path()));
        }
    }
}

impl StatsProvider for CgroupStatsProvider {
    fn stats(&self) -> Vec<EntityStats> {
        self.track_new();

        let mut out = Vec::with_capacity(self.tracked.len());
        self.tracked.retain(|id, files| match files.read() {
            Ok((cpu_usage_usec, memory_usage_bytes)) => {
                out.push(EntityStats {
                    id: id.clone(),
                    cpu_usage_usec,
                    memory_usage_bytes,
                });
                true
            }
            Err(err) => {
                log::error!(
                    target: "cgroup provider",
                    "failed reading cgroup stats: id={}, error={}",
                    id,
                    err
                );
                false
            }
        });
        // map iteration order is arbitrary
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }
}

/// Stat file handles for one tracked cgroup, kept open across passes.
#[derive(Debug, Default)]
struct EntityFiles {
    cpu_stat: Option<BufReader<File>>,
    memory_current: Option<BufReader<File>>,
}

impl EntityFiles {
    fn open(dir: &std::path::Path) -> Self {
        Self {
            cpu_stat: open_file(dir.join("cpu.stat")),
            memory_current: open_file(dir.join("memory.current")),
        }
    }

    fn read(&mut self) -> std::io::Result<(Option<u64>, Option<u64>)> {
        let cpu = read_and_rewind(self.cpu_stat.as_mut(), parse_cpu_usage_usec)?;
        let memory = read_and_rewind(self.memory_current.as_mut(), parse_u64_line)?;
        Ok((cpu.flatten(), memory))
    }
}

#[inline]
fn open_file(path: impl AsRef<std::path::Path>) -> Option<BufReader<File>> {
    Some(BufReader::new(File::open(path).ok()?))
}

/// Reads through the given function, then rewinds the file for the next pass.
///
/// Returns `Ok(None)` if the file is `None`.
fn read_and_rewind<T, R>(
    file: Option<&mut R>,
    reader: impl FnOnce(&mut R) -> std::io::Result<T>,
) -> std::io::Result<Option<T>>
where
    R: BufRead + Seek,
{
    match file {
        Some(f) => {
            let result = reader(f)?;
            f.seek(SeekFrom::Start(0))?;
            Ok(Some(result))
        }
        None => Ok(None),
    }
}

/// Extracts the `usage_usec` field from a `cpu.stat` key-value file.
fn parse_cpu_usage_usec<R: BufRead>(reader: &mut R) -> std::io::Result<Option<u64>> {
    for line in reader.lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        if parts.next() != Some("usage_usec") {
            continue;
        }
        let value = parts.next().unwrap_or_default();
        let value = value.parse::<u64>().map_err(|err| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid usage_usec value '{value}': {err}"),
            )
        })?;
        return Ok(Some(value));
    }
    Ok(None)
}

/// Parses a single-value file such as `memory.current`.
fn parse_u64_line<R: BufRead>(reader: &mut R) -> std::io::Result<u64> {
    let mut line = String::new();
    reader.read_line(&mut line)?;
    line.trim().parse::<u64>().map_err(|err| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("invalid value '{}': {}", line.trim(), err),
        )
    })
}
