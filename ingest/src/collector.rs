use ignore::{DirEntry, WalkBuilder};
use itertools::Itertools;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Yields the candidate run directories directly below the base directory
/// in ascending name order
#[derive(Debug, Default)]
pub struct RunCollector {
    // reversed so popping yields ascending order
    paths: Vec<PathBuf>,
}

impl RunCollector {
    pub fn load(base: &Path) -> Self {
        if !base.is_dir() {
            warn!(path = ?base, "Base directory does not exist, nothing to collect");

            return Self::default();
        }

        let paths = WalkBuilder::new(base)
            .standard_filters(false)
            .max_depth(Some(1))
            .build()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(error) => {
                    warn!(error = ?error, "Failed to read directory entry");
                    None
                }
            })
            .filter(|entry| entry.depth() == 1 && entry.file_type().map_or(false, |t| t.is_dir()))
            .map(DirEntry::into_path)
            .sorted_by(|a, b| b.cmp(a))
            .collect_vec();

        debug!(path = ?base, count = paths.len(), "Collected run directories");

        Self { paths }
    }
}

impl Iterator for RunCollector {
    type Item = PathBuf;

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.paths.len(), Some(self.paths.len()))
    }

    fn next(&mut self) -> Option<Self::Item> {
        self.paths.pop()
    }
}

impl ExactSizeIterator for RunCollector {}
