//! External URL stores
//!
//! The loading queue is a read-ahead cache in front of one of these. The
//! store is the system of record: it must support append and bulk read per
//! logical group, with items eventually visible to subsequent loads — no
//! transactional guarantee is required or assumed.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::{QueuedUrl, UrlGroup};

/// Unbounded external store of pending URLs, keyed by group.
pub trait ExternalUrlLoader: Send + Sync {
    /// Append one entry to the store.
    fn save(&self, url: &QueuedUrl, group: &UrlGroup) -> Result<()>;

    /// Move up to `max_count` entries of the group from the store into
    /// `sink`; returns how many were moved.
    fn load_to(
        &self,
        sink: &mut VecDeque<QueuedUrl>,
        max_count: usize,
        group: &UrlGroup,
    ) -> Result<usize>;

    /// Exact number of entries remaining for the group. Potentially a full
    /// scan — callers should prefer the queue's memoized estimate.
    fn count_remaining(&self, group: &UrlGroup) -> Result<usize>;

    /// Drop every entry of the group; returns how many were dropped.
    fn delete_all(&self, group: &UrlGroup) -> Result<usize>;
}

const DELIMITER: char = '\t';

/// File-backed store: one group-tagged JSON line per entry.
///
/// Loading consumes the loaded lines (the file is rewritten without them),
/// so a poll/offer round-trip neither duplicates nor loses entries. All
/// file access is serialized on an internal lock; cross-process sharing is
/// not supported.
pub struct LocalFileUrlLoader {
    path: PathBuf,
    io_lock: Mutex<()>,
}

impl LocalFileUrlLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            io_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_lines(&self) -> Vec<String> {
        if !self.path.exists() {
            return Vec::new();
        }
        match fs::read_to_string(&self.path) {
            Ok(content) => content.lines().map(str::to_string).collect(),
            Err(e) => {
                warn!("Failed to read url store {}: {e}", self.path.display());
                Vec::new()
            }
        }
    }

    fn write_lines(&self, lines: &[String]) -> Result<()> {
        let mut content = lines.join("\n");
        if !content.is_empty() {
            content.push('\n');
        }
        fs::write(&self.path, content)
            .with_context(|| format!("failed to rewrite url store {}", self.path.display()))
    }

    fn parse(line: &str, group: &UrlGroup) -> Option<QueuedUrl> {
        let (line_group, json) = line.split_once(DELIMITER)?;
        if line_group != group.as_str() {
            return None;
        }
        match serde_json::from_str(json) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!("Skipping malformed url store line: {e}");
                None
            }
        }
    }
}

impl ExternalUrlLoader for LocalFileUrlLoader {
    fn save(&self, url: &QueuedUrl, group: &UrlGroup) -> Result<()> {
        let _io = self.io_lock.lock();
        let json = serde_json::to_string(url).context("failed to serialize url entry")?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open url store {}", self.path.display()))?;
        writeln!(file, "{}{DELIMITER}{json}", group.as_str())
            .with_context(|| format!("failed to append to url store {}", self.path.display()))?;
        Ok(())
    }

    fn load_to(
        &self,
        sink: &mut VecDeque<QueuedUrl>,
        max_count: usize,
        group: &UrlGroup,
    ) -> Result<usize> {
        if max_count == 0 {
            return Ok(0);
        }
        let _io = self.io_lock.lock();

        let lines = self.read_lines();
        let mut remaining = Vec::with_capacity(lines.len());
        let mut loaded = 0usize;

        for line in lines {
            if loaded < max_count {
                if let Some(url) = Self::parse(&line, group) {
                    sink.push_back(url);
                    loaded += 1;
                    continue;
                }
            }
            remaining.push(line);
        }

        if loaded > 0 {
            self.write_lines(&remaining)?;
        }
        Ok(loaded)
    }

    fn count_remaining(&self, group: &UrlGroup) -> Result<usize> {
        let _io = self.io_lock.lock();
        Ok(self
            .read_lines()
            .iter()
            .filter(|line| Self::parse(line, group).is_some())
            .count())
    }

    fn delete_all(&self, group: &UrlGroup) -> Result<usize> {
        let _io = self.io_lock.lock();
        let lines = self.read_lines();
        let (deleted, remaining): (Vec<_>, Vec<_>) = lines
            .into_iter()
            .partition(|line| Self::parse(line, group).is_some());
        self.write_lines(&remaining)?;
        Ok(deleted.len())
    }
}

/// A [`LocalFileUrlLoader`] over a temporary file, removed on drop. Handy
/// for short-lived queues and integration tests.
pub struct TempFileUrlLoader {
    inner: LocalFileUrlLoader,
    // Held for its Drop impl, which removes the file.
    _file: tempfile::NamedTempFile,
}

impl TempFileUrlLoader {
    pub fn new() -> Result<Self> {
        let file = tempfile::Builder::new()
            .prefix("veilcrawl_urls_")
            .suffix(".txt")
            .tempfile()
            .context("failed to create temporary url store")?;
        let inner = LocalFileUrlLoader::new(file.path().to_path_buf());
        Ok(Self {
            inner,
            _file: file,
        })
    }
}

impl ExternalUrlLoader for TempFileUrlLoader {
    fn save(&self, url: &QueuedUrl, group: &UrlGroup) -> Result<()> {
        self.inner.save(url, group)
    }

    fn load_to(
        &self,
        sink: &mut VecDeque<QueuedUrl>,
        max_count: usize,
        group: &UrlGroup,
    ) -> Result<usize> {
        self.inner.load_to(sink, max_count, group)
    }

    fn count_remaining(&self, group: &UrlGroup) -> Result<usize> {
        self.inner.count_remaining(group)
    }

    fn delete_all(&self, group: &UrlGroup) -> Result<usize> {
        self.inner.delete_all(group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(url: &str) -> QueuedUrl {
        QueuedUrl::new(url)
    }

    #[test]
    fn save_then_load_round_trips() {
        let loader = TempFileUrlLoader::new().expect("loader");
        let group = UrlGroup::new("g1");

        loader.save(&entry("https://example.com/a"), &group).expect("save");
        loader.save(&entry("https://example.com/b"), &group).expect("save");

        let mut sink = VecDeque::new();
        let loaded = loader.load_to(&mut sink, 10, &group).expect("load");
        assert_eq!(loaded, 2);
        assert_eq!(sink.len(), 2);
        assert_eq!(sink[0].url(), "https://example.com/a");

        // Loading consumed the entries.
        assert_eq!(loader.count_remaining(&group).expect("count"), 0);
    }

    #[test]
    fn groups_are_isolated() {
        let loader = TempFileUrlLoader::new().expect("loader");
        let g1 = UrlGroup::new("g1");
        let g2 = UrlGroup::new("g2");

        loader.save(&entry("https://example.com/a"), &g1).expect("save");
        loader.save(&entry("https://example.com/b"), &g2).expect("save");

        let mut sink = VecDeque::new();
        assert_eq!(loader.load_to(&mut sink, 10, &g1).expect("load"), 1);
        assert_eq!(loader.count_remaining(&g2).expect("count"), 1);
    }

    #[test]
    fn load_respects_max_count() {
        let loader = TempFileUrlLoader::new().expect("loader");
        let group = UrlGroup::new("g");
        for i in 0..5 {
            loader
                .save(&entry(&format!("https://example.com/{i}")), &group)
                .expect("save");
        }

        let mut sink = VecDeque::new();
        assert_eq!(loader.load_to(&mut sink, 2, &group).expect("load"), 2);
        assert_eq!(loader.count_remaining(&group).expect("count"), 3);
    }

    #[test]
    fn delete_all_reports_count() {
        let loader = TempFileUrlLoader::new().expect("loader");
        let group = UrlGroup::new("g");
        loader.save(&entry("https://example.com/a"), &group).expect("save");
        loader.save(&entry("https://example.com/b"), &group).expect("save");

        assert_eq!(loader.delete_all(&group).expect("delete"), 2);
        assert_eq!(loader.count_remaining(&group).expect("count"), 0);
    }
}
