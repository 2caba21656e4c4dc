use crate::error::Result;
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub type SharedHistory = Arc<Mutex<History>>;

/// Past queries, oldest first, persisted one per line.
///
/// File access is blocking `std::fs`; callers on the runtime go through
/// `spawn_blocking`.
#[derive(Debug)]
pub struct History {
    path: PathBuf,
    limit: usize,
    entries: Vec<String>,
}

impl History {
    pub fn open(path: impl Into<PathBuf>, limit: usize) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let entries = if path.exists() {
            fs::read_to_string(&path)?
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from)
                .collect()
        } else {
            Vec::new()
        };
        Ok(Self {
            path,
            limit,
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `entry`, moving it to the end if already present.
    pub fn add(&mut self, entry: &str) -> Result<()> {
        let entry = entry.trim();
        if entry.is_empty() {
            return Ok(());
        }
        self.entries.retain(|existing| existing != entry);
        self.entries.push(entry.to_string());
        if self.entries.len() > self.limit {
            let excess = self.entries.len() - self.limit;
            self.entries.drain(..excess);
        }
        self.save()
    }

    /// Removes and returns the most recent entry.
    pub fn delete_last(&mut self) -> Result<Option<String>> {
        let removed = self.entries.pop();
        if let Some(entry) = &removed {
            info!("Removed \"{entry}\" from history");
            self.save()?;
        }
        Ok(removed)
    }

    pub fn all(&self) -> &[String] {
        &self.entries
    }

    fn save(&self) -> Result<()> {
        let mut content = self.entries.join("\n");
        content.push('\n');
        fs::write(&self.path, content)?;
        Ok(())
    }
}
