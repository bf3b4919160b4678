use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{clock::Timestamp, entry::Entry, Result};

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    taken_at: Timestamp,
    entries: Vec<(String, Entry)>,
}

/// Point-in-time JSON dump of every entry.
pub struct SnapshotManager {
    path: PathBuf,
}

impl SnapshotManager {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes to a temp file and renames it over the previous snapshot.
    pub fn save(&self, taken_at: Timestamp, entries: Vec<(String, Entry)>) -> Result<()> {
        let temp_path = self.path.with_extension("temp");
        let file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);

        serde_json::to_writer(&mut writer, &Snapshot { taken_at, entries })?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);

        fs::rename(temp_path, &self.path)?;
        Ok(())
    }

    pub fn load(&self) -> Result<Vec<(String, Entry)>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(&self.path)?);
        let snapshot: Snapshot = serde_json::from_reader(reader)?;
        Ok(snapshot.entries)
    }
}
