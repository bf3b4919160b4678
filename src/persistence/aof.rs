use std::{
    fs::{File, OpenOptions},
    io::{self, BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use bincode::{deserialize, serialize};
use tokio::sync::Mutex;
use tracing::warn;

use super::Operation;
use crate::{Error, Result};

const BUFFER_CAPACITY: usize = 1024 * 1024;
const SYNC_EVERY: usize = 1000;
/// Upper bound on a single record. Anything larger on disk is corruption.
const MAX_RECORD_LEN: u32 = 64 * 1024 * 1024;

struct AofWriter {
    inner: BufWriter<File>,
    pending: usize,
}

/// Append-only log of length-prefixed bincode records.
pub struct AofManager {
    writer: Mutex<AofWriter>,
    path: PathBuf,
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl AofManager {
    pub fn new(path: PathBuf) -> io::Result<Self> {
        let file = open_append(&path)?;

        Ok(Self {
            writer: Mutex::new(AofWriter {
                inner: BufWriter::with_capacity(BUFFER_CAPACITY, file),
                pending: 0,
            }),
            path,
        })
    }

    pub async fn append_operation(&self, op: &Operation) -> Result<()> {
        let serialized = serialize(op)?;
        let len = u32::try_from(serialized.len())
            .ok()
            .filter(|len| *len <= MAX_RECORD_LEN)
            .ok_or_else(|| {
                Error::Codec(format!("record of {} bytes is too large", serialized.len()))
            })?;

        // Prefix and payload go out in one write so a failure cannot leave a
        // prefix without its payload in the buffer.
        let mut record = Vec::with_capacity(4 + serialized.len());
        record.extend_from_slice(&len.to_le_bytes());
        record.extend_from_slice(&serialized);

        let mut writer = self.writer.lock().await;
        writer.inner.write_all(&record)?;

        writer.pending += 1;
        if writer.pending >= SYNC_EVERY {
            writer.inner.flush()?;
            writer.inner.get_ref().sync_all()?;
            writer.pending = 0;
        }

        Ok(())
    }

    pub async fn sync(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.inner.flush()?;
        writer.inner.get_ref().sync_all()?;
        writer.pending = 0;
        Ok(())
    }

    /// Discards every record. Callers must have captured the state elsewhere first.
    pub async fn truncate(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.inner.flush()?;

        let file = File::create(&self.path)?;
        file.sync_all()?;
        drop(file);

        writer.inner = BufWriter::with_capacity(BUFFER_CAPACITY, open_append(&self.path)?);
        writer.pending = 0;
        Ok(())
    }

    /// Reads every complete record. A torn record at the tail, left by a crash
    /// mid-append, is dropped.
    pub fn load_operations(&self) -> Result<Vec<Operation>> {
        let mut operations = Vec::new();

        if !self.path.exists() {
            return Ok(operations);
        }

        let file = File::open(&self.path)?;
        let mut reader = BufReader::with_capacity(BUFFER_CAPACITY, file);
        let mut len_bytes = [0u8; 4];

        loop {
            match reader.read_exact(&mut len_bytes) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }

            let len = u32::from_le_bytes(len_bytes);
            if len > MAX_RECORD_LEN {
                return Err(Error::Codec(format!(
                    "corrupt record length {} in {:?} after {} operations",
                    len,
                    self.path,
                    operations.len()
                )));
            }
            let mut buf = vec![0u8; len as usize];
            match reader.read_exact(&mut buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    warn!(
                        "Dropping torn record at tail of {:?} ({} operations kept)",
                        self.path,
                        operations.len()
                    );
                    break;
                }
                Err(e) => return Err(e.into()),
            }

            operations.push(deserialize(&buf)?);
        }

        Ok(operations)
    }
}
