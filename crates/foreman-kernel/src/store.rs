//! File persistence: JSON Lines logs with a schema header, and atomic JSON documents.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// First line of every JSONL log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaHeader {
    pub schema: String,
    pub version: u32,
}

/// Append-only JSON Lines file of `T` records.
///
/// The first line is a [`SchemaHeader`]. Records are appended one per line and
/// the file is compacted by rewriting it in full through a temp file.
#[derive(Debug)]
pub struct JsonlLog<T> {
    path: PathBuf,
    schema: &'static str,
    version: u32,
    _record: PhantomData<fn() -> T>,
}

impl<T> JsonlLog<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: impl Into<PathBuf>, schema: &'static str, version: u32) -> Self {
        Self {
            path: path.into(),
            schema,
            version,
            _record: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn header(&self) -> SchemaHeader {
        SchemaHeader {
            schema: self.schema.to_string(),
            version: self.version,
        }
    }

    /// Read every record. A missing file is an empty log; unreadable record
    /// lines are skipped with a warning.
    pub fn read_all(&self) -> StoreResult<Vec<T>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };

        let mut records = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| StoreError::io(&self.path, e))?;
            if line.trim().is_empty() {
                continue;
            }

            if index == 0 {
                let header: SchemaHeader =
                    serde_json::from_str(&line).map_err(|source| StoreError::Parse {
                        path: self.path.clone(),
                        line: 1,
                        source,
                    })?;
                self.check_header(&header)?;
                continue;
            }

            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(error) => tracing::warn!(
                    path = %self.path.display(),
                    line = index + 1,
                    %error,
                    "Skipping malformed record"
                ),
            }
        }

        Ok(records)
    }

    fn check_header(&self, header: &SchemaHeader) -> StoreResult<()> {
        if header.schema != self.schema || header.version > self.version {
            return Err(StoreError::Schema {
                path: self.path.clone(),
                found: header.schema.clone(),
                version: header.version,
                expected: self.schema,
                supported: self.version,
            });
        }
        Ok(())
    }

    /// Append one record, writing the header first if the file is new.
    pub fn append(&self, record: &T) -> StoreResult<()> {
        ensure_parent(&self.path)?;
        let is_new = fs::metadata(&self.path).map(|m| m.len() == 0).unwrap_or(true);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StoreError::io(&self.path, e))?;

        let mut buf = String::new();
        if is_new {
            buf.push_str(&serde_json::to_string(&self.header())?);
            buf.push('\n');
        }
        buf.push_str(&serde_json::to_string(record)?);
        buf.push('\n');

        file.write_all(buf.as_bytes())
            .map_err(|e| StoreError::io(&self.path, e))
    }

    /// Replace the whole log with `records`.
    pub fn rewrite<'a, I>(&self, records: I) -> StoreResult<()>
    where
        I: IntoIterator<Item = &'a T>,
        T: 'a,
    {
        let header = self.header();
        write_atomic(&self.path, |w| {
            serde_json::to_writer(&mut *w, &header)?;
            w.write_all(b"\n").map_err(|e| StoreError::io(&self.path, e))?;
            for record in records {
                serde_json::to_writer(&mut *w, record)?;
                w.write_all(b"\n").map_err(|e| StoreError::io(&self.path, e))?;
            }
            Ok(())
        })
    }
}

/// Serialize `value` as pretty JSON to `path` via temp file and rename.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> StoreResult<()> {
    write_atomic(path, |w| {
        serde_json::to_writer_pretty(&mut *w, value)?;
        w.write_all(b"\n").map_err(|e| StoreError::io(path, e))
    })
}

/// Read a JSON document, returning `None` if the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> StoreResult<Option<T>> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            line: source.line(),
            source,
        })
}

fn write_atomic<F>(path: &Path, write: F) -> StoreResult<()>
where
    F: FnOnce(&mut BufWriter<File>) -> StoreResult<()>,
{
    ensure_parent(path)?;
    let tmp = temp_path(path);

    let file = File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
    let mut writer = BufWriter::new(file);
    write(&mut writer)?;
    let file = writer
        .into_inner()
        .map_err(|e| StoreError::io(&tmp, e.into_error()))?;
    file.sync_all().map_err(|e| StoreError::io(&tmp, e))?;

    fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn ensure_parent(path: &Path) -> StoreResult<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))
        }
        _ => Ok(()),
    }
}
