//! Append-only `cache.log` writer/reader: `[u32 len][payload][u32 crc32]`
//! framing, plus the insert-protocol stream that materializes into a
//! committed [`ObjectRecord`]. A single background thread drains a
//! producer queue into durable storage; producers never block on I/O.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use diamond_core::Sig128;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{OcacheError, OcacheResult};
use crate::record::ObjectRecord;

/// One `cache.log` frame body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub record: ObjectRecord,
}

fn log_path(root: &Path, fsig: Sig128) -> PathBuf {
    root.join(fsig.to_hex()).join("cache.log")
}

fn oattr_dir(root: &Path, fsig: Sig128, oid: u64) -> PathBuf {
    root.join(fsig.to_hex()).join("oattr").join(format!("{oid:016x}"))
}

/// Append `record` to `fsig`'s `cache.log`, creating the directory and
/// file on first use. Each frame is `[u32 len][payload][u32 crc32]`.
///
/// # Errors
/// Returns an error on any I/O failure.
pub fn append(root: &Path, fsig: Sig128, record: &ObjectRecord) -> OcacheResult<()> {
    let path = log_path(root, fsig);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    let mut writer = BufWriter::new(file);

    let payload = serde_json::to_vec(&LogRecord {
        record: record.clone(),
    })
    .map_err(|e| OcacheError::LogCorrupt {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let len = u32::try_from(payload.len()).unwrap_or(u32::MAX);
    let crc = crc32fast::hash(&payload);

    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    writer.flush()?;
    Ok(())
}

/// Materialize a large output attribute under
/// `<root>/<hex_fsig>/oattr/<hex_oid>/<attrname>`.
///
/// # Errors
/// Returns an error on any I/O failure.
pub fn write_oattr(root: &Path, fsig: Sig128, oid: u64, name: &str, bytes: &[u8]) -> OcacheResult<()> {
    let dir = oattr_dir(root, fsig, oid);
    std::fs::create_dir_all(&dir)?;
    std::fs::write(dir.join(name), bytes)?;
    Ok(())
}

/// Reload every intact record from `fsig`'s `cache.log`. A corrupt or
/// truncated trailing frame is dropped; the log is truncated to the last
/// good frame boundary so future appends don't leave a gap, and a warning
/// is logged.
///
/// # Errors
/// Returns an error on any I/O failure other than frame-level corruption.
pub fn reload(root: &Path, fsig: Sig128) -> OcacheResult<Vec<ObjectRecord>> {
    let path = log_path(root, fsig);
    let Ok(file) = File::open(&path) else {
        return Ok(Vec::new());
    };
    let mut reader = BufReader::new(file);
    let mut records = Vec::new();
    let mut good_up_to: u64 = 0;

    loop {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_le_bytes(len_buf) as usize;

        let mut payload = vec![0u8; len];
        if reader.read_exact(&mut payload).is_err() {
            warn!(path = %path.display(), "cache.log truncated mid-payload, discarding tail");
            break;
        }
        let mut crc_buf = [0u8; 4];
        if reader.read_exact(&mut crc_buf).is_err() {
            warn!(path = %path.display(), "cache.log truncated before checksum, discarding tail");
            break;
        }
        let expected_crc = u32::from_le_bytes(crc_buf);
        if crc32fast::hash(&payload) != expected_crc {
            warn!(path = %path.display(), "cache.log checksum mismatch, discarding tail");
            break;
        }
        match serde_json::from_slice::<LogRecord>(&payload) {
            Ok(entry) => {
                records.push(entry.record);
                good_up_to += 4 + len as u64 + 4;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cache.log payload undeserializable, discarding tail");
                break;
            }
        }
    }

    truncate_to(&path, good_up_to)?;
    Ok(records)
}

fn truncate_to(path: &Path, len: u64) -> OcacheResult<()> {
    let current_len = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    if current_len > len {
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(len)?;
        let mut file = file;
        file.seek(SeekFrom::End(0))?;
    }
    Ok(())
}
