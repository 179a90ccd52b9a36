//! Backing-file handling for the shared record.
use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use memmap2::MmapRaw;

use crate::connection::SetupError;
use crate::name::{Config, ConnectionKey};
use crate::record::{Record, RECORD_LEN};

/// A shared mapping of one connection record.
///
/// The mapping, not the file descriptor, is the live handle: the descriptor
/// is closed as soon as the map exists, and the map is released on drop.
pub(crate) struct MappedRecord {
    map: MmapRaw,
}

impl MappedRecord {
    /// Open the backing file and map it shared.
    ///
    /// With `create`, a missing file is allocated and reads as an all-zero
    /// record; an existing file keeps its content, which is how a restarted
    /// process resumes where its predecessor stopped. The file is forced to
    /// exactly the record size either way.
    pub fn open(path: &Path, create: bool) -> Result<Self, SetupError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .mode(0o600)
            .open(path)
            .map_err(SetupError::Open)?;

        file.set_len(RECORD_LEN as u64).map_err(SetupError::Size)?;

        let map = MmapRaw::map_raw(&file).map_err(SetupError::Map)?;
        // `file` drops here; the kernel keeps the pages alive through the
        // mapping.
        Ok(MappedRecord { map })
    }

    pub fn record(&self) -> &Record {
        // Safety: the mapping is `RECORD_LEN` bytes (enforced by `set_len`
        // before mapping), page alignment exceeds the record's, and the
        // record consists of full atomics so the shared reference carries no
        // uniqueness requirement. File pages read as initialized (zero on
        // fresh allocation). The reference cannot outlive `self`, which owns
        // the map.
        unsafe { &*(self.map.as_ptr() as *const Record) }
    }
}

/// Remove both backing files of a connection.
///
/// Independent of any handle; an administrative process may call this with
/// nothing but the key. Files already gone are not an error; the point is
/// that they no longer exist.
pub fn destroy(config: &Config, key: &ConnectionKey) -> io::Result<()> {
    tracing::debug!(key = ?key, "destroying connection state");
    remove_if_present(&config.state_path(key))?;
    remove_if_present(&config.control_path(key))
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}
