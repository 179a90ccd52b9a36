//! Moving a checkpoint between records.
//!
//! Only the application-owned checkpoint block is portable. The live wire
//! state is useless on another host, where a filter instance rebuilds it
//! from its own observations, so save and recover deliberately shuttle
//! just the durable 16 bytes, to and from whatever byte sink the caller
//! provides.
use std::io::{Read, Write};

use crate::connection::Connection;
use crate::record::CHECKPOINT_LEN;

impl Connection {
    /// Write the checkpoint block to `sink`, byte for byte as it sits in
    /// the record.
    pub fn save<W: Write>(&self, mut sink: W) -> std::io::Result<()> {
        sink.write_all(&self.record().checkpoint_image())
    }

    /// Read a checkpoint block from `source` into this record.
    ///
    /// Meant for a record freshly created with
    /// [`Setup::CREATE`](crate::Setup::CREATE) before the application
    /// resumes; the filter-owned fields keep their all-zero starting state.
    pub fn recover<R: Read>(&self, mut source: R) -> std::io::Result<()> {
        let mut image = [0; CHECKPOINT_LEN];
        source.read_exact(&mut image)?;
        self.application().apply_image(&image);
        Ok(())
    }
}
