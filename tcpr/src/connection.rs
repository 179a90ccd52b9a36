//! The per-process connection handle and the checkpoint operations.
use std::io;
use std::time::{Duration, Instant};

use crate::control::ControlChannel;
use crate::name::{Config, ConnectionKey};
use crate::record::{ApplicationHalf, FilterHalf, Record};
use crate::store::MappedRecord;

bitflags::bitflags! {
    /// Options for [`Connection::setup`].
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Setup: u32 {
        /// Allocate the backing state file if it does not exist yet. Used
        /// when a connection is first seen, or when recovering one into a
        /// fresh record.
        const CREATE = 1 << 0;
        /// Act in the filter role: own the receiving end of the control
        /// channel and the write capability for the live wire state.
        const FILTER = 1 << 1;
    }
}

/// How often a blocked [`Connection::wait`] re-reads the `done` flag.
pub const DONE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Why a setup attempt failed.
///
/// Each variant names the step that failed; nothing is retried and no
/// partially initialized handle is ever returned.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("opening the state file")]
    Open(#[source] io::Error),
    #[error("sizing the state file")]
    Size(#[source] io::Error),
    #[error("mapping the state file")]
    Map(#[source] io::Error),
    #[error("creating the control socket")]
    Socket(#[source] io::Error),
    #[error("binding the control endpoint")]
    Bind(#[source] io::Error),
}

/// A process-local handle on one protected connection.
///
/// Owns a shared mapping of the record and one end of the control channel.
/// Never shared between processes; every participant sets up its own. Torn
/// down either explicitly through [`Self::teardown`] or on drop.
pub struct Connection {
    state: Option<MappedRecord>,
    control: Option<ControlChannel>,
    flags: Setup,
}

impl Connection {
    /// Attach to (or create) the state of the connection identified by
    /// `key`, with paths derived through `config`.
    ///
    /// On any failure everything already acquired is released again: a
    /// failed state mapping closes the control socket, and in the filter
    /// role also removes the endpoint file it had just bound.
    pub fn setup(config: &Config, key: &ConnectionKey, flags: Setup) -> Result<Self, SetupError> {
        let control_path = config.control_path(key);
        let control = if flags.contains(Setup::FILTER) {
            ControlChannel::bind(control_path.clone()).map_err(SetupError::Bind)?
        } else {
            ControlChannel::attach(control_path.clone()).map_err(SetupError::Socket)?
        };

        let state = match MappedRecord::open(
            &config.state_path(key),
            flags.contains(Setup::CREATE),
        ) {
            Ok(state) => state,
            Err(err) => {
                if flags.contains(Setup::FILTER) {
                    let _ = std::fs::remove_file(&control_path);
                }
                return Err(err);
            }
        };

        tracing::debug!(key = ?key, flags = ?flags, "connection state attached");
        Ok(Connection {
            state: Some(state),
            control: Some(control),
            flags,
        })
    }

    /// The shared record, readable by every role.
    ///
    /// # Panics
    ///
    /// After [`Self::teardown`]; a torn-down handle is done for good.
    pub fn record(&self) -> &Record {
        self.state
            .as_ref()
            .expect("connection handle was torn down")
            .record()
    }

    /// The application's write capability over the checkpoint block.
    pub fn application(&self) -> ApplicationHalf<'_> {
        ApplicationHalf {
            record: self.record(),
        }
    }

    /// The filter's write capability over the live wire state, present only
    /// on handles set up with [`Setup::FILTER`].
    pub fn filter(&self) -> Option<FilterHalf<'_>> {
        self.flags.contains(Setup::FILTER).then(|| FilterHalf {
            record: self.record(),
        })
    }

    /// The control channel endpoint of this handle.
    pub fn control(&self) -> &ControlChannel {
        self.control
            .as_ref()
            .expect("connection handle was torn down")
    }

    /// Output bytes the application must still be able to retransmit.
    pub fn output_bytes(&self) -> u32 {
        let record = self.record();
        record.peer_ack().wrapping_sub(record.safe())
    }

    /// Input bytes accepted from the peer but not yet durably processed.
    pub fn input_bytes(&self) -> u32 {
        let record = self.record();
        record.ack().wrapping_sub(record.saved_ack())
    }

    /// Record that `bytes` more output no longer needs retransmission
    /// support.
    ///
    /// No notification: the filter never needs this value proactively. The
    /// caller keeps `bytes` within [`Self::output_bytes`]; the engine does
    /// not check.
    pub fn checkpoint_output(&self, bytes: u32) {
        self.application().advance_safe(bytes);
    }

    /// Record that `bytes` more input has been durably processed, and
    /// request that the filter take note.
    ///
    /// The new low-water-mark changes what the filter may discard, hence the
    /// wake-up. The caller keeps `bytes` within [`Self::input_bytes`].
    pub fn checkpoint_input(&self, bytes: u32) -> io::Result<()> {
        self.application().advance_ack(bytes);
        self.control().request_update()
    }

    /// The application will write no more.
    pub fn shutdown_output(&self) {
        self.application().set_done_writing();
    }

    /// The application will read no more; the filter is asked to take note
    /// immediately.
    pub fn shutdown_input(&self) -> io::Result<()> {
        self.application().set_done_reading();
        self.control().request_update()
    }

    /// Shut down both directions. Exactly one notification is sent, by the
    /// input half.
    pub fn close(&self) -> io::Result<()> {
        self.shutdown_output();
        self.shutdown_input()
    }

    /// Block until the filter marks the connection fully closed.
    ///
    /// Polls the record every [`DONE_POLL_INTERVAL`]; there is no timeout
    /// and no cancellation short of process exit. See [`Self::wait_timeout`]
    /// for a bounded wait.
    pub fn wait(&self) {
        while !self.record().done() {
            std::thread::sleep(DONE_POLL_INTERVAL);
        }
    }

    /// Like [`Self::wait`], but give up after `limit`.
    ///
    /// Returns whether `done` was observed. An external writer setting the
    /// flag is noticed within one poll interval.
    pub fn wait_timeout(&self, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            if self.record().done() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(DONE_POLL_INTERVAL.min(deadline - now));
        }
    }

    /// Release the mapping and the control socket.
    ///
    /// Idempotent: each part is released at most once, and calling this
    /// again, or dropping the handle afterwards, is a no-op. The backing
    /// files stay; removing them is [`destroy`](crate::destroy)'s job.
    pub fn teardown(&mut self) {
        let state = self.state.take();
        let control = self.control.take();
        if state.is_some() || control.is_some() {
            tracing::debug!("connection handle torn down");
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.teardown();
    }
}
