//! The control channel.
//!
//! A one-directional, best-effort wake-up from the application role to the
//! filter role: "re-read the checkpoint block, something changed". The
//! datagram payload is fixed and ignored; its arrival is the whole signal.
//! Nothing is acknowledged, queued, or retried. A filter must behave
//! correctly under duplicated, lost, or never-sent notifications, because
//! the shared record is the authority and this channel is merely a hint to
//! look at it sooner.
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixDatagram;
use std::path::PathBuf;

/// What the application sends. Receivers never look at it.
const REQUEST: &[u8] = b"1\n";

/// One endpoint of the wake-up channel for a single connection.
pub struct ControlChannel {
    socket: UnixDatagram,
    /// The filesystem address the filter role binds and the application
    /// role sends to.
    endpoint: PathBuf,
}

impl ControlChannel {
    /// The application side: a socket that can only send.
    pub(crate) fn attach(endpoint: PathBuf) -> io::Result<Self> {
        // A too-long path would otherwise surface only at the first
        // notification, long after setup claimed success.
        ensure_addressable(&endpoint)?;
        let socket = UnixDatagram::unbound()?;
        Ok(ControlChannel { socket, endpoint })
    }

    /// The filter side: own the receiving endpoint.
    ///
    /// A stale endpoint file from a previous filter instance is removed
    /// first; two live filters per connection is a deployment error this
    /// layer cannot detect. The socket is left non-blocking since the filter
    /// folds it into its own poll loop.
    pub(crate) fn bind(endpoint: PathBuf) -> io::Result<Self> {
        ensure_addressable(&endpoint)?;
        match std::fs::remove_file(&endpoint) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => return Err(err),
            _ => {}
        }
        let socket = UnixDatagram::bind(&endpoint)?;
        socket.set_nonblocking(true)?;
        Ok(ControlChannel { socket, endpoint })
    }

    /// Ask the filter to re-read the checkpoint block soon.
    ///
    /// Fire-and-forget: an error means the datagram was not handed to the
    /// kernel (typically no filter is bound), and the caller decides whether
    /// that matters. Success promises nothing about when, or whether, the
    /// filter looks.
    pub fn request_update(&self) -> io::Result<()> {
        tracing::trace!(endpoint = %self.endpoint.display(), "requesting filter update");
        self.socket.send_to(REQUEST, &self.endpoint).map(drop)
    }

    /// Consume every pending wake-up, returning how many there were.
    ///
    /// The count carries no information beyond zero or not; callers re-read
    /// the record either way.
    pub fn drain_requests(&self) -> io::Result<usize> {
        let mut buffer = [0u8; 8];
        let mut count = 0;
        loop {
            match self.socket.recv(&mut buffer) {
                Ok(_) => count += 1,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(count),
                Err(err) => return Err(err),
            }
        }
    }
}

/// The receiving descriptor, for registration in a poll loop.
impl AsRawFd for ControlChannel {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

/// Reject paths that cannot be NUL-terminated into `sun_path`.
fn ensure_addressable(path: &std::path::Path) -> io::Result<()> {
    let capacity = {
        let probe: libc::sockaddr_un = unsafe { core::mem::zeroed() };
        probe.sun_path.len()
    };
    if path.as_os_str().as_bytes().len() >= capacity {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "control path exceeds the unix socket address limit",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_arrive_and_drain() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = dir.path().join("conn.ctl");

        let receiver = ControlChannel::bind(endpoint.clone()).unwrap();
        let sender = ControlChannel::attach(endpoint).unwrap();

        assert_eq!(receiver.drain_requests().unwrap(), 0);

        sender.request_update().unwrap();
        sender.request_update().unwrap();
        assert_eq!(receiver.drain_requests().unwrap(), 2);
        assert_eq!(receiver.drain_requests().unwrap(), 0);
    }

    #[test]
    fn send_without_receiver_fails_once() {
        let dir = tempfile::tempdir().unwrap();
        let sender = ControlChannel::attach(dir.path().join("nobody.ctl")).unwrap();

        assert!(sender.request_update().is_err());
        // Still fire-and-forget afterwards, no sticky state.
        assert!(sender.request_update().is_err());
    }

    #[test]
    fn bind_replaces_a_stale_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = dir.path().join("conn.ctl");

        let first = ControlChannel::bind(endpoint.clone()).unwrap();
        drop(first);
        // The previous instance's socket file is still on disk.
        let second = ControlChannel::bind(endpoint.clone()).unwrap();

        let sender = ControlChannel::attach(endpoint).unwrap();
        sender.request_update().unwrap();
        assert_eq!(second.drain_requests().unwrap(), 1);
    }

    #[test]
    fn unaddressable_path_is_rejected_at_setup() {
        let long = PathBuf::from(format!("/tmp/{}.ctl", "x".repeat(200)));
        assert!(ControlChannel::attach(long).is_err());
    }
}
