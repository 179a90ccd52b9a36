//! Rendezvous naming.
//!
//! Any process knowing a connection's key derives the same two backing
//! paths, with no coordination beyond agreeing on a [`Config`]. The state
//! file holds the shared record, the control file is the datagram endpoint
//! for wake-ups.
use std::net::IpAddr;
use std::path::PathBuf;

/// Identifies one protected TCP connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    /// The remote endpoint's address.
    pub peer: IpAddr,
    /// The remote endpoint's port, host order.
    pub peer_port: u16,
    /// The protected application's local port, host order.
    pub port: u16,
}

/// Where the backing files live and what they are called.
///
/// Injected by the embedding process at startup; both sides of a connection
/// must agree on it, the same way they agree on the key. The default mirrors
/// the conventional deployment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Directory holding all state and control files.
    pub dir: PathBuf,
    /// Leading component of every derived file name.
    pub prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            dir: PathBuf::from("/var/tmp"),
            prefix: String::from("tcpr"),
        }
    }
}

impl Config {
    /// The path of the shared record's backing file.
    pub fn state_path(&self, key: &ConnectionKey) -> PathBuf {
        self.path(key, "state")
    }

    /// The path of the control channel endpoint.
    pub fn control_path(&self, key: &ConnectionKey) -> PathBuf {
        self.path(key, "ctl")
    }

    fn path(&self, key: &ConnectionKey, suffix: &str) -> PathBuf {
        // `IpAddr` displays in presentation form, so distinct keys can not
        // collide: the two ports are delimited and an address never contains
        // a dash.
        self.dir.join(format!(
            "{}-{}-{}-{}.{}",
            self.prefix, key.peer, key.peer_port, key.port, suffix,
        ))
    }
}
