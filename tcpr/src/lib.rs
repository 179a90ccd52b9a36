//! Keep a TCP connection alive across a crash of the endpoint that owns it.
//!
//! An in-path filter rewrites the connection's segments and observes its
//! progress; the protected application acknowledges input it has durably
//! processed and releases output the peer has acknowledged. The two meet in
//! a fixed-size [`Record`] mapped shared from a file both can name, plus a
//! best-effort datagram wake-up from application to filter. Should the
//! application crash, a successor attaches to the same record, or recovers
//! a saved checkpoint into a fresh one on another machine, and the peer
//! never notices.
//!
//! ## This is not a lock
//!
//! No operation here takes one, and none is available. The record is
//! partitioned into a filter-owned and an application-owned field group;
//! each group has exactly one writing role, enforced by handing out two
//! distinct write capabilities ([`FilterHalf`], [`ApplicationHalf`]) rather
//! than one mutable view. Cross-group reads see whatever is there at the
//! moment. Individual fields are atomic, so no read is torn, but there is no
//! ordering between fields. Code needing "the checkpoint as of now" must be
//! correct for any interleaving, which the checkpoint semantics are: every
//! committed low-water-mark is valid forever after.
//!
//! The control channel never carries data, only the advice to look at the
//! record again. Losing every notification costs latency, not correctness.
mod connection;
mod control;
mod migrate;
mod name;
mod record;
mod store;

pub use connection::{Connection, Setup, SetupError, DONE_POLL_INTERVAL};
pub use control::ControlChannel;
pub use name::{Config, ConnectionKey};
pub use record::{ApplicationHalf, FilterHalf, Record, CHECKPOINT_LEN, RECORD_LEN};
pub use store::destroy;
