//! The shared connection record.
//!
//! One fixed-size record per protected connection, mapped `MAP_SHARED` into
//! every process that touches it. There is no lock anywhere in the record;
//! consistency rests on the convention that each field group has exactly one
//! writing role. The filter owns the live wire state, the application owns
//! the checkpoint block. Reads across the boundary are permitted and may
//! observe values mid-update.
//!
//! Every field is an atomic and every access uses relaxed ordering. That
//! rules out torn reads of the individual 16/32-bit fields but is *not* an
//! ordering contract between fields; a reader combining two fields must
//! tolerate any interleaving. The control channel wake-up is advisory, the
//! record itself is the authority.
//!
//! Wire-number fields (`seq`, `ack`, `fin`, `win` and their peer
//! counterparts, plus the checkpointed `ack` and `safe`) are stored in
//! network byte order so that the filter can move them to and from segment
//! headers without conversion. Accessors on this type convert to host order;
//! `delta` and the negotiated peer options are kept in host order.
use core::sync::atomic::{AtomicU16, AtomicU32, AtomicU8, Ordering};

/// Byte size of the record, and of its backing file.
pub const RECORD_LEN: usize = core::mem::size_of::<Record>();

/// Byte size of the checkpoint block, the unit moved by save and recover.
pub const CHECKPOINT_LEN: usize = core::mem::size_of::<Checkpoint>();

/// The record layout is shared between independently compiled processes and
/// written to migration images; it must not drift.
const _: () = assert!(RECORD_LEN == 48);
const _: () = assert!(CHECKPOINT_LEN == 16);

/// State shared for one protected connection.
///
/// A freshly created backing file reads as all zeroes, which is exactly the
/// initial state of every field: no sequence numbers observed, no options
/// negotiated, nothing checkpointed, not done.
#[derive(Default)]
#[repr(C)]
pub struct Record {
    saved: Checkpoint,
    seq: AtomicU32,
    ack: AtomicU32,
    fin: AtomicU32,
    delta: AtomicU32,
    win: AtomicU16,
    have_fin: AtomicU8,
    done: AtomicU8,
    peer: PeerLive,
}

/// The application-owned checkpoint block.
///
/// This is the durable, portable part of the record: the low-water-marks of
/// processed input and retransmittable output, the peer options captured at
/// connection start, and the local half-close flags. Its in-memory bytes are
/// identical to the save/recover image.
#[derive(Default)]
#[repr(C)]
struct Checkpoint {
    peer: PeerOptions,
    /// Input is durably processed up to here. Network byte order.
    ack: AtomicU32,
    /// Output up to here no longer needs retransmission support. Network
    /// byte order.
    safe: AtomicU32,
    done_reading: AtomicU8,
    done_writing: AtomicU8,
    /// Keeps the block at its image size without implicit padding.
    #[allow(dead_code)]
    reserved: [u8; 2],
}

/// Peer options negotiated once at connection start. Host byte order.
#[derive(Default)]
#[repr(C)]
struct PeerOptions {
    mss: AtomicU16,
    /// Window scale shift plus one; zero means not negotiated.
    ws: AtomicU8,
    sack_permitted: AtomicU8,
}

/// The filter-owned view of the peer's live progress.
#[derive(Default)]
#[repr(C)]
struct PeerLive {
    ack: AtomicU32,
    fin: AtomicU32,
    win: AtomicU16,
    have_ack: AtomicU8,
    have_fin: AtomicU8,
}

fn get32(field: &AtomicU32) -> u32 {
    u32::from_be(field.load(Ordering::Relaxed))
}

fn set32(field: &AtomicU32, value: u32) {
    field.store(value.to_be(), Ordering::Relaxed);
}

fn get16(field: &AtomicU16) -> u16 {
    u16::from_be(field.load(Ordering::Relaxed))
}

fn set16(field: &AtomicU16, value: u16) {
    field.store(value.to_be(), Ordering::Relaxed);
}

fn get_flag(field: &AtomicU8) -> bool {
    field.load(Ordering::Relaxed) != 0
}

fn set_flag(field: &AtomicU8) {
    field.store(1, Ordering::Relaxed);
}

/// Read accessors, available to every role.
impl Record {
    /// The next byte the filter will send. Host order.
    pub fn seq(&self) -> u32 {
        get32(&self.seq)
    }

    /// The next byte expected from the peer, as acknowledged on the wire.
    pub fn ack(&self) -> u32 {
        get32(&self.ack)
    }

    /// The sequence number at which the local side closed its sending
    /// direction. Meaningful only when [`Self::have_fin`] is set.
    pub fn fin(&self) -> u32 {
        get32(&self.fin)
    }

    pub fn have_fin(&self) -> bool {
        get_flag(&self.have_fin)
    }

    /// The sequence translation offset applied when rewriting segments.
    pub fn delta(&self) -> u32 {
        self.delta.load(Ordering::Relaxed)
    }

    /// The advertised receive window.
    pub fn win(&self) -> u16 {
        get16(&self.win)
    }

    /// True once the connection is fully and safely closed on both sides.
    /// Transitions false to true exactly once and never reverts.
    pub fn done(&self) -> bool {
        get_flag(&self.done)
    }

    /// The peer's acknowledgment progress as observed by the filter.
    pub fn peer_ack(&self) -> u32 {
        get32(&self.peer.ack)
    }

    pub fn peer_have_ack(&self) -> bool {
        get_flag(&self.peer.have_ack)
    }

    pub fn peer_fin(&self) -> u32 {
        get32(&self.peer.fin)
    }

    pub fn peer_have_fin(&self) -> bool {
        get_flag(&self.peer.have_fin)
    }

    pub fn peer_win(&self) -> u16 {
        get16(&self.peer.win)
    }

    /// The checkpointed input low-water-mark.
    pub fn saved_ack(&self) -> u32 {
        get32(&self.saved.ack)
    }

    /// The checkpointed output low-water-mark.
    pub fn safe(&self) -> u32 {
        get32(&self.saved.safe)
    }

    /// The peer's maximum segment size, if it was captured.
    pub fn peer_mss(&self) -> Option<u16> {
        match self.saved.peer.mss.load(Ordering::Relaxed) {
            0 => None,
            mss => Some(mss),
        }
    }

    /// The peer's window scale shift, if one was negotiated.
    pub fn peer_ws(&self) -> Option<u8> {
        self.saved.peer.ws.load(Ordering::Relaxed).checked_sub(1)
    }

    pub fn peer_sack_permitted(&self) -> bool {
        get_flag(&self.saved.peer.sack_permitted)
    }

    pub fn done_reading(&self) -> bool {
        get_flag(&self.saved.done_reading)
    }

    pub fn done_writing(&self) -> bool {
        get_flag(&self.saved.done_writing)
    }

    /// Copy the checkpoint block out, byte for byte as it sits in the
    /// record. This is the migration image.
    pub fn checkpoint_image(&self) -> [u8; CHECKPOINT_LEN] {
        let saved = &self.saved;
        let mut image = [0; CHECKPOINT_LEN];
        image[0..2].copy_from_slice(&saved.peer.mss.load(Ordering::Relaxed).to_ne_bytes());
        image[2] = saved.peer.ws.load(Ordering::Relaxed);
        image[3] = saved.peer.sack_permitted.load(Ordering::Relaxed);
        image[4..8].copy_from_slice(&saved.ack.load(Ordering::Relaxed).to_ne_bytes());
        image[8..12].copy_from_slice(&saved.safe.load(Ordering::Relaxed).to_ne_bytes());
        image[12] = saved.done_reading.load(Ordering::Relaxed);
        image[13] = saved.done_writing.load(Ordering::Relaxed);
        image
    }
}

/// Write capability over the application-owned checkpoint block.
///
/// Handed out by the connection handle; the only way to mutate the
/// checkpoint fields. Holding one does not permit touching the live wire
/// state, keeping the single-writer-per-group convention a type-level
/// property instead of a comment.
pub struct ApplicationHalf<'lt> {
    pub(crate) record: &'lt Record,
}

impl ApplicationHalf<'_> {
    /// Advance the input low-water-mark by `bytes` of sequence space.
    ///
    /// The caller is trusted to keep the result at or below the live `ack`;
    /// no bound is checked here.
    pub fn advance_ack(&self, bytes: u32) {
        let saved = &self.record.saved;
        set32(&saved.ack, get32(&saved.ack).wrapping_add(bytes));
    }

    /// Advance the output low-water-mark by `bytes` of sequence space.
    ///
    /// As with [`Self::advance_ack`], the caller clamps.
    pub fn advance_safe(&self, bytes: u32) {
        let saved = &self.record.saved;
        set32(&saved.safe, get32(&saved.safe).wrapping_add(bytes));
    }

    pub fn set_done_reading(&self) {
        set_flag(&self.record.saved.done_reading);
    }

    pub fn set_done_writing(&self) {
        set_flag(&self.record.saved.done_writing);
    }

    /// Capture the peer options negotiated at connection start.
    pub fn set_peer_options(&self, mss: u16, ws: Option<u8>, sack_permitted: bool) {
        let peer = &self.record.saved.peer;
        peer.mss.store(mss, Ordering::Relaxed);
        // Stored shifted so that zero keeps meaning "not negotiated".
        peer.ws
            .store(ws.map_or(0, |shift| shift + 1), Ordering::Relaxed);
        peer.sack_permitted
            .store(sack_permitted.into(), Ordering::Relaxed);
    }

    /// Overwrite the checkpoint block from a migration image.
    pub fn apply_image(&self, image: &[u8; CHECKPOINT_LEN]) {
        let saved = &self.record.saved;
        let ne16 = |bytes: &[u8]| u16::from_ne_bytes(bytes.try_into().expect("two image bytes"));
        let ne32 = |bytes: &[u8]| u32::from_ne_bytes(bytes.try_into().expect("four image bytes"));
        saved.peer.mss.store(ne16(&image[0..2]), Ordering::Relaxed);
        saved.peer.ws.store(image[2], Ordering::Relaxed);
        saved.peer.sack_permitted.store(image[3], Ordering::Relaxed);
        saved.ack.store(ne32(&image[4..8]), Ordering::Relaxed);
        saved.safe.store(ne32(&image[8..12]), Ordering::Relaxed);
        saved.done_reading.store(image[12], Ordering::Relaxed);
        saved.done_writing.store(image[13], Ordering::Relaxed);
    }
}

impl core::ops::Deref for ApplicationHalf<'_> {
    type Target = Record;

    fn deref(&self) -> &Record {
        self.record
    }
}

/// Write capability over the filter-owned live state.
///
/// Only a connection set up with the filter flag yields one. The in-path
/// filter drives these fields from its wire observations; tests use the same
/// surface to play the filter's part.
pub struct FilterHalf<'lt> {
    pub(crate) record: &'lt Record,
}

impl FilterHalf<'_> {
    pub fn set_seq(&self, seq: u32) {
        set32(&self.record.seq, seq);
    }

    pub fn set_ack(&self, ack: u32) {
        set32(&self.record.ack, ack);
    }

    pub fn set_fin(&self, fin: u32) {
        set32(&self.record.fin, fin);
        set_flag(&self.record.have_fin);
    }

    pub fn set_delta(&self, delta: u32) {
        self.record.delta.store(delta, Ordering::Relaxed);
    }

    pub fn set_win(&self, win: u16) {
        set16(&self.record.win, win);
    }

    pub fn set_peer_ack(&self, ack: u32) {
        set32(&self.record.peer.ack, ack);
        set_flag(&self.record.peer.have_ack);
    }

    pub fn set_peer_fin(&self, fin: u32) {
        set32(&self.record.peer.fin, fin);
        set_flag(&self.record.peer.have_fin);
    }

    pub fn set_peer_win(&self, win: u16) {
        set16(&self.record.peer.win, win);
    }

    /// Mark the connection fully closed. One-way; there is no way back to
    /// the open state within a record's lifetime.
    pub fn set_done(&self) {
        set_flag(&self.record.done);
    }
}

impl core::ops::Deref for FilterHalf<'_> {
    type Target = Record;

    fn deref(&self) -> &Record {
        self.record
    }
}
