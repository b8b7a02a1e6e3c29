//! Frame storage for pre-roll capture.
//!
//! - `Frame`: owned RGB24 bitmap. Sources refill a single `Frame` on every read.
//! - `BufferedFrame`: immutable copy of a `Frame`, owned by the ring until evicted.
//! - `FrameRing`: bounded ring of the most recent frames plus the writable flag
//!   that keeps flushes mutually exclusive.
//! - `Snapshot`: insertion-ordered view of the ring, taken under a brief lock.
//!
//! Buffered frames are never written after they are linked into the ring. A push
//! replaces the shared handle stored in a slot; it never writes through it. That is
//! what lets a flush encode from a snapshot without holding the ring lock.

use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

// ----------------------------------------------------------------------------
// Frame: owned RGB24 bitmap
// ----------------------------------------------------------------------------

/// Owned RGB24 frame.
///
/// `Clone` is a deep copy; the ring relies on that when it buffers a frame the
/// source is about to overwrite.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl Frame {
    /// Build a frame from packed RGB24 pixels.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// A frame with no pixels. Sources report these as transient misses.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Overwrite this frame in place, reusing the allocation.
    pub fn fill_from(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<()> {
        let expected = rgb_len(width, height)?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        self.data.clear();
        self.data.extend_from_slice(pixels);
        self.width = width;
        self.height = height;
        Ok(())
    }

    /// Drop the pixels but keep the allocation for the next read.
    pub fn clear(&mut self) {
        self.data.clear();
        self.width = 0;
        self.height = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty() || self.width == 0 || self.height == 0
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

/// Number of bytes in a packed RGB24 image of the given size.
pub fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

// ----------------------------------------------------------------------------
// BufferedFrame: immutable ring entry
// ----------------------------------------------------------------------------

/// A frame copied into the ring.
///
/// There is no mutable accessor. `seq` is assigned by the ring in push order and
/// identifies the entry across snapshots.
#[derive(Debug)]
pub struct BufferedFrame {
    seq: u64,
    frame: Frame,
}

impl BufferedFrame {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }
}

// ----------------------------------------------------------------------------
// FrameRing: bounded ring with flush exclusivity
// ----------------------------------------------------------------------------

/// Bounded ring of the most recent frames.
///
/// Slots form a fixed arena indexed by `head` (oldest) and `tail` (newest). Once
/// the ring is full every push rewrites the oldest slot and advances `head`.
///
/// Every field is guarded by one mutex; the writable flag in particular is only
/// ever checked and set inside a single critical section.
pub struct FrameRing {
    state: Mutex<RingState>,
}

struct RingState {
    slots: Vec<Option<Arc<BufferedFrame>>>,
    head: usize,
    tail: usize,
    len: usize,
    writable: bool,
    next_seq: u64,
}

impl FrameRing {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(anyhow!("frame ring capacity must be at least 1"));
        }
        Ok(Self {
            state: Mutex::new(RingState {
                slots: vec![None; capacity],
                head: 0,
                tail: 0,
                len: 0,
                writable: true,
                next_seq: 0,
            }),
        })
    }

    /// Ring sized to hold `window` worth of frames at `fps`.
    pub fn for_window(fps: f64, window: Duration) -> Result<Self> {
        Self::new(window_capacity(fps, window)?)
    }

    /// Copy `frame` in as the new tail, evicting the oldest frame when full.
    ///
    /// Returns the sequence number assigned to the buffered copy.
    pub fn push(&self, frame: &Frame) -> u64 {
        // Copy before taking the lock so the critical section stays O(1).
        let copy = frame.clone();

        let mut state = self.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        let node = Arc::new(BufferedFrame { seq, frame: copy });

        let capacity = state.slots.len();
        if state.len == 0 {
            state.head = 0;
            state.tail = 0;
            state.slots[0] = Some(node);
            state.len = 1;
            return seq;
        }

        let next = (state.tail + 1) % capacity;
        state.slots[next] = Some(node);
        state.tail = next;
        if state.len < capacity {
            state.len += 1;
        } else {
            state.head = (state.head + 1) % capacity;
        }
        seq
    }

    /// Oldest buffered frame.
    pub fn first(&self) -> Option<Arc<BufferedFrame>> {
        let state = self.lock();
        if state.len == 0 {
            return None;
        }
        state.slots[state.head].clone()
    }

    /// Newest buffered frame.
    pub fn last(&self) -> Option<Arc<BufferedFrame>> {
        let state = self.lock();
        if state.len == 0 {
            return None;
        }
        state.slots[state.tail].clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().slots.len()
    }

    /// Total frames ever pushed.
    pub fn frames_pushed(&self) -> u64 {
        self.lock().next_seq
    }

    /// True unless a flush is in progress.
    pub fn is_writable(&self) -> bool {
        self.lock().writable
    }

    /// Claim the ring for a flush.
    ///
    /// Returns false when another flush already holds it.
    pub fn try_begin_flush(&self) -> bool {
        let mut state = self.lock();
        if !state.writable {
            return false;
        }
        state.writable = false;
        true
    }

    /// Release a flush claim.
    pub fn end_flush(&self) {
        self.lock().writable = true;
    }

    /// Ordered copy of the frame handles currently buffered.
    pub fn snapshot(&self) -> Snapshot {
        let state = self.lock();
        Snapshot {
            frames: state.ordered(),
        }
    }

    /// Take a snapshot and release the flush claim in the same critical section.
    pub fn snapshot_and_release(&self) -> Snapshot {
        let mut state = self.lock();
        let frames = state.ordered();
        state.writable = true;
        Snapshot { frames }
    }

    /// Approximate pixel memory held by the ring.
    pub fn memory_bytes(&self) -> usize {
        let state = self.lock();
        state
            .slots
            .iter()
            .flatten()
            .map(|node| node.frame.byte_len())
            .sum()
    }

    fn lock(&self) -> MutexGuard<'_, RingState> {
        // Critical sections never panic midway, so a poisoned guard still holds
        // consistent indices.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RingState {
    fn ordered(&self) -> Vec<Arc<BufferedFrame>> {
        let capacity = self.slots.len();
        (0..self.len)
            .filter_map(|i| self.slots[(self.head + i) % capacity].clone())
            .collect()
    }
}

/// Upper bound on ring capacity. Every slot may hold a full frame.
pub const MAX_RING_FRAMES: usize = 100_000;

/// Frames needed to cover `window` at `fps`, rounded, never below one.
pub fn window_capacity(fps: f64, window: Duration) -> Result<usize> {
    if !fps.is_finite() || fps <= 0.0 {
        return Err(anyhow!("frame rate must be positive, got {}", fps));
    }
    if window.is_zero() {
        return Err(anyhow!("recording window must be greater than zero"));
    }
    let frames = (fps * window.as_secs_f64()).round();
    if !frames.is_finite() || frames > MAX_RING_FRAMES as f64 {
        return Err(anyhow!(
            "{:.1}s at {} fps needs more than {} buffered frames",
            window.as_secs_f64(),
            fps,
            MAX_RING_FRAMES
        ));
    }
    Ok((frames as usize).max(1))
}

// ----------------------------------------------------------------------------
// Snapshot
// ----------------------------------------------------------------------------

/// Frames present in the ring at one instant, oldest first.
///
/// Iterating does not consume the snapshot, so it can be walked more than once.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    frames: Vec<Arc<BufferedFrame>>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn first(&self) -> Option<&BufferedFrame> {
        self.frames.first().map(|node| node.as_ref())
    }

    /// Dimensions of the first frame; used to open the sink.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.first()
            .map(|node| (node.frame.width(), node.frame.height()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &BufferedFrame> + '_ {
        self.frames.iter().map(|node| node.as_ref())
    }

    pub fn seqs(&self) -> Vec<u64> {
        self.iter().map(BufferedFrame::seq).collect()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
