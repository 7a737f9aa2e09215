//! Framed event records on top of [`RingRegion`].
//!
//! # Frame layout
//! ```text
//! [ marker: u32 = 0xFFFF_FFFF ][ event_id: u32 ][ data_len: u32 ][ data ][ 0x00 * padding ]
//! ```
//! Header words are native-endian; the layout only has to agree with itself.
//!
//! # Placement
//! A frame is always written into one contiguous run. When the run from `head` to the end of
//! the arena is too short but the free bytes before `tail` are enough, that run is filled with
//! [`PADDING`] and committed, which wraps `head` to zero. The reader skips padding one byte at
//! a time; the marker's first byte is never [`PADDING`], so a frame always stops the skip.
//!
//! # Notes
//! - Trailing alignment padding is `frame_len % alignment` bytes and is not retired by `pop`;
//!   the next `get` skips it along with any wraparound padding.
//! - Wraparound pads the whole tail fragment even when the frame needs less than that.

use core::cell::Cell;
use core::marker::PhantomData;

use crate::lock::{ExclusiveLock, Lock, NoLock};
use crate::ring_region::RingRegion;
use crate::{Error, Result};

/// Sentinel written in front of every frame.
pub const MARKER: u32 = 0xFFFF_FFFF;
pub const MARKER_SIZE: u32 = 4;
/// `event_id` plus `data_len`.
pub const HEADER_SIZE: u32 = 8;
/// Bytes every frame carries besides its payload and padding.
pub const FRAME_OVERHEAD: u32 = MARKER_SIZE + HEADER_SIZE;
/// Filler byte for alignment and wraparound padding.
pub const PADDING: u8 = 0x00;

/// Bytes a payload of `payload_len` occupies in the ring, padding included.
/// `None` if that does not fit in a `u32`.
pub const fn frame_size(payload_len: usize, alignment: u32) -> Option<u32> {
    if payload_len > (u32::MAX - FRAME_OVERHEAD) as usize {
        return None;
    }
    let unpadded = FRAME_OVERHEAD + payload_len as u32;
    let padding = if alignment > 0 { unpadded % alignment } else { 0 };
    unpadded.checked_add(padding)
}

/// Queue construction parameters.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct QueueConfig {
    /// Padding granularity for frames; `0` disables alignment padding.
    pub alignment: u32,
    /// Update the occupancy counter with atomic read-modify-write operations.
    pub use_atomics: bool,
}

impl QueueConfig {
    pub const fn new() -> Self {
        Self {
            alignment: 0,
            use_atomics: true,
        }
    }

    pub const fn alignment(mut self, alignment: u32) -> Self {
        self.alignment = alignment;
        self
    }

    pub const fn use_atomics(mut self, use_atomics: bool) -> Self {
        self.use_atomics = use_atomics;
        self
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// An event as it sits in the ring. `data` borrows the arena directly.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Event<'q> {
    pub id: u32,
    pub data: &'q [u8],
}

impl Event<'_> {
    /// The `event_data_length` stored in the header.
    #[inline]
    pub fn len(&self) -> u32 {
        self.data.len() as u32
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Sequential writer over a reserved window. Panics instead of running past its end.
struct FrameWriter<'w> {
    buf: &'w mut [u8],
    pos: usize,
}

impl<'w> FrameWriter<'w> {
    fn new(buf: &'w mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn put_slice(&mut self, src: &[u8]) {
        assert!(
            src.len() <= self.remaining(),
            "frame overruns write window ({} bytes left, {} needed)",
            self.remaining(),
            src.len()
        );
        let end = self.pos + src.len();
        self.buf[self.pos..end].copy_from_slice(src);
        self.pos = end;
    }

    fn put_u32(&mut self, value: u32) {
        self.put_slice(&value.to_ne_bytes());
    }

    fn fill(&mut self, byte: u8, count: usize) {
        assert!(
            count <= self.remaining(),
            "padding overruns write window ({} bytes left, {} needed)",
            self.remaining(),
            count
        );
        let end = self.pos + count;
        self.buf[self.pos..end].fill(byte);
        self.pos = end;
    }

    fn written(&self) -> usize {
        self.pos
    }
}

#[inline]
fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[at..at + 4]);
    u32::from_ne_bytes(word)
}

/// # Safety
/// The caller must be the only producer of `region`.
unsafe fn put_frame(
    region: &RingRegion<'_>,
    alignment: u32,
    event_id: u32,
    data: &[u8],
) -> Result<()> {
    let frame = frame_size(data.len(), alignment).ok_or(Error::InsufficientSize)?;
    let data_len = data.len() as u32;
    let padding = frame - FRAME_OVERHEAD - data_len;

    let free = region.free_space();
    if free < frame {
        evq_trace!("event {} rejected: {} byte frame, {} bytes free", event_id, frame, free);
        return Err(Error::InsufficientSize);
    }

    let contiguous = region.contiguous_free_space();
    if contiguous < frame {
        // Free bytes before `tail`; a wrapped frame must fit there on its own.
        if free - contiguous < frame {
            evq_trace!(
                "event {} rejected: {} byte frame, {} contiguous and {} wrapped bytes free",
                event_id,
                frame,
                contiguous,
                free - contiguous
            );
            return Err(Error::InsufficientSize);
        }

        // SAFETY: sole producer, per this function's contract.
        if let Some((tail_fragment, _)) = unsafe { region.write_window_shared() } {
            debug_assert_eq!(tail_fragment.len() as u32, contiguous);
            tail_fragment.fill(PADDING);
        }
        // SAFETY: as above.
        unsafe { region.commit_write_shared(contiguous) };
        evq_debug!("padded {} bytes to wrap for event {}", contiguous, event_id);
    }

    // SAFETY: sole producer. An absent window leaves the writer empty, which panics below.
    let window: &mut [u8] = match unsafe { region.write_window_shared() } {
        Some((window, _)) => window,
        None => &mut [],
    };
    let mut writer = FrameWriter::new(window);
    writer.put_u32(MARKER);
    writer.put_u32(event_id);
    writer.put_u32(data_len);
    writer.put_slice(data);
    writer.fill(PADDING, padding as usize);
    debug_assert_eq!(writer.written(), frame as usize);

    // SAFETY: sole producer.
    unsafe { region.commit_write_shared(frame) };
    Ok(())
}

/// # Safety
/// The caller must be the only consumer of `region`.
unsafe fn peek_frame<'r>(region: &'r RingRegion<'_>) -> Option<Event<'r>> {
    let (window, available) = loop {
        // SAFETY: sole consumer, per this function's contract.
        let (window, available) = unsafe { region.read_window_shared() }?;
        if window[0] != PADDING {
            break (window, available);
        }
        // SAFETY: as above.
        unsafe { region.retire_read_shared(1) };
    };

    assert!(
        available >= FRAME_OVERHEAD,
        "truncated frame: {} bytes readable, {} required",
        available,
        FRAME_OVERHEAD
    );
    assert!(
        window.len() >= FRAME_OVERHEAD as usize,
        "frame header straddles the end of the arena"
    );
    let marker = read_u32(window, 0);
    assert_eq!(marker, MARKER, "event marker corrupted: {:#010x}", marker);

    let id = read_u32(window, MARKER_SIZE as usize);
    let data_len = read_u32(window, MARKER_SIZE as usize + 4) as usize;
    let start = FRAME_OVERHEAD as usize;
    assert!(
        data_len <= window.len() - start,
        "event {} payload of {} bytes runs past the read window",
        id,
        data_len
    );

    Some(Event {
        id,
        data: &window[start..start + data_len],
    })
}

/// # Safety
/// The caller must be the only consumer of `region`.
unsafe fn pop_frame(region: &RingRegion<'_>) -> bool {
    // SAFETY: sole consumer, per this function's contract.
    match unsafe { peek_frame(region) } {
        Some(event) => {
            let consumed = FRAME_OVERHEAD + event.len();
            // SAFETY: as above.
            unsafe { region.retire_read_shared(consumed) };
            true
        }
        None => false,
    }
}

/// Event queue over a caller-supplied byte arena.
///
/// Events handed out by [`get`](Self::get) borrow the queue, so the arena cannot be modified
/// while one is alive.
#[derive(Debug)]
pub struct FramedEventQueue<'a, L = NoLock> {
    region: RingRegion<'a>,
    alignment: u32,
    lock: L,
}

impl<'a> FramedEventQueue<'a, NoLock> {
    /// Zero `buffer` and build an empty queue over it.
    pub fn new(buffer: &'a mut [u8], config: QueueConfig) -> Result<Self> {
        Self::with_lock(buffer, config, NoLock)
    }
}

impl<'a, L: Lock> FramedEventQueue<'a, L> {
    /// Like [`new`](FramedEventQueue::new), holding `lock` around every `put`.
    pub fn with_lock(buffer: &'a mut [u8], config: QueueConfig, lock: L) -> Result<Self> {
        buffer.fill(0);
        let region = RingRegion::new(buffer, config.use_atomics)?;
        evq_debug!(
            "event queue: {} bytes, alignment {}, atomics {}",
            region.capacity(),
            config.alignment,
            config.use_atomics
        );
        Ok(Self {
            region,
            alignment: config.alignment,
            lock,
        })
    }

    /// Append an event.
    ///
    /// Fails with [`Error::InsufficientSize`] when the frame does not fit right now, or would
    /// not fit even in an empty queue. The queue is unchanged on failure.
    pub fn put(&mut self, event_id: u32, data: &[u8]) -> Result<()> {
        let region = &self.region;
        let alignment = self.alignment;
        // SAFETY: `&mut self` makes this the only producer.
        self.lock
            .with_lock(|| unsafe { put_frame(region, alignment, event_id, data) })
    }

    /// The oldest event, skipping any padding in front of it. `None` when empty.
    pub fn get(&mut self) -> Option<Event<'_>> {
        // SAFETY: `&mut self` makes this the only consumer.
        unsafe { peek_frame(&self.region) }
    }

    /// Drop the oldest event. Returns `false` if there was none.
    pub fn pop(&mut self) -> bool {
        // SAFETY: `&mut self` makes this the only consumer.
        unsafe { pop_frame(&self.region) }
    }

    /// Discard every stored event.
    pub fn clear(&mut self) {
        self.region.clear();
    }

    /// Hand out one producer and one consumer that may run on different contexts.
    ///
    /// Requires atomic mode; see [`set_atomic`](Self::set_atomic). When `L` is an
    /// [`ExclusiveLock`] the producer can be cloned for further producing contexts.
    pub fn split(&mut self) -> Result<(EventProducer<'_, 'a, L>, EventConsumer<'_, 'a>)> {
        if !self.region.is_atomic() {
            return Err(Error::AtomicsDisabled);
        }
        let producer = EventProducer {
            region: &self.region,
            alignment: self.alignment,
            lock: &self.lock,
            _not_sync: PhantomData,
        };
        let consumer = EventConsumer {
            region: &self.region,
        };
        Ok((producer, consumer))
    }

    #[inline]
    pub fn set_atomic(&mut self, atomic: bool) {
        self.region.set_atomic(atomic);
    }

    #[inline]
    pub fn alignment(&self) -> u32 {
        self.alignment
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.region.capacity()
    }

    /// Occupied bytes, framing and not-yet-skipped padding included.
    #[inline]
    pub fn fill_count(&self) -> u32 {
        self.region.fill_count()
    }

    #[inline]
    pub fn high_water_mark(&self) -> u32 {
        self.region.high_water_mark()
    }

    /// The underlying ring, for diagnostics.
    #[inline]
    pub fn region(&self) -> &RingRegion<'a> {
        &self.region
    }
}

/// Producer half of a split queue.
///
/// Not `Sync`: a producer is moved to its context, never shared. With an [`ExclusiveLock`]
/// it can be cloned, one clone per producing context.
#[derive(Debug)]
pub struct EventProducer<'q, 'a, L = NoLock> {
    region: &'q RingRegion<'a>,
    alignment: u32,
    lock: &'q L,
    _not_sync: PhantomData<Cell<()>>,
}

impl<L: Lock> EventProducer<'_, '_, L> {
    /// See [`FramedEventQueue::put`].
    pub fn put(&self, event_id: u32, data: &[u8]) -> Result<()> {
        let region = self.region;
        let alignment = self.alignment;
        // SAFETY: without an `ExclusiveLock` this handle is unique and confined to one context;
        // with one, the lock keeps clones from overlapping.
        self.lock
            .with_lock(|| unsafe { put_frame(region, alignment, event_id, data) })
    }

    #[inline]
    pub fn free_space(&self) -> u32 {
        self.region.free_space()
    }
}

impl<L: ExclusiveLock> Clone for EventProducer<'_, '_, L> {
    fn clone(&self) -> Self {
        Self {
            region: self.region,
            alignment: self.alignment,
            lock: self.lock,
            _not_sync: PhantomData,
        }
    }
}

/// Consumer half of a split queue.
#[derive(Debug)]
pub struct EventConsumer<'q, 'a> {
    region: &'q RingRegion<'a>,
}

impl EventConsumer<'_, '_> {
    /// See [`FramedEventQueue::get`].
    pub fn get(&mut self) -> Option<Event<'_>> {
        // SAFETY: `split` hands out one consumer, borrowed mutably here.
        unsafe { peek_frame(self.region) }
    }

    /// See [`FramedEventQueue::pop`].
    pub fn pop(&mut self) -> bool {
        // SAFETY: as in `get`.
        unsafe { pop_frame(self.region) }
    }

    /// Discard everything published so far.
    pub fn clear(&mut self) {
        // SAFETY: as in `get`.
        unsafe { self.region.clear_shared() }
    }

    #[inline]
    pub fn fill_count(&self) -> u32 {
        self.region.fill_count()
    }
}
