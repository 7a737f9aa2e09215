//! Byte-addressed circular region over a caller-supplied arena.
//!
//! # Overview
//! - `head` is the next byte to write and belongs to the producer.
//! - `tail` is the next byte to read and belongs to the consumer.
//! - `fill_count` is the only state both sides modify. In atomic mode it moves with
//!   `fetch_add`/`fetch_sub`; otherwise with a plain load, add and store.
//! - `(head - tail) mod length == fill_count` at every quiescent point.
//!
//! # Windows
//! The write window starts at `head` and the read window at `tail`. Neither crosses the
//! physical end of the arena: a caller that needs more room than the window holds has to
//! commit what fits first and ask again. The second value of each window is the *total*
//! free (or occupied) byte count, which may exceed the slice length when space wraps.
//!
//! # Memory ordering
//! The producer writes bytes, then publishes them by raising `fill_count` with release
//! semantics. The consumer observes `fill_count` with acquire semantics before reading and
//! releases the bytes by lowering it again.

use core::fmt;
use core::marker::PhantomData;
use core::ptr::NonNull;
use core::slice;

#[cfg(not(feature = "portable-atomic"))]
use core::sync::atomic::{AtomicU32, Ordering};
#[cfg(feature = "portable-atomic")]
use portable_atomic::{AtomicU32, Ordering};

use crate::{Error, Result};

/// `(idx + n) mod len` for `idx < len` and `n <= len`, without overflowing `u32`.
#[inline(always)]
const fn wrap_add(idx: u32, n: u32, len: u32) -> u32 {
    let to_end = len - idx;
    if n >= to_end { n - to_end } else { idx + n }
}

/// Fixed-size circular byte region.
pub struct RingRegion<'a> {
    buf: NonNull<u8>,
    len: u32,
    head: AtomicU32,
    tail: AtomicU32,
    fill_count: AtomicU32,
    high_water_mark: AtomicU32,
    atomic: bool,
    _arena: PhantomData<&'a mut [u8]>,
}

// The arena is only reached through windows whose ranges are kept disjoint by `fill_count`.
unsafe impl Send for RingRegion<'_> {}
unsafe impl Sync for RingRegion<'_> {}

impl<'a> RingRegion<'a> {
    /// Take over `buffer` as an empty ring. The bytes are left as they are.
    pub fn new(buffer: &'a mut [u8], use_atomics: bool) -> Result<Self> {
        if buffer.is_empty() {
            return Err(Error::EmptyBuffer);
        }
        let len = u32::try_from(buffer.len()).map_err(|_| Error::BufferTooLarge)?;
        Ok(Self {
            buf: NonNull::from(buffer).cast(),
            len,
            head: AtomicU32::new(0),
            tail: AtomicU32::new(0),
            fill_count: AtomicU32::new(0),
            high_water_mark: AtomicU32::new(0),
            atomic: use_atomics,
            _arena: PhantomData,
        })
    }

    /// Size of the arena in bytes.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.len
    }

    /// Bytes written and not yet retired.
    #[inline]
    pub fn fill_count(&self) -> u32 {
        self.fill_count.load(Ordering::Acquire)
    }

    /// Total free bytes, wherever they sit in the arena.
    #[inline]
    pub fn free_space(&self) -> u32 {
        self.len - self.fill_count()
    }

    /// Bytes between `head` and the physical end of the arena.
    ///
    /// This is not the free space: part of it may still be unread when `head` has wrapped
    /// behind `tail`, and free bytes before `tail` are not counted.
    #[inline]
    pub fn contiguous_free_space(&self) -> u32 {
        self.len - self.head.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn head(&self) -> u32 {
        self.head.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn tail(&self) -> u32 {
        self.tail.load(Ordering::Relaxed)
    }

    /// Largest occupancy seen by a commit or a retire.
    #[inline]
    pub fn high_water_mark(&self) -> u32 {
        self.high_water_mark.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_atomic(&self) -> bool {
        self.atomic
    }

    /// Switch between atomic and plain updates of the occupancy counter.
    #[inline]
    pub fn set_atomic(&mut self, atomic: bool) {
        self.atomic = atomic;
    }

    /// Writable bytes at `head`, up to the first unread byte or the end of the arena,
    /// together with the total free byte count. `None` when the region is full.
    #[inline]
    pub fn reserve_write_window(&mut self) -> Option<(&mut [u8], u32)> {
        // SAFETY: `&mut self` rules out any other producer or consumer.
        unsafe { self.write_window_shared() }
    }

    /// Publish `n` bytes written at `head`.
    ///
    /// # Panics
    /// If `n` exceeds the free space.
    #[inline]
    pub fn commit_write(&mut self, n: u32) {
        // SAFETY: `&mut self` rules out any other producer.
        unsafe { self.commit_write_shared(n) }
    }

    /// Readable bytes at `tail`, up to the end of the arena, together with the total
    /// occupied byte count. `None` when the region is empty.
    #[inline]
    pub fn reserve_read_window(&self) -> Option<(&[u8], u32)> {
        // SAFETY: writers need `&mut self` or a split handle, neither of which can coexist
        // with this shared borrow.
        unsafe { self.read_window_shared() }
    }

    /// Release `n` bytes at `tail` back to the producer.
    ///
    /// # Panics
    /// If `n` exceeds the occupied byte count.
    #[inline]
    pub fn retire_read(&mut self, n: u32) {
        // SAFETY: `&mut self` rules out any other consumer.
        unsafe { self.retire_read_shared(n) }
    }

    /// Retire everything currently readable. `head` and `tail` keep their positions.
    #[inline]
    pub fn clear(&mut self) {
        // SAFETY: `&mut self` rules out any other consumer.
        unsafe { self.clear_shared() }
    }

    /// Copy `src` in and publish it in one step.
    ///
    /// The bytes are never split across the end of the arena. When they do not fit before it
    /// but do fit in front of `tail`, the tail fragment is zero-filled and committed first.
    /// Fails with [`Error::InsufficientSize`], leaving the region untouched, when neither
    /// placement has room.
    pub fn produce_bytes(&mut self, src: &[u8]) -> Result<()> {
        let len = u32::try_from(src.len()).map_err(|_| Error::InsufficientSize)?;
        if len == 0 {
            return Ok(());
        }

        let free = self.free_space();
        if free < len {
            return Err(Error::InsufficientSize);
        }

        let contiguous = self.contiguous_free_space();
        if contiguous < len {
            if free - contiguous < len {
                return Err(Error::InsufficientSize);
            }
            if let Some((fragment, _)) = self.reserve_write_window() {
                fragment.fill(0);
            }
            self.commit_write(contiguous);
        }

        let window: &mut [u8] = match self.reserve_write_window() {
            Some((window, _)) => window,
            None => &mut [],
        };
        window[..src.len()].copy_from_slice(src);
        self.commit_write(len);
        Ok(())
    }

    /// # Safety
    /// The caller must be the only producer for the lifetime of the returned slice.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn write_window_shared(&self) -> Option<(&mut [u8], u32)> {
        let available = self.free_space();
        if available == 0 {
            return None;
        }
        let head = self.head.load(Ordering::Relaxed);
        let run = available.min(self.len - head);
        // SAFETY: `[head, head + run)` lies inside the arena and holds no unread bytes, so the
        // consumer never reads it until the producer commits.
        let bytes = unsafe {
            let start = self.buf.as_ptr().add(head as usize);
            slice::from_raw_parts_mut(start, run as usize)
        };
        Some((bytes, available))
    }

    /// # Safety
    /// The caller must be the only producer.
    pub(crate) unsafe fn commit_write_shared(&self, n: u32) {
        let fill = self.fill_count.load(Ordering::Acquire);
        assert!(
            n <= self.len - fill,
            "commit of {} bytes overflows ring ({} of {} bytes in use)",
            n,
            fill,
            self.len
        );

        let head = self.head.load(Ordering::Relaxed);
        self.head.store(wrap_add(head, n, self.len), Ordering::Relaxed);

        let filled = if self.atomic {
            self.fill_count.fetch_add(n, Ordering::AcqRel) + n
        } else {
            self.fill_count.store(fill + n, Ordering::Release);
            fill + n
        };
        self.high_water_mark.fetch_max(filled, Ordering::Relaxed);
    }

    /// # Safety
    /// The caller must be the only consumer for the lifetime of the returned slice.
    pub(crate) unsafe fn read_window_shared(&self) -> Option<(&[u8], u32)> {
        let available = self.fill_count();
        if available == 0 {
            return None;
        }
        let tail = self.tail.load(Ordering::Relaxed);
        let run = available.min(self.len - tail);
        // SAFETY: `[tail, tail + run)` holds committed bytes the producer will not touch
        // until they are retired.
        let bytes = unsafe {
            let start = self.buf.as_ptr().add(tail as usize);
            slice::from_raw_parts(start, run as usize)
        };
        Some((bytes, available))
    }

    /// # Safety
    /// The caller must be the only consumer.
    pub(crate) unsafe fn retire_read_shared(&self, n: u32) {
        let fill = self.fill_count.load(Ordering::Acquire);
        assert!(
            n <= fill,
            "retire of {} bytes underflows ring ({} bytes in use)",
            n,
            fill
        );

        let tail = self.tail.load(Ordering::Relaxed);
        self.tail.store(wrap_add(tail, n, self.len), Ordering::Relaxed);

        let filled = if self.atomic {
            self.fill_count.fetch_sub(n, Ordering::AcqRel) - n
        } else {
            self.fill_count.store(fill - n, Ordering::Release);
            fill - n
        };
        self.high_water_mark.fetch_max(filled, Ordering::Relaxed);
    }

    /// # Safety
    /// The caller must be the only consumer.
    pub(crate) unsafe fn clear_shared(&self) {
        let available = self.fill_count();
        if available > 0 {
            unsafe { self.retire_read_shared(available) };
        }
    }
}

impl fmt::Debug for RingRegion<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingRegion")
            .field("capacity", &self.len)
            .field("head", &self.head())
            .field("tail", &self.tail())
            .field("fill_count", &self.fill_count())
            .field("high_water_mark", &self.high_water_mark())
            .field("atomic", &self.atomic)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::RingRegion;
    use crate::Error;

    #[test]
    fn rejects_empty_buffer() {
        let mut storage: [u8; 0] = [];
        let err = RingRegion::new(&mut storage, true).unwrap_err();
        assert_eq!(err, Error::EmptyBuffer);
    }

    #[test]
    fn starts_empty() {
        let mut storage = [0u8; 16];
        let region = RingRegion::new(&mut storage, false).unwrap();
        assert_eq!(region.capacity(), 16);
        assert_eq!(region.fill_count(), 0);
        assert_eq!(region.free_space(), 16);
        assert_eq!(region.contiguous_free_space(), 16);
        assert!(region.reserve_read_window().is_none());
    }

    #[test]
    fn write_then_read_back() {
        let mut storage = [0u8; 16];
        let mut region = RingRegion::new(&mut storage, true).unwrap();

        let (window, available) = region.reserve_write_window().unwrap();
        assert_eq!(available, 16);
        assert_eq!(window.len(), 16);
        window[..3].copy_from_slice(b"abc");
        region.commit_write(3);

        assert_eq!(region.head(), 3);
        assert_eq!(region.fill_count(), 3);

        let (window, available) = region.reserve_read_window().unwrap();
        assert_eq!(available, 3);
        assert_eq!(window, b"abc");
        region.retire_read(3);

        assert_eq!(region.tail(), 3);
        assert_eq!(region.fill_count(), 0);
        assert!(region.reserve_read_window().is_none());
    }

    #[test]
    fn full_region_has_no_write_window() {
        let mut storage = [0u8; 8];
        let mut region = RingRegion::new(&mut storage, true).unwrap();
        region.commit_write(8);

        assert!(region.reserve_write_window().is_none());
        assert_eq!(region.head(), 0);
        assert_eq!(region.high_water_mark(), 8);
    }

    #[test]
    fn windows_stop_at_the_arena_end() {
        let mut storage = [0u8; 10];
        let mut region = RingRegion::new(&mut storage, true).unwrap();
        region.commit_write(8);
        region.retire_read(6);

        // head = 8, tail = 6: two free bytes at the end, six before tail.
        let (window, available) = region.reserve_write_window().unwrap();
        assert_eq!(available, 8);
        assert_eq!(window.len(), 2);
        assert_eq!(region.contiguous_free_space(), 2);

        region.commit_write(4);
        assert_eq!(region.head(), 2);

        // Reads stop at the end too, even though six bytes are readable.
        let (window, available) = region.reserve_read_window().unwrap();
        assert_eq!(available, 6);
        assert_eq!(window.len(), 4);
    }

    #[test]
    fn write_window_stops_at_unread_bytes() {
        let mut storage = [0u8; 10];
        let mut region = RingRegion::new(&mut storage, false).unwrap();
        region.commit_write(10);
        region.retire_read(4);
        region.commit_write(2);

        // head = 2, tail = 4: only two writable bytes, but ten until the arena end.
        let (window, available) = region.reserve_write_window().unwrap();
        assert_eq!(available, 2);
        assert_eq!(window.len(), 2);
        assert_eq!(region.contiguous_free_space(), 8);
    }

    #[test]
    fn clear_keeps_positions() {
        let mut storage = [0u8; 12];
        let mut region = RingRegion::new(&mut storage, true).unwrap();
        region.commit_write(7);
        region.retire_read(2);
        region.clear();

        assert_eq!(region.fill_count(), 0);
        assert_eq!(region.head(), 7);
        assert_eq!(region.tail(), 7);
    }

    #[test]
    fn high_water_mark_tracks_peak() {
        let mut storage = [0u8; 32];
        let mut region = RingRegion::new(&mut storage, true).unwrap();
        region.commit_write(10);
        region.commit_write(10);
        region.retire_read(15);
        region.commit_write(5);

        assert_eq!(region.fill_count(), 10);
        assert_eq!(region.high_water_mark(), 20);
    }

    #[test]
    fn atomic_toggle_keeps_accounting() {
        let mut storage = [0u8; 16];
        let mut region = RingRegion::new(&mut storage, false).unwrap();
        region.commit_write(6);
        region.set_atomic(true);
        assert!(region.is_atomic());
        region.commit_write(6);
        region.retire_read(4);

        assert_eq!(region.fill_count(), 8);
        assert_eq!(region.head(), 12);
        assert_eq!(region.tail(), 4);
    }

    #[test]
    fn produce_bytes_appends_in_place() {
        let mut storage = [0u8; 10];
        let mut region = RingRegion::new(&mut storage, true).unwrap();
        region.produce_bytes(b"abc").unwrap();
        region.produce_bytes(b"de").unwrap();
        region.produce_bytes(&[]).unwrap();

        assert_eq!(region.head(), 5);
        let (window, available) = region.reserve_read_window().unwrap();
        assert_eq!(available, 5);
        assert_eq!(window, b"abcde");
    }

    #[test]
    fn produce_bytes_pads_tail_fragment_and_wraps() {
        let mut storage = [0xEEu8; 10];
        let mut region = RingRegion::new(&mut storage, false).unwrap();
        region.produce_bytes(b"abcdef").unwrap();
        region.retire_read(6);

        // head = tail = 6: four bytes to the end, six in front.
        region.produce_bytes(b"vwxyz").unwrap();
        assert_eq!(region.head(), 5);
        assert_eq!(region.fill_count(), 9);

        let (window, _) = region.reserve_read_window().unwrap();
        assert_eq!(window, &[0u8; 4]);
        region.retire_read(4);

        let (window, available) = region.reserve_read_window().unwrap();
        assert_eq!(available, 5);
        assert_eq!(window, b"vwxyz");
    }

    #[test]
    fn produce_bytes_rejects_without_touching_state() {
        let mut storage = [0u8; 10];
        let mut region = RingRegion::new(&mut storage, true).unwrap();
        region.produce_bytes(&[1u8; 8]).unwrap();
        region.retire_read(3);

        // head = 8, tail = 3: five free in total, two at the end, three in front.
        assert_eq!(region.produce_bytes(&[2u8; 6]), Err(Error::InsufficientSize));
        assert_eq!(region.produce_bytes(&[2u8; 4]), Err(Error::InsufficientSize));
        assert_eq!(region.head(), 8);
        assert_eq!(region.fill_count(), 5);

        region.produce_bytes(&[2u8; 3]).unwrap();
        assert_eq!(region.head(), 3);
        assert_eq!(region.fill_count(), 10);
    }

    #[test]
    #[should_panic(expected = "overflows ring")]
    fn over_commit_panics() {
        let mut storage = [0u8; 8];
        let mut region = RingRegion::new(&mut storage, true).unwrap();
        region.commit_write(6);
        region.commit_write(3);
    }

    #[test]
    #[should_panic(expected = "underflows ring")]
    fn over_retire_panics() {
        let mut storage = [0u8; 8];
        let mut region = RingRegion::new(&mut storage, false).unwrap();
        region.commit_write(2);
        region.retire_read(3);
    }
}
