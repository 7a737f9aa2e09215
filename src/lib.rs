//! Framed event queue for no-std embedded targets.
//!
//! # Highlights
//! - Variable-length event records packed into one caller-supplied byte arena.
//! - No allocation, no dynamic dispatch, zero-copy reads.
//! - Optional atomic occupancy counter for one producer and one consumer running concurrently.
//!
//! # Quick start
//! ```
//! use ph_event_queue::{FramedEventQueue, QueueConfig};
//!
//! let mut storage = [0u8; 64];
//! let mut queue = FramedEventQueue::new(&mut storage, QueueConfig::new().alignment(4)).unwrap();
//!
//! queue.put(1, b"Hello World\0").unwrap();
//! let event = queue.get().unwrap();
//! assert_eq!(event.id, 1);
//! assert_eq!(event.len(), 12);
//!
//! queue.pop();
//! assert!(queue.get().is_none());
//! ```
//!
//! # Layers
//! - [`RingRegion`] tracks head, tail and occupancy over the arena. It hands out write and read
//!   windows but never splits or joins them across the physical end of the arena.
//! - [`FramedEventQueue`] writes `marker | id | len | payload | padding` frames into the region.
//!   A frame never straddles the end of the arena; when it would, the tail fragment is filled
//!   with [`PADDING`] bytes and the frame restarts at offset zero.
//!
//! # No-std
//! The crate is `#![no_std]`. Tests require `std`.
//!
//! # Safety and concurrency
//! A queue owned through `&mut` is single-context and needs nothing else. For a producer and a
//! consumer on different contexts, enable atomic mode and call [`FramedEventQueue::split`]; the
//! returned handles only ever touch their own index and share the occupancy counter.
//! Several producers must be serialized by an [`ExclusiveLock`] passed at construction; the
//! split producer can then be cloned once per producing context.
//!
//! # Features
//! - `portable-atomic*`: take `AtomicU32` from `portable-atomic` for targets without native CAS.
//! - `critical-section`: provides `CriticalSectionLock`.
//! - `log`: trace and debug records through the `log` crate.
//! - `defmt`: `defmt::Format` for [`Error`] and [`QueueConfig`].
#![no_std]

#[macro_use]
mod macros;

pub mod event_queue;
pub mod lock;
pub mod ring_region;

pub use event_queue::{
    Event, EventConsumer, EventProducer, FRAME_OVERHEAD, FramedEventQueue, HEADER_SIZE, MARKER,
    MARKER_SIZE, PADDING, QueueConfig, frame_size,
};
#[cfg(feature = "critical-section")]
pub use lock::CriticalSectionLock;
pub use lock::{Exclusive, ExclusiveLock, HookPair, Lock, NoLock};
pub use ring_region::RingRegion;

use core::fmt;
use core::result::Result as CoreResult;

#[cfg(test)]
extern crate std;

/// Result type used by the queue interfaces
pub type Result<T> = CoreResult<T, Error>;

/// Error type used by the queue interfaces
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The backing buffer has zero length
    EmptyBuffer,

    /// The backing buffer is longer than `u32::MAX` bytes
    BufferTooLarge,

    /// The record, framing included, does not fit in the free space right now
    InsufficientSize,

    /// Splitting into concurrent handles requires atomic mode
    AtomicsDisabled,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::EmptyBuffer => f.write_str("backing buffer is empty"),
            Error::BufferTooLarge => f.write_str("backing buffer exceeds u32::MAX bytes"),
            Error::InsufficientSize => f.write_str("not enough space for the event"),
            Error::AtomicsDisabled => f.write_str("atomic mode is disabled"),
        }
    }
}

impl core::error::Error for Error {}
