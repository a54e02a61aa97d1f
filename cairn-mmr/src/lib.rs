//! Merkle Mountain Range engine for the cairn dataset mirror.
//!
//! The accumulator appends opaque payloads and emits, per append, the
//! full "trail" of content-addressed blocks it produced: the dag-cbor
//! leaf, every merged link, and the bagging links up to the root. The
//! inverse operation reconstructs a prior state from an append event's
//! recorded left inputs, which is what makes the backward historical
//! sweep possible.
//!
//! # Example
//!
//! ```rust
//! use cairn_mmr::{previous_root_and_peaks, Mmr};
//!
//! let mut mmr = Mmr::new();
//! let before = (mmr.root().unwrap(), mmr.peaks_with_heights());
//! let trail = mmr.append(0, b"payload").unwrap();
//!
//! let inverted =
//!     previous_root_and_peaks(&mmr.peaks_with_heights(), b"payload", &trail.left_inputs)
//!         .unwrap();
//! assert_eq!(inverted, before);
//! ```

mod mmr;
mod notify;

#[cfg(test)]
mod proptest;

pub use mmr::{bag_peaks, peak_heights, previous_root_and_peaks, Mmr, Trail, TrailPair};
pub use notify::{SubscriberId, TrailSubscribers};
