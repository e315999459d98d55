//! Progress reporting and cooperative cancellation.
//!
//! One [`ProgressHandle`] is shared by reference across every stage of a
//! load or save pipeline. The pipeline owns the phase windows (each phase
//! maps onto a `[base, base + span]` slice of the 0–100 scale); observers
//! read a single percent value and the current phase label; anyone may
//! flip the cancel flag, which the CPU-bound loops poll between work
//! units.
//!
//! The handle is all atomics so a UI thread can watch a worker without
//! locking. There is no global state: callers create one handle per
//! operation and pass it down.

use crate::error::CryptoError;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Pipeline stage, exposed to observers as a human-readable label.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    KeyDerivation = 1,
    Decryption = 2,
    Parsing = 3,
    Packing = 4,
    Encryption = 5,
}

impl Phase {
    /// The label shown to the user while this phase runs.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::KeyDerivation => "Key derivation",
            Self::Decryption => "Decryption",
            Self::Parsing => "Parsing content",
            Self::Packing => "Packing the content",
            Self::Encryption => "Encryption",
        }
    }

    const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::KeyDerivation),
            2 => Some(Self::Decryption),
            3 => Some(Self::Parsing),
            4 => Some(Self::Packing),
            5 => Some(Self::Encryption),
            _ => None,
        }
    }
}

/// Shared completion/cancellation state for one load or save.
#[derive(Debug, Default)]
pub struct ProgressHandle {
    percent: AtomicU8,
    phase: AtomicU8,
    base: AtomicU8,
    span: AtomicU8,
    cancelled: AtomicBool,
}

impl ProgressHandle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overall completion, 0–100.
    #[must_use]
    pub fn percent(&self) -> u8 {
        self.percent.load(Ordering::Relaxed)
    }

    /// The phase currently running, if any.
    #[must_use]
    pub fn phase(&self) -> Option<Phase> {
        Phase::from_raw(self.phase.load(Ordering::Relaxed))
    }

    /// Request cooperative cancellation. The running pipeline honors the
    /// request at its next checkpoint and wipes its transient buffers.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Fail with [`CryptoError::Cancelled`] if cancellation was requested.
    /// CPU-bound loops call this between work units.
    pub fn checkpoint(&self) -> Result<(), CryptoError> {
        if self.is_cancelled() {
            Err(CryptoError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Enter `phase`, which occupies `[base, base + span]` on the 0–100
    /// scale. Resets the phase-local completion to its base.
    pub fn begin_phase(&self, phase: Phase, base: u8, span: u8) {
        debug_assert!(base.saturating_add(span) <= 100);
        self.phase.store(phase as u8, Ordering::Relaxed);
        self.base.store(base, Ordering::Relaxed);
        self.span.store(span, Ordering::Relaxed);
        self.percent.store(base, Ordering::Relaxed);
    }

    /// Report phase-local completion as `done` out of `total` units.
    /// A zero `total` counts as complete.
    pub fn update(&self, done: u64, total: u64) {
        let base = u64::from(self.base.load(Ordering::Relaxed));
        let span = u64::from(self.span.load(Ordering::Relaxed));
        let scaled = if total == 0 {
            span
        } else {
            span * done.min(total) / total
        };
        // Cast is safe: base + span <= 100 by begin_phase's contract.
        #[allow(clippy::cast_possible_truncation)]
        self.percent.store((base + scaled) as u8, Ordering::Relaxed);
    }

    /// Mark the current phase fully complete.
    pub fn finish_phase(&self) {
        self.update(1, 1);
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
