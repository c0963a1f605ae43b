// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A sequence lock for small `Copy` data.
//!
//! Readers copy the protected value without blocking and retry if a writer
//! raced with the copy; writers never wait for readers. This fits data that
//! is read on a hot path and rewritten rarely, such as a cached link-layer
//! header template.

use std::cell::UnsafeCell;
use std::sync::atomic::{fence, AtomicU32, Ordering};

/// A sequence lock protecting a value of type `T`.
///
/// Writers must be serialized externally (e.g. by the lock of the structure
/// that embeds the `SeqLock`); concurrent calls to [`SeqLock::write`] are
/// not supported. Readers may run concurrently with a writer and with each
/// other.
#[derive(Debug)]
pub struct SeqLock<T> {
    // Even when no write is in progress; odd while a writer is mid-update.
    seq: AtomicU32,
    data: UnsafeCell<T>,
}

// Readers may observe torn intermediate values of `data` but discard them
// by re-checking `seq`, so `T: Copy` (no drop, bitwise copy) is required
// for soundness of the retry scheme.
unsafe impl<T: Copy + Send> Sync for SeqLock<T> {}
unsafe impl<T: Copy + Send> Send for SeqLock<T> {}

impl<T: Copy> SeqLock<T> {
    /// Creates a new `SeqLock` holding `data`.
    pub fn new(data: T) -> SeqLock<T> {
        SeqLock { seq: AtomicU32::new(0), data: UnsafeCell::new(data) }
    }

    /// Returns a coherent snapshot of the protected value.
    ///
    /// Spins only if a write is in flight, which by construction is a short
    /// critical section.
    pub fn read(&self) -> T {
        loop {
            let start = self.seq.load(Ordering::Acquire);
            if start % 2 != 0 {
                std::hint::spin_loop();
                continue;
            }
            // Volatile so the compiler cannot elide or tear-cache the copy
            // across the fence; a racing writer may make this copy garbage,
            // in which case the sequence re-check below rejects it.
            let value = unsafe { std::ptr::read_volatile(self.data.get()) };
            fence(Ordering::Acquire);
            if self.seq.load(Ordering::Relaxed) == start {
                return value;
            }
            std::hint::spin_loop();
        }
    }

    /// Replaces the protected value.
    ///
    /// Callers must hold whatever external lock serializes writers.
    pub fn write(&self, data: T) {
        let start = self.seq.load(Ordering::Relaxed);
        debug_assert_eq!(start % 2, 0, "concurrent seqlock writers");
        self.seq.store(start.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);
        unsafe { std::ptr::write(self.data.get(), data) };
        self.seq.store(start.wrapping_add(2), Ordering::Release);
    }
}
