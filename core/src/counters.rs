// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Types and utilities for working with statistic counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// An atomic counter for statistics, e.g. resolution failures observed.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub(crate) fn increment(&self) {
        // Use relaxed ordering since we do not use counter values to
        // synchronize other accesses.  See:
        // https://doc.rust-lang.org/nomicon/atomics.html#relaxed
        let Self(v) = self;
        let _: u64 = v.fetch_add(1, Ordering::Relaxed);
    }

    /// Atomically retrieves the counter value as a `u64`.
    pub fn get(&self) -> u64 {
        // Use relaxed ordering since we do not use counter values to
        // synchronize other accesses.  See:
        // https://doc.rust-lang.org/nomicon/atomics.html#relaxed
        let Self(v) = self;
        v.load(Ordering::Relaxed)
    }
}

/// Statistics kept by a neighbour table.
///
/// Counters are written without locking and summed on read; a reader may
/// observe counts that are mid-update relative to each other.
#[derive(Debug, Default)]
pub struct NeighborCounters {
    /// Count of entry allocations.
    pub allocs: Counter,
    /// Count of entry destructions.
    pub destroys: Counter,
    /// Count of bucket-array doublings.
    pub hash_grows: Counter,
    /// Count of lookup operations.
    pub lookups: Counter,
    /// Count of lookups that found an entry.
    pub hits: Counter,
    /// Count of entries that exhausted their probe budget without a reply.
    pub res_failed: Counter,
    /// Count of frames dropped from a full per-entry pending queue.
    pub unresolved_discards: Counter,
    /// Count of synchronous forced shrink passes.
    pub forced_gc_runs: Counter,
    /// Count of asynchronous periodic sweep passes.
    pub periodic_gc_runs: Counter,
    /// Count of deferred proxy requests dropped from a full proxy queue.
    pub proxy_discards: Counter,
}
