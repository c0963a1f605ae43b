// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Execution contexts.
//!
//! This module defines the traits through which the cache reaches the
//! outside world: a monotonic clock, timer scheduling, randomness, and an
//! event sink. Production bindings implement these against real clocks and
//! executors; tests implement them with the fakes in [`testutil`] so that
//! every timed behavior is deterministic.

use std::time::Duration;

use rand::RngCore;

use crate::time::Instant;

/// Trait defining the `Instant` type provided by bindings'
/// [`InstantContext`] implementation.
///
/// It is a separate trait from `InstantContext` so the type stands by itself
/// to be stored at rest in core structures.
pub trait InstantBindingsTypes {
    /// The type of an instant in time.
    ///
    /// All time is measured using `Instant`s, including scheduling timers
    /// through [`TimerContext`]. This type may represent some sort of
    /// real-world time (e.g., [`std::time::Instant`]), or may be faked in
    /// testing using a fake clock.
    type Instant: Instant;
}

/// A context that provides access to a monotonic clock.
pub trait InstantContext: InstantBindingsTypes {
    /// Returns the current instant.
    ///
    /// `now` guarantees that two subsequent calls to `now` will return
    /// monotonically non-decreasing values.
    fn now(&self) -> Self::Instant;
}

/// A context that supports scheduling timers.
pub trait TimerContext<Id>: InstantContext {
    /// Schedules a timer to fire after some duration, overwriting any
    /// previous timer with the same ID.
    ///
    /// If there was previously a timer with that ID, returns the time at
    /// which it was scheduled to fire.
    ///
    /// # Panics
    ///
    /// `schedule_timer` may panic if `duration` is large enough that
    /// `self.now() + duration` overflows.
    fn schedule_timer(&mut self, duration: Duration, id: Id) -> Option<Self::Instant> {
        self.schedule_timer_instant(self.now().add(duration), id)
    }

    /// Schedules a timer to fire at some point in the future, overwriting
    /// any previous timer with the same ID.
    ///
    /// If there was previously a timer with that ID, returns the time at
    /// which it was scheduled to fire.
    fn schedule_timer_instant(&mut self, time: Self::Instant, id: Id) -> Option<Self::Instant>;

    /// Cancels a timer.
    ///
    /// If a timer with the given ID exists, it is canceled and the instant
    /// at which it was scheduled to fire is returned.
    fn cancel_timer(&mut self, id: Id) -> Option<Self::Instant>;

    /// Cancels all timers which satisfy a predicate.
    fn cancel_timers_with<F: FnMut(&Id) -> bool>(&mut self, f: F);

    /// Gets the instant a timer will fire, if one is scheduled.
    fn scheduled_instant(&self, id: Id) -> Option<Self::Instant>;
}

/// A handler for timer firing events.
///
/// A `TimerHandler` is a type capable of handling the event of a timer
/// firing.
pub trait TimerHandler<BC, Id> {
    /// Handle a timer firing.
    fn handle_timer(&mut self, bindings_ctx: &mut BC, id: Id);
}

/// A context that provides a random number generator (RNG).
///
/// Code in this crate obtains random values only through a `RngContext` so
/// that a deterministic RNG can be provided in tests.
pub trait RngContext {
    /// The random number generator (RNG) provided by this `RngContext`.
    type Rng<'a>: RngCore
    where
        Self: 'a;

    /// Gets the random number generator (RNG).
    fn rng(&mut self) -> Self::Rng<'_>;
}

/// A context for emitting events.
///
/// `EventContext` encodes the common pattern for emitting atomic events of
/// type `T` from core. An implementation of `EventContext` must guarantee
/// that events are processed in the order they are emitted.
pub trait EventContext<T> {
    /// Handles `event`.
    fn on_event(&mut self, event: T);
}
