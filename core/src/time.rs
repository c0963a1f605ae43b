// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Types for dealing with time and timers.

use std::fmt::Debug;
use std::ops::Mul;
use std::time::Duration;

/// A type representing an instant in time.
///
/// `Instant` can be implemented by any type which represents an instant in
/// time. This can include any sort of real-world clock time (e.g.,
/// [`std::time::Instant`]) or fake time such as in testing.
pub trait Instant: Sized + Ord + Copy + Clone + Debug + Send + Sync + 'static {
    /// Returns the amount of time elapsed from another instant to this one.
    ///
    /// # Panics
    ///
    /// This function will panic if `earlier` is later than `self`.
    fn duration_since(&self, earlier: Self) -> Duration;

    /// Returns the amount of time elapsed from another instant to this one,
    /// saturating at zero.
    fn saturating_duration_since(&self, earlier: Self) -> Duration;

    /// Returns `Some(t)` where `t` is the time `self + duration` if `t` can
    /// be represented as `Instant` (which means it's inside the bounds of
    /// the underlying data structure), `None` otherwise.
    fn checked_add(&self, duration: Duration) -> Option<Self>;

    /// Unwraps the result from `checked_add`.
    ///
    /// # Panics
    ///
    /// This function will panic if the addition makes the clock wrap around.
    fn add(&self, duration: Duration) -> Self {
        self.checked_add(duration).unwrap_or_else(|| {
            panic!("clock wraps around when adding {:?} to {:?}", duration, *self);
        })
    }

    /// Returns `Some(t)` where `t` is the time `self - duration` if `t` can
    /// be represented as `Instant`, `None` otherwise.
    fn checked_sub(&self, duration: Duration) -> Option<Self>;

    /// Unwraps the result from `checked_sub`, saturating to the earliest
    /// representable instant.
    fn saturating_sub(&self, duration: Duration) -> Self;
}

/// A wrapper around [`Duration`] that is guaranteed to be non-zero.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct NonZeroDuration(Duration);

impl NonZeroDuration {
    /// Creates a non-zero duration without checking the value.
    ///
    /// # Safety
    ///
    /// `d` must be non-zero.
    pub const unsafe fn new_unchecked(d: Duration) -> NonZeroDuration {
        NonZeroDuration(d)
    }

    /// Creates a new `NonZeroDuration` from the specified duration if it is
    /// non-zero.
    pub const fn new(d: Duration) -> Option<NonZeroDuration> {
        if d.as_nanos() == 0 {
            return None;
        }
        Some(NonZeroDuration(d))
    }

    /// Creates a new `NonZeroDuration` from the specified number of whole
    /// seconds if that number is non-zero.
    pub const fn from_secs(secs: u64) -> Option<NonZeroDuration> {
        NonZeroDuration::new(Duration::from_secs(secs))
    }

    /// Creates a new `NonZeroDuration` from the specified number of
    /// milliseconds if that number is non-zero.
    pub const fn from_millis(millis: u64) -> Option<NonZeroDuration> {
        NonZeroDuration::new(Duration::from_millis(millis))
    }

    /// Returns the value as a [`Duration`].
    pub const fn get(self) -> Duration {
        let Self(d) = self;
        d
    }
}

impl From<NonZeroDuration> for Duration {
    fn from(NonZeroDuration(d): NonZeroDuration) -> Duration {
        d
    }
}

impl Mul<u32> for NonZeroDuration {
    type Output = Duration;

    fn mul(self, rhs: u32) -> Duration {
        let Self(d) = self;
        d * rhs
    }
}
