// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Useful synchronization primitives.

pub mod rc;
mod seqlock;

pub use seqlock::SeqLock;

use std::fmt::Debug;
use std::ops::{Deref, DerefMut};

/// A mutual exclusion lock.
///
/// A thin wrapper around [`std::sync::Mutex`] that does not surface lock
/// poisoning: a thread panicking while holding the lock leaves the protected
/// data in whatever state the panicking thread left it, and later acquirers
/// simply observe that state.
#[derive(Default)]
pub struct Mutex<T>(std::sync::Mutex<T>);

/// Lock guard for access to a [`Mutex`].
pub struct LockGuard<'a, T>(std::sync::MutexGuard<'a, T>);

impl<T> Mutex<T> {
    /// Creates a new mutex in an unlocked state ready for use.
    pub fn new(t: T) -> Mutex<T> {
        Mutex(std::sync::Mutex::new(t))
    }

    /// Acquires the mutex, blocking the current thread until it is able to
    /// do so.
    pub fn lock(&self) -> LockGuard<'_, T> {
        let Self(mutex) = self;
        LockGuard(mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner))
    }

    /// Returns a mutable reference to the underlying data.
    ///
    /// This call borrows the `Mutex` mutably, so no actual locking needs to
    /// take place.
    pub fn get_mut(&mut self) -> &mut T {
        let Self(mutex) = self;
        mutex.get_mut().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Consumes the mutex, returning the underlying data.
    pub fn into_inner(self) -> T {
        let Self(mutex) = self;
        mutex.into_inner().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<T: Debug> Debug for Mutex<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self(mutex) = self;
        mutex.fmt(f)
    }
}

impl<T> Deref for LockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        let Self(guard) = self;
        guard.deref()
    }
}

impl<T> DerefMut for LockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        let Self(guard) = self;
        guard.deref_mut()
    }
}

/// A reader-writer lock.
///
/// Like [`Mutex`], a wrapper around the std primitive that does not surface
/// lock poisoning.
#[derive(Default)]
pub struct RwLock<T>(std::sync::RwLock<T>);

/// Shared-access guard for a [`RwLock`].
pub struct RwLockReadGuard<'a, T>(std::sync::RwLockReadGuard<'a, T>);

/// Exclusive-access guard for a [`RwLock`].
pub struct RwLockWriteGuard<'a, T>(std::sync::RwLockWriteGuard<'a, T>);

impl<T> RwLock<T> {
    /// Creates a new instance of an `RwLock<T>` which is unlocked.
    pub fn new(t: T) -> RwLock<T> {
        RwLock(std::sync::RwLock::new(t))
    }

    /// Locks this `RwLock` with shared read access, blocking the current
    /// thread until it can be acquired.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        let Self(rwlock) = self;
        RwLockReadGuard(rwlock.read().unwrap_or_else(std::sync::PoisonError::into_inner))
    }

    /// Locks this `RwLock` with exclusive write access, blocking the current
    /// thread until it can be acquired.
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        let Self(rwlock) = self;
        RwLockWriteGuard(rwlock.write().unwrap_or_else(std::sync::PoisonError::into_inner))
    }

    /// Returns a mutable reference to the underlying data.
    pub fn get_mut(&mut self) -> &mut T {
        let Self(rwlock) = self;
        rwlock.get_mut().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Consumes the lock, returning the underlying data.
    pub fn into_inner(self) -> T {
        let Self(rwlock) = self;
        rwlock.into_inner().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<T: Debug> Debug for RwLock<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self(rwlock) = self;
        rwlock.fmt(f)
    }
}

impl<T> Deref for RwLockReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        let Self(guard) = self;
        guard.deref()
    }
}

impl<T> Deref for RwLockWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        let Self(guard) = self;
        guard.deref()
    }
}

impl<T> DerefMut for RwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        let Self(guard) = self;
        guard.deref_mut()
    }
}
