// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Synchronized reference counting primitives.
//!
//! This module introduces a family of reference counted types that allows
//! marking the underlying data for destruction before all strong references
//! to the data are dropped. This enables the following features:
//!   * Upgrading a weak reference to a strong reference succeeds iff at
//!     least one strong reference exists _and_ the data has not been marked
//!     for destruction.
//!   * An owner can detach the data (mark it for destruction and drop its
//!     primary reference) while strong references are still outstanding;
//!     the data is destroyed when the last strong reference goes away.

use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct Inner<T> {
    marked_for_destruction: AtomicBool,
    data: T,
}

/// A primary reference.
///
/// Only one `Primary` may be associated with data; this is enforced by not
/// implementing [`Clone`]. Dropping the `Primary` marks the underlying data
/// for destruction, after which weak references can no longer be upgraded.
/// Outstanding [`Strong`] references keep the data alive until they are all
/// dropped.
#[derive(Debug)]
pub struct Primary<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Drop for Primary<T> {
    fn drop(&mut self) {
        let Self { inner } = self;
        // `Ordering::Release` so that all memory writes before dropping this
        // `Primary` synchronize with later attempts to upgrade weak pointers.
        let _was_marked: bool =
            inner.marked_for_destruction.swap(true, Ordering::Release);
    }
}

impl<T> AsRef<T> for Primary<T> {
    fn as_ref(&self) -> &T {
        self.deref()
    }
}

impl<T> Deref for Primary<T> {
    type Target = T;

    fn deref(&self) -> &T {
        let Self { inner } = self;
        let Inner { marked_for_destruction: _, data } = inner.deref();
        data
    }
}

impl<T> Primary<T> {
    /// Returns a new primary reference to `data`.
    pub fn new(data: T) -> Primary<T> {
        Primary {
            inner: Arc::new(Inner {
                marked_for_destruction: AtomicBool::new(false),
                data,
            }),
        }
    }

    /// Clones a strongly-held reference.
    pub fn clone_strong(Self { inner }: &Self) -> Strong<T> {
        Strong { inner: Arc::clone(inner) }
    }

    /// Returns a weak reference pointing to the same underlying data.
    pub fn downgrade(Self { inner }: &Self) -> Weak<T> {
        Weak(Arc::downgrade(inner))
    }

    /// Marks the underlying data for destruction without dropping the
    /// primary reference.
    ///
    /// After this call, [`Weak::upgrade`] fails and
    /// [`Strong::marked_for_destruction`] observes the mark.
    pub fn mark_for_destruction(Self { inner }: &Self) {
        let _was_marked: bool =
            inner.marked_for_destruction.swap(true, Ordering::Release);
    }

    /// Returns true if no [`Strong`] references to the data exist.
    ///
    /// Note that the result is immediately stale if weak references exist, as
    /// one may be upgraded concurrently; callers are expected to serialize
    /// with upgrades through an external lock.
    pub fn is_exclusive(Self { inner }: &Self) -> bool {
        Arc::strong_count(inner) == 1
    }

    /// Returns the number of references to the data, including this one.
    pub fn refcount(Self { inner }: &Self) -> usize {
        Arc::strong_count(inner)
    }

    /// Returns true if the two pointers point to the same allocation.
    pub fn ptr_eq(Self { inner: this }: &Self, Strong { inner: other }: &Strong<T>) -> bool {
        Arc::ptr_eq(this, other)
    }
}

/// A strongly-held reference.
///
/// Similar to an [`Arc`], but holding a `Strong` does not by itself witness
/// live-ness of the underlying data: the owner may have already marked the
/// data for destruction, which holders observe through
/// [`Strong::marked_for_destruction`].
///
/// Note that `Strong`'s implementation of [`Hash`] operates on the pointer
/// itself and not the underlying data.
#[derive(Debug)]
pub struct Strong<T> {
    inner: Arc<Inner<T>>,
}

impl<T> AsRef<T> for Strong<T> {
    fn as_ref(&self) -> &T {
        self.deref()
    }
}

impl<T> Deref for Strong<T> {
    type Target = T;

    fn deref(&self) -> &T {
        let Self { inner } = self;
        let Inner { marked_for_destruction: _, data } = inner.deref();
        data
    }
}

impl<T> Hash for Strong<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let Self { inner } = self;
        Arc::as_ptr(inner).hash(state)
    }
}

impl<T> Clone for Strong<T> {
    fn clone(&self) -> Self {
        let Self { inner } = self;
        Self { inner: Arc::clone(inner) }
    }
}

impl<T> Strong<T> {
    /// Returns a weak reference pointing to the same underlying data.
    pub fn downgrade(Self { inner }: &Self) -> Weak<T> {
        Weak(Arc::downgrade(inner))
    }

    /// Returns true if the inner value has since been marked for
    /// destruction.
    pub fn marked_for_destruction(Self { inner }: &Self) -> bool {
        // `Ordering::Acquire` to synchronize with the `Ordering::Release`
        // write to `marked_for_destruction`.
        inner.marked_for_destruction.load(Ordering::Acquire)
    }

    /// Returns true if the two pointers point to the same allocation.
    pub fn ptr_eq(Self { inner: this }: &Self, Self { inner: other }: &Self) -> bool {
        Arc::ptr_eq(this, other)
    }
}

/// A weakly-held reference.
///
/// Similar to [`std::sync::Weak`], except that an upgrade also fails once
/// the data has been marked for destruction by its [`Primary`].
#[derive(Debug)]
pub struct Weak<T>(std::sync::Weak<Inner<T>>);

impl<T> Clone for Weak<T> {
    fn clone(&self) -> Self {
        let Self(weak) = self;
        Weak(weak.clone())
    }
}

impl<T> Weak<T> {
    /// Returns true if the two pointers point to the same allocation.
    pub fn ptr_eq(&self, Self(other): &Self) -> bool {
        let Self(this) = self;
        this.ptr_eq(other)
    }

    /// Attempts to upgrade to a [`Strong`].
    ///
    /// Returns `None` if the inner value has been destroyed or marked for
    /// destruction.
    pub fn upgrade(&self) -> Option<Strong<T>> {
        let Self(weak) = self;
        let inner = weak.upgrade()?;
        // `Ordering::Acquire` to synchronize with the `Ordering::Release`
        // write to `marked_for_destruction`.
        (!inner.marked_for_destruction.load(Ordering::Acquire))
            .then(|| Strong { inner })
    }
}
