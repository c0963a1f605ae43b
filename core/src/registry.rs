// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The registry of neighbour tables.
//!
//! Tables are registered once at startup and located by address family;
//! the registry lock is taken only for those brief operations, keeping
//! runtime contention per-table.

use neighcache_sync::rc::{Primary, Strong};
use neighcache_sync::RwLock;

use crate::neighbor::AddressFamily;

/// A registry of tables keyed by address family.
pub struct TableRegistry<T> {
    tables: RwLock<Vec<(AddressFamily, Primary<T>)>>,
}

impl<T> Default for TableRegistry<T> {
    fn default() -> Self {
        Self { tables: RwLock::new(Vec::new()) }
    }
}

impl<T> TableRegistry<T> {
    /// Registers `table` under `family`, returning a shared reference to
    /// it.
    ///
    /// # Panics
    ///
    /// Panics if a table is already registered for `family`.
    pub fn register(&self, family: AddressFamily, table: T) -> Strong<T> {
        let mut tables = self.tables.write();
        assert!(
            !tables.iter().any(|(f, _)| *f == family),
            "table already registered for {family:?}"
        );
        let primary = Primary::new(table);
        let strong = Primary::clone_strong(&primary);
        tables.push((family, primary));
        strong
    }

    /// Locates the table registered under `family`.
    pub fn get(&self, family: AddressFamily) -> Option<Strong<T>> {
        let tables = self.tables.read();
        tables
            .iter()
            .find_map(|(f, table)| (*f == family).then(|| Primary::clone_strong(table)))
    }

    /// Unregisters and returns the table for `family`, if present.
    ///
    /// Meant for orderly teardown after all entries are drained.
    pub fn unregister(&self, family: AddressFamily) -> Option<Primary<T>> {
        let mut tables = self.tables.write();
        let pos = tables.iter().position(|(f, _)| *f == family)?;
        let (_, table) = tables.remove(pos);
        Some(table)
    }
}
