// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Neighbour API structs.
//!
//! The bulk operations used by management: insert/replace, delete, lookup
//! and flush, mapped onto the table's create/update/remove primitives with
//! administrative flags.

use std::fmt::Debug;
use std::hash::Hash;

use net_types::UnicastAddress as _;
use thiserror::Error;

use crate::context::InstantBindingsTypes;
use crate::error::{CreateError, NotFoundError, UpdateError};
use crate::link::LinkDevice;
use crate::time::Instant;

use super::{
    EntrySnapshot, NeighborBindingsContext, NeighborContext, NeighborProtocol, NeighborState,
    NeighborTable, UpdateFlags,
};

/// Error when a static neighbour entry cannot be inserted.
#[derive(Debug, PartialEq, Eq, Error)]
pub enum StaticNeighborInsertionError {
    /// The link-layer address used for a static entry is not unicast.
    #[error("link address is not unicast")]
    LinkAddressNotUnicast,

    /// The protocol address is invalid as the address of a neighbour.
    #[error("protocol address is invalid")]
    AddressInvalid,

    /// The entry could not be created.
    #[error(transparent)]
    Create(#[from] CreateError),
}

/// Error when a neighbour table entry cannot be updated administratively.
#[derive(Debug, PartialEq, Eq, Error)]
pub enum NeighborUpdateError {
    /// The protocol address is invalid as the address of a neighbour.
    #[error("protocol address is invalid")]
    AddressInvalid,

    /// Entry cannot be found.
    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    /// The update was refused.
    #[error(transparent)]
    Update(#[from] UpdateError),
}

/// Error when a neighbour table entry cannot be removed.
#[derive(Debug, PartialEq, Eq, Error)]
pub enum NeighborRemovalError {
    /// The protocol address is invalid as the address of a neighbour.
    #[error("protocol address is invalid")]
    AddressInvalid,

    /// Entry cannot be found.
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
}

/// The neighbour management API: bulk operations over a table.
pub struct NeighborApi<'a, P: NeighborProtocol<D>, D: LinkDevice, DeviceId, T: Instant>(
    &'a NeighborTable<P, D, DeviceId, T>,
);

impl<'a, P, D, DeviceId, T> NeighborApi<'a, P, D, DeviceId, T>
where
    P: NeighborProtocol<D>,
    D: LinkDevice,
    DeviceId: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    T: Instant,
{
    /// Creates an API handle over `table`.
    pub fn new(table: &'a NeighborTable<P, D, DeviceId, T>) -> Self {
        Self(table)
    }

    fn table(&self) -> &NeighborTable<P, D, DeviceId, T> {
        let Self(table) = self;
        table
    }

    /// Sets a static (permanent) entry for the neighbour.
    ///
    /// If no entry exists, a new one is created. If an entry already
    /// exists, it is updated with the provided link address and pinned as
    /// permanent. Dynamic updates for the neighbour are refused from then
    /// on.
    pub fn insert_static<CC, BC>(
        &self,
        core_ctx: &mut CC,
        bindings_ctx: &mut BC,
        addr: P::Addr,
        device: DeviceId,
        link_addr: D::Address,
    ) -> Result<(), StaticNeighborInsertionError>
    where
        CC: NeighborContext<P, D, BC, DeviceId = DeviceId>,
        BC: NeighborBindingsContext<P, D, DeviceId> + InstantBindingsTypes<Instant = T>,
    {
        if !link_addr.is_unicast() {
            return Err(StaticNeighborInsertionError::LinkAddressNotUnicast);
        }
        if !P::is_valid_neighbor_addr(&addr) {
            return Err(StaticNeighborInsertionError::AddressInvalid);
        }
        let entry = self.table().lookup_or_create(core_ctx, bindings_ctx, addr, device)?;
        self.table()
            .update(
                core_ctx,
                bindings_ctx,
                &entry,
                Some(link_addr),
                NeighborState::Permanent,
                UpdateFlags::ADMIN_REPLACE,
            )
            .expect("administrative replace cannot be refused");
        Ok(())
    }

    /// Applies an administrative update to an existing entry.
    pub fn update_entry<CC, BC>(
        &self,
        core_ctx: &mut CC,
        bindings_ctx: &mut BC,
        addr: P::Addr,
        device: DeviceId,
        link_addr: Option<D::Address>,
        state: NeighborState,
    ) -> Result<(), NeighborUpdateError>
    where
        CC: NeighborContext<P, D, BC, DeviceId = DeviceId>,
        BC: NeighborBindingsContext<P, D, DeviceId> + InstantBindingsTypes<Instant = T>,
    {
        if !P::is_valid_neighbor_addr(&addr) {
            return Err(NeighborUpdateError::AddressInvalid);
        }
        let entry = self.table().lookup(&addr, &device).ok_or(NotFoundError)?;
        self.table()
            .update(core_ctx, bindings_ctx, &entry, link_addr, state, UpdateFlags::ADMIN_REPLACE)?;
        Ok(())
    }

    /// Removes a static or dynamic neighbour table entry.
    pub fn remove_entry<BC>(
        &self,
        bindings_ctx: &mut BC,
        addr: P::Addr,
        device: DeviceId,
    ) -> Result<(), NeighborRemovalError>
    where
        BC: NeighborBindingsContext<P, D, DeviceId> + InstantBindingsTypes<Instant = T>,
    {
        if !P::is_valid_neighbor_addr(&addr) {
            return Err(NeighborRemovalError::AddressInvalid);
        }
        self.table().remove(bindings_ctx, &addr, &device)?;
        Ok(())
    }

    /// Returns a snapshot of the entry for `(addr, device)`, if present.
    pub fn get_entry(
        &self,
        addr: P::Addr,
        device: DeviceId,
    ) -> Option<EntrySnapshot<P::Addr, D::Address, DeviceId, T>> {
        let entry = self.table().lookup(&addr, &device)?;
        let inner = entry.inner.lock();
        Some(EntrySnapshot {
            addr,
            device,
            state: inner.state,
            link_addr: inner.link_addr,
            confirmed: inner.confirmed,
            used: inner.used,
            updated: inner.updated,
        })
    }

    /// Removes every entry bound to `device`.
    pub fn flush_device<BC>(&self, bindings_ctx: &mut BC, device: &DeviceId)
    where
        BC: NeighborBindingsContext<P, D, DeviceId> + InstantBindingsTypes<Instant = T>,
    {
        self.table().flush_device(bindings_ctx, device)
    }
}
