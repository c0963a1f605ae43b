// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Error types used by the neighbour cache.

use thiserror::Error;

/// Error when something unexpectedly doesn't exist.
#[derive(Error, Debug, PartialEq, Eq, Clone, Copy)]
#[error("not found")]
pub struct NotFoundError;

/// Error when a neighbour entry cannot be created.
#[derive(Error, Debug, PartialEq, Eq, Clone, Copy)]
pub enum CreateError {
    /// The table is over `gc_thresh3` and the forced shrink could not free
    /// any entry.
    #[error("neighbour table is full")]
    TableFull,

    /// The parameter set attached to the interface has been marked dead; no
    /// new entries may be created against it.
    #[error("interface parameters are dead")]
    ParametersDead,
}

/// Error when an update to a neighbour entry is refused.
#[derive(Error, Debug, PartialEq, Eq, Clone, Copy)]
pub enum UpdateError {
    /// A non-administrative update attempted to overwrite a `Permanent` or
    /// `Noarp` entry.
    #[error("entry state may only be changed administratively")]
    NotPermitted,

    /// No link-layer address was supplied and none is cached.
    #[error("update carries no link-layer address")]
    AddressRequired,
}

/// Error when a frame cannot be handed to an interface.
#[derive(Error, Debug, PartialEq, Eq, Clone, Copy)]
pub enum TransmitError {
    /// The interface backing the entry has gone down; the frame was dropped
    /// by the black-hole output.
    #[error("network is down")]
    NetworkDown,
}
