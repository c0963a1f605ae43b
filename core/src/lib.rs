// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A generic L3→L2 address-resolution cache ("neighbour cache").
//!
//! Before a host can transmit a frame to an on-link destination it must map
//! the next-hop network-layer address to a link-layer address. This crate
//! implements the cache that holds those mappings, generic over the
//! resolution protocol; ARP over IPv4 ([`arp`]) is the concrete instance.
//!
//! The interesting parts are not the mappings themselves but what surrounds
//! them:
//!
//!  * the per-entry Neighbour Unreachability Detection (NUD) state machine
//!    with its timed transitions, probe budgets and confirmation inputs;
//!  * the per-entry bounded queue holding outbound frames while resolution
//!    is in flight;
//!  * two-level garbage collection (a synchronous forced shrink under
//!    memory pressure and an asynchronous periodic sweep) bounding table
//!    size under load;
//!  * the proxy subsystem answering resolution requests on behalf of other
//!    hosts through a delayed-reply queue.
//!
//! The crate does not talk to hardware or parse wire formats. Interfaces
//! are reached through the [`device::DeviceContext`] adapter, and timers,
//! clocks, randomness and events through the context traits in [`context`],
//! so the whole state machine can be driven deterministically in tests.

#![warn(missing_docs, unreachable_patterns, unused)]

pub mod arp;
pub mod context;
pub mod counters;
pub mod device;
pub mod error;
pub mod link;
pub mod neighbor;
pub mod registry;
pub mod time;

pub use context::{
    EventContext, InstantBindingsTypes, InstantContext, RngContext, TimerContext, TimerHandler,
};
pub use device::{DeviceCapabilities, DeviceContext, Frame, FrameDestination, HeaderTemplate};
pub use error::{CreateError, TransmitError, UpdateError};
pub use link::{EthernetLinkDevice, LinkAddress, LinkDevice, LinkUnicastAddress};
pub use neighbor::{
    AddressFamily, Event, EventKind, EventState, NeighborBindingsContext, NeighborContext,
    NeighborParameters, NeighborParametersUpdate, NeighborProtocol, NeighborRef, NeighborState,
    NeighborTable, TableConfig, TableTimerId, TransmitDisposition, UpdateFlags,
};
pub use time::{Instant, NonZeroDuration};
