// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The interface adapter consumed by the neighbour cache.
//!
//! The cache does not drive hardware itself; it reaches interfaces through
//! [`DeviceContext`], which exposes the small surface it needs: addressing
//! properties, capability bits that steer output-variant selection, header
//! templating, and the final frame hand-off.

use std::fmt::Debug;
use std::hash::Hash;

use crate::error::TransmitError;
use crate::link::LinkDevice;

/// An outbound frame, opaque to the cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame(Vec<u8>);

impl Frame {
    /// Creates a frame from its serialized body.
    pub fn new(body: Vec<u8>) -> Frame {
        Frame(body)
    }

    /// Returns the frame body.
    pub fn as_slice(&self) -> &[u8] {
        let Self(body) = self;
        body
    }

    /// Consumes the frame, returning its body.
    pub fn into_inner(self) -> Vec<u8> {
        let Self(body) = self;
        body
    }
}

impl From<Vec<u8>> for Frame {
    fn from(body: Vec<u8>) -> Frame {
        Frame(body)
    }
}

/// The maximum link-layer header length a [`HeaderTemplate`] can hold.
pub const MAX_HEADER_LEN: usize = 32;

/// A prebuilt link-layer header, cached so the fast path can prepend it to
/// outbound frames without consulting the resolution state.
///
/// Kept `Copy` and fixed-size so it can live under a sequence lock.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HeaderTemplate {
    len: u8,
    bytes: [u8; MAX_HEADER_LEN],
}

impl HeaderTemplate {
    /// Creates a template from serialized header bytes.
    ///
    /// # Panics
    ///
    /// Panics if `header` exceeds [`MAX_HEADER_LEN`].
    pub fn new(header: &[u8]) -> HeaderTemplate {
        assert!(header.len() <= MAX_HEADER_LEN, "header too long: {}", header.len());
        let mut bytes = [0; MAX_HEADER_LEN];
        bytes[..header.len()].copy_from_slice(header);
        HeaderTemplate { len: header.len() as u8, bytes }
    }

    /// Returns the header bytes.
    pub fn bytes(&self) -> &[u8] {
        let Self { len, bytes } = self;
        &bytes[..usize::from(*len)]
    }
}

/// The destination of a received frame, as classified by the link layer.
///
/// Learning distinguishes confirmations addressed to us from ones that were
/// broadcast: only the former assert reachability.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum FrameDestination {
    /// The frame was delivered to our unicast link address.
    Unicast,
    /// The frame was delivered to the broadcast address.
    Broadcast,
    /// The frame was delivered to a multicast group.
    Multicast,
}

/// Properties of an interface that steer entry construction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// The device participates in address resolution. Interfaces that do
    /// not (e.g. tunnels) get entries pinned to the no-resolution state.
    pub can_resolve: bool,
    /// The driver exposes header templating, enabling the cached-header
    /// fast path.
    pub has_header_cache: bool,
    /// Legacy drivers that cannot hold a template and need the header
    /// rebuilt on every transmit.
    pub needs_header_rebuild: bool,
    /// The interface is a loopback interface.
    pub is_loopback: bool,
    /// The interface is a point-to-point link.
    pub is_point_to_point: bool,
}

impl DeviceCapabilities {
    /// Capabilities of a typical Ethernet interface.
    pub const fn ethernet() -> DeviceCapabilities {
        DeviceCapabilities {
            can_resolve: true,
            has_header_cache: true,
            needs_header_rebuild: false,
            is_loopback: false,
            is_point_to_point: false,
        }
    }
}

/// The execution context giving the cache access to network interfaces.
///
/// This is the "interface adapter" of the design: consumed, not implemented,
/// by this crate.
pub trait DeviceContext<D: LinkDevice> {
    /// The identifier for interfaces.
    type DeviceId: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    /// Returns the interface's own link-layer address.
    fn link_addr(&self, device: &Self::DeviceId) -> D::Address;

    /// Returns the interface's link-layer broadcast address.
    fn broadcast_addr(&self, device: &Self::DeviceId) -> D::Address;

    /// Returns the interface's capability bits.
    fn capabilities(&self, device: &Self::DeviceId) -> DeviceCapabilities;

    /// Returns the interface MTU.
    fn mtu(&self, device: &Self::DeviceId) -> u32;

    /// Builds a reusable link-layer header addressed to `dst`.
    ///
    /// Returns `None` if the device cannot template headers.
    fn build_header(&self, device: &Self::DeviceId, dst: D::Address) -> Option<HeaderTemplate>;

    /// Hands off a frame with its link destination resolved by the caller.
    fn transmit(
        &mut self,
        device: &Self::DeviceId,
        dst: D::Address,
        frame: Frame,
    ) -> Result<(), TransmitError>;

    /// Hands off a frame with a prebuilt header.
    fn transmit_templated(
        &mut self,
        device: &Self::DeviceId,
        header: &HeaderTemplate,
        frame: Frame,
    ) -> Result<(), TransmitError>;

    /// Hands off a frame on an interface that performs no link addressing.
    fn transmit_unaddressed(
        &mut self,
        device: &Self::DeviceId,
        frame: Frame,
    ) -> Result<(), TransmitError>;
}
