// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Link device abstractions.

use std::fmt::Debug;
use std::hash::Hash;

use net_types::ethernet::Mac;
use net_types::UnicastAddress;

/// The type of address used by a link device.
pub trait LinkAddress:
    'static + Copy + Clone + Debug + Eq + Hash + PartialEq + Send + Sync
{
    /// The length of the address in bytes.
    const BYTES_LENGTH: usize;

    /// Writes the bytes of the address into `buf`.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is shorter than `BYTES_LENGTH`.
    fn write_bytes(&self, buf: &mut [u8]);

    /// Constructs a `LinkAddress` from the provided bytes.
    ///
    /// # Panics
    ///
    /// Panics if the provided bytes are not a valid representation, e.g. if
    /// the length is not `BYTES_LENGTH`.
    fn from_bytes(bytes: &[u8]) -> Self;
}

/// A link address that can distinguish unicast from group destinations.
pub trait LinkUnicastAddress: LinkAddress + UnicastAddress {}
impl<L: LinkAddress + UnicastAddress> LinkUnicastAddress for L {}

/// A link device.
///
/// `LinkDevice` is used to identify a particular link device implementation.
/// It is only intended to exist at the type level, never instantiated at
/// runtime.
pub trait LinkDevice: 'static {
    /// The type of address used by this device.
    type Address: LinkUnicastAddress;
}

/// An implementation of [`LinkDevice`] for Ethernet devices.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum EthernetLinkDevice {}

impl LinkDevice for EthernetLinkDevice {
    type Address = Mac;
}

impl LinkAddress for Mac {
    const BYTES_LENGTH: usize = 6;

    fn write_bytes(&self, buf: &mut [u8]) {
        buf[..Self::BYTES_LENGTH].copy_from_slice(&self.bytes());
    }

    fn from_bytes(bytes: &[u8]) -> Mac {
        let bytes: [u8; 6] = bytes.try_into().expect("ethernet address must be 6 bytes");
        Mac::new(bytes)
    }
}
