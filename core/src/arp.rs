// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The Address Resolution Protocol instance of the neighbour cache: maps
//! IPv4 next hops to Ethernet addresses.
//!
//! Wire parsing and serialization live outside this crate; inbound packets
//! arrive here already parsed as [`ArpPacket`] metadata and outbound
//! requests and replies leave through the context hooks.

use net_types::ethernet::Mac;
use net_types::ip::{Ip as _, Ipv4, Ipv4Addr};
use net_types::Witness as _;
use tracing::trace;

use crate::context::{InstantBindingsTypes, InstantContext as _};
use crate::device::{DeviceContext, FrameDestination};
use crate::link::EthernetLinkDevice;
use crate::neighbor::{
    AddressFamily, EntryInit, NeighborBindingsContext, NeighborContext, NeighborProtocol,
    NeighborState, NeighborTable, OutputVariant, UpdateFlags,
};
use crate::time::Instant;

/// The ARP-for-IPv4 resolution protocol.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ArpIpv4 {}

/// A neighbour table resolving IPv4 addresses to Ethernet addresses.
pub type ArpTable<DeviceId, T> = NeighborTable<ArpIpv4, EthernetLinkDevice, DeviceId, T>;

/// An ARP operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ArpOp {
    /// Who-has: a solicitation.
    Request,
    /// Is-at: a confirmation.
    Reply,
}

/// A validated, parsed inbound ARP packet.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ArpPacket {
    /// The operation.
    pub op: ArpOp,
    /// The sender's protocol address.
    pub sender_protocol_addr: Ipv4Addr,
    /// The sender's hardware address.
    pub sender_link_addr: Mac,
    /// The target's protocol address.
    pub target_protocol_addr: Ipv4Addr,
    /// The target's hardware address (unspecified in requests).
    pub target_link_addr: Mac,
    /// Whether this packet was re-dispatched from the proxy queue rather
    /// than received from the wire. Re-dispatched requests are answered
    /// immediately instead of being deferred again.
    pub locally_enqueued: bool,
}

/// One side of an ARP exchange: a protocol address bound to a hardware
/// address.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ArpEndpoint {
    /// The protocol address.
    pub protocol_addr: Ipv4Addr,
    /// The hardware address.
    pub link_addr: Mac,
}

/// The execution context for the ARP instance.
pub trait ArpContext<BC>: NeighborContext<ArpIpv4, EthernetLinkDevice, BC> {
    /// Whether `addr` is assigned to this host on `device`.
    fn is_local_address(&self, device: &Self::DeviceId, addr: Ipv4Addr) -> bool;

    /// Whether this host forwards between interfaces. Proxying is only
    /// offered by forwarding hosts.
    fn forwarding_enabled(&self, device: &Self::DeviceId) -> bool;

    /// Crafts and emits an ARP reply to `to`, asserting `claiming`.
    fn send_arp_reply(
        &mut self,
        bindings_ctx: &mut BC,
        device: &Self::DeviceId,
        to: ArpEndpoint,
        claiming: ArpEndpoint,
    );
}

/// Maps an IPv4 multicast group to its derived Ethernet multicast address:
/// `01:00:5e` followed by the low 23 bits of the group.
pub fn multicast_mac_for(addr: Ipv4Addr) -> Mac {
    let bytes = addr.ipv4_bytes();
    Mac::new([0x01, 0x00, 0x5e, bytes[1] & 0x7f, bytes[2], bytes[3]])
}

fn is_loopback(addr: Ipv4Addr) -> bool {
    Ipv4::LOOPBACK_SUBNET.contains(&addr)
}

fn is_multicast(addr: Ipv4Addr) -> bool {
    Ipv4::MULTICAST_SUBNET.contains(&addr)
}

fn is_limited_broadcast(addr: Ipv4Addr) -> bool {
    addr == Ipv4::LIMITED_BROADCAST_ADDRESS.get()
}

impl NeighborProtocol<EthernetLinkDevice> for ArpIpv4 {
    type Addr = Ipv4Addr;
    type ProxyRequest = ArpPacket;

    const FAMILY: AddressFamily = AddressFamily::INET;

    fn construct<CC: DeviceContext<EthernetLinkDevice>>(
        core_ctx: &CC,
        device: &CC::DeviceId,
        addr: Ipv4Addr,
    ) -> EntryInit<EthernetLinkDevice> {
        let caps = core_ctx.capabilities(device);

        // Interfaces that cannot resolve at all bypass addressing
        // entirely.
        if !caps.can_resolve && !caps.is_loopback && !caps.is_point_to_point {
            return EntryInit { binding: None, pinned_noarp: true, variant: OutputVariant::Direct };
        }

        let variant = if caps.needs_header_rebuild {
            OutputVariant::Compat
        } else if caps.has_header_cache {
            OutputVariant::HeaderCache
        } else {
            OutputVariant::Generic
        };

        // Destinations whose hardware address is known a priori never
        // resolve: the binding is fabricated here.
        let binding = if is_multicast(addr) {
            Some(multicast_mac_for(addr))
        } else if caps.is_loopback || is_loopback(addr) {
            Some(core_ctx.link_addr(device))
        } else if is_limited_broadcast(addr) || caps.is_point_to_point {
            Some(core_ctx.broadcast_addr(device))
        } else {
            None
        };
        EntryInit { binding, pinned_noarp: binding.is_some(), variant }
    }

    fn is_valid_neighbor_addr(addr: &Ipv4Addr) -> bool {
        !is_loopback(*addr) && !is_multicast(*addr) && !is_limited_broadcast(*addr)
    }
}

/// Drives learning and replies from a validated inbound ARP packet: the
/// `on_inbound_resolution` entry point of the cache.
pub fn handle_arp_packet<CC, BC, T>(
    core_ctx: &mut CC,
    bindings_ctx: &mut BC,
    table: &ArpTable<CC::DeviceId, T>,
    device: &CC::DeviceId,
    packet: ArpPacket,
    frame_dst: FrameDestination,
) where
    CC: ArpContext<BC>,
    BC: NeighborBindingsContext<ArpIpv4, EthernetLinkDevice, CC::DeviceId>
        + InstantBindingsTypes<Instant = T>,
    T: Instant,
{
    let ArpPacket {
        op,
        sender_protocol_addr: sip,
        sender_link_addr: sha,
        target_protocol_addr: tip,
        target_link_addr: _,
        locally_enqueued,
    } = packet;

    // Requests for loopback or multicast targets are nonsense on the wire.
    if is_loopback(tip) || is_multicast(tip) {
        return;
    }

    // Duplicate-address-detection probe (RFC 2131): an unspecified sender
    // checking whether its candidate address is taken. Defend our address
    // but learn nothing from it.
    if sip == Ipv4::UNSPECIFIED_ADDRESS {
        if op == ArpOp::Request && core_ctx.is_local_address(device, tip) {
            let our_mac = core_ctx.link_addr(device);
            core_ctx.send_arp_reply(
                bindings_ctx,
                device,
                ArpEndpoint { protocol_addr: sip, link_addr: sha },
                ArpEndpoint { protocol_addr: tip, link_addr: our_mac },
            );
        }
        return;
    }

    if op == ArpOp::Request {
        if core_ctx.is_local_address(device, tip) {
            // A request for us: the requester very likely wants to talk to
            // us next, so learn its binding while answering.
            learn(core_ctx, bindings_ctx, table, device, sip, sha, NeighborState::Stale, false);
            let our_mac = core_ctx.link_addr(device);
            core_ctx.send_arp_reply(
                bindings_ctx,
                device,
                ArpEndpoint { protocol_addr: sip, link_addr: sha },
                ArpEndpoint { protocol_addr: tip, link_addr: our_mac },
            );
            return;
        }

        if core_ctx.forwarding_enabled(device) && table.proxy_lookup(&tip, device) {
            learn(core_ctx, bindings_ctx, table, device, sip, sha, NeighborState::Stale, false);
            let proxy_delay = table.device_parameters(device).get().proxy_delay;
            if locally_enqueued || frame_dst == FrameDestination::Unicast || proxy_delay.is_zero()
            {
                let our_mac = core_ctx.link_addr(device);
                core_ctx.send_arp_reply(
                    bindings_ctx,
                    device,
                    ArpEndpoint { protocol_addr: sip, link_addr: sha },
                    ArpEndpoint { protocol_addr: tip, link_addr: our_mac },
                );
            } else {
                // Defer the answer to avoid a storm of proxies replying at
                // once.
                table.proxy_enqueue(
                    bindings_ctx,
                    device.clone(),
                    ArpPacket { locally_enqueued: true, ..packet },
                );
            }
            return;
        }
    }

    // A reply, or a request addressed to someone else: update the table
    // from the sender fields. Replies delivered to a broadcast destination
    // do not assert reachability.
    let create = table.config().accept_unsolicited && op == ArpOp::Reply;
    let state = if op == ArpOp::Reply && frame_dst == FrameDestination::Unicast {
        NeighborState::Reachable
    } else {
        NeighborState::Stale
    };
    learn(core_ctx, bindings_ctx, table, device, sip, sha, state, !create);
}

/// Installs `(sip, sha)` into the table in `state`, honoring the locktime
/// anti-flap guard: a binding learned less than `locktime` ago is not
/// overridden by a conflicting address.
fn learn<CC, BC, T>(
    core_ctx: &mut CC,
    bindings_ctx: &mut BC,
    table: &ArpTable<CC::DeviceId, T>,
    device: &CC::DeviceId,
    sip: Ipv4Addr,
    sha: Mac,
    state: NeighborState,
    lookup_only: bool,
) where
    CC: ArpContext<BC>,
    BC: NeighborBindingsContext<ArpIpv4, EthernetLinkDevice, CC::DeviceId>
        + InstantBindingsTypes<Instant = T>,
    T: Instant,
{
    if !ArpIpv4::is_valid_neighbor_addr(&sip) {
        return;
    }
    let entry = if lookup_only {
        table.lookup(&sip, device)
    } else {
        table.lookup_or_create(core_ctx, bindings_ctx, sip, device.clone()).ok()
    };
    let Some(entry) = entry else {
        return;
    };

    // If several different replies follow back-to-back, the first one
    // wins until the lock interval expires: this prevents cache trashing
    // and picks the fastest responder.
    let locktime = entry.parameters().get().locktime;
    let override_existing = bindings_ctx.now() >= entry.updated_at().add(locktime);
    match table.update(
        core_ctx,
        bindings_ctx,
        &entry,
        Some(sha),
        state,
        UpdateFlags { admin: false, override_existing, weak_override: false },
    ) {
        Ok(()) => {}
        Err(e) => trace!("arp learn for {sip} refused: {e}"),
    }
}
