use std::net::Ipv4Addr;

use dblock_lib::{decode_query_name, forge_nxdomain, DecodeError, DnsHeader, DNS_HEADER_SIZE, MAX_NAME_LENGTH};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::{self, Ipv4Packet, MutableIpv4Packet};
use pnet::packet::udp::{self, MutableUdpPacket, UdpPacket};

use crate::{State, DNS_PORT};

const IPV4_HEADER_MIN_SIZE: usize = 20;
const UDP_HEADER_SIZE: usize = 8;

/// Outcome of one interception point for one packet. The surrounding
/// network stack delivers the packet either way; `Mutated` means the
/// in-place rewrite must travel with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Pass,
    Mutated,
}

struct UdpView {
    udp_start: usize,
    udp_end: usize,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    dst_port: u16,
}

fn parse_udp(packet: &[u8]) -> Option<UdpView> {
    let ipv4 = Ipv4Packet::new(packet)?;
    if ipv4.get_version() != 4 || ipv4.get_next_level_protocol() != IpNextHeaderProtocols::Udp {
        return None;
    }

    let udp_start = ipv4.get_header_length() as usize * 4;
    if udp_start < IPV4_HEADER_MIN_SIZE || packet.len() < udp_start + UDP_HEADER_SIZE {
        return None;
    }

    let udp = UdpPacket::new(&packet[udp_start..])?;
    let udp_end = udp_start + udp.get_length() as usize;
    if (udp.get_length() as usize) < UDP_HEADER_SIZE || udp_end > packet.len() {
        return None;
    }

    Some(UdpView {
        udp_start,
        udp_end,
        src: ipv4.get_source(),
        dst: ipv4.get_destination(),
        dst_port: udp.get_destination(),
    })
}

/// The inbound-query interception point.
///
/// Applies to UDP packets addressed to port 53 carrying at least one
/// question. A query for a blocked domain is rewritten in place into an
/// NXDOMAIN response and `Mutated` is signalled so the rewritten packet is
/// delivered instead of the original. Anything the filter cannot
/// confidently classify passes unchanged: traffic is never blocked because
/// a packet failed to parse.
///
/// The rewrite keeps the original addressing, so this point is only
/// correct on the host that originated the query, not on a gateway
/// relaying someone else's.
pub fn filter_query(packet: &mut [u8], state: &State) -> Decision {
    try_filter_query(packet, state).unwrap_or(Decision::Pass)
}

fn try_filter_query(packet: &mut [u8], state: &State) -> Result<Decision, DecodeError> {
    let Some(view) = parse_udp(packet) else {
        return Ok(Decision::Pass);
    };
    if view.dst_port != DNS_PORT {
        return Ok(Decision::Pass);
    }

    let dns_start = view.udp_start + UDP_HEADER_SIZE;
    let dns = packet
        .get(dns_start..view.udp_end)
        .ok_or(DecodeError::UnexpectedEnd)?;
    let header = DnsHeader::parse(dns)?;
    if header.is_response() || header.question_count == 0 {
        return Ok(Decision::Pass);
    }

    let mut name_buf = [0u8; MAX_NAME_LENGTH];
    let qname = decode_query_name(&dns[DNS_HEADER_SIZE..], &mut name_buf)?;
    if !state.cache.contains(qname) {
        return Ok(Decision::Pass);
    }

    tracing::info!(domain = qname, "blocking DNS query");
    forge_nxdomain(&mut packet[dns_start..view.udp_end])?;
    write_udp_checksum(packet, &view, view.dst);

    Ok(Decision::Mutated)
}

/// The outbound-local interception point: resolver steering.
///
/// Applies to UDP packets addressed to port 53. When either policy flag is
/// set, the destination address is rewritten to the matching filtering
/// resolver and both the IPv4 header checksum and the UDP checksum (its
/// pseudo-header covers the rewritten address) are recomputed.
pub fn steer_upstream(packet: &mut [u8], state: &State) -> Decision {
    let Some(view) = parse_udp(packet) else {
        return Decision::Pass;
    };
    if view.dst_port != DNS_PORT {
        return Decision::Pass;
    }

    let policy = state.cache.snapshot_policy();
    let Some(resolver) = policy.upstream() else {
        return Decision::Pass;
    };

    {
        let Some(mut ipv4) = MutableIpv4Packet::new(packet) else {
            return Decision::Pass;
        };
        ipv4.set_destination(resolver);
        let checksum = ipv4::checksum(&ipv4.to_immutable());
        ipv4.set_checksum(checksum);
    }
    write_udp_checksum(packet, &view, resolver);

    tracing::debug!(%resolver, "steering DNS query to a filtering resolver");
    Decision::Mutated
}

// Standard pseudo-header checksum; pnet skips the checksum word itself
fn write_udp_checksum(packet: &mut [u8], view: &UdpView, dst: Ipv4Addr) {
    let checksum = match UdpPacket::new(&packet[view.udp_start..view.udp_end]) {
        Some(udp) => udp::ipv4_checksum(&udp, &view.src, &dst),
        None => return,
    };
    if let Some(mut udp) = MutableUdpPacket::new(&mut packet[view.udp_start..view.udp_end]) {
        udp.set_checksum(checksum);
    }
}
