//! Link-layer decoding of captured frames down to the first DNS question.

use std::net::Ipv4Addr;

use pnet::packet::Packet;
use pnet::packet::ethernet::{EtherType, EtherTypes, EthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::sll::SLLPacket;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::udp::UdpPacket;
use pnet::packet::vlan::VlanPacket;

use crate::proto_utils::{QuickQuestion, parse_first_question, strip_tcp_length_prefix};

/// Link-layer header type of a capture source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Ethernet,
    /// Linux cooked capture, used by the `any` pseudo-device.
    LinuxSll,
    /// Bare IP datagrams, no link header.
    RawIp,
    Unsupported(i32),
}

impl LinkKind {
    /// Maps a libpcap DLT/LINKTYPE value.
    pub fn from_dlt(dlt: i32) -> Self {
        match dlt {
            1 => Self::Ethernet,
            113 => Self::LinuxSll,
            12 | 14 | 101 | 228 => Self::RawIp,
            other => Self::Unsupported(other),
        }
    }
}

/// IPv4 source and first question of a DNS message carried in `frame`.
///
/// Returns None when the frame has no IPv4 layer, no UDP/TCP DNS payload, or
/// a DNS message without questions.
pub fn extract_dns_question(link: LinkKind, frame: &[u8]) -> Option<(Ipv4Addr, QuickQuestion)> {
    match link {
        LinkKind::Ethernet => {
            let ethernet = EthernetPacket::new(frame)?;
            from_ethertype(ethernet.get_ethertype(), ethernet.payload())
        }
        LinkKind::LinuxSll => {
            let sll = SLLPacket::new(frame)?;
            from_ethertype(sll.get_protocol(), sll.payload())
        }
        LinkKind::RawIp => from_ipv4(frame),
        LinkKind::Unsupported(_) => None,
    }
}

fn from_ethertype(ethertype: EtherType, payload: &[u8]) -> Option<(Ipv4Addr, QuickQuestion)> {
    match ethertype {
        EtherTypes::Ipv4 => from_ipv4(payload),
        EtherTypes::Vlan => {
            let vlan = VlanPacket::new(payload)?;
            if vlan.get_ethertype() == EtherTypes::Ipv4 {
                from_ipv4(vlan.payload())
            } else {
                None
            }
        }
        _ => None,
    }
}

fn from_ipv4(datagram: &[u8]) -> Option<(Ipv4Addr, QuickQuestion)> {
    let ipv4 = Ipv4Packet::new(datagram)?;
    if ipv4.get_version() != 4 || ipv4.get_fragment_offset() != 0 {
        return None;
    }

    let question = match ipv4.get_next_level_protocol() {
        IpNextHeaderProtocols::Udp => {
            let udp = UdpPacket::new(ipv4.payload())?;
            parse_first_question(udp.payload())
        }
        IpNextHeaderProtocols::Tcp => {
            let tcp = TcpPacket::new(ipv4.payload())?;
            strip_tcp_length_prefix(tcp.payload()).and_then(parse_first_question)
        }
        _ => None,
    }?;

    Some((ipv4.get_source(), question))
}
