use core::fmt;

use heapless::Vec;

use super::{Error, Result};
use crate::wire::ipv4::DEFAULT_HOP_LIMIT;
use crate::wire::{
    AcceleratorId, IPV4_HEADER_LEN, IpProtocol, Ipv4Address, Ipv4Packet, Ipv4Repr,
    TCP_HEADER_LEN, TcpFlags, TcpPacket, TcpRepr, TcpSeqNumber,
};

/// Length of the accelerator-id option area, padded to a 32-bit boundary.
const OPTIONS_LEN: usize = 8;

/// Length of every keepalive datagram: IPv4 header, TCP header and the
/// padded accelerator-id option, with no payload.
pub const DATAGRAM_LEN: usize = IPV4_HEADER_LEN + TCP_HEADER_LEN + OPTIONS_LEN;

/// A fully built keepalive datagram, ready for a raw IPv4 socket.
pub type Datagram = Vec<u8, DATAGRAM_LEN>;

/// A keepalive probe sent on behalf of one endpoint of a session to the other.
///
/// The sequence numbers held here are the last ones observed for the
/// session. On the wire both are one less, so the probe repeats an octet the
/// receiver has already acknowledged and provokes a duplicate ACK instead of
/// delivering data.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Repr {
    pub src_addr: Ipv4Address,
    pub src_port: u16,
    /// Last sequence number observed from the source endpoint.
    pub seq_number: TcpSeqNumber,
    pub dst_addr: Ipv4Address,
    pub dst_port: u16,
    /// Last sequence number observed from the destination endpoint.
    pub ack_number: TcpSeqNumber,
    /// Identifier of the accelerator originating the probe.
    pub local_id: AcceleratorId,
}

impl Repr {
    fn tcp_repr(&self) -> TcpRepr<'static> {
        TcpRepr {
            src_port: self.src_port,
            dst_port: self.dst_port,
            flags: TcpFlags::ACK,
            seq_number: self.seq_number - 1,
            ack_number: self.ack_number - 1,
            window_len: 0,
            accelerator_id: Some(self.local_id),
            payload: &[],
        }
    }

    fn ip_repr(&self, tcp_repr: &TcpRepr) -> Ipv4Repr {
        Ipv4Repr {
            src_addr: self.src_addr,
            dst_addr: self.dst_addr,
            next_header: IpProtocol::Tcp,
            payload_len: tcp_repr.buffer_len(),
            hop_limit: DEFAULT_HOP_LIMIT,
        }
    }

    /// Parse a keepalive probe back out of a datagram.
    ///
    /// Anything that is not an option-tagged, payload-free pure ACK is rejected,
    /// as is an IPv4 header that differs from the one probes are emitted with:
    /// identification 0, no "don't fragment" flag, no DSCP or ECN marking.
    pub fn parse(datagram: &[u8]) -> Result<Repr> {
        let packet = Ipv4Packet::new_checked(datagram)?;
        let ip_repr = Ipv4Repr::parse(&packet)?;
        if ip_repr.next_header != IpProtocol::Tcp {
            return Err(Error);
        }
        if packet.ident() != 0 || packet.dont_frag() || packet.dscp() != 0 || packet.ecn() != 0 {
            return Err(Error);
        }
        let segment = TcpPacket::new_checked(packet.payload())?;
        let tcp_repr = TcpRepr::parse(&segment, &ip_repr.src_addr, &ip_repr.dst_addr)?;
        if tcp_repr.flags != TcpFlags::ACK || !tcp_repr.payload.is_empty() {
            return Err(Error);
        }
        let local_id = tcp_repr.accelerator_id.ok_or(Error)?;

        Ok(Repr {
            src_addr: ip_repr.src_addr,
            src_port: tcp_repr.src_port,
            seq_number: tcp_repr.seq_number + 1,
            dst_addr: ip_repr.dst_addr,
            dst_port: tcp_repr.dst_port,
            ack_number: tcp_repr.ack_number + 1,
            local_id,
        })
    }

    /// Return the length of the datagram that will be emitted from this representation.
    pub const fn buffer_len(&self) -> usize {
        DATAGRAM_LEN
    }

    /// Emit the probe into `buffer`, which must be exactly [buffer_len] octets long.
    ///
    /// The TCP checksum is computed first, then the IPv4 header checksum.
    ///
    /// [buffer_len]: #method.buffer_len
    pub fn emit(&self, buffer: &mut [u8]) {
        let tcp_repr = self.tcp_repr();
        let ip_repr = self.ip_repr(&tcp_repr);
        debug_assert_eq!(buffer.len(), ip_repr.buffer_len() + ip_repr.payload_len);

        let mut packet = Ipv4Packet::new_unchecked(buffer);
        ip_repr.emit(&mut packet);
        {
            let mut segment = TcpPacket::new_unchecked(packet.payload_mut());
            tcp_repr.emit(&mut segment, &self.src_addr, &self.dst_addr);
        }
        packet.fill_checksum();
    }

    /// Build the probe into a fresh datagram.
    pub fn to_datagram(&self) -> Datagram {
        let mut datagram: Datagram = core::iter::repeat_n(0, DATAGRAM_LEN).collect();
        self.emit(&mut datagram);
        datagram
    }
}

impl fmt::Display for Repr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "keepalive {}:{} -> {}:{} seq={} ack={} accel={}",
            self.src_addr,
            self.src_port,
            self.dst_addr,
            self.dst_port,
            self.seq_number - 1,
            self.ack_number - 1,
            self.local_id
        )
    }
}

fn accelerator_id(datagram: &[u8]) -> Result<Option<AcceleratorId>> {
    let packet = Ipv4Packet::new_checked(datagram)?;
    let ip_repr = Ipv4Repr::parse(&packet)?;
    if ip_repr.next_header != IpProtocol::Tcp {
        return Err(Error);
    }
    let segment = TcpPacket::new_checked(packet.payload())?;
    let tcp_repr = TcpRepr::parse(&segment, &ip_repr.src_addr, &ip_repr.dst_addr)?;
    Ok(tcp_repr.accelerator_id)
}

/// Query whether an inbound IPv4 datagram carries the accelerator-id option
/// with `local_id`, i.e. whether it is one of our own probes looping back.
///
/// The traffic path uses this to keep echoed probes from counting as
/// session activity. Malformed datagrams are never our own.
pub fn is_own_probe(datagram: &[u8], local_id: AcceleratorId) -> bool {
    matches!(accelerator_id(datagram), Ok(Some(id)) if id == local_id)
}
