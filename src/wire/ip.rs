use core::fmt;

enum_with_unknown! {
    /// IP datagram encapsulated protocol.
    pub enum Protocol(u8) {
        Icmp = 0x01,
        Tcp  = 0x06,
        Udp  = 0x11,
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Protocol::Icmp => write!(f, "ICMP"),
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
            Protocol::Unknown(id) => write!(f, "0x{id:02x}"),
        }
    }
}

/// One's-complement checksums as used by IPv4 and TCP.
///
/// All words are read in network byte order. An odd trailing octet is the
/// high-order half of a final word whose low-order half is zero (RFC 1071).
pub mod checksum {
    use byteorder::{ByteOrder, NetworkEndian};

    use super::Protocol;
    use crate::wire::Ipv4Address;

    /// Offset of the checksum field within an IPv4 header.
    const IPV4_CHECKSUM_AT: usize = 10;
    /// Offset of the checksum field within a TCP header.
    const TCP_CHECKSUM_AT: usize = 16;

    const fn propagate_carries(word: u32) -> u16 {
        let sum = (word >> 16) + (word & 0xffff);
        ((sum >> 16) as u16) + (sum as u16)
    }

    /// Compute an RFC 1071 compliant checksum (without the final complement).
    pub fn data(mut data: &[u8]) -> u16 {
        let mut accum = 0;

        // For each 32-byte chunk...
        const CHUNK_SIZE: usize = 32;
        while data.len() >= CHUNK_SIZE {
            let mut d = &data[..CHUNK_SIZE];
            // ... take by 2 bytes and sum them.
            while d.len() >= 2 {
                accum += NetworkEndian::read_u16(d) as u32;
                d = &d[2..];
            }

            data = &data[CHUNK_SIZE..];
        }

        // Sum the rest that does not fit the last 32-byte chunk,
        // taking by 2 bytes.
        while data.len() >= 2 {
            accum += NetworkEndian::read_u16(data) as u32;
            data = &data[2..];
        }

        // Add the last remaining odd byte, if any.
        if let Some(&value) = data.first() {
            accum += (value as u32) << 8;
        }

        propagate_carries(accum)
    }

    /// Combine several RFC 1071 compliant checksums.
    pub fn combine(checksums: &[u16]) -> u16 {
        let mut accum: u32 = 0;
        for &word in checksums {
            accum += word as u32;
        }
        propagate_carries(accum)
    }

    /// Compute the (uncomplemented) sum of an IPv4 pseudo-header.
    pub fn pseudo_header_v4(
        src_addr: &Ipv4Address,
        dst_addr: &Ipv4Address,
        next_header: Protocol,
        length: u32,
    ) -> u16 {
        let mut proto_len = [0u8; 4];
        proto_len[1] = next_header.into();
        NetworkEndian::write_u16(&mut proto_len[2..4], length as u16);

        combine(&[
            data(&src_addr.octets()),
            data(&dst_addr.octets()),
            data(&proto_len[..]),
        ])
    }

    /// Sum `bytes` as if the 16-bit field at `at` were zero.
    fn data_skipping(bytes: &[u8], at: usize) -> u16 {
        // `at` is even, so both halves keep their word alignment.
        combine(&[data(&bytes[..at]), data(&bytes[at + 2..])])
    }

    /// Compute the header checksum of an IPv4 header.
    ///
    /// The checksum field of `header` is treated as zero whatever it holds,
    /// so the result can be written straight into it.
    ///
    /// # Panics
    /// This function panics if `header` is shorter than the fixed 20-octet header.
    pub fn ip_checksum(header: &[u8]) -> u16 {
        !data_skipping(header, IPV4_CHECKSUM_AT)
    }

    /// Compute the checksum of a TCP segment carried between `src_addr` and `dst_addr`.
    ///
    /// `segment` is the TCP header, options and payload; `segment_len` is the
    /// length announced in the pseudo-header, normally `segment.len()`.
    /// The checksum field of `segment` is treated as zero whatever it holds.
    ///
    /// # Panics
    /// This function panics if `segment` is shorter than the fixed 20-octet header.
    pub fn tcp_checksum(
        segment_len: u16,
        src_addr: &Ipv4Address,
        dst_addr: &Ipv4Address,
        segment: &[u8],
    ) -> u16 {
        !combine(&[
            pseudo_header_v4(src_addr, dst_addr, Protocol::Tcp, segment_len as u32),
            data_skipping(segment, TCP_CHECKSUM_AT),
        ])
    }
}

#[cfg(test)]
mod test {
    use super::checksum::*;
    use super::*;
    use crate::wire::Ipv4Address;

    // A real-world IPv4 header, checksum 0xb861 (the classic RFC 1071 walkthrough).
    static IPV4_HEADER: [u8; 20] = [
        0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0xb8, 0x61, 0xc0, 0xa8,
        0x00, 0x01, 0xc0, 0xa8, 0x00, 0xc7,
    ];

    #[test]
    fn test_protocol_roundtrip() {
        assert_eq!(Protocol::from(6), Protocol::Tcp);
        assert_eq!(u8::from(Protocol::Tcp), 6);
        assert_eq!(Protocol::from(0x84), Protocol::Unknown(0x84));
        assert_eq!(format!("{}", Protocol::Unknown(0x84)), "0x84");
    }

    #[test]
    fn test_data_odd_length() {
        // The odd octet is the high half of the last word.
        assert_eq!(data(&[0x01]), 0x0100);
        assert_eq!(data(&[0x00, 0x01, 0xf2]), 0xf201);
    }

    #[test]
    fn test_data_carry() {
        assert_eq!(data(&[0xff, 0xff, 0x00, 0x01]), 0x0001);
        assert_eq!(combine(&[0xffff, 0x0002]), 0x0002);
    }

    #[test]
    fn test_ip_checksum_known_header() {
        assert_eq!(ip_checksum(&IPV4_HEADER), 0xb861);
    }

    #[test]
    fn test_ip_checksum_ignores_stale_field() {
        let mut header = IPV4_HEADER;
        header[10] = 0x12;
        header[11] = 0x34;
        assert_eq!(ip_checksum(&header), 0xb861);
    }

    #[test]
    fn test_ip_checksum_detects_single_bit_flip() {
        for bit in 0..(IPV4_HEADER.len() * 8) {
            if (80..96).contains(&bit) {
                // Bits of the checksum field itself.
                continue;
            }
            let mut header = IPV4_HEADER;
            header[bit / 8] ^= 0x80 >> (bit % 8);
            assert_ne!(data(&header), !0, "bit {bit} flip went undetected");
        }
        assert_eq!(data(&IPV4_HEADER), !0);
    }

    #[test]
    fn test_tcp_checksum_verifies() {
        let src = Ipv4Address::new(10, 0, 0, 1);
        let dst = Ipv4Address::new(10, 0, 0, 2);
        let mut segment = [
            0x9c, 0x40, 0x00, 0x50, 0x00, 0x00, 0x03, 0xe7, 0x00, 0x00, 0x13, 0x87, 0x50, 0x10,
            0x00, 0x00, 0xaa, 0xbb, 0x00, 0x00, 0x61,
        ];
        let len = segment.len() as u16;
        let sum = tcp_checksum(len, &src, &dst, &segment);
        segment[16..18].copy_from_slice(&sum.to_be_bytes());

        // An independent verifier: the whole pseudo-header plus segment sums to all ones.
        let verify = combine(&[
            pseudo_header_v4(&src, &dst, Protocol::Tcp, len as u32),
            data(&segment),
        ]);
        assert_eq!(verify, !0);

        segment[20] ^= 0x01;
        let verify = combine(&[
            pseudo_header_v4(&src, &dst, Protocol::Tcp, len as u32),
            data(&segment),
        ]);
        assert_ne!(verify, !0);
    }
}
