/*! Low-level packet access and construction.

The `wire` module deals with the packet *representation* of keepalive
probes. It provides two levels of functionality.

 * First, it provides functions to extract fields from sequences of octets,
   and to insert fields into sequences of octets. This happens `Packet` family of
   structures, e.g. [Ipv4Packet] or [TcpPacket].
 * Second, it provides a compact, high-level representation of packet data
   that can be parsed from and emitted into a sequence of octets.
   This happens through the `Repr` family of structs, e.g. [Ipv4Repr],
   [TcpRepr] or [KeepaliveRepr].

[Ipv4Packet]: struct.Ipv4Packet.html
[TcpPacket]: struct.TcpPacket.html
[Ipv4Repr]: struct.Ipv4Repr.html
[TcpRepr]: struct.TcpRepr.html
[KeepaliveRepr]: struct.KeepaliveRepr.html

The `Packet` family of data structures guarantees that, if the `Packet::check_len()` method
returned `Ok(())`, then no accessor or setter method will panic; however, the guarantee
provided by `Packet::check_len()` may no longer hold after changing certain fields,
which are listed in the documentation for the specific packet.

When parsing untrusted input, it is *necessary* to use `Packet::new_checked()`.
When emitting output it is *incorrect* to use `Packet::new_checked()`;
the buffer length for emission is not calculated by the `Packet` layer.

# Examples

To build a keepalive probe and check that it parses back:

```rust
use wansweep::wire::*;

let repr = KeepaliveRepr {
    src_addr: Ipv4Address::new(10, 0, 0, 1),
    src_port: 40000,
    seq_number: TcpSeqNumber(1000),
    dst_addr: Ipv4Address::new(10, 0, 0, 2),
    dst_port: 80,
    ack_number: TcpSeqNumber(5000),
    local_id: AcceleratorId::new(192, 168, 1, 1),
};
let datagram = repr.to_datagram();
assert!(is_own_probe(&datagram, repr.local_id));
```
*/

mod field {
    pub type Field = ::core::ops::Range<usize>;
}

pub(crate) mod ip;
pub(crate) mod ipv4;
mod keepalive;
mod tcp;

use core::fmt;

pub use self::ip::{Protocol as IpProtocol, checksum};

pub use self::ipv4::{
    Address as Ipv4Address, HEADER_LEN as IPV4_HEADER_LEN, Packet as Ipv4Packet,
    Repr as Ipv4Repr,
};

pub(crate) use self::ipv4::AddressExt as Ipv4AddressExt;

pub use self::tcp::{
    AcceleratorId, Flags as TcpFlags, HEADER_LEN as TCP_HEADER_LEN, Packet as TcpPacket,
    Repr as TcpRepr, SeqNumber as TcpSeqNumber, TcpOption,
};

pub use self::keepalive::{
    DATAGRAM_LEN as KEEPALIVE_LEN, Datagram as KeepaliveDatagram, Repr as KeepaliveRepr,
    is_own_probe,
};

/// Parsing a packet failed.
///
/// Either it is malformed, or it is not a datagram this crate understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error;

impl core::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wire::Error")
    }
}

pub type Result<T> = core::result::Result<T, Error>;
