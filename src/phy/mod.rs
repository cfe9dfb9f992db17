/*! Transmission of finished datagrams.

The `phy` module deals with *getting probes onto the network*. It provides
a trait for transmitting complete IPv4 datagrams,
[Transmit](trait.Transmit.html), and implementations of it:

  * the [_raw socket_](struct.RawSocket.html), an IPv4 raw socket that sends
    datagrams with the header exactly as built;
  * the [_loopback_](struct.Loopback.html), which keeps every datagram in
    memory, for zero privilege testing, and can be told to fail.

A transport only ever sends; nothing in this crate receives through it.
*/

use std::io;

use crate::wire::Ipv4Address;

mod loopback;
#[cfg(target_os = "linux")]
mod raw_socket;

pub use self::loopback::Loopback;
#[cfg(target_os = "linux")]
pub use self::raw_socket::RawSocket;

/// Error returned by [`Transmit::transmit`]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TransmitError {
    /// The operating system refused the datagram.
    Io(io::ErrorKind),
    /// Only part of the datagram was accepted.
    Truncated { sent: usize, len: usize },
}

impl core::fmt::Display for TransmitError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            TransmitError::Io(kind) => write!(f, "transmit failed: {kind}"),
            TransmitError::Truncated { sent, len } => {
                write!(f, "transmit truncated: {sent} of {len} octets")
            }
        }
    }
}

impl core::error::Error for TransmitError {}

/// Error returned by [`RawSocket::new`]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum OpenError {
    /// The socket itself could not be created, usually for lack of `CAP_NET_RAW`.
    Socket(io::ErrorKind),
    /// The socket could not be told that datagrams carry their own IPv4 header.
    HeaderIncluded(io::ErrorKind),
}

impl core::fmt::Display for OpenError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            OpenError::Socket(kind) => write!(f, "cannot open raw socket: {kind}"),
            OpenError::HeaderIncluded(kind) => {
                write!(f, "cannot set IP_HDRINCL on raw socket: {kind}")
            }
        }
    }
}

impl core::error::Error for OpenError {}

/// An interface for sending complete IPv4 datagrams.
///
/// Implementations send exactly once per call and never retry; a failed
/// datagram is simply lost.
pub trait Transmit {
    /// Send `datagram`, whose IPv4 header is already complete, toward `dst_addr`.
    fn transmit(&mut self, dst_addr: Ipv4Address, datagram: &[u8]) -> Result<(), TransmitError>;
}

impl<T: Transmit + ?Sized> Transmit for &mut T {
    fn transmit(&mut self, dst_addr: Ipv4Address, datagram: &[u8]) -> Result<(), TransmitError> {
        (**self).transmit(dst_addr, datagram)
    }
}

impl<T: Transmit + ?Sized> Transmit for Box<T> {
    fn transmit(&mut self, dst_addr: Ipv4Address, datagram: &[u8]) -> Result<(), TransmitError> {
        (**self).transmit(dst_addr, datagram)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            format!("{}", TransmitError::Truncated { sent: 20, len: 48 }),
            "transmit truncated: 20 of 48 octets"
        );
        assert_eq!(
            format!("{}", OpenError::Socket(io::ErrorKind::PermissionDenied)),
            "cannot open raw socket: permission denied"
        );
    }

    #[test]
    fn test_transmit_through_box() {
        let mut boxed: Box<dyn Transmit> = Box::new(Loopback::new());
        assert_eq!(
            boxed.transmit(Ipv4Address::new(10, 0, 0, 1), &[0x45]),
            Ok(())
        );
    }
}
