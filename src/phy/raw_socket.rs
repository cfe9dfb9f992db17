use std::io;
use std::mem;
use std::os::unix::io::{AsRawFd, RawFd};

use super::{OpenError, Transmit, TransmitError};
use crate::wire::Ipv4Address;

/// A raw IPv4 socket whose datagrams carry their own, complete IPv4 header.
///
/// Opening one requires `CAP_NET_RAW`. The socket is closed when dropped.
#[derive(Debug)]
pub struct RawSocket {
    fd: RawFd,
}

impl AsRawFd for RawSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl RawSocket {
    /// Open a raw TCP socket with `IP_HDRINCL` set.
    pub fn new() -> Result<RawSocket, OpenError> {
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_RAW, libc::IPPROTO_TCP) };
        if fd < 0 {
            return Err(OpenError::Socket(io::Error::last_os_error().kind()));
        }
        // Closed by `Drop` on every path below.
        let socket = RawSocket { fd };

        let one: libc::c_int = 1;
        let res = unsafe {
            libc::setsockopt(
                socket.fd,
                libc::IPPROTO_IP,
                libc::IP_HDRINCL,
                &one as *const libc::c_int as *const libc::c_void,
                mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if res < 0 {
            return Err(OpenError::HeaderIncluded(
                io::Error::last_os_error().kind(),
            ));
        }

        net_debug!("raw socket {} open", socket.fd);
        Ok(socket)
    }
}

impl Transmit for RawSocket {
    fn transmit(&mut self, dst_addr: Ipv4Address, datagram: &[u8]) -> Result<(), TransmitError> {
        let sockaddr = libc::sockaddr_in {
            sin_family: libc::AF_INET as libc::sa_family_t,
            // Ignored for raw sockets; the port lives in the TCP header.
            sin_port: 0,
            sin_addr: libc::in_addr {
                s_addr: u32::from_ne_bytes(dst_addr.octets()),
            },
            sin_zero: [0; 8],
        };

        let res = unsafe {
            libc::sendto(
                self.fd,
                datagram.as_ptr() as *const libc::c_void,
                datagram.len(),
                0,
                &sockaddr as *const libc::sockaddr_in as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };
        if res < 0 {
            return Err(TransmitError::Io(io::Error::last_os_error().kind()));
        }
        if res as usize != datagram.len() {
            return Err(TransmitError::Truncated {
                sent: res as usize,
                len: datagram.len(),
            });
        }
        Ok(())
    }
}

impl Drop for RawSocket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
        net_debug!("raw socket {} closed", self.fd);
    }
}
