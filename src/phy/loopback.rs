use std::collections::VecDeque;
use std::io;
use std::vec::Vec;

use super::{Transmit, TransmitError};
use crate::wire::Ipv4Address;

/// A loopback transport.
///
/// Every transmitted datagram is kept, in order, together with the address
/// it was sent to. A number of upcoming transmissions can be made to fail.
#[derive(Debug, Default)]
pub struct Loopback {
    queue: VecDeque<(Ipv4Address, Vec<u8>)>,
    failures: usize,
}

impl Loopback {
    /// Creates a loopback transport.
    pub fn new() -> Loopback {
        Loopback::default()
    }

    /// Make the next `count` transmissions fail, as a refusing network stack would.
    pub fn fail_next(&mut self, count: usize) {
        self.failures = count;
    }

    /// Return the number of datagrams transmitted and not yet dequeued.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Remove the oldest transmitted datagram.
    pub fn dequeue(&mut self) -> Option<(Ipv4Address, Vec<u8>)> {
        self.queue.pop_front()
    }

    /// Iterate over transmitted datagrams, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = (Ipv4Address, &[u8])> + '_ {
        self.queue.iter().map(|(addr, datagram)| (*addr, &datagram[..]))
    }
}

impl Transmit for Loopback {
    fn transmit(&mut self, dst_addr: Ipv4Address, datagram: &[u8]) -> Result<(), TransmitError> {
        if self.failures > 0 {
            self.failures -= 1;
            net_trace!("loopback: dropping datagram to {}", dst_addr);
            return Err(TransmitError::Io(io::ErrorKind::Other));
        }
        self.queue.push_back((dst_addr, datagram.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const ADDR: Ipv4Address = Ipv4Address::new(10, 0, 0, 1);

    #[test]
    fn test_keeps_order() {
        let mut loopback = Loopback::new();
        loopback.transmit(ADDR, &[1]).unwrap();
        loopback.transmit(ADDR, &[2, 2]).unwrap();
        assert_eq!(loopback.len(), 2);
        assert_eq!(loopback.dequeue(), Some((ADDR, vec![1])));
        assert_eq!(loopback.dequeue(), Some((ADDR, vec![2, 2])));
        assert!(loopback.is_empty());
    }

    #[test]
    fn test_fail_next() {
        let mut loopback = Loopback::new();
        loopback.fail_next(2);
        assert_eq!(
            loopback.transmit(ADDR, &[1]),
            Err(TransmitError::Io(io::ErrorKind::Other))
        );
        assert!(loopback.transmit(ADDR, &[2]).is_err());
        assert_eq!(loopback.transmit(ADDR, &[3]), Ok(()));
        assert_eq!(loopback.iter().collect::<Vec<_>>(), vec![(ADDR, &[3][..])]);
    }
}
