/*! The session sweep.

A [Sweeper] owns the transport probes are sent through. Every sweep
interval it walks the whole [session table], one bucket at a time under that
bucket's lock, and sorts each session by [classify]:

  * an *active* session is left alone;
  * an *idle* session has its dead counter incremented and receives two
    keepalive probes, one sent to each endpoint as if it came from the other;
  * a *dead* session, idle for more sweeps than the dead threshold, is evicted.

A probe that cannot be sent is logged and dropped. The next sweep probes
again if the session is still idle, so nothing is retried within a sweep.

[Sweeper]: struct.Sweeper.html
[session table]: ../session/struct.Table.html
[classify]: fn.classify.html
*/

use core::fmt;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::config::{Config, MAX_DEAD_THRESHOLD};
use crate::phy::Transmit;
use crate::service::Signal;
use crate::session::{Bucket, Endpoint, Session, Table};
use crate::time::{Duration, Instant};
use crate::wire::{Ipv4AddressExt, KeepaliveRepr, TcpSeqNumber};

#[cfg(target_os = "linux")]
use crate::phy::{OpenError, RawSocket};

/// What a sweep does with a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Carried traffic within the idle threshold.
    Active,
    /// Silent for longer than the idle threshold; probe it.
    Idle,
    /// Stayed idle through too many sweeps; evict it.
    Dead,
}

/// Classify a session at `timestamp`.
///
/// A `dead_threshold` above [MAX_DEAD_THRESHOLD] is treated as that maximum,
/// so that a saturated dead counter still ends in eviction.
///
/// [MAX_DEAD_THRESHOLD]: ../config/constant.MAX_DEAD_THRESHOLD.html
pub fn classify(
    session: &Session,
    timestamp: Instant,
    idle_threshold: Duration,
    dead_threshold: u8,
) -> Liveness {
    if session.dead_counter > dead_threshold.min(MAX_DEAD_THRESHOLD) {
        Liveness::Dead
    } else if session.last_active < timestamp - idle_threshold {
        Liveness::Idle
    } else {
        Liveness::Active
    }
}

/// Counters of one sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepStats {
    /// Sessions examined.
    pub scanned: usize,
    /// Sessions found idle and probed.
    pub idle: usize,
    /// Sessions found dead and evicted.
    pub evicted: usize,
    pub probes_sent: usize,
    pub probes_failed: usize,
}

impl fmt::Display for SweepStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "scanned={} idle={} evicted={} probes={}/{}",
            self.scanned,
            self.idle,
            self.evicted,
            self.probes_sent,
            self.probes_sent + self.probes_failed
        )
    }
}

/// The session sweep scheduler.
#[derive(Debug)]
pub struct Sweeper<T: Transmit> {
    transport: T,
    config: Config,
}

#[cfg(target_os = "linux")]
impl Sweeper<RawSocket> {
    /// Create a sweeper sending probes through a newly opened raw socket.
    ///
    /// Failing to open the socket leaves the sweeper unable to do anything,
    /// and the caller should treat it as fatal.
    pub fn open(config: Config) -> Result<Sweeper<RawSocket>, OpenError> {
        match RawSocket::new() {
            Ok(socket) => Ok(Sweeper::new(socket, config)),
            Err(err) => {
                net_error!("sweep: {}", err);
                Err(err)
            }
        }
    }
}

impl<T: Transmit> Sweeper<T> {
    pub fn new(transport: T, config: Config) -> Sweeper<T> {
        Sweeper { transport, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Return a reference to the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Return a mutable reference to the transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Sweep every bucket of `table` once, as of `timestamp`.
    pub fn sweep(&mut self, table: &Table, timestamp: Instant) -> SweepStats {
        let mut stats = SweepStats::default();
        for index in 0..table.bucket_count() {
            let mut bucket = table.bucket(index);
            if bucket.is_empty() {
                continue;
            }
            self.sweep_bucket(&mut bucket, timestamp, &mut stats);
        }
        stats
    }

    /// Sweep the sessions of a single, already locked, bucket.
    pub fn sweep_bucket(&mut self, bucket: &mut Bucket, timestamp: Instant, stats: &mut SweepStats) {
        let mut cursor = bucket.head();
        while let Some(index) = cursor {
            // The position of a session is gone once it is evicted.
            cursor = bucket.next(index);

            let Some(session) = bucket.session_mut(index) else {
                continue;
            };
            stats.scanned += 1;
            match classify(
                session,
                timestamp,
                self.config.idle_threshold,
                self.config.dead_threshold,
            ) {
                Liveness::Active => (),
                Liveness::Idle => {
                    session.dead_counter = session.dead_counter.saturating_add(1);
                    let session = *session;
                    stats.idle += 1;
                    self.probe(session.larger, session.larger_seq, session.smaller, session.smaller_seq, stats);
                    self.probe(session.smaller, session.smaller_seq, session.larger, session.larger_seq, stats);
                }
                Liveness::Dead => {
                    let session = bucket.evict(index);
                    net_debug!("sweep: evicted {}", session.key());
                    stats.evicted += 1;
                }
            }
        }
    }

    fn probe(
        &mut self,
        src: Endpoint,
        seq_number: TcpSeqNumber,
        dst: Endpoint,
        ack_number: TcpSeqNumber,
        stats: &mut SweepStats,
    ) {
        if !dst.addr.x_is_unicast() {
            net_warn!("sweep: not probing {} -> {}: not a unicast address", src, dst);
            stats.probes_failed += 1;
            return;
        }
        let repr = KeepaliveRepr {
            src_addr: src.addr,
            src_port: src.port,
            seq_number,
            dst_addr: dst.addr,
            dst_port: dst.port,
            ack_number,
            local_id: self.config.local_id,
        };
        let datagram = repr.to_datagram();
        match self.transport.transmit(repr.dst_addr, &datagram) {
            Ok(()) => {
                net_debug!("sweep: sent {}", repr);
                stats.probes_sent += 1;
            }
            Err(err) => {
                net_warn!("sweep: cannot send {}: {}", repr, err);
                stats.probes_failed += 1;
            }
        }
    }

    /// Sweep `table` every sweep interval until `signal` says to stop.
    ///
    /// The state is checked each time the interval elapses, before the next
    /// sweep starts; a sweep in progress is always completed. The transport
    /// is dropped on return.
    pub fn run(mut self, table: &Table, signal: &Signal) {
        net_info!(
            "sweep: started, every {} over {} buckets",
            self.config.sweep_interval,
            table.bucket_count()
        );
        loop {
            let state = signal.wait(self.config.sweep_interval);
            if !state.is_alive() {
                net_info!("sweep: service {}, stopping", state);
                break;
            }
            let stats = self.sweep(table, Instant::now());
            net_info!("sweep: {}", stats);
        }
    }

    /// Run the sweep on a dedicated thread.
    pub fn spawn(self, table: Arc<Table<'static>>, signal: Signal) -> io::Result<JoinHandle<()>>
    where
        T: Send + 'static,
    {
        thread::Builder::new()
            .name("session-sweep".into())
            .spawn(move || self.run(&table, &signal))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::phy::Loopback;
    use crate::wire::{AcceleratorId, Ipv4Address, Ipv4Packet, TcpPacket, is_own_probe};

    const LOCAL_ID: AcceleratorId = AcceleratorId([10, 9, 9, 9]);

    const SERVER: Endpoint = Endpoint::new(Ipv4Address::new(10, 0, 0, 2), 443);
    const CLIENT: Endpoint = Endpoint::new(Ipv4Address::new(10, 0, 0, 1), 50000);

    fn now() -> Instant {
        Instant::from_secs(10_000)
    }

    fn sweeper() -> Sweeper<Loopback> {
        Sweeper::new(Loopback::new(), Config::new(LOCAL_ID))
    }

    fn session(port: u16, idle_secs: u64, dead_counter: u8) -> Session {
        let mut session = Session::new(
            SERVER,
            TcpSeqNumber(5000),
            Endpoint::new(CLIENT.addr, port),
            TcpSeqNumber(9000),
            now() - Duration::from_secs(idle_secs),
        );
        session.dead_counter = dead_counter;
        session
    }

    fn ports(table: &Table) -> Vec<u16> {
        (0..table.bucket_count())
            .flat_map(|i| {
                table
                    .bucket(i)
                    .iter()
                    .map(|(_, s)| s.smaller.port)
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    #[test]
    fn test_classify() {
        let idle = Duration::from_secs(60);
        assert_eq!(classify(&session(1, 0, 0), now(), idle, 2), Liveness::Active);
        assert_eq!(classify(&session(1, 60, 0), now(), idle, 2), Liveness::Active);
        assert_eq!(classify(&session(1, 61, 0), now(), idle, 2), Liveness::Idle);
        assert_eq!(classify(&session(1, 61, 2), now(), idle, 2), Liveness::Idle);
        assert_eq!(classify(&session(1, 61, 3), now(), idle, 2), Liveness::Dead);
        // Dead regardless of recent activity.
        assert_eq!(classify(&session(1, 0, 3), now(), idle, 2), Liveness::Dead);
    }

    #[test]
    fn test_largest_dead_threshold_still_evicts() {
        let table = Table::new(1);
        table.insert(session(1, 61, 0)).unwrap();
        let mut sweeper = Sweeper::new(
            Loopback::new(),
            Config {
                dead_threshold: u8::MAX,
                ..Config::new(LOCAL_ID)
            },
        );

        for _ in 0..=MAX_DEAD_THRESHOLD {
            let stats = sweeper.sweep(&table, now());
            assert_eq!(stats.idle, 1);
            sweeper.transport_mut().dequeue();
            sweeper.transport_mut().dequeue();
        }
        let stats = sweeper.sweep(&table, now());
        assert_eq!(stats.evicted, 1);
        assert!(table.is_empty());
    }

    #[test]
    fn test_idle_session_probed() {
        let table = Table::new(1);
        let handle = table.insert(session(1, 61, 0)).unwrap();
        let mut sweeper = sweeper();

        let stats = sweeper.sweep(&table, now());
        assert_eq!(table.get(handle).unwrap().dead_counter, 1);
        assert_eq!(sweeper.transport().len(), 2);
        assert_eq!(
            stats,
            SweepStats {
                scanned: 1,
                idle: 1,
                evicted: 0,
                probes_sent: 2,
                probes_failed: 0
            }
        );
    }

    #[test]
    fn test_active_session_untouched() {
        let table = Table::new(1);
        let handle = table.insert(session(1, 0, 0)).unwrap();
        let mut sweeper = sweeper();

        let stats = sweeper.sweep(&table, now());
        assert_eq!(table.get(handle), Some(session(1, 0, 0)));
        assert!(sweeper.transport().is_empty());
        assert_eq!(stats.scanned, 1);
        assert_eq!(stats.idle, 0);
    }

    #[test]
    fn test_dead_session_evicted_without_probes() {
        let table = Table::new(1);
        let handle = table.insert(session(1, 61, 3)).unwrap();
        let mut sweeper = sweeper();

        let stats = sweeper.sweep(&table, now());
        assert_eq!(table.get(handle), None);
        assert!(table.is_empty());
        assert!(sweeper.transport().is_empty());
        assert_eq!(stats.evicted, 1);
    }

    #[test]
    fn test_eviction_keeps_order() {
        let table = Table::new(1);
        for (port, dead_counter) in [(1, 0), (2, 3), (3, 0), (4, 3), (5, 0)] {
            table.insert(session(port, 0, dead_counter)).unwrap();
        }
        let stats = sweeper().sweep(&table, now());
        assert_eq!(stats.evicted, 2);
        assert_eq!(stats.scanned, 5);
        assert_eq!(ports(&table), vec![1, 3, 5]);
    }

    #[test]
    fn test_evict_last_and_first() {
        let table = Table::new(1);
        for (port, dead_counter) in [(1, 3), (2, 0), (3, 3)] {
            table.insert(session(port, 0, dead_counter)).unwrap();
        }
        sweeper().sweep(&table, now());
        assert_eq!(ports(&table), vec![2]);
    }

    #[test]
    fn test_probe_directions() {
        let table = Table::new(1);
        table.insert(session(50000, 61, 0)).unwrap();
        let mut sweeper = sweeper();
        sweeper.sweep(&table, now());

        let probes: Vec<_> = sweeper.transport().iter().collect();
        assert_eq!(probes.len(), 2);

        let (dst, datagram) = probes[0];
        assert_eq!(dst, CLIENT.addr);
        let repr = KeepaliveRepr::parse(datagram).unwrap();
        assert_eq!((repr.src_addr, repr.src_port), (SERVER.addr, SERVER.port));
        assert_eq!((repr.dst_addr, repr.dst_port), (CLIENT.addr, CLIENT.port));
        let tcp = TcpPacket::new_checked(Ipv4Packet::new_checked(datagram).unwrap().payload()).unwrap();
        assert_eq!(tcp.seq_number(), TcpSeqNumber(4999));
        assert_eq!(tcp.ack_number(), TcpSeqNumber(8999));

        let (dst, datagram) = probes[1];
        assert_eq!(dst, SERVER.addr);
        let repr = KeepaliveRepr::parse(datagram).unwrap();
        assert_eq!((repr.src_addr, repr.src_port), (CLIENT.addr, CLIENT.port));
        assert_eq!((repr.dst_addr, repr.dst_port), (SERVER.addr, SERVER.port));
        let tcp = TcpPacket::new_checked(Ipv4Packet::new_checked(datagram).unwrap().payload()).unwrap();
        assert_eq!(tcp.seq_number(), TcpSeqNumber(8999));
        assert_eq!(tcp.ack_number(), TcpSeqNumber(4999));

        assert!(probes.iter().all(|(_, d)| is_own_probe(d, LOCAL_ID)));
    }

    #[test]
    fn test_failed_probe_still_counts() {
        let table = Table::new(1);
        let handle = table.insert(session(1, 61, 0)).unwrap();
        let mut sweeper = sweeper();
        sweeper.transport_mut().fail_next(1);

        let stats = sweeper.sweep(&table, now());
        assert_eq!(table.get(handle).unwrap().dead_counter, 1);
        assert_eq!(stats.probes_sent, 1);
        assert_eq!(stats.probes_failed, 1);
        assert_eq!(sweeper.transport().len(), 1);
    }

    #[test]
    fn test_non_unicast_endpoint_not_probed() {
        let table = Table::new(1);
        let unspecified = Endpoint::new(Ipv4Address::UNSPECIFIED, 1);
        let broadcast = Endpoint::new(Ipv4Address::BROADCAST, 2);
        let first = table
            .insert(Session::new(SERVER, TcpSeqNumber(1), unspecified, TcpSeqNumber(1), Instant::ZERO))
            .unwrap();
        let second = table
            .insert(Session::new(SERVER, TcpSeqNumber(1), broadcast, TcpSeqNumber(1), Instant::ZERO))
            .unwrap();
        let mut sweeper = sweeper();

        let stats = sweeper.sweep(&table, now());
        assert_eq!(stats.idle, 2);
        assert_eq!(stats.probes_failed, 2);
        assert_eq!(stats.probes_sent, 2);
        assert!(sweeper.transport().iter().all(|(dst, _)| dst == SERVER.addr));
        assert_eq!(table.get(first).unwrap().dead_counter, 1);
        assert_eq!(table.get(second).unwrap().dead_counter, 1);

        // Such sessions still age out.
        for _ in 0..3 {
            sweeper.sweep(&table, now());
        }
        assert!(table.is_empty());
    }

    #[test]
    fn test_idle_to_dead_over_sweeps() {
        let table = Table::new(4);
        let handle = table.insert(session(1, 61, 0)).unwrap();
        let mut sweeper = sweeper();

        // Probed on three sweeps, evicted on the fourth.
        for expected in 1..=3 {
            sweeper.sweep(&table, now());
            assert_eq!(table.get(handle).unwrap().dead_counter, expected);
        }
        let stats = sweeper.sweep(&table, now());
        assert_eq!(stats.evicted, 1);
        assert_eq!(sweeper.transport().len(), 6);
    }

    #[test]
    fn test_traffic_revives_idle_session() {
        let table = Table::new(4);
        let handle = table.insert(session(1, 61, 0)).unwrap();
        let mut sweeper = sweeper();
        sweeper.sweep(&table, now());
        sweeper.sweep(&table, now());
        table.touch(handle, now()).unwrap();

        let stats = sweeper.sweep(&table, now());
        assert_eq!(stats.idle, 0);
        assert_eq!(table.get(handle).unwrap().dead_counter, 0);
    }

    #[test]
    fn test_stats_display() {
        let stats = SweepStats {
            scanned: 5,
            idle: 2,
            evicted: 1,
            probes_sent: 3,
            probes_failed: 1,
        };
        assert_eq!(format!("{stats}"), "scanned=5 idle=2 evicted=1 probes=3/4");
    }
}
