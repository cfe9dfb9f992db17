/*! The session table.

Every TCP flow the accelerator forwards is tracked by one [Session]. A flow
is identified by its two endpoints regardless of direction: the endpoints
are ordered, and the greater one is called *larger*, so that `A -> B` and
`B -> A` map to the same session.

The [Table] is split into a fixed number of [Bucket]s, each behind its own
lock. A session lives in exactly one bucket, chosen by hashing its [Key], so
the traffic path and the sweeper only ever contend on a single bucket and
never need to take two locks at once.

Sessions are referred to from outside the lock by a [Handle]. A handle names
a slot in a bucket together with the generation of that slot, so a handle to
an evicted session is detected instead of silently reaching whichever
session reused the slot.

[Session]: struct.Session.html
[Table]: struct.Table.html
[Bucket]: struct.Bucket.html
[Key]: struct.Key.html
[Handle]: struct.Handle.html
*/

use core::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::vec::Vec;

use crate::time::Instant;
use crate::wire::{Ipv4Address, TcpSeqNumber};

mod bucket;

pub use self::bucket::{Bucket, Iter, Slot};

/// One end of a TCP flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Endpoint {
    pub addr: Ipv4Address,
    pub port: u16,
}

impl Endpoint {
    pub const fn new(addr: Ipv4Address, port: u16) -> Endpoint {
        Endpoint { addr, port }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

/// Direction-independent identity of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    larger: Endpoint,
    smaller: Endpoint,
}

impl Key {
    /// Create the key of the flow between `a` and `b`, in either order.
    pub fn new(a: Endpoint, b: Endpoint) -> Key {
        if a >= b {
            Key {
                larger: a,
                smaller: b,
            }
        } else {
            Key {
                larger: b,
                smaller: a,
            }
        }
    }

    pub fn larger(&self) -> Endpoint {
        self.larger
    }

    pub fn smaller(&self) -> Endpoint {
        self.smaller
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} <-> {}", self.larger, self.smaller)
    }
}

/// A tracked TCP flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub larger: Endpoint,
    /// Last sequence number observed from the larger endpoint.
    pub larger_seq: TcpSeqNumber,
    pub smaller: Endpoint,
    /// Last sequence number observed from the smaller endpoint.
    pub smaller_seq: TcpSeqNumber,
    /// When the flow last carried traffic.
    pub last_active: Instant,
    /// Consecutive sweeps that found the flow idle.
    pub dead_counter: u8,
}

impl Session {
    /// Create a session for a flow first seen at `timestamp`, with `a` and `b`
    /// in either order.
    pub fn new(
        a: Endpoint,
        a_seq: TcpSeqNumber,
        b: Endpoint,
        b_seq: TcpSeqNumber,
        timestamp: Instant,
    ) -> Session {
        let ((larger, larger_seq), (smaller, smaller_seq)) = if a >= b {
            ((a, a_seq), (b, b_seq))
        } else {
            ((b, b_seq), (a, a_seq))
        };
        Session {
            larger,
            larger_seq,
            smaller,
            smaller_seq,
            last_active: timestamp,
            dead_counter: 0,
        }
    }

    pub fn key(&self) -> Key {
        Key {
            larger: self.larger,
            smaller: self.smaller,
        }
    }

    /// Record traffic at `timestamp`.
    ///
    /// Any traffic proves the flow alive, so the idle count starts over.
    pub fn touch(&mut self, timestamp: Instant) {
        if timestamp > self.last_active {
            self.last_active = timestamp;
        }
        self.dead_counter = 0;
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} seq={} <-> {} seq={} last_active={} dead={}",
            self.larger,
            self.larger_seq,
            self.smaller,
            self.smaller_seq,
            self.last_active,
            self.dead_counter
        )
    }
}

/// A reference to a session that stays valid until the session is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    bucket: usize,
    slot: usize,
    generation: u32,
}

impl Handle {
    /// Return the index of the bucket holding the session.
    pub fn bucket(&self) -> usize {
        self.bucket
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}.{}.{}", self.bucket, self.slot, self.generation)
    }
}

/// Error returned by [`Table::insert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertError {
    /// The bucket has fixed storage and every slot is taken.
    BucketFull,
    /// A session for the same flow is already tracked.
    Exists,
}

impl fmt::Display for InsertError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            InsertError::BucketFull => write!(f, "session bucket full"),
            InsertError::Exists => write!(f, "session already tracked"),
        }
    }
}

impl core::error::Error for InsertError {}

/// The session a handle referred to has been removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleHandle;

impl fmt::Display for StaleHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "stale session handle")
    }
}

impl core::error::Error for StaleHandle {}

/// A session table of independently locked buckets.
#[derive(Debug)]
pub struct Table<'a> {
    buckets: Vec<Mutex<Bucket<'a>>>,
}

impl Table<'static> {
    /// Create a table of `bucket_count` growable buckets.
    ///
    /// # Panics
    /// This function panics if `bucket_count` is zero.
    pub fn new(bucket_count: usize) -> Table<'static> {
        Table::from_buckets((0..bucket_count).map(|_| Bucket::default()))
    }
}

impl<'a> Table<'a> {
    /// Create a table from preallocated buckets.
    ///
    /// # Panics
    /// This function panics if `buckets` is empty.
    pub fn from_buckets<I>(buckets: I) -> Table<'a>
    where
        I: IntoIterator<Item = Bucket<'a>>,
    {
        let buckets: Vec<_> = buckets.into_iter().map(Mutex::new).collect();
        assert!(!buckets.is_empty(), "session table without buckets");
        Table { buckets }
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Return the index of the bucket a flow belongs to.
    pub fn bucket_of(&self, key: &Key) -> usize {
        let fold = |endpoint: Endpoint| {
            u32::from(endpoint.addr).rotate_left(16) ^ u32::from(endpoint.port)
        };
        let hash = fold(key.larger).wrapping_mul(0x9e37_79b1) ^ fold(key.smaller);
        hash as usize % self.buckets.len()
    }

    /// Lock and return the bucket at `index`.
    ///
    /// A bucket poisoned by a panicking holder is handed out regardless;
    /// every bucket operation leaves the links consistent before it can panic.
    ///
    /// # Panics
    /// This function panics if `index` is not below `bucket_count()`.
    pub fn bucket(&self, index: usize) -> MutexGuard<'_, Bucket<'a>> {
        self.buckets[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Start tracking a session.
    pub fn insert(&self, session: Session) -> Result<Handle, InsertError> {
        let bucket = self.bucket_of(&session.key());
        let mut guard = self.bucket(bucket);
        let (slot, generation) = guard.insert(session)?;
        net_trace!("session: tracking {} in bucket {}", session.key(), bucket);
        Ok(Handle {
            bucket,
            slot,
            generation,
        })
    }

    /// Find the session of a flow.
    pub fn lookup(&self, key: &Key) -> Option<Handle> {
        let bucket = self.bucket_of(key);
        let (slot, generation) = self.bucket(bucket).find(key)?;
        Some(Handle {
            bucket,
            slot,
            generation,
        })
    }

    fn with_session<F, R>(&self, handle: Handle, f: F) -> Result<R, StaleHandle>
    where
        F: FnOnce(&mut Session) -> R,
    {
        if handle.bucket >= self.buckets.len() {
            return Err(StaleHandle);
        }
        let mut guard = self.bucket(handle.bucket);
        if !guard.is_live(handle.slot, handle.generation) {
            return Err(StaleHandle);
        }
        guard.session_mut(handle.slot).map(f).ok_or(StaleHandle)
    }

    /// Return a copy of a session.
    pub fn get(&self, handle: Handle) -> Option<Session> {
        self.with_session(handle, |session| *session).ok()
    }

    /// Record traffic on a session at `timestamp`, which also clears its idle count.
    pub fn touch(&self, handle: Handle, timestamp: Instant) -> Result<(), StaleHandle> {
        self.with_session(handle, |session| session.touch(timestamp))
    }

    /// Record the latest sequence number sent by `src`.
    ///
    /// Returns `Ok(false)` without changing anything if `src` is not an
    /// endpoint of the session.
    pub fn update_seq(
        &self,
        handle: Handle,
        src: Endpoint,
        seq_number: TcpSeqNumber,
    ) -> Result<bool, StaleHandle> {
        self.with_session(handle, |session| {
            if src == session.larger {
                session.larger_seq = seq_number;
                true
            } else if src == session.smaller {
                session.smaller_seq = seq_number;
                true
            } else {
                false
            }
        })
    }

    /// Stop tracking a session.
    pub fn remove(&self, handle: Handle) -> Result<Session, StaleHandle> {
        if handle.bucket >= self.buckets.len() {
            return Err(StaleHandle);
        }
        let mut guard = self.bucket(handle.bucket);
        if !guard.is_live(handle.slot, handle.generation) {
            return Err(StaleHandle);
        }
        net_trace!("session: removing {}", handle);
        Ok(guard.evict(handle.slot))
    }

    /// Return the number of sessions in the table.
    ///
    /// Buckets are counted one at a time, so the result is only a snapshot
    /// while other threads insert or remove.
    pub fn len(&self) -> usize {
        (0..self.buckets.len()).map(|i| self.bucket(i).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        (0..self.buckets.len()).all(|i| self.bucket(i).is_empty())
    }

    /// Remove every session.
    pub fn clear(&self) {
        for index in 0..self.buckets.len() {
            self.bucket(index).clear()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const A: Endpoint = Endpoint::new(Ipv4Address::new(10, 0, 0, 2), 443);
    const B: Endpoint = Endpoint::new(Ipv4Address::new(10, 0, 0, 1), 50000);

    fn session() -> Session {
        Session::new(A, TcpSeqNumber(100), B, TcpSeqNumber(200), Instant::from_secs(1))
    }

    #[test]
    fn test_canonical_order() {
        let forward = session();
        let reverse = Session::new(B, TcpSeqNumber(200), A, TcpSeqNumber(100), Instant::from_secs(1));
        assert_eq!(forward, reverse);
        assert_eq!(forward.larger, A);
        assert_eq!(forward.larger_seq, TcpSeqNumber(100));
        assert_eq!(forward.smaller, B);
        assert_eq!(forward.smaller_seq, TcpSeqNumber(200));
        assert_eq!(Key::new(A, B), Key::new(B, A));
    }

    #[test]
    fn test_same_address_orders_by_port() {
        let low = Endpoint::new(Ipv4Address::new(10, 0, 0, 1), 80);
        let high = Endpoint::new(Ipv4Address::new(10, 0, 0, 1), 8080);
        let key = Key::new(low, high);
        assert_eq!(key.larger(), high);
        assert_eq!(key.smaller(), low);
    }

    #[test]
    fn test_insert_lookup_remove() {
        let table = Table::new(16);
        let handle = table.insert(session()).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup(&Key::new(B, A)), Some(handle));
        assert_eq!(table.get(handle), Some(session()));
        assert_eq!(table.insert(session()), Err(InsertError::Exists));

        assert_eq!(table.remove(handle), Ok(session()));
        assert!(table.is_empty());
        assert_eq!(table.lookup(&session().key()), None);
        assert_eq!(table.remove(handle), Err(StaleHandle));
        assert_eq!(table.get(handle), None);
    }

    #[test]
    fn test_reused_slot_invalidates_handle() {
        let table = Table::new(1);
        let old = table.insert(session()).unwrap();
        table.remove(old).unwrap();
        let new = table.insert(session()).unwrap();
        assert_ne!(old, new);
        assert_eq!(table.touch(old, Instant::from_secs(5)), Err(StaleHandle));
        assert_eq!(table.get(new).unwrap().last_active, Instant::from_secs(1));
    }

    #[test]
    fn test_touch_resets_dead_counter() {
        let table = Table::new(4);
        let handle = table.insert(session()).unwrap();
        {
            let mut bucket = table.bucket(handle.bucket());
            let slot = bucket.head().unwrap();
            bucket.session_mut(slot).unwrap().dead_counter = 2;
        }
        table.touch(handle, Instant::from_secs(9)).unwrap();
        let session = table.get(handle).unwrap();
        assert_eq!(session.dead_counter, 0);
        assert_eq!(session.last_active, Instant::from_secs(9));

        // Out of order timestamps never move activity backwards.
        table.touch(handle, Instant::from_secs(3)).unwrap();
        assert_eq!(table.get(handle).unwrap().last_active, Instant::from_secs(9));
    }

    #[test]
    fn test_update_seq() {
        let table = Table::new(4);
        let handle = table.insert(session()).unwrap();
        assert_eq!(table.update_seq(handle, B, TcpSeqNumber(201)), Ok(true));
        assert_eq!(table.update_seq(handle, A, TcpSeqNumber(101)), Ok(true));
        let stranger = Endpoint::new(Ipv4Address::new(192, 0, 2, 1), 1);
        assert_eq!(table.update_seq(handle, stranger, TcpSeqNumber(7)), Ok(false));
        let session = table.get(handle).unwrap();
        assert_eq!(session.larger_seq, TcpSeqNumber(101));
        assert_eq!(session.smaller_seq, TcpSeqNumber(201));
    }

    #[test]
    fn test_bucket_of_in_range() {
        let table = Table::new(7);
        for port in 1..200 {
            let key = Key::new(A, Endpoint::new(B.addr, port));
            assert!(table.bucket_of(&key) < 7);
            assert_eq!(table.bucket_of(&key), table.bucket_of(&Key::new(key.smaller(), key.larger())));
        }
    }

    #[test]
    fn test_clear() {
        let table = Table::new(4);
        for port in 1..=10 {
            let peer = Endpoint::new(B.addr, port);
            table
                .insert(Session::new(A, TcpSeqNumber(0), peer, TcpSeqNumber(0), Instant::ZERO))
                .unwrap();
        }
        assert_eq!(table.len(), 10);
        table.clear();
        assert!(table.is_empty());
    }

    #[test]
    fn test_fixed_storage_full() {
        let mut slots = [Slot::default(), Slot::default()];
        let mut index: [Option<(Key, usize)>; 2] = [None; 2];
        let table = Table::from_buckets([Bucket::new(&mut slots[..], &mut index[..])]);
        for port in 1..=2 {
            let peer = Endpoint::new(B.addr, port);
            table
                .insert(Session::new(A, TcpSeqNumber(0), peer, TcpSeqNumber(0), Instant::ZERO))
                .unwrap();
        }
        let peer = Endpoint::new(B.addr, 3);
        assert_eq!(
            table.insert(Session::new(A, TcpSeqNumber(0), peer, TcpSeqNumber(0), Instant::ZERO)),
            Err(InsertError::BucketFull)
        );
    }

    #[test]
    #[should_panic(expected = "session table without buckets")]
    fn test_no_buckets() {
        Table::new(0);
    }
}
