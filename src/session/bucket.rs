use std::collections::BTreeMap;
use std::vec::Vec;

use managed::{ManagedMap, ManagedSlice};

use super::{InsertError, Key, Session};
use crate::config::BUCKET_CAPACITY;

#[derive(Debug, Clone, Copy)]
struct Node {
    session: Session,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Storage for one session in a bucket.
///
/// Slots are only ever created empty, to hand a bucket fixed storage.
#[derive(Debug, Default)]
pub struct Slot {
    generation: u32,
    node: Option<Node>,
    /// Next vacant slot, while this one is on the free list.
    next_free: Option<usize>,
}

/// One independently locked partition of the session table.
///
/// Sessions are kept in a list threaded through an arena of slots, in
/// insertion order. Positions in the list are slot indices: they stay valid
/// while other sessions come and go, until the session itself is evicted.
/// Evicted slots are chained into a free list and reused most recent first.
///
/// To walk a bucket while evicting from it, fetch the next position before
/// evicting the current one:
///
/// ```rust
/// # use wansweep::session::Bucket;
/// # let mut bucket = Bucket::default();
/// let mut cursor = bucket.head();
/// while let Some(index) = cursor {
///     cursor = bucket.next(index);
///     bucket.evict(index);
/// }
/// assert!(bucket.is_empty());
/// ```
#[derive(Debug)]
pub struct Bucket<'a> {
    slots: ManagedSlice<'a, Slot>,
    index: ManagedMap<'a, Key, usize>,
    head: Option<usize>,
    tail: Option<usize>,
    free: Option<usize>,
    /// Slots at or past this index have never held a session.
    used: usize,
    len: usize,
}

impl<'a> Bucket<'a> {
    /// Create a bucket with the given slot and index storage.
    ///
    /// Owned storage grows as needed. Borrowed storage caps the bucket at
    /// the smaller of the two lengths; the slots must be `Slot::default()`
    /// and the index entries `None`.
    pub fn new<SS, IS>(slots: SS, index: IS) -> Bucket<'a>
    where
        SS: Into<ManagedSlice<'a, Slot>>,
        IS: Into<ManagedMap<'a, Key, usize>>,
    {
        Bucket {
            slots: slots.into(),
            index: index.into(),
            head: None,
            tail: None,
            free: None,
            used: 0,
            len: 0,
        }
    }

    /// Return the number of sessions in the bucket.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Return the position of the oldest session.
    pub fn head(&self) -> Option<usize> {
        self.head
    }

    /// Return the position following `index`.
    ///
    /// # Panics
    /// This function panics if `index` does not hold a session.
    pub fn next(&self, index: usize) -> Option<usize> {
        self.node(index).next
    }

    /// Return the session at `index`, if any.
    pub fn session(&self, index: usize) -> Option<&Session> {
        self.slots
            .get(index)
            .and_then(|slot| slot.node.as_ref())
            .map(|node| &node.session)
    }

    /// Return the session at `index` mutably, if any.
    pub fn session_mut(&mut self, index: usize) -> Option<&mut Session> {
        self.slots
            .get_mut(index)
            .and_then(|slot| slot.node.as_mut())
            .map(|node| &mut node.session)
    }

    /// Unlink the session at `index` and return it.
    ///
    /// Positions of the remaining sessions are unaffected.
    ///
    /// # Panics
    /// This function panics if `index` does not hold a session, in
    /// particular if it was already evicted.
    pub fn evict(&mut self, index: usize) -> Session {
        let Some(node) = self.slots.get_mut(index).and_then(|slot| slot.node.take()) else {
            panic!("evicting vacant session slot {index}");
        };
        let slot = &mut self.slots[index];
        slot.generation = slot.generation.wrapping_add(1);
        self.release(index);

        match node.prev {
            Some(prev) => self.node_mut(prev).next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => self.node_mut(next).prev = node.prev,
            None => self.tail = node.prev,
        }
        let removed = self.index.remove(&node.session.key());
        debug_assert_eq!(removed, Some(index));
        self.len -= 1;
        node.session
    }

    /// Iterate over the sessions, oldest first.
    pub fn iter(&self) -> Iter<'_, 'a> {
        Iter {
            bucket: self,
            cursor: self.head,
        }
    }

    /// Remove every session.
    pub fn clear(&mut self) {
        while let Some(index) = self.head {
            self.evict(index);
        }
    }

    /// Link `session` at the end of the list and return its position and generation.
    pub(super) fn insert(&mut self, session: Session) -> Result<(usize, u32), InsertError> {
        let key = session.key();
        if self.index.get(&key).is_some() {
            return Err(InsertError::Exists);
        }

        let index = self.allocate()?;
        if self.index.insert(key, index).is_err() {
            self.release(index);
            return Err(InsertError::BucketFull);
        }

        self.slots[index].node = Some(Node {
            session,
            prev: self.tail,
            next: None,
        });
        match self.tail {
            Some(tail) => self.node_mut(tail).next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        self.len += 1;
        Ok((index, self.slots[index].generation))
    }

    /// Find the position and generation of the session of a flow.
    pub(super) fn find(&self, key: &Key) -> Option<(usize, u32)> {
        let index = *self.index.get(key)?;
        Some((index, self.slots[index].generation))
    }

    /// Query whether `index` holds a session of the given generation.
    pub(super) fn is_live(&self, index: usize, generation: u32) -> bool {
        self.slots
            .get(index)
            .is_some_and(|slot| slot.generation == generation && slot.node.is_some())
    }

    /// Take a vacant slot: the most recently freed one, then a fresh one.
    fn allocate(&mut self) -> Result<usize, InsertError> {
        if let Some(index) = self.free {
            self.free = self.slots[index].next_free.take();
            return Ok(index);
        }
        if self.used == self.slots.len() {
            match &mut self.slots {
                ManagedSlice::Borrowed(_) => return Err(InsertError::BucketFull),
                ManagedSlice::Owned(slots) => slots.push(Slot::default()),
            }
        }
        self.used += 1;
        Ok(self.used - 1)
    }

    fn release(&mut self, index: usize) {
        self.slots[index].next_free = self.free;
        self.free = Some(index);
    }

    fn node(&self, index: usize) -> &Node {
        self.slots[index]
            .node
            .as_ref()
            .expect("linked session slot is vacant")
    }

    fn node_mut(&mut self, index: usize) -> &mut Node {
        self.slots[index]
            .node
            .as_mut()
            .expect("linked session slot is vacant")
    }
}

impl Default for Bucket<'static> {
    /// Create a growable bucket.
    fn default() -> Bucket<'static> {
        Bucket::new(Vec::with_capacity(BUCKET_CAPACITY), BTreeMap::new())
    }
}

/// Iterator over the sessions of a bucket, yielding their positions.
#[derive(Debug)]
pub struct Iter<'b, 'a> {
    bucket: &'b Bucket<'a>,
    cursor: Option<usize>,
}

impl<'b, 'a> Iterator for Iter<'b, 'a> {
    type Item = (usize, &'b Session);

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.cursor?;
        let node = self.bucket.node(index);
        self.cursor = node.next;
        Some((index, &node.session))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::session::Endpoint;
    use crate::time::Instant;
    use crate::wire::{Ipv4Address, TcpSeqNumber};

    fn session(port: u16) -> Session {
        Session::new(
            Endpoint::new(Ipv4Address::new(10, 0, 0, 2), 443),
            TcpSeqNumber(1000),
            Endpoint::new(Ipv4Address::new(10, 0, 0, 1), port),
            TcpSeqNumber(2000),
            Instant::ZERO,
        )
    }

    fn ports(bucket: &Bucket) -> Vec<u16> {
        bucket.iter().map(|(_, s)| s.smaller.port).collect()
    }

    #[test]
    fn test_fixture_port_on_smaller_endpoint() {
        let session = session(7);
        assert_eq!(session.smaller, Endpoint::new(Ipv4Address::new(10, 0, 0, 1), 7));
        assert_eq!(session.larger.port, 443);
    }

    #[test]
    fn test_insertion_order() {
        let mut bucket = Bucket::default();
        for port in 1..=3 {
            bucket.insert(session(port)).unwrap();
        }
        assert_eq!(ports(&bucket), vec![1, 2, 3]);
        assert_eq!(bucket.len(), 3);
    }

    #[test]
    fn test_evict_middle_head_tail() {
        let mut bucket = Bucket::default();
        let slots: Vec<usize> = (1..=4).map(|p| bucket.insert(session(p)).unwrap().0).collect();

        assert_eq!(bucket.evict(slots[1]).smaller.port, 2);
        assert_eq!(ports(&bucket), vec![1, 3, 4]);
        bucket.evict(slots[0]);
        assert_eq!(ports(&bucket), vec![3, 4]);
        assert_eq!(bucket.head(), Some(slots[2]));
        bucket.evict(slots[3]);
        assert_eq!(ports(&bucket), vec![3]);
        assert_eq!(bucket.next(slots[2]), None);

        // Appending after the tail was evicted still links correctly.
        bucket.insert(session(5)).unwrap();
        assert_eq!(ports(&bucket), vec![3, 5]);
    }

    #[test]
    fn test_slot_reuse_bumps_generation() {
        let mut bucket = Bucket::default();
        let (index, generation) = bucket.insert(session(1)).unwrap();
        assert!(bucket.is_live(index, generation));
        bucket.evict(index);
        assert!(!bucket.is_live(index, generation));
        assert_eq!(bucket.find(&session(1).key()), None);

        let (reused, next_generation) = bucket.insert(session(2)).unwrap();
        assert_eq!(reused, index);
        assert_ne!(next_generation, generation);
    }

    #[test]
    fn test_evict_while_walking() {
        let mut bucket = Bucket::default();
        for port in 1..=5 {
            bucket.insert(session(port)).unwrap();
        }
        let mut cursor = bucket.head();
        while let Some(index) = cursor {
            cursor = bucket.next(index);
            if bucket.session(index).unwrap().smaller.port % 2 == 0 {
                bucket.evict(index);
            }
        }
        assert_eq!(ports(&bucket), vec![1, 3, 5]);
    }

    #[test]
    fn test_free_slots_reused_last_evicted_first() {
        let mut bucket = Bucket::default();
        let slots: Vec<usize> = (1..=4).map(|p| bucket.insert(session(p)).unwrap().0).collect();
        assert_eq!(slots, vec![0, 1, 2, 3]);

        bucket.evict(slots[0]);
        bucket.evict(slots[2]);
        assert_eq!(bucket.insert(session(5)).unwrap().0, slots[2]);
        assert_eq!(bucket.insert(session(6)).unwrap().0, slots[0]);
        // Free list exhausted, so the arena grows.
        assert_eq!(bucket.insert(session(7)).unwrap().0, 4);
        assert_eq!(ports(&bucket), vec![2, 4, 5, 6, 7]);
        assert_eq!(bucket.len(), 5);
    }

    #[test]
    fn test_failed_insert_keeps_slot_free() {
        let mut slots = [Slot::default(), Slot::default(), Slot::default()];
        let mut index: [Option<(Key, usize)>; 1] = [None; 1];
        let mut bucket = Bucket::new(&mut slots[..], &mut index[..]);
        assert_eq!(bucket.insert(session(1)).unwrap().0, 0);
        assert_eq!(bucket.insert(session(2)), Err(InsertError::BucketFull));
        assert_eq!(bucket.insert(session(3)), Err(InsertError::BucketFull));
        assert_eq!(bucket.free, Some(1));
        assert_eq!(bucket.used, 2);

        bucket.evict(0);
        assert_eq!(bucket.insert(session(2)).unwrap().0, 0);
        assert_eq!(bucket.free, Some(1));
        assert_eq!(ports(&bucket), vec![2]);
    }

    #[test]
    #[should_panic(expected = "evicting vacant session slot")]
    fn test_double_evict() {
        let mut bucket = Bucket::default();
        let (index, _) = bucket.insert(session(1)).unwrap();
        bucket.evict(index);
        bucket.evict(index);
    }

    #[test]
    fn test_borrowed_storage() {
        let mut slots = [Slot::default(), Slot::default()];
        let mut index: [Option<(Key, usize)>; 2] = [None; 2];
        let mut bucket = Bucket::new(&mut slots[..], &mut index[..]);
        let (first, _) = bucket.insert(session(1)).unwrap();
        bucket.insert(session(2)).unwrap();
        assert_eq!(bucket.insert(session(3)), Err(InsertError::BucketFull));

        bucket.evict(first);
        assert!(bucket.insert(session(3)).is_ok());
        assert_eq!(ports(&bucket), vec![2, 3]);
    }
}
