//! Chunk map bucketed by Manhattan distance to a moving centre.
//!
//! Bucket `d` holds every entry at distance `d`, so near-to-far and
//! far-to-near traversal need no sorting. Moving the centre re-buckets every
//! entry; entries that fall outside the view radius are handed back to the
//! caller, which owns their cleanup.

use std::collections::HashMap;

use terrastream_core::ChunkCoord;

/// Distance-bucketed chunk map.
#[derive(Debug)]
pub struct DistanceBucketMap<T> {
    center: ChunkCoord,
    radius: u32,
    buckets: Vec<HashMap<ChunkCoord, T>>,
    len: usize,
}

impl<T> DistanceBucketMap<T> {
    /// Creates an empty map around `center` with buckets `0..radius`.
    #[must_use]
    pub fn new(center: ChunkCoord, radius: u32) -> Self {
        Self {
            center,
            radius,
            buckets: Self::alloc(radius),
            len: 0,
        }
    }

    fn alloc(radius: u32) -> Vec<HashMap<ChunkCoord, T>> {
        (0..radius).map(|_| HashMap::new()).collect()
    }

    /// Current centre.
    #[inline]
    #[must_use]
    pub const fn center(&self) -> ChunkCoord {
        self.center
    }

    /// View radius (number of buckets).
    #[inline]
    #[must_use]
    pub const fn view_radius(&self) -> u32 {
        self.radius
    }

    /// True when `pos` is closer than the view radius.
    #[inline]
    #[must_use]
    pub fn is_inside(&self, pos: ChunkCoord) -> bool {
        self.center.manhattan_distance(pos) < self.radius
    }

    #[inline]
    fn bucket_of(&self, pos: ChunkCoord) -> Option<usize> {
        let distance = self.center.manhattan_distance(pos);
        (distance < self.radius).then_some(distance as usize)
    }

    /// Inserts or replaces an entry.
    ///
    /// # Errors
    ///
    /// Hands `value` back when `pos` is outside the view radius.
    pub fn set(&mut self, pos: ChunkCoord, value: T) -> Result<Option<T>, T> {
        let Some(bucket) = self.bucket_of(pos) else {
            return Err(value);
        };
        let old = self.buckets[bucket].insert(pos, value);
        if old.is_none() {
            self.len += 1;
        }
        Ok(old)
    }

    /// Removes an entry.
    pub fn remove(&mut self, pos: ChunkCoord) -> Option<T> {
        let bucket = self.bucket_of(pos)?;
        let old = self.buckets[bucket].remove(&pos);
        if old.is_some() {
            self.len -= 1;
        }
        old
    }

    /// Returns true if `pos` has an entry.
    #[must_use]
    pub fn has(&self, pos: ChunkCoord) -> bool {
        self.get(pos).is_some()
    }

    /// Entry of `pos`.
    #[must_use]
    pub fn get(&self, pos: ChunkCoord) -> Option<&T> {
        self.buckets.get(self.bucket_of(pos)?)?.get(&pos)
    }

    /// Mutable entry of `pos`.
    pub fn get_mut(&mut self, pos: ChunkCoord) -> Option<&mut T> {
        let bucket = self.bucket_of(pos)?;
        self.buckets.get_mut(bucket)?.get_mut(&pos)
    }

    /// Entry of `pos`, inserted with `make` if absent.
    /// Returns `None` when `pos` is outside the view radius.
    pub fn get_or_insert_with<F>(&mut self, pos: ChunkCoord, make: F) -> Option<&mut T>
    where
        F: FnOnce() -> T,
    {
        let bucket = self.bucket_of(pos)?;
        let map = &mut self.buckets[bucket];
        if !map.contains_key(&pos) {
            self.len += 1;
        }
        Some(map.entry(pos).or_insert_with(make))
    }

    /// Visits entries near to far. Order inside one bucket is unspecified.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(ChunkCoord, &T),
    {
        for bucket in &self.buckets {
            for (pos, value) in bucket {
                f(*pos, value);
            }
        }
    }

    /// Visits entries far to near.
    pub fn for_each_reverse<F>(&self, mut f: F)
    where
        F: FnMut(ChunkCoord, &T),
    {
        for bucket in self.buckets.iter().rev() {
            for (pos, value) in bucket {
                f(*pos, value);
            }
        }
    }

    /// Mutable traversal, near to far.
    pub fn for_each_mut<F>(&mut self, mut f: F)
    where
        F: FnMut(ChunkCoord, &mut T),
    {
        for bucket in &mut self.buckets {
            for (pos, value) in bucket.iter_mut() {
                f(*pos, value);
            }
        }
    }

    /// Positions of all entries, near to far.
    #[must_use]
    pub fn positions(&self) -> Vec<ChunkCoord> {
        let mut out = Vec::with_capacity(self.len);
        self.for_each(|pos, _| out.push(pos));
        out
    }

    /// Moves the centre. Returns every entry now at or beyond the radius.
    pub fn recenter(&mut self, center: ChunkCoord) -> Vec<(ChunkCoord, T)> {
        self.center = center;
        self.rebucket(Self::alloc(self.radius))
    }

    /// Changes the radius. Returns every entry now at or beyond it.
    pub fn set_view_radius(&mut self, radius: u32) -> Vec<(ChunkCoord, T)> {
        self.radius = radius;
        self.rebucket(Self::alloc(radius))
    }

    fn rebucket(&mut self, fresh: Vec<HashMap<ChunkCoord, T>>) -> Vec<(ChunkCoord, T)> {
        let old = std::mem::replace(&mut self.buckets, fresh);
        let mut evicted = Vec::new();
        for bucket in old {
            for (pos, value) in bucket {
                match self.bucket_of(pos) {
                    Some(index) => {
                        self.buckets[index].insert(pos, value);
                    }
                    None => evicted.push((pos, value)),
                }
            }
        }
        self.len -= evicted.len();
        evicted
    }

    /// Number of entries.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if empty.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Entries per bucket, nearest first.
    #[must_use]
    pub fn bucket_sizes(&self) -> Vec<usize> {
        self.buckets.iter().map(HashMap::len).collect()
    }

    /// Removes and returns every entry.
    pub fn drain(&mut self) -> Vec<(ChunkCoord, T)> {
        let old = std::mem::replace(&mut self.buckets, Self::alloc(self.radius));
        self.len = 0;
        old.into_iter().flatten().collect()
    }
}
