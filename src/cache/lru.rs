//! LRU Policy Module
//!
//! Implements Least Recently Used tracking for cache eviction.

use std::collections::HashMap;

// == Eviction Policy ==
/// Decides which tracked keys to drop once a capacity bound is exceeded.
///
/// The policy only tracks keys; values are owned by the cache. Evicted and
/// removed keys are reported through `on_evict`, synchronously, before the
/// call returns.
pub trait EvictionPolicy: Send {
    /// Marks `key` as used. Returns 1 if the key was new, 0 otherwise.
    fn add(&mut self, key: &str, on_evict: &mut dyn FnMut(String)) -> usize;

    /// Stops tracking `key`. Returns 1 if it was tracked, 0 otherwise.
    fn remove(&mut self, key: &str, on_evict: &mut dyn FnMut(String)) -> usize;

    /// Number of tracked keys.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// == No Limit ==
/// Policy used when the cache has no capacity bound; tracks nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLru;

impl EvictionPolicy for NoLru {
    fn add(&mut self, _key: &str, _on_evict: &mut dyn FnMut(String)) -> usize {
        0
    }

    fn remove(&mut self, _key: &str, _on_evict: &mut dyn FnMut(String)) -> usize {
        0
    }

    fn len(&self) -> usize {
        0
    }
}

#[derive(Debug)]
struct Node {
    key: String,
    prev: Option<usize>,
    next: Option<usize>,
}

// == Key LRU ==
/// Tracks access order for LRU eviction strategy.
///
/// Keys live in a doubly linked list threaded through a node vector:
/// - Front (head) = Most recently used
/// - Back (tail) = Least recently used
#[derive(Debug)]
pub struct KeyLru {
    limit: usize,
    nodes: Vec<Node>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    index: HashMap<String, usize>,
}

impl KeyLru {
    // == Constructor ==
    /// Creates a tracker that keeps at most `limit` keys.
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            nodes: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            index: HashMap::new(),
        }
    }

    /// Returns the capacity bound.
    pub fn limit(&self) -> usize {
        self.limit
    }

    // == Peek Oldest ==
    /// Returns the least recently used key without removing it.
    pub fn peek_oldest(&self) -> Option<&str> {
        self.tail.map(|i| self.nodes[i].key.as_str())
    }

    // == Contains ==
    /// Checks if a key is being tracked.
    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Tracked keys from most to least recently used.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys = Vec::with_capacity(self.index.len());
        let mut cursor = self.head;
        while let Some(i) = cursor {
            keys.push(self.nodes[i].key.as_str());
            cursor = self.nodes[i].next;
        }
        keys
    }

    fn unlink(&mut self, i: usize) {
        let (prev, next) = (self.nodes[i].prev, self.nodes[i].next);
        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.tail = prev,
        }
        self.nodes[i].prev = None;
        self.nodes[i].next = None;
    }

    fn push_front(&mut self, i: usize) {
        self.nodes[i].prev = None;
        self.nodes[i].next = self.head;
        match self.head {
            Some(h) => self.nodes[h].prev = Some(i),
            None => self.tail = Some(i),
        }
        self.head = Some(i);
    }

    fn alloc(&mut self, key: String) -> usize {
        let node = Node {
            key,
            prev: None,
            next: None,
        };
        match self.free.pop() {
            Some(i) => {
                self.nodes[i] = node;
                i
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    /// Unlinks node `i`, recycles its slot and reports its key.
    fn evict(&mut self, i: usize, on_evict: &mut dyn FnMut(String)) {
        self.unlink(i);
        let key = std::mem::take(&mut self.nodes[i].key);
        self.index.remove(&key);
        self.free.push(i);
        on_evict(key);
    }
}

impl EvictionPolicy for KeyLru {
    // == Add ==
    /// Moves a known key to the front, or inserts a new one and evicts the
    /// back-most key if the limit is exceeded.
    fn add(&mut self, key: &str, on_evict: &mut dyn FnMut(String)) -> usize {
        if let Some(&i) = self.index.get(key) {
            self.unlink(i);
            self.push_front(i);
            return 0;
        }

        let i = self.alloc(key.to_owned());
        self.push_front(i);
        self.index.insert(key.to_owned(), i);

        if self.index.len() > self.limit {
            if let Some(oldest) = self.tail {
                self.evict(oldest, on_evict);
            }
        }
        1
    }

    // == Remove ==
    /// Removes a key from the tracker, reporting it like an eviction.
    fn remove(&mut self, key: &str, on_evict: &mut dyn FnMut(String)) -> usize {
        match self.index.get(key).copied() {
            Some(i) => {
                self.evict(i, on_evict);
                1
            }
            None => 0,
        }
    }

    fn len(&self) -> usize {
        self.index.len()
    }
}
