use std::cmp::Ordering;

use rand::Rng;

use crate::comparator::{Comparator, InternalKeyComparator};

/// Maximum height of the skip list. LevelDB uses 12.
pub const MAX_HEIGHT: usize = 12;

/// Each level is promoted with probability 1/BRANCHING.
const BRANCHING: u32 = 4;

/// Index of the head sentinel in `nodes`.
const HEAD: usize = 0;

/// A single node in the skip list.
///
/// Each node has `height` forward pointers. Level 0 contains all nodes
/// (a regular linked list). Higher levels skip over nodes, enabling
/// O(log n) average-case search.
///
/// ```text
/// Level 3:  HEAD ──────────────────────────────► 50 ──────────► NIL
/// Level 2:  HEAD ──────────► 20 ────────────────► 50 ──────────► NIL
/// Level 1:  HEAD ──► 10 ──► 20 ────► 35 ────────► 50 ──► 60 ──► NIL
/// Level 0:  HEAD ──► 10 ──► 20 ──► 25 ──► 35 ──► 50 ──► 60 ──► 70 ► NIL
/// ```
///
/// Nodes live in an arena and point at each other by index. Nodes are never
/// removed, so an index stays valid for the life of the list.
struct SkipNode {
    key: Vec<u8>,
    value: Vec<u8>,
    forward: Vec<Option<usize>>,
}

/// A probabilistic sorted map from encoded internal keys to values.
///
/// Average case: O(log n) insert, O(log n) lookup, O(n) iteration.
pub struct SkipList {
    nodes: Vec<SkipNode>,
    height: usize,
    len: usize,
    size_bytes: usize,
    cmp: InternalKeyComparator,
}

impl SkipList {
    /// Create a new empty skip list.
    pub fn new(cmp: InternalKeyComparator) -> Self {
        let head = SkipNode {
            key: Vec::new(),
            value: Vec::new(),
            forward: vec![None; MAX_HEIGHT],
        };
        SkipList {
            nodes: vec![head],
            height: 1,
            len: 0,
            size_bytes: 0,
            cmp,
        }
    }

    /// Insert a key-value pair. Overwrites if key already exists.
    ///
    /// Algorithm:
    ///   1. Find the insertion point at each level (track predecessors)
    ///   2. Generate a random height for the new node (coin flip per level)
    ///   3. Create node with that height
    ///   4. Splice into the list at each level up to the node's height
    pub fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) {
        let mut prev = [HEAD; MAX_HEIGHT];
        let found = self.find_greater_or_equal_with_prev(&key, &mut prev);

        if let Some(idx) = found {
            if self.cmp.compare(&self.nodes[idx].key, &key) == Ordering::Equal {
                let node = &mut self.nodes[idx];
                self.size_bytes = self.size_bytes - node.value.len() + value.len();
                node.value = value;
                return;
            }
        }

        let height = self.random_height();
        if height > self.height {
            // prev[] already holds HEAD for the new levels
            self.height = height;
        }

        let idx = self.nodes.len();
        let mut forward = vec![None; height];
        for (level, slot) in forward.iter_mut().enumerate() {
            *slot = self.nodes[prev[level]].forward[level];
        }
        self.size_bytes += key.len() + value.len() + height * std::mem::size_of::<usize>();
        self.nodes.push(SkipNode { key, value, forward });
        for (level, &p) in prev.iter().enumerate().take(height) {
            self.nodes[p].forward[level] = Some(idx);
        }
        self.len += 1;
    }

    /// Look up a key. Returns the value if an equal key is present.
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        let idx = self.find_greater_or_equal(key)?;
        let node = &self.nodes[idx];
        (self.cmp.compare(&node.key, key) == Ordering::Equal).then_some(node.value.as_slice())
    }

    /// Number of entries in the skip list.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the skip list is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Approximate memory usage in bytes.
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Create an iterator over all entries in sorted order.
    /// Traverses level 0 (the bottom level contains all entries).
    pub fn iter(&self) -> SkipListIterator<'_> {
        SkipListIterator {
            list: self,
            current: self.first(),
        }
    }

    pub(crate) fn key(&self, idx: usize) -> &[u8] {
        &self.nodes[idx].key
    }

    pub(crate) fn value(&self, idx: usize) -> &[u8] {
        &self.nodes[idx].value
    }

    pub(crate) fn first(&self) -> Option<usize> {
        self.nodes[HEAD].forward[0]
    }

    pub(crate) fn next(&self, idx: usize) -> Option<usize> {
        self.nodes[idx].forward[0]
    }

    /// First node whose key is >= `key`.
    pub(crate) fn find_greater_or_equal(&self, key: &[u8]) -> Option<usize> {
        let mut prev = [HEAD; MAX_HEIGHT];
        self.find_greater_or_equal_with_prev(key, &mut prev)
    }

    /// Last node whose key is < `key`.
    pub(crate) fn find_less_than(&self, key: &[u8]) -> Option<usize> {
        let mut x = HEAD;
        for level in (0..self.height).rev() {
            while let Some(next) = self.nodes[x].forward[level] {
                if self.cmp.compare(&self.nodes[next].key, key) == Ordering::Less {
                    x = next;
                } else {
                    break;
                }
            }
        }
        (x != HEAD).then_some(x)
    }

    pub(crate) fn find_last(&self) -> Option<usize> {
        let mut x = HEAD;
        for level in (0..self.height).rev() {
            while let Some(next) = self.nodes[x].forward[level] {
                x = next;
            }
        }
        (x != HEAD).then_some(x)
    }

    fn find_greater_or_equal_with_prev(
        &self,
        key: &[u8],
        prev: &mut [usize; MAX_HEIGHT],
    ) -> Option<usize> {
        let mut x = HEAD;
        let mut level = self.height - 1;
        loop {
            let next = self.nodes[x].forward[level];
            match next {
                Some(n) if self.cmp.compare(&self.nodes[n].key, key) == Ordering::Less => {
                    x = n;
                }
                _ => {
                    prev[level] = x;
                    if level == 0 {
                        return next;
                    }
                    level -= 1;
                }
            }
        }
    }

    /// Generate a random level for a new node.
    /// Each level has a 1/4 probability (LevelDB uses 1/4, not 1/2).
    fn random_height(&self) -> usize {
        let mut rng = rand::thread_rng();
        let mut height = 1;
        while height < MAX_HEIGHT && rng.gen_ratio(1, BRANCHING) {
            height += 1;
        }
        height
    }
}

/// Iterator over skip list entries in sorted order.
///
/// Simply follows level 0 forward pointers; level 0 is a sorted linked list
/// containing every entry.
pub struct SkipListIterator<'a> {
    list: &'a SkipList,
    current: Option<usize>,
}

impl<'a> Iterator for SkipListIterator<'a> {
    type Item = (&'a [u8], &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.current?;
        let list = self.list;
        self.current = list.next(idx);
        Some((list.key(idx), list.value(idx)))
    }
}
