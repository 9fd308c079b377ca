use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::comparator::Comparator;
use crate::error::Result;
use crate::iterator::StorageIterator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

/// Heap slot: a copy of one child's current key.
struct HeapEntry {
    key: Vec<u8>,
    index: usize,
    comparator: Arc<dyn Comparator>,
    direction: Direction,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    /// `BinaryHeap` pops the greatest element: forward iteration inverts the
    /// key order so the smallest key comes first. Ties go to the lower child
    /// index in both directions.
    fn cmp(&self, other: &Self) -> Ordering {
        let by_key = self.comparator.compare(&self.key, &other.key);
        match self.direction {
            Direction::Forward => by_key.then_with(|| self.index.cmp(&other.index)).reverse(),
            Direction::Reverse => by_key.then_with(|| other.index.cmp(&self.index)),
        }
    }
}

/// Merges multiple sorted iterators into a single sorted stream.
///
/// Used for:
/// - Range scans across memtable + all SSTable levels
/// - Compaction (merging SSTables)
///
/// Every version of every key is yielded; collapsing versions is the
/// caller's job (the DB iterator or the compaction loop). Children are
/// ordered by priority: on equal keys the lower index wins.
pub struct MergingIterator {
    cmp: Arc<dyn Comparator>,
    children: Vec<Box<dyn StorageIterator>>,
    heap: BinaryHeap<HeapEntry>,
    current: Option<usize>,
    direction: Direction,
}

impl MergingIterator {
    /// Create a new MergingIterator from multiple sorted sources.
    pub fn new(cmp: Arc<dyn Comparator>, children: Vec<Box<dyn StorageIterator>>) -> Self {
        MergingIterator {
            cmp,
            heap: BinaryHeap::with_capacity(children.len()),
            children,
            current: None,
            direction: Direction::Forward,
        }
    }

    fn entry(&self, index: usize, direction: Direction) -> HeapEntry {
        HeapEntry {
            key: self.children[index].key().to_vec(),
            index,
            comparator: Arc::clone(&self.cmp),
            direction,
        }
    }

    fn rebuild_heap(&mut self, direction: Direction) {
        self.direction = direction;
        self.heap.clear();
        for index in 0..self.children.len() {
            if self.children[index].is_valid() {
                let entry = self.entry(index, direction);
                self.heap.push(entry);
            }
        }
        self.current = self.heap.peek().map(|e| e.index);
    }

    /// Move the current child one step and restore the heap order.
    fn step_current(&mut self, forward: bool) -> Result<()> {
        let Some(cur) = self.current else {
            return Ok(());
        };
        self.heap.pop();
        if forward {
            self.children[cur].next()?;
        } else {
            self.children[cur].prev()?;
        }
        if self.children[cur].is_valid() {
            let entry = self.entry(cur, self.direction);
            self.heap.push(entry);
        }
        self.current = self.heap.peek().map(|e| e.index);
        Ok(())
    }
}

impl StorageIterator for MergingIterator {
    fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    fn seek_to_first(&mut self) -> Result<()> {
        for child in &mut self.children {
            child.seek_to_first()?;
        }
        self.rebuild_heap(Direction::Forward);
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        for child in &mut self.children {
            child.seek_to_last()?;
        }
        self.rebuild_heap(Direction::Reverse);
        Ok(())
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        for child in &mut self.children {
            child.seek(target)?;
        }
        self.rebuild_heap(Direction::Forward);
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        let Some(cur) = self.current else {
            return Ok(());
        };

        if self.direction != Direction::Forward {
            // Every non-current child sits before key(); move them all to
            // the first entry after it.
            let key = self.key().to_vec();
            for (i, child) in self.children.iter_mut().enumerate() {
                if i == cur {
                    continue;
                }
                child.seek(&key)?;
                if child.is_valid() && self.cmp.compare(&key, child.key()) == Ordering::Equal {
                    child.next()?;
                }
            }
            self.children[cur].next()?;
            self.rebuild_heap(Direction::Forward);
            return Ok(());
        }

        self.step_current(true)
    }

    fn prev(&mut self) -> Result<()> {
        let Some(cur) = self.current else {
            return Ok(());
        };

        if self.direction != Direction::Reverse {
            // Every non-current child sits after key(); move them all to the
            // last entry before it.
            let key = self.key().to_vec();
            for (i, child) in self.children.iter_mut().enumerate() {
                if i == cur {
                    continue;
                }
                child.seek(&key)?;
                if child.is_valid() {
                    child.prev()?;
                } else {
                    child.seek_to_last()?;
                }
            }
            self.children[cur].prev()?;
            self.rebuild_heap(Direction::Reverse);
            return Ok(());
        }

        self.step_current(false)
    }

    fn key(&self) -> &[u8] {
        match self.current {
            Some(i) => self.children[i].key(),
            None => &[],
        }
    }

    fn value(&self) -> &[u8] {
        match self.current {
            Some(i) => self.children[i].value(),
            None => &[],
        }
    }
}
