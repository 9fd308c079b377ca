pub mod merge;
pub mod two_level;

use crate::error::Result;

pub use merge::MergingIterator;
pub use two_level::{BlockSource, TwoLevelIterator};

/// The central iteration abstraction for the storage engine.
///
/// Every sorted data source (memtable, block, table, level, merged view)
/// implements this trait. This enables composability: MergingIterator
/// takes Vec<Box<dyn StorageIterator>> and merges them.
///
/// A freshly constructed iterator is not positioned; call one of the seek
/// methods first.
pub trait StorageIterator: Send {
    /// Returns true if the iterator is positioned at a valid entry.
    fn is_valid(&self) -> bool;

    fn seek_to_first(&mut self) -> Result<()>;

    fn seek_to_last(&mut self) -> Result<()>;

    /// Positions the iterator at the first entry with key >= target.
    fn seek(&mut self, target: &[u8]) -> Result<()>;

    /// Advances to the next entry. Returns error on IO failure.
    fn next(&mut self) -> Result<()>;

    /// Moves to the previous entry; becomes invalid when stepping before
    /// the first one.
    fn prev(&mut self) -> Result<()>;

    /// Returns the current key. Only valid when is_valid() is true.
    fn key(&self) -> &[u8];

    /// Returns the current value. Only valid when is_valid() is true.
    fn value(&self) -> &[u8];

    /// Current entry without moving.
    fn peek(&self) -> Option<(&[u8], &[u8])> {
        if self.is_valid() {
            Some((self.key(), self.value()))
        } else {
            None
        }
    }
}

impl<I: StorageIterator + ?Sized> StorageIterator for Box<I> {
    fn is_valid(&self) -> bool {
        (**self).is_valid()
    }

    fn seek_to_first(&mut self) -> Result<()> {
        (**self).seek_to_first()
    }

    fn seek_to_last(&mut self) -> Result<()> {
        (**self).seek_to_last()
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        (**self).seek(target)
    }

    fn next(&mut self) -> Result<()> {
        (**self).next()
    }

    fn prev(&mut self) -> Result<()> {
        (**self).prev()
    }

    fn key(&self) -> &[u8] {
        (**self).key()
    }

    fn value(&self) -> &[u8] {
        (**self).value()
    }
}

/// Iterator over nothing.
#[derive(Debug, Default)]
pub struct EmptyIterator;

impl StorageIterator for EmptyIterator {
    fn is_valid(&self) -> bool {
        false
    }

    fn seek_to_first(&mut self) -> Result<()> {
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        Ok(())
    }

    fn seek(&mut self, _target: &[u8]) -> Result<()> {
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        Ok(())
    }

    fn key(&self) -> &[u8] {
        &[]
    }

    fn value(&self) -> &[u8] {
        &[]
    }
}

/// Collects every remaining entry; test and repair helper.
pub fn collect_entries<I: StorageIterator + ?Sized>(iter: &mut I) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut out = Vec::new();
    while iter.is_valid() {
        out.push((iter.key().to_vec(), iter.value().to_vec()));
        iter.next()?;
    }
    Ok(out)
}
