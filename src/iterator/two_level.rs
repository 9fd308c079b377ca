use crate::error::Result;
use crate::iterator::StorageIterator;

/// Turns an index entry's value into an iterator over the data it points at.
pub trait BlockSource: Send {
    fn open(&self, index_value: &[u8]) -> Result<Box<dyn StorageIterator>>;
}

/// Iterates an index whose values locate data iterators: a table's index
/// block pointing at data blocks, or a level's file list pointing at tables.
pub struct TwoLevelIterator<I, S> {
    index: I,
    source: S,
    data: Option<Box<dyn StorageIterator>>,
    /// Index value `data` was opened from, to avoid reopening it.
    data_handle: Vec<u8>,
}

impl<I: StorageIterator, S: BlockSource> TwoLevelIterator<I, S> {
    pub fn new(index: I, source: S) -> Self {
        TwoLevelIterator {
            index,
            source,
            data: None,
            data_handle: Vec::new(),
        }
    }

    fn init_data(&mut self) -> Result<()> {
        if !self.index.is_valid() {
            self.data = None;
            return Ok(());
        }
        let handle = self.index.value();
        if self.data.is_some() && handle == self.data_handle.as_slice() {
            return Ok(());
        }
        let iter = self.source.open(handle)?;
        self.data_handle = handle.to_vec();
        self.data = Some(iter);
        Ok(())
    }

    fn data_valid(&self) -> bool {
        self.data.as_ref().is_some_and(|d| d.is_valid())
    }

    fn skip_empty_forward(&mut self) -> Result<()> {
        while !self.data_valid() {
            if !self.index.is_valid() {
                self.data = None;
                return Ok(());
            }
            self.index.next()?;
            self.init_data()?;
            if let Some(data) = self.data.as_mut() {
                data.seek_to_first()?;
            }
        }
        Ok(())
    }

    fn skip_empty_backward(&mut self) -> Result<()> {
        while !self.data_valid() {
            if !self.index.is_valid() {
                self.data = None;
                return Ok(());
            }
            self.index.prev()?;
            self.init_data()?;
            if let Some(data) = self.data.as_mut() {
                data.seek_to_last()?;
            }
        }
        Ok(())
    }
}

impl<I: StorageIterator, S: BlockSource> StorageIterator for TwoLevelIterator<I, S> {
    fn is_valid(&self) -> bool {
        self.data_valid()
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.index.seek_to_first()?;
        self.init_data()?;
        if let Some(data) = self.data.as_mut() {
            data.seek_to_first()?;
        }
        self.skip_empty_forward()
    }

    fn seek_to_last(&mut self) -> Result<()> {
        self.index.seek_to_last()?;
        self.init_data()?;
        if let Some(data) = self.data.as_mut() {
            data.seek_to_last()?;
        }
        self.skip_empty_backward()
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        self.index.seek(target)?;
        self.init_data()?;
        if let Some(data) = self.data.as_mut() {
            data.seek(target)?;
        }
        self.skip_empty_forward()
    }

    fn next(&mut self) -> Result<()> {
        if let Some(data) = self.data.as_mut() {
            data.next()?;
        }
        self.skip_empty_forward()
    }

    fn prev(&mut self) -> Result<()> {
        if let Some(data) = self.data.as_mut() {
            data.prev()?;
        }
        self.skip_empty_backward()
    }

    fn key(&self) -> &[u8] {
        match &self.data {
            Some(d) => d.key(),
            None => &[],
        }
    }

    fn value(&self) -> &[u8] {
        match &self.data {
            Some(d) => d.value(),
            None => &[],
        }
    }
}
