use std::path::Path;

use crate::db::filename::table_file_name;
use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::sstable::TableBuilder;
use crate::table_cache::TableCache;
use crate::types::InternalKey;
use crate::version::FileMetaData;

/// Write every entry of `iter` into table `number`. Returns `None` (and
/// leaves no file behind) when the iterator is empty.
///
/// The new table is opened through the table cache before returning, so a
/// file that cannot be read back is never installed.
pub(crate) fn build_table(
    dbname: &Path,
    table_cache: &TableCache,
    iter: &mut dyn StorageIterator,
    number: u64,
) -> Result<Option<FileMetaData>> {
    iter.seek_to_first()?;
    if !iter.is_valid() {
        return Ok(None);
    }

    let path = table_file_name(dbname, number);
    let result = (|| -> Result<FileMetaData> {
        let mut builder = TableBuilder::create(&path, table_cache.options().clone())?;
        let smallest = InternalKey::decode_from(iter.key());
        let mut largest = Vec::new();
        while iter.is_valid() {
            largest.clear();
            largest.extend_from_slice(iter.key());
            builder.add(iter.key(), iter.value())?;
            iter.next()?;
        }
        let file_size = builder.finish()?;
        let meta = FileMetaData::new(number, file_size, smallest, InternalKey::decode_from(&largest));

        let mut check = table_cache.iter(number, file_size, false, false)?;
        check.seek_to_first()?;
        Ok(meta)
    })();

    match result {
        Ok(meta) => Ok(Some(meta)),
        Err(e) => {
            let _ = std::fs::remove_file(&path);
            Err(e)
        }
    }
}
