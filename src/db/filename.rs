//! Names of the files inside a database directory.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Log,
    Table,
    Descriptor,
    Current,
    Temp,
    InfoLog,
}

pub fn log_file_name(dbname: &Path, number: u64) -> PathBuf {
    dbname.join(format!("{number:06}.log"))
}

pub fn table_file_name(dbname: &Path, number: u64) -> PathBuf {
    dbname.join(format!("{number:06}.ldb"))
}

/// Older name for table files; still opened for reading.
pub fn sst_table_file_name(dbname: &Path, number: u64) -> PathBuf {
    dbname.join(format!("{number:06}.sst"))
}

pub fn descriptor_file_name(dbname: &Path, number: u64) -> PathBuf {
    dbname.join(format!("MANIFEST-{number:06}"))
}

pub fn current_file_name(dbname: &Path) -> PathBuf {
    dbname.join("CURRENT")
}

pub fn temp_file_name(dbname: &Path, number: u64) -> PathBuf {
    dbname.join(format!("{number:06}.dbtmp"))
}

/// Classify a directory entry. Returns `None` for files that do not belong
/// to the database.
pub fn parse_file_name(name: &str) -> Option<(u64, FileType)> {
    match name {
        "CURRENT" => return Some((0, FileType::Current)),
        "LOG" | "LOG.old" => return Some((0, FileType::InfoLog)),
        _ => {}
    }
    if let Some(rest) = name.strip_prefix("MANIFEST-") {
        return parse_number(rest).map(|n| (n, FileType::Descriptor));
    }
    let (number, suffix) = name.split_once('.')?;
    let number = parse_number(number)?;
    let file_type = match suffix {
        "log" => FileType::Log,
        "ldb" | "sst" => FileType::Table,
        "dbtmp" => FileType::Temp,
        _ => return None,
    };
    Some((number, file_type))
}

fn parse_number(digits: &str) -> Option<u64> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Point CURRENT at `MANIFEST-<descriptor_number>`, atomically.
pub fn set_current_file(dbname: &Path, descriptor_number: u64) -> Result<()> {
    let tmp = temp_file_name(dbname, descriptor_number);
    let contents = format!("MANIFEST-{descriptor_number:06}\n");
    let result = (|| -> Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, current_file_name(dbname))?;
        Ok(())
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}
