//! Filesystem access
//!
//! Byte-oriented file collaborators (open for retrieve/store with restart
//! offsets, size and mtime metadata) and directory-listing line
//! formatting.

use chrono::{DateTime, Utc};
use std::fs::{self, File, Metadata, OpenOptions};
use std::io::{self, Seek, SeekFrom};
use std::os::unix::fs::MetadataExt;
use std::path::Path;

/// Open a file for a RETR transfer, seeking to the restart offset.
///
/// Returns the open file and its total size.
pub fn open_retrieve(path: &Path, offset: u64) -> io::Result<(File, u64)> {
    let meta = fs::metadata(path)?;
    if !meta.is_file() {
        return Err(io::Error::other("not a regular file"));
    }

    let mut file = File::open(path)?;
    if offset != 0 {
        file.seek(SeekFrom::Start(offset))?;
    }

    Ok((file, meta.len()))
}

/// Open a file for a STOR/APPE transfer.
///
/// A restart offset rewrites an existing file in place from that offset;
/// append mode always writes at the end; otherwise the file is created or
/// truncated.
pub fn open_store(path: &Path, offset: u64, append: bool) -> io::Result<File> {
    if append {
        return OpenOptions::new().append(true).create(true).open(path);
    }

    if offset != 0 {
        let mut file = OpenOptions::new().write(true).open(path)?;
        file.seek(SeekFrom::Start(offset))?;
        return Ok(file);
    }

    File::create(path)
}

/// Size of a regular file, for the SIZE reply.
pub fn file_size(path: &Path) -> io::Result<u64> {
    let meta = fs::metadata(path)?;
    if !meta.is_file() {
        return Err(io::Error::other("not a regular file"));
    }

    Ok(meta.len())
}

/// Modification time as a `YYYYMMDDHHMMSS` UTC stamp, for the MDTM reply.
pub fn modify_stamp(path: &Path) -> io::Result<String> {
    let modified = fs::metadata(path)?.modified()?;
    let stamp: DateTime<Utc> = modified.into();
    Ok(stamp.format("%Y%m%d%H%M%S").to_string())
}

/// Format one long-listing line:
/// `-rw-r--r-- 1 1000 1000 4096 Jan  2 03:04 name` (no line ending).
pub fn format_list_entry(meta: &Metadata, name: &str) -> String {
    let file_type = meta.file_type();
    let kind = if file_type.is_dir() {
        'd'
    } else if file_type.is_file() {
        '-'
    } else if file_type.is_symlink() {
        'l'
    } else {
        '?'
    };

    let mode = meta.mode();
    let mut perms = String::with_capacity(9);
    for shift in [6u32, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        perms.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        perms.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        perms.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }

    let mtime: DateTime<Utc> = meta
        .modified()
        .map(Into::into)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

    format!(
        "{}{} {} {} {} {} {} {}",
        kind,
        perms,
        meta.nlink(),
        meta.uid(),
        meta.gid(),
        meta.len(),
        mtime.format("%b %e %H:%M"),
        name
    )
}
