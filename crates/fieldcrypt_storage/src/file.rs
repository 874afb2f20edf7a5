//! Directory-backed key/value store.
//!
//! Layout:
//!
//! ```text
//! <store_path>/
//! ├─ LOCK        # Advisory lock, held while the store is open
//! ├─ STORE       # Snapshot of every entry as of the last compaction
//! └─ JOURNAL     # Mutations made since that snapshot, append-only
//! ```
//!
//! A mutation appends one record to `JOURNAL` and syncs it, so its cost
//! does not depend on how much the store holds. Opening replays the
//! journal over the snapshot. Once the journal outgrows the snapshot it is
//! folded in: the snapshot is written to `STORE.tmp`, synced and renamed
//! over `STORE`, then the journal is truncated. Records are absolute
//! (set, delete, clear), so replaying a journal the snapshot already
//! contains is harmless.
//!
//! Snapshot format (little endian):
//!
//! ```text
//! | MAGIC "FCKV" (4) | VERSION (2) | COUNT (4) | entries... | CRC32 (4) |
//! entry: | COLL_LEN (2) | COLL | KEY_LEN (2) | KEY | VAL_LEN (4) | VAL |
//! ```
//!
//! Journal record format (little endian):
//!
//! ```text
//! | OP (1) | LEN (4) | PAYLOAD (LEN) | CRC32 of OP, LEN and PAYLOAD (4) |
//! set:        | COLL_LEN (2) | COLL | KEY_LEN (2) | KEY | VAL_LEN (4) | VAL |
//! delete:     | COLL_LEN (2) | COLL | KEY_LEN (2) | KEY |
//! delete_all: | COLL_LEN (2) | COLL |
//! ```
//!
//! An incomplete record at the end of the journal is a write torn by a
//! crash; it was never acknowledged and is cut off on open. A complete
//! record with a bad checksum is corruption.

use crate::error::{StorageError, StorageResult};
use crate::memory::{collection_range, scan_range};
use crate::store::KeyValueStore;
use fs2::FileExt;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const STORE_FILE: &str = "STORE";
const STORE_TEMP: &str = "STORE.tmp";
const JOURNAL_FILE: &str = "JOURNAL";
const MAGIC: &[u8; 4] = b"FCKV";
const FORMAT_VERSION: u16 = 1;

/// Journal size below which no compaction happens.
const COMPACT_MIN_BYTES: u64 = 1 << 20;

const RECORD_HEADER: usize = 5;
const CRC_SIZE: usize = 4;

const OP_SET: u8 = 1;
const OP_DELETE: u8 = 2;
const OP_DELETE_ALL: u8 = 3;

type Entries = BTreeMap<(String, String), Vec<u8>>;

/// One journaled mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Mutation {
    Set {
        collection: String,
        key: String,
        value: Vec<u8>,
    },
    Delete {
        collection: String,
        key: String,
    },
    DeleteAll {
        collection: String,
    },
}

impl Mutation {
    fn op(&self) -> u8 {
        match self {
            Self::Set { .. } => OP_SET,
            Self::Delete { .. } => OP_DELETE,
            Self::DeleteAll { .. } => OP_DELETE_ALL,
        }
    }

    fn apply(self, entries: &mut Entries) -> bool {
        match self {
            Self::Set { collection, key, value } => entries.insert((collection, key), value).is_some(),
            Self::Delete { collection, key } => entries.remove(&(collection, key)).is_some(),
            Self::DeleteAll { collection } => {
                let before = entries.len();
                entries.retain(|(c, _), _| *c != collection);
                entries.len() != before
            }
        }
    }

    fn encode(&self, buf: &mut Vec<u8>) -> StorageResult<()> {
        let mut payload = Vec::new();
        match self {
            Self::Set { collection, key, value } => {
                put_short(&mut payload, "collection", collection.as_bytes())?;
                put_short(&mut payload, "key", key.as_bytes())?;
                put_long(&mut payload, value)?;
            }
            Self::Delete { collection, key } => {
                put_short(&mut payload, "collection", collection.as_bytes())?;
                put_short(&mut payload, "key", key.as_bytes())?;
            }
            Self::DeleteAll { collection } => {
                put_short(&mut payload, "collection", collection.as_bytes())?;
            }
        }

        let start = buf.len();
        buf.push(self.op());
        put_long(buf, &payload)?;
        let crc = compute_crc32(&buf[start..]);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(())
    }

    fn decode(op: u8, payload: &[u8]) -> StorageResult<Self> {
        let mut reader = Reader { data: payload, pos: 0 };
        let collection = reader.short_string()?;
        let mutation = match op {
            OP_SET => {
                let key = reader.short_string()?;
                let len = reader.u32()? as usize;
                let value = reader.take(len)?.to_vec();
                Self::Set { collection, key, value }
            }
            OP_DELETE => Self::Delete {
                collection,
                key: reader.short_string()?,
            },
            OP_DELETE_ALL => Self::DeleteAll { collection },
            other => {
                return Err(StorageError::Corrupted(format!("unknown journal operation {other}")));
            }
        };
        if reader.pos != payload.len() {
            return Err(StorageError::Corrupted("trailing bytes in journal record".into()));
        }
        Ok(mutation)
    }
}

#[derive(Debug)]
struct Inner {
    entries: Entries,
    journal: File,
    journal_len: u64,
    snapshot_len: u64,
}

/// A persistent key/value store kept in a single directory.
///
/// # Thread Safety
///
/// The store holds an exclusive advisory lock on its directory; a second
/// `open` of the same directory fails with [`StorageError::Locked`].
/// Within the process, access is serialized by an internal lock.
///
/// # Example
///
/// ```no_run
/// use fieldcrypt_storage::{FileStore, KeyValueStore};
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("fieldcrypt_state")).unwrap();
/// store.set("field_encrypt", "entity_types", b"\x80").unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    inner: RwLock<Inner>,
    _lock_file: File,
}

impl FileStore {
    /// Opens or creates a store directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The path exists and is not a directory
    /// - Another process holds the lock (returns `Locked`)
    /// - The snapshot fails its magic, version or checksum checks
    /// - A complete journal record fails its checksum
    /// - I/O errors occur
    pub fn open(path: &Path) -> StorageResult<Self> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }
        if !path.is_dir() {
            return Err(StorageError::Corrupted(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        let store_path = path.join(STORE_FILE);
        let (mut entries, snapshot_len) = if store_path.exists() {
            let bytes = fs::read(&store_path)?;
            (decode_snapshot(&bytes)?, bytes.len() as u64)
        } else {
            (Entries::new(), 0)
        };

        let journal_path = path.join(JOURNAL_FILE);
        let journal_bytes = if journal_path.exists() {
            fs::read(&journal_path)?
        } else {
            Vec::new()
        };
        let (valid_len, replayed) = replay_journal(&journal_bytes, &mut entries)?;
        let journal = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&journal_path)?;
        if valid_len < journal_bytes.len() {
            tracing::warn!(
                path = %journal_path.display(),
                dropped = journal_bytes.len() - valid_len,
                "cutting off incomplete journal record"
            );
            journal.set_len(valid_len as u64)?;
            journal.sync_all()?;
        }
        tracing::debug!(
            path = %path.display(),
            entries = entries.len(),
            replayed,
            "opened file store"
        );

        Ok(Self {
            path: path.to_path_buf(),
            inner: RwLock::new(Inner {
                entries,
                journal,
                journal_len: valid_len as u64,
                snapshot_len,
            }),
            _lock_file: lock_file,
        })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Folds the journal into a fresh snapshot and empties it.
    ///
    /// Runs on its own once the journal outgrows the snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written.
    pub fn compact(&self) -> StorageResult<()> {
        let mut inner = self.inner.write();
        self.compact_locked(&mut inner)
    }

    fn compact_locked(&self, inner: &mut Inner) -> StorageResult<()> {
        let bytes = encode_snapshot(&inner.entries)?;
        let temp = self.path.join(STORE_TEMP);
        {
            let mut file = File::create(&temp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&temp, self.path.join(STORE_FILE))?;

        inner.journal.set_len(0)?;
        inner.journal.sync_all()?;
        tracing::debug!(
            path = %self.path.display(),
            snapshot = bytes.len(),
            folded = inner.journal_len,
            "compacted file store"
        );
        inner.journal_len = 0;
        inner.snapshot_len = bytes.len() as u64;
        Ok(())
    }

    /// Appends `mutations` as one synced write, then applies them in
    /// memory. Returns, per mutation, whether it replaced or removed
    /// anything.
    fn commit(&self, mutations: Vec<Mutation>) -> StorageResult<Vec<bool>> {
        let mut buf = Vec::new();
        for mutation in &mutations {
            mutation.encode(&mut buf)?;
        }

        let mut inner = self.inner.write();
        let start = inner.journal_len;
        if let Err(err) = append_synced(&mut inner.journal, start, &buf) {
            // Drop whatever part of the write reached the file.
            if inner.journal.set_len(start).is_err() {
                tracing::error!(path = %self.path.display(), "failed to roll back partial journal write");
            }
            return Err(err.into());
        }
        inner.journal_len = start + buf.len() as u64;

        let changed = mutations
            .into_iter()
            .map(|m| m.apply(&mut inner.entries))
            .collect();

        if inner.journal_len >= COMPACT_MIN_BYTES && inner.journal_len > inner.snapshot_len {
            // The mutations are durable already; a failed compaction is retried
            // on the next commit.
            if let Err(err) = self.compact_locked(&mut inner) {
                tracing::warn!(path = %self.path.display(), error = %err, "journal compaction failed");
            }
        }
        Ok(changed)
    }
}

fn append_synced(journal: &mut File, offset: u64, bytes: &[u8]) -> std::io::Result<()> {
    journal.seek(SeekFrom::Start(offset))?;
    journal.write_all(bytes)?;
    journal.sync_data()
}

/// Applies every complete record of `data` to `entries`. Returns the
/// length of the valid prefix and the number of records applied.
fn replay_journal(data: &[u8], entries: &mut Entries) -> StorageResult<(usize, usize)> {
    let mut pos = 0;
    let mut records = 0;
    loop {
        let rest = &data[pos..];
        if rest.len() < RECORD_HEADER {
            break;
        }
        let len = u32::from_le_bytes([rest[1], rest[2], rest[3], rest[4]]) as usize;
        let Some(total) = len
            .checked_add(RECORD_HEADER + CRC_SIZE)
            .filter(|total| *total <= rest.len())
        else {
            break;
        };

        let body = &rest[..RECORD_HEADER + len];
        let crc_bytes = &rest[RECORD_HEADER + len..total];
        let stored_crc = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let actual_crc = compute_crc32(body);
        if stored_crc != actual_crc {
            return Err(StorageError::Corrupted(format!(
                "journal checksum mismatch at offset {pos}: expected {stored_crc:08x}, got {actual_crc:08x}"
            )));
        }

        Mutation::decode(rest[0], &body[RECORD_HEADER..])?.apply(entries);
        pos += total;
        records += 1;
    }
    Ok((pos, records))
}

impl KeyValueStore for FileStore {
    fn get(&self, collection: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self
            .inner
            .read()
            .entries
            .get(&(collection.to_string(), key.to_string()))
            .cloned())
    }

    fn set(&self, collection: &str, key: &str, value: &[u8]) -> StorageResult<()> {
        self.commit(vec![Mutation::Set {
            collection: collection.to_string(),
            key: key.to_string(),
            value: value.to_vec(),
        }])?;
        Ok(())
    }

    fn set_many(&self, collection: &str, entries: &[(String, Vec<u8>)]) -> StorageResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mutations = entries
            .iter()
            .map(|(key, value)| Mutation::Set {
                collection: collection.to_string(),
                key: key.clone(),
                value: value.clone(),
            })
            .collect();
        self.commit(mutations)?;
        Ok(())
    }

    fn delete(&self, collection: &str, key: &str) -> StorageResult<bool> {
        let entry = (collection.to_string(), key.to_string());
        if !self.inner.read().entries.contains_key(&entry) {
            return Ok(false);
        }
        let (collection, key) = entry;
        let changed = self.commit(vec![Mutation::Delete { collection, key }])?;
        Ok(changed.first().copied().unwrap_or(false))
    }

    fn keys(&self, collection: &str) -> StorageResult<Vec<String>> {
        let inner = self.inner.read();
        Ok(collection_range(&inner.entries, collection)
            .map(|((_, k), _)| k.clone())
            .collect())
    }

    fn scan(&self, collection: &str, after: Option<&str>, limit: usize) -> StorageResult<Vec<(String, Vec<u8>)>> {
        Ok(scan_range(&self.inner.read().entries, collection, after, limit))
    }

    fn delete_all(&self, collection: &str) -> StorageResult<()> {
        self.commit(vec![Mutation::DeleteAll {
            collection: collection.to_string(),
        }])?;
        Ok(())
    }
}

fn encode_snapshot(entries: &Entries) -> StorageResult<Vec<u8>> {
    let count = u32::try_from(entries.len()).map_err(|_| StorageError::TooLarge {
        what: "entry count",
        len: entries.len(),
    })?;

    let mut buf = Vec::new();
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&count.to_le_bytes());

    for ((collection, key), value) in entries {
        put_short(&mut buf, "collection", collection.as_bytes())?;
        put_short(&mut buf, "key", key.as_bytes())?;
        put_long(&mut buf, value)?;
    }

    let crc = compute_crc32(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    Ok(buf)
}

fn put_short(buf: &mut Vec<u8>, what: &'static str, bytes: &[u8]) -> StorageResult<()> {
    let len = u16::try_from(bytes.len()).map_err(|_| StorageError::TooLarge {
        what,
        len: bytes.len(),
    })?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

fn put_long(buf: &mut Vec<u8>, bytes: &[u8]) -> StorageResult<()> {
    let len = u32::try_from(bytes.len()).map_err(|_| StorageError::TooLarge {
        what: "value",
        len: bytes.len(),
    })?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

fn decode_snapshot(data: &[u8]) -> StorageResult<Entries> {
    if data.len() < MAGIC.len() + 2 + 4 + 4 {
        return Err(StorageError::Corrupted("snapshot too short".into()));
    }
    let (body, crc_bytes) = data.split_at(data.len() - 4);
    let stored_crc = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
    let actual_crc = compute_crc32(body);
    if stored_crc != actual_crc {
        return Err(StorageError::Corrupted(format!(
            "checksum mismatch: expected {stored_crc:08x}, got {actual_crc:08x}"
        )));
    }

    let mut reader = Reader { data: body, pos: 0 };
    if reader.take(4)? != MAGIC {
        return Err(StorageError::Corrupted("bad magic".into()));
    }
    let version = reader.u16()?;
    if version != FORMAT_VERSION {
        return Err(StorageError::Corrupted(format!(
            "unsupported format version {version}"
        )));
    }

    let count = reader.u32()?;
    let mut entries = Entries::new();
    for _ in 0..count {
        let collection = reader.short_string()?;
        let key = reader.short_string()?;
        let len = reader.u32()? as usize;
        let value = reader.take(len)?.to_vec();
        entries.insert((collection, key), value);
    }
    if reader.pos != body.len() {
        return Err(StorageError::Corrupted("trailing bytes in snapshot".into()));
    }
    Ok(entries)
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> StorageResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| StorageError::Corrupted("truncated record".into()))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u16(&mut self) -> StorageResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> StorageResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn short_string(&mut self) -> StorageResult<String> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| StorageError::Corrupted("invalid UTF-8 in record".into()))
    }
}

/// CRC32 (IEEE polynomial) of `data`.
fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn journal_len(dir: &Path) -> u64 {
        fs::metadata(dir.join(JOURNAL_FILE)).unwrap().len()
    }

    #[test]
    fn create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state");

        let store = FileStore::open(&path).unwrap();
        assert!(store.keys("any").unwrap().is_empty());
        assert!(path.join(LOCK_FILE).exists());
        assert_eq!(store.path(), path);
    }

    #[test]
    fn persistence() {
        let dir = tempdir().unwrap();

        {
            let store = FileStore::open(dir.path()).unwrap();
            store.set("field_encrypt", "entity_types", b"abc").unwrap();
            store.set("queue", "1", b"one").unwrap();
            store.set("queue", "2", b"two").unwrap();
            assert!(store.delete("queue", "1").unwrap());
        }

        {
            let store = FileStore::open(dir.path()).unwrap();
            assert_eq!(
                store.get("field_encrypt", "entity_types").unwrap(),
                Some(b"abc".to_vec())
            );
            assert_eq!(store.keys("queue").unwrap(), vec!["2"]);
        }
    }

    #[test]
    fn second_open_is_locked() {
        let dir = tempdir().unwrap();
        let _first = FileStore::open(dir.path()).unwrap();
        let second = FileStore::open(dir.path());
        assert!(matches!(second, Err(StorageError::Locked)));
    }

    #[test]
    fn mutations_append_to_the_journal() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.set("queue", "1", b"one").unwrap();
        let one = journal_len(dir.path());
        store.set("queue", "2", b"two").unwrap();
        assert_eq!(journal_len(dir.path()), 2 * one);
        assert!(!dir.path().join(STORE_FILE).exists());

        assert!(!store.delete("queue", "9").unwrap());
        assert_eq!(journal_len(dir.path()), 2 * one);
    }

    #[test]
    fn set_many_is_one_write() {
        let dir = tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            let entries: Vec<(String, Vec<u8>)> = (1..=3).map(|n| (format!("{n:03}"), vec![n])).collect();
            store.set_many("queue", &entries).unwrap();
            store.set_many("queue", &[]).unwrap();
        }
        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.keys("queue").unwrap(), vec!["001", "002", "003"]);
        assert_eq!(store.scan("queue", Some("001"), 1).unwrap(), vec![("002".to_string(), vec![2])]);
    }

    #[test]
    fn compact_folds_the_journal_into_the_snapshot() {
        let dir = tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            store.set("queue", "1", b"one").unwrap();
            store.set("queue", "2", b"two").unwrap();
            store.compact().unwrap();
            assert_eq!(journal_len(dir.path()), 0);
            assert!(dir.path().join(STORE_FILE).exists());

            store.delete("queue", "1").unwrap();
            assert!(journal_len(dir.path()) > 0);
        }
        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.keys("queue").unwrap(), vec!["2"]);
    }

    #[test]
    fn large_journal_compacts_itself() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let value = vec![7u8; 64 * 1024];
        for n in 0..20 {
            store.set("blobs", "same", &value).unwrap();
            assert!(journal_len(dir.path()) < COMPACT_MIN_BYTES + value.len() as u64 + 64, "pass {n}");
        }
        assert!(dir.path().join(STORE_FILE).exists());
        drop(store);

        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.get("blobs", "same").unwrap(), Some(value));
    }

    #[test]
    fn torn_journal_tail_is_cut_off() {
        let dir = tempdir().unwrap();
        let one = {
            let store = FileStore::open(dir.path()).unwrap();
            store.set("queue", "1", b"one").unwrap();
            let one = journal_len(dir.path());
            store.set("queue", "2", b"two").unwrap();
            one
        };

        let journal = OpenOptions::new().write(true).open(dir.path().join(JOURNAL_FILE)).unwrap();
        journal.set_len(2 * one - 3).unwrap();
        drop(journal);

        {
            let store = FileStore::open(dir.path()).unwrap();
            assert_eq!(store.keys("queue").unwrap(), vec!["1"]);
            assert_eq!(journal_len(dir.path()), one);
            store.set("queue", "3", b"three").unwrap();
        }
        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.keys("queue").unwrap(), vec!["1", "3"]);
    }

    #[test]
    fn corrupted_journal_record_detected() {
        let dir = tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            store.set("c", "k", b"value").unwrap();
        }

        let journal_path = dir.path().join(JOURNAL_FILE);
        let mut bytes = fs::read(&journal_path).unwrap();
        let last = bytes.len() - CRC_SIZE - 1;
        bytes[last] ^= 0xFF;
        fs::write(&journal_path, bytes).unwrap();

        let result = FileStore::open(dir.path());
        assert!(matches!(result, Err(StorageError::Corrupted(_))));
    }

    #[test]
    fn corrupted_snapshot_detected() {
        let dir = tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            store.set("c", "k", b"value").unwrap();
            store.compact().unwrap();
        }

        let store_path = dir.path().join(STORE_FILE);
        let mut bytes = fs::read(&store_path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        fs::write(&store_path, bytes).unwrap();

        let result = FileStore::open(dir.path());
        assert!(matches!(result, Err(StorageError::Corrupted(_))));
    }

    #[test]
    fn delete_all_only_touches_collection() {
        let dir = tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            store.set("queue", "1", b"x").unwrap();
            store.set("other", "1", b"y").unwrap();

            store.delete_all("queue").unwrap();
            assert_eq!(store.count("queue").unwrap(), 0);
            assert_eq!(store.count("other").unwrap(), 1);
        }
        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.count("queue").unwrap(), 0);
        assert_eq!(store.count("other").unwrap(), 1);
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn empty_snapshot_roundtrip() {
        let bytes = encode_snapshot(&Entries::new()).unwrap();
        assert!(decode_snapshot(&bytes).unwrap().is_empty());
    }

    fn mutation() -> impl Strategy<Value = Mutation> {
        let collection = prop::sample::select(vec!["queue", "field_encrypt"]).prop_map(str::to_string);
        prop_oneof![
            4 => (collection.clone(), "[a-d]{1,2}", prop::collection::vec(any::<u8>(), 0..16))
                .prop_map(|(collection, key, value)| Mutation::Set { collection, key, value }),
            2 => (collection.clone(), "[a-d]{1,2}").prop_map(|(collection, key)| Mutation::Delete { collection, key }),
            1 => collection.prop_map(|collection| Mutation::DeleteAll { collection }),
        ]
    }

    proptest! {
        #[test]
        fn snapshot_preserves_entries(
            entries in prop::collection::btree_map(
                ("[a-z_]{0,12}", "\\PC{0,8}"),
                prop::collection::vec(any::<u8>(), 0..64),
                0..24,
            )
        ) {
            let bytes = encode_snapshot(&entries).unwrap();
            prop_assert_eq!(decode_snapshot(&bytes).unwrap(), entries);
        }

        #[test]
        fn journal_replay_matches_applied_mutations(mutations in prop::collection::vec(mutation(), 0..40)) {
            let mut expected = Entries::new();
            let mut journal = Vec::new();
            for mutation in &mutations {
                mutation.encode(&mut journal).unwrap();
                mutation.clone().apply(&mut expected);
            }

            let mut replayed = Entries::new();
            let (valid, records) = replay_journal(&journal, &mut replayed).unwrap();
            prop_assert_eq!(valid, journal.len());
            prop_assert_eq!(records, mutations.len());
            prop_assert_eq!(replayed, expected);
        }
    }
}
