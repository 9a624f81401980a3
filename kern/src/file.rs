//! The file-handle layer: open/close/read/write/seek, plus a degenerate
//! directory pseudo-descriptor (root only, current directory is always
//! "/", change-directory always fails).
//!
//! A single `read`/`write` call never crosses a cluster boundary -- it
//! transfers at most the rest of the current cluster and fails if asked
//! for more. `seek`, by contrast, walks the FAT chain from the file's
//! first cluster to land on whichever cluster an absolute offset falls
//! in, so a file that spans clusters is still fully addressable a read
//! or write at a time.

use abi::{DateTime, FatAttributes, OpenFlags, SeekWhence, ThreadId, FIRST_FAT_FILENO};

use crate::err::{VmError, VmResult};
use crate::fat::{self, DirEntryRecord};
use crate::machine::Machine;
use crate::runtime::Runtime;
use crate::sector;

#[derive(Clone, Debug)]
pub struct FileHandle {
    pub entry_index: usize,
    pub flags: OpenFlags,
    pub first_cluster: u32,
    pub cluster: u32,
    pub position: u32,
    /// Byte offset from the start of the file that `(cluster, position)`
    /// corresponds to. Not part of the on-disk or guest-visible model --
    /// spec's Open File only names `currentCluster`/`currentOffset` -- but
    /// kept here so `Seek`'s `Current`/`End` bases and `read`/`write`'s
    /// end-of-file accounting are correct once a file spans more than one
    /// cluster, instead of conflating a per-cluster offset with a
    /// file-wide one.
    pub absolute: u32,
    pub size: u32,
}

#[derive(Clone, Debug, Default)]
pub struct DirHandle {
    pub read_index: usize,
}

#[derive(Clone, Debug)]
pub enum OpenFile {
    File(FileHandle),
    Dir(DirHandle),
}

fn slot_index(fd: i32) -> VmResult<usize> {
    let idx = fd - FIRST_FAT_FILENO;
    if idx < 0 {
        return Err(VmError::InvalidId);
    }
    Ok(idx as usize)
}

fn alloc_slot<M: Machine>(rt: &mut Runtime<M>, file: OpenFile) -> i32 {
    if let Some(slot) = rt.open_files.iter().position(|f| f.is_none()) {
        rt.open_files[slot] = Some(file);
        slot as i32 + FIRST_FAT_FILENO
    } else {
        rt.open_files.push(Some(file));
        (rt.open_files.len() - 1) as i32 + FIRST_FAT_FILENO
    }
}

fn persist_fat_table<M: Machine>(rt: &mut Runtime<M>, thread: ThreadId) -> VmResult<()> {
    let (bpb, fat_table) = {
        let state = rt.fat.as_ref().ok_or(VmError::Failure)?;
        (state.bpb, state.fat_table.clone())
    };
    let mut bytes = vec![0u8; fat_table.len() * 2];
    fat::encode_fat_table(&fat_table, &mut bytes);
    sector::write_sectors(rt, thread, bpb.reserved_sector_count as u32, &bytes)
}

fn persist_entry<M: Machine>(rt: &mut Runtime<M>, thread: ThreadId, entry: &DirEntryRecord) -> VmResult<()> {
    let (bpb, sector_bytes) = {
        let state = rt.fat.as_mut().ok_or(VmError::Failure)?;
        state.write_entry_bytes(entry);
        let sector_in_region = state.sector_of_entry(entry.index);
        let start = sector_in_region as usize * abi::SECTOR_SIZE;
        let slice = state.root_sectors[start..start + abi::SECTOR_SIZE].to_vec();
        (state.bpb, slice)
    };
    let first_sector = bpb.first_root_sector() + (entry.index as u32 * 32 / abi::SECTOR_SIZE as u32);
    sector::write_sector(rt, thread, first_sector, &sector_bytes)
}

/// Opens a file by short name. With `CREAT` and no existing entry, a new
/// directory slot and first cluster are allocated; the file starts empty.
pub fn open<M: Machine>(rt: &mut Runtime<M>, thread: ThreadId, name: &str, flags: OpenFlags, now: DateTime) -> VmResult<i32> {
    let short_name = fat::normalize_short_name(name)?;

    let existing = rt.fat.as_ref().and_then(|s| s.find_entry(&short_name).cloned());

    let entry = match existing {
        Some(mut e) => {
            if fat::FatState::is_directory(&e) {
                return Err(VmError::InvalidParameter);
            }
            let (date, _) = fat::pack_datetime(&now);
            e.last_access_date = date;
            if let Some(state) = rt.fat.as_mut() {
                if let Some(slot) = state.entries.iter_mut().find(|s| s.index == e.index) {
                    slot.last_access_date = date;
                }
            }
            persist_entry(rt, thread, &e)?;
            e
        }
        None => {
            if !flags.contains(OpenFlags::CREAT) {
                return Err(VmError::InvalidParameter);
            }
            let first_slot = {
                let state = rt.fat.as_ref().ok_or(VmError::Failure)?;
                fat::first_free_slot(&state.root_sectors, state.bpb.root_entry_count)
            };
            let slot = first_slot?;
            let cluster = {
                let state = rt.fat.as_mut().ok_or(VmError::Failure)?;
                let c = fat::first_free_cluster(&state.fat_table)?;
                state.fat_table[c as usize] = fat::END_OF_CHAIN_MARK;
                c
            };
            persist_fat_table(rt, thread)?;
            let (date, time) = fat::pack_datetime(&now);
            let new_entry = DirEntryRecord {
                index: slot,
                short_name,
                attributes: FatAttributes::ARCHIVE,
                create_time_tenth: now.hundredths,
                create_time: time,
                create_date: date,
                last_access_date: date,
                write_time: time,
                write_date: date,
                first_cluster: cluster as u16,
                size: 0,
            };
            {
                let state = rt.fat.as_mut().ok_or(VmError::Failure)?;
                state.entries.push(new_entry.clone());
            }
            persist_entry(rt, thread, &new_entry)?;
            new_entry
        }
    };

    let (cluster, position) = if flags.contains(OpenFlags::APPEND) && entry.first_cluster != 0 {
        let bpb = rt.fat.as_ref().ok_or(VmError::Failure)?.bpb;
        let cluster_bytes = bpb.cluster_bytes() as u32;
        let steps = entry.size / cluster_bytes;
        let tail_cluster = {
            let state = rt.fat.as_ref().ok_or(VmError::Failure)?;
            fat::walk_chain(&state.fat_table, entry.first_cluster as u32, steps)?
        };
        (tail_cluster, entry.size % cluster_bytes)
    } else {
        (entry.first_cluster as u32, 0)
    };

    let absolute = if cluster == entry.first_cluster as u32 && position == 0 {
        0
    } else {
        entry.size
    };

    let handle = FileHandle {
        entry_index: entry.index,
        flags,
        first_cluster: entry.first_cluster as u32,
        cluster,
        position,
        absolute,
        size: entry.size,
    };
    Ok(alloc_slot(rt, OpenFile::File(handle)))
}

pub fn close<M: Machine>(rt: &mut Runtime<M>, thread: ThreadId, fd: i32, now: DateTime) -> VmResult<()> {
    let idx = slot_index(fd)?;
    let handle = match rt.open_files.get_mut(idx).and_then(|f| f.take()) {
        Some(OpenFile::File(h)) => h,
        Some(OpenFile::Dir(_)) => return Err(VmError::InvalidParameter),
        None => return Err(VmError::InvalidId),
    };

    let entry = {
        let state = rt.fat.as_ref().ok_or(VmError::Failure)?;
        state.entries.iter().find(|e| e.index == handle.entry_index).cloned()
    };
    if let Some(mut entry) = entry {
        entry.size = handle.size;
        entry.first_cluster = handle.first_cluster as u16;
        let (date, time) = fat::pack_datetime(&now);
        entry.write_date = date;
        entry.write_time = time;
        if let Some(state) = rt.fat.as_mut() {
            if let Some(slot) = state.entries.iter_mut().find(|e| e.index == handle.entry_index) {
                *slot = entry.clone();
            }
        }
        persist_entry(rt, thread, &entry)?;
    }
    Ok(())
}

/// Ensures the handle has a first cluster allocated, allocating and
/// persisting one (plus the updated FAT table) if it doesn't yet.
fn ensure_cluster<M: Machine>(rt: &mut Runtime<M>, thread: ThreadId, handle: &mut FileHandle) -> VmResult<()> {
    if handle.cluster != 0 {
        return Ok(());
    }
    let cluster = {
        let state = rt.fat.as_mut().ok_or(VmError::Failure)?;
        let c = fat::first_free_cluster(&state.fat_table)?;
        state.fat_table[c as usize] = fat::END_OF_CHAIN_MARK;
        c
    };
    persist_fat_table(rt, thread)?;
    handle.cluster = cluster;
    handle.first_cluster = cluster;
    Ok(())
}

pub fn read<M: Machine>(rt: &mut Runtime<M>, thread: ThreadId, fd: i32, len: usize) -> VmResult<Vec<u8>> {
    let idx = slot_index(fd)?;
    let mut handle = match rt.open_files.get(idx) {
        Some(Some(OpenFile::File(h))) => h.clone(),
        Some(Some(OpenFile::Dir(_))) => return Err(VmError::InvalidParameter),
        _ => return Err(VmError::InvalidId),
    };

    if handle.cluster == 0 {
        return Ok(Vec::new());
    }

    let bpb = rt.fat.as_ref().ok_or(VmError::Failure)?.bpb;
    let cluster_bytes = bpb.cluster_bytes() as u32;
    if handle.position >= cluster_bytes {
        return Err(VmError::Failure);
    }
    let available = (handle.size.saturating_sub(handle.absolute)).min(cluster_bytes - handle.position);
    let want = (len as u32).min(available) as usize;
    if handle.position as usize + want > bpb.cluster_bytes() {
        return Err(VmError::Failure);
    }

    let cluster_data = sector::read_cluster(rt, thread, &bpb, handle.cluster)?;
    let start = handle.position as usize;
    let data = cluster_data[start..start + want].to_vec();
    handle.position += want as u32;
    handle.absolute += want as u32;
    if let Some(Some(OpenFile::File(slot))) = rt.open_files.get_mut(idx) {
        slot.position = handle.position;
        slot.absolute = handle.absolute;
    }
    Ok(data)
}

pub fn write<M: Machine>(rt: &mut Runtime<M>, thread: ThreadId, fd: i32, data: &[u8]) -> VmResult<usize> {
    let idx = slot_index(fd)?;
    let mut handle = match rt.open_files.get(idx) {
        Some(Some(OpenFile::File(h))) => h.clone(),
        Some(Some(OpenFile::Dir(_))) => return Err(VmError::InvalidParameter),
        _ => return Err(VmError::InvalidId),
    };
    if !handle.flags.is_write_allowed() {
        return Err(VmError::InvalidState);
    }

    ensure_cluster(rt, thread, &mut handle)?;
    let bpb = rt.fat.as_ref().ok_or(VmError::Failure)?.bpb;
    let cluster_bytes = bpb.cluster_bytes() as u32;
    if handle.position as usize + data.len() > cluster_bytes as usize {
        return Err(VmError::Failure);
    }

    let mut cluster_data = sector::read_cluster(rt, thread, &bpb, handle.cluster)?;
    let start = handle.position as usize;
    cluster_data[start..start + data.len()].copy_from_slice(data);
    sector::write_cluster(rt, thread, &bpb, handle.cluster, &cluster_data)?;

    handle.position += data.len() as u32;
    handle.absolute += data.len() as u32;
    handle.size = handle.size.max(handle.absolute);
    if let Some(Some(OpenFile::File(slot))) = rt.open_files.get_mut(idx) {
        slot.position = handle.position;
        slot.absolute = handle.absolute;
        slot.size = handle.size;
        slot.cluster = handle.cluster;
        slot.first_cluster = handle.first_cluster;
    }
    Ok(data.len())
}

/// Repositions a file's current cluster and in-cluster offset to an
/// absolute byte target, walking the FAT chain from the file's first
/// cluster as needed. Unlike `read`/`write`, which only ever touch the
/// cluster a handle is already parked on, `seek` has to cross cluster
/// boundaries to land anywhere in a multi-cluster file.
pub fn seek<M: Machine>(rt: &mut Runtime<M>, fd: i32, offset: i32, whence: SeekWhence) -> VmResult<i32> {
    let idx = slot_index(fd)?;
    let (first_cluster, absolute, size) = match rt.open_files.get(idx) {
        Some(Some(OpenFile::File(h))) => (h.first_cluster, h.absolute, h.size),
        Some(Some(OpenFile::Dir(_))) => return Err(VmError::InvalidParameter),
        _ => return Err(VmError::InvalidId),
    };
    let base: i64 = match whence {
        SeekWhence::Set => 0,
        SeekWhence::Current => absolute as i64,
        SeekWhence::End => size as i64,
    };
    let target = base + offset as i64;
    if target < 0 {
        return Err(VmError::InvalidParameter);
    }

    let bpb = rt.fat.as_ref().ok_or(VmError::Failure)?.bpb;
    let cluster_bytes = bpb.cluster_bytes() as u32;
    let target = target as u32;
    let steps = target / cluster_bytes;
    let remainder = target % cluster_bytes;

    let cluster = if first_cluster == 0 {
        if target != 0 {
            return Err(VmError::Failure);
        }
        0
    } else {
        let state = rt.fat.as_ref().ok_or(VmError::Failure)?;
        fat::walk_chain(&state.fat_table, first_cluster, steps)?
    };

    if let Some(Some(OpenFile::File(slot))) = rt.open_files.get_mut(idx) {
        slot.cluster = cluster;
        slot.position = remainder;
        slot.absolute = target;
    }
    Ok(target as i32)
}

// -- Directory pseudo-descriptor --------------------------------------

pub fn dir_open<M: Machine>(rt: &mut Runtime<M>, path: &str) -> VmResult<i32> {
    if path != "/" {
        return Err(VmError::InvalidParameter);
    }
    Ok(alloc_slot(rt, OpenFile::Dir(DirHandle::default())))
}

pub fn dir_close<M: Machine>(rt: &mut Runtime<M>, fd: i32) -> VmResult<()> {
    let idx = slot_index(fd)?;
    match rt.open_files.get_mut(idx).and_then(|f| f.take()) {
        Some(OpenFile::Dir(_)) => Ok(()),
        Some(other) => {
            rt.open_files[idx] = Some(other);
            Err(VmError::InvalidParameter)
        }
        None => Err(VmError::InvalidId),
    }
}

pub fn dir_rewind<M: Machine>(rt: &mut Runtime<M>, fd: i32) -> VmResult<()> {
    let idx = slot_index(fd)?;
    match rt.open_files.get_mut(idx) {
        Some(Some(OpenFile::Dir(h))) => {
            h.read_index = 0;
            Ok(())
        }
        Some(Some(OpenFile::File(_))) => Err(VmError::InvalidParameter),
        _ => Err(VmError::InvalidId),
    }
}

/// Returns the next root directory entry, or `None` once exhausted.
pub fn dir_read<M: Machine>(rt: &mut Runtime<M>, fd: i32) -> VmResult<Option<DirEntryRecord>> {
    let idx = slot_index(fd)?;
    let read_index = match rt.open_files.get(idx) {
        Some(Some(OpenFile::Dir(h))) => h.read_index,
        Some(Some(OpenFile::File(_))) => return Err(VmError::InvalidParameter),
        _ => return Err(VmError::InvalidId),
    };
    let entries = &rt.fat.as_ref().ok_or(VmError::Failure)?.entries;
    let result = entries.get(read_index).cloned();
    if result.is_some() {
        if let Some(Some(OpenFile::Dir(h))) = rt.open_files.get_mut(idx) {
            h.read_index += 1;
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::machine::sim::SimMachine;
    use byteorder::{ByteOrder, LittleEndian};

    fn fresh_image() -> Vec<u8> {
        let mut sector = vec![0u8; 512];
        LittleEndian::write_u16(&mut sector[11..13], 512);
        sector[13] = 1;
        LittleEndian::write_u16(&mut sector[14..16], 1);
        sector[16] = 1;
        LittleEndian::write_u16(&mut sector[17..19], 16);
        LittleEndian::write_u16(&mut sector[19..21], 100);
        LittleEndian::write_u16(&mut sector[22..24], 1);
        let mut image = sector;
        image.resize(512 * 20, 0);
        image
    }

    fn boot() -> Runtime<SimMachine> {
        let config = RuntimeConfig {
            image_path: "disk.img".into(),
            tick_ms: 10,
            shared_memory_sections: 4,
        };
        Runtime::start(config, SimMachine::new(fresh_image())).unwrap()
    }

    fn stamp() -> DateTime {
        DateTime {
            day: 1,
            month: 1,
            year: 2024,
            hour: 0,
            minute: 0,
            second: 0,
            hundredths: 0,
        }
    }

    #[test]
    fn create_then_reopen_finds_the_same_entry() {
        let mut rt = boot();
        let thread = rt.current_thread().unwrap();
        let fd = open(&mut rt, thread, "hello.txt", OpenFlags::RDWR | OpenFlags::CREAT, stamp()).unwrap();
        close(&mut rt, thread, fd, stamp()).unwrap();

        let fd2 = open(&mut rt, thread, "HELLO.TXT", OpenFlags::RDWR, stamp()).unwrap();
        assert!(fd2 >= FIRST_FAT_FILENO);
    }

    #[test]
    fn write_then_read_back_within_one_cluster() {
        let mut rt = boot();
        let thread = rt.current_thread().unwrap();
        let fd = open(&mut rt, thread, "a.bin", OpenFlags::RDWR | OpenFlags::CREAT, stamp()).unwrap();
        write(&mut rt, thread, fd, b"hello world").unwrap();
        seek(&mut rt, fd, 0, SeekWhence::Set).unwrap();
        let data = read(&mut rt, thread, fd, 64).unwrap();
        assert_eq!(data, b"hello world");
    }

    #[test]
    fn append_continues_from_current_size() {
        let mut rt = boot();
        let thread = rt.current_thread().unwrap();
        let fd = open(&mut rt, thread, "a.bin", OpenFlags::RDWR | OpenFlags::CREAT, stamp()).unwrap();
        write(&mut rt, thread, fd, b"abc").unwrap();
        close(&mut rt, thread, fd, stamp()).unwrap();

        let fd2 = open(&mut rt, thread, "a.bin", OpenFlags::RDWR | OpenFlags::APPEND, stamp()).unwrap();
        let pos = seek(&mut rt, fd2, 0, SeekWhence::Current).unwrap();
        assert_eq!(pos, 3);
        write(&mut rt, thread, fd2, b"def").unwrap();
        seek(&mut rt, fd2, 0, SeekWhence::Set).unwrap();
        let data = read(&mut rt, thread, fd2, 16).unwrap();
        assert_eq!(data, b"abcdef");
    }

    /// A freshly `CREAT`ed-and-closed file, never written to, must still
    /// come away with a real first cluster reserved and marked
    /// end-of-chain in the FAT table -- not `firstCluster = 0` deferred to
    /// whenever a write eventually happens.
    #[test]
    fn creat_eagerly_reserves_a_first_cluster_even_without_a_write() {
        let mut rt = boot();
        let thread = rt.current_thread().unwrap();
        let fd = open(&mut rt, thread, "empty.bin", OpenFlags::RDWR | OpenFlags::CREAT, stamp()).unwrap();
        close(&mut rt, thread, fd, stamp()).unwrap();

        let state = rt.fat.as_ref().unwrap();
        let entry = state.entries.iter().find(|e| e.short_name == fat::normalize_short_name("empty.bin").unwrap()).unwrap();
        assert_ne!(entry.first_cluster, 0);
        assert_eq!(state.fat_table[entry.first_cluster as usize], fat::END_OF_CHAIN_MARK);

        let start = entry.index * 32;
        let on_disk = fat::decode_dir_entry(&state.root_sectors[start..start + 32], entry.index);
        assert_eq!(on_disk.first_cluster, entry.first_cluster);
    }

    #[test]
    fn directory_enumerates_created_files() {
        let mut rt = boot();
        let thread = rt.current_thread().unwrap();
        let fd = open(&mut rt, thread, "one.txt", OpenFlags::RDWR | OpenFlags::CREAT, stamp()).unwrap();
        close(&mut rt, thread, fd, stamp()).unwrap();
        let fd = open(&mut rt, thread, "two.txt", OpenFlags::RDWR | OpenFlags::CREAT, stamp()).unwrap();
        close(&mut rt, thread, fd, stamp()).unwrap();

        let dirfd = dir_open(&mut rt, "/").unwrap();
        let mut names = Vec::new();
        while let Some(entry) = dir_read(&mut rt, dirfd).unwrap() {
            names.push(entry.short_name);
        }
        assert_eq!(names.len(), 2);
        dir_close(&mut rt, dirfd).unwrap();
    }

    #[test]
    fn reopen_updates_last_access_date_and_persists_it() {
        let mut rt = boot();
        let thread = rt.current_thread().unwrap();
        let fd = open(&mut rt, thread, "hello.txt", OpenFlags::RDWR | OpenFlags::CREAT, stamp()).unwrap();
        close(&mut rt, thread, fd, stamp()).unwrap();

        let later = DateTime {
            day: 2,
            month: 1,
            year: 2024,
            hour: 0,
            minute: 0,
            second: 0,
            hundredths: 0,
        };
        let fd2 = open(&mut rt, thread, "HELLO.TXT", OpenFlags::RDONLY, later).unwrap();
        let idx = slot_index(fd2).unwrap();
        let entry_index = match rt.open_files[idx].as_ref().unwrap() {
            OpenFile::File(h) => h.entry_index,
            OpenFile::Dir(_) => panic!("expected a file handle"),
        };
        let (expected_date, _) = fat::pack_datetime(&later);
        let state = rt.fat.as_ref().unwrap();
        let entry = state.entries.iter().find(|e| e.index == entry_index).unwrap();
        assert_eq!(entry.last_access_date, expected_date);
        let start = entry.index * 32;
        let on_disk = fat::decode_dir_entry(&state.root_sectors[start..start + 32], entry.index);
        assert_eq!(on_disk.last_access_date, expected_date);
    }

    /// `Seek` on a multi-cluster file must walk the FAT chain to land on
    /// the right cluster, not just wrap the in-cluster offset -- this is
    /// the same 600-byte/512-byte-cluster file as the append-reopen test
    /// above, but reached by seeking directly rather than via `APPEND`.
    #[test]
    fn seek_past_a_cluster_boundary_walks_the_chain() {
        let mut rt = boot();
        let thread = rt.current_thread().unwrap();

        {
            let state = rt.fat.as_mut().unwrap();
            while state.fat_table.len() <= 3 {
                state.fat_table.push(0);
            }
            state.fat_table[2] = 3;
            state.fat_table[3] = fat::END_OF_CHAIN_MARK;

            let (date, time) = fat::pack_datetime(&stamp());
            let entry = DirEntryRecord {
                index: 0,
                short_name: *b"BIG     BIN",
                attributes: FatAttributes::ARCHIVE,
                create_time_tenth: 0,
                create_time: time,
                create_date: date,
                last_access_date: date,
                write_time: time,
                write_date: date,
                first_cluster: 2,
                size: 600,
            };
            state.entries.push(entry);
        }

        let fd = open(&mut rt, thread, "big.bin", OpenFlags::RDONLY, stamp()).unwrap();
        let idx = slot_index(fd).unwrap();
        match rt.open_files[idx].as_ref().unwrap() {
            OpenFile::File(handle) => assert_eq!(handle.absolute, 0),
            OpenFile::Dir(_) => panic!("expected a file handle"),
        }

        let pos = seek(&mut rt, fd, 550, SeekWhence::Set).unwrap();
        assert_eq!(pos, 550);
        match rt.open_files[idx].as_ref().unwrap() {
            OpenFile::File(handle) => {
                assert_eq!(handle.cluster, 3);
                assert_eq!(handle.position, 38);
                assert_eq!(handle.absolute, 550);
            }
            OpenFile::Dir(_) => panic!("expected a file handle"),
        }

        // One step past the chain's single link fails instead of wrapping.
        assert_eq!(
            seek(&mut rt, fd, 1200, SeekWhence::Set).unwrap_err(),
            VmError::Failure
        );
    }

    /// Closing a handle parked on a later cluster (via `seek`) must not
    /// clobber the entry's first cluster with whatever cluster the handle
    /// happens to be sitting on -- that would sever the chain's head.
    #[test]
    fn close_preserves_first_cluster_after_seeking_into_a_later_one() {
        let mut rt = boot();
        let thread = rt.current_thread().unwrap();

        {
            let state = rt.fat.as_mut().unwrap();
            while state.fat_table.len() <= 3 {
                state.fat_table.push(0);
            }
            state.fat_table[2] = 3;
            state.fat_table[3] = fat::END_OF_CHAIN_MARK;

            let (date, time) = fat::pack_datetime(&stamp());
            let entry = DirEntryRecord {
                index: 0,
                short_name: *b"BIG     BIN",
                attributes: FatAttributes::ARCHIVE,
                create_time_tenth: 0,
                create_time: time,
                create_date: date,
                last_access_date: date,
                write_time: time,
                write_date: date,
                first_cluster: 2,
                size: 600,
            };
            state.entries.push(entry);
        }

        let fd = open(&mut rt, thread, "big.bin", OpenFlags::RDWR, stamp()).unwrap();
        seek(&mut rt, fd, 550, SeekWhence::Set).unwrap();
        close(&mut rt, thread, fd, stamp()).unwrap();

        let state = rt.fat.as_ref().unwrap();
        let entry = state.entries.iter().find(|e| e.index == 0).unwrap();
        assert_eq!(entry.first_cluster, 2);
    }

    #[test]
    fn directory_open_rejects_non_root_paths() {
        let mut rt = boot();
        assert_eq!(dir_open(&mut rt, "/sub").unwrap_err(), VmError::InvalidParameter);
    }

    /// A 600-byte file on a 512-byte-cluster volume spans two clusters;
    /// opening it with `APPEND` must walk the chain to the second cluster
    /// and land `currentOffset` at 600 mod 512 = 88, not merely set the
    /// offset to the raw size in the first cluster.
    #[test]
    fn append_on_a_multi_cluster_file_walks_the_chain_to_the_tail() {
        let mut rt = boot();
        let thread = rt.current_thread().unwrap();

        {
            let state = rt.fat.as_mut().unwrap();
            // cluster 2 -> cluster 3 -> end of chain.
            while state.fat_table.len() <= 3 {
                state.fat_table.push(0);
            }
            state.fat_table[2] = 3;
            state.fat_table[3] = fat::END_OF_CHAIN_MARK;

            let (date, time) = fat::pack_datetime(&stamp());
            let entry = DirEntryRecord {
                index: 0,
                short_name: *b"BIG     BIN",
                attributes: FatAttributes::ARCHIVE,
                create_time_tenth: 0,
                create_time: time,
                create_date: date,
                last_access_date: date,
                write_time: time,
                write_date: date,
                first_cluster: 2,
                size: 600,
            };
            state.entries.push(entry);
        }

        let fd = open(&mut rt, thread, "big.bin", OpenFlags::RDWR | OpenFlags::APPEND, stamp()).unwrap();
        let idx = slot_index(fd).unwrap();
        match rt.open_files[idx].as_ref().unwrap() {
            OpenFile::File(handle) => {
                assert_eq!(handle.cluster, 3);
                assert_eq!(handle.position, 88);
            }
            OpenFile::Dir(_) => panic!("expected a file handle"),
        }
    }
}
