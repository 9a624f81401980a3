//! FAT16 codec: BPB parsing, the FAT cluster-chain table, and root
//! directory entry encode/decode.

use byteorder::{ByteOrder, LittleEndian};

use abi::{DateTime, FatAttributes, SECTOR_SIZE};

use crate::err::{VmError, VmResult};

/// First FAT entry value meaning "end of chain." A fresh chain always
/// writes exactly `0xFFFF`; reads treat the whole `0xFFF8..=0xFFFF` range
/// as end-of-chain, per the Microsoft FAT spec.
pub const END_OF_CHAIN_MIN: u16 = 0xFFF8;
pub const END_OF_CHAIN_MARK: u16 = 0xFFFF;

/// Attribute byte that marks a long-filename entry; these are skipped
/// entirely (out of scope).
const LONG_NAME_ATTR: u8 = 0x0F;

/// Parsed BIOS Parameter Block plus the constants derived from it.
#[derive(Clone, Copy, Debug)]
pub struct Bpb {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sector_count: u16,
    pub num_fats: u8,
    pub root_entry_count: u16,
    pub fat_size_sectors: u32,
    pub total_sectors: u32,
}

impl Bpb {
    /// Parses sector 0. Rejects any image whose sector size isn't 512
    /// rather than silently miscomputing geometry on a malformed image --
    /// sector size is a hard invariant, so it's enforced at the boundary
    /// instead of letting garbage propagate.
    pub fn parse(sector: &[u8]) -> VmResult<Self> {
        if sector.len() < SECTOR_SIZE {
            return Err(VmError::Failure);
        }
        let bytes_per_sector = LittleEndian::read_u16(&sector[11..13]);
        if bytes_per_sector as usize != SECTOR_SIZE {
            return Err(VmError::Failure);
        }
        let sectors_per_cluster = sector[13];
        let reserved_sector_count = LittleEndian::read_u16(&sector[14..16]);
        let num_fats = sector[16];
        let root_entry_count = LittleEndian::read_u16(&sector[17..19]);
        let total_sectors_16 = LittleEndian::read_u16(&sector[19..21]);
        let fat_size_16 = LittleEndian::read_u16(&sector[22..24]);
        let total_sectors_32 = LittleEndian::read_u32(&sector[32..36]);

        if sectors_per_cluster == 0 || num_fats == 0 || fat_size_16 == 0 {
            return Err(VmError::Failure);
        }

        let total_sectors = if total_sectors_16 != 0 {
            total_sectors_16 as u32
        } else {
            total_sectors_32
        };

        Ok(Bpb {
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sector_count,
            num_fats,
            root_entry_count,
            fat_size_sectors: fat_size_16 as u32,
            total_sectors,
        })
    }

    pub fn first_root_sector(&self) -> u32 {
        self.reserved_sector_count as u32 + self.num_fats as u32 * self.fat_size_sectors
    }

    pub fn root_dir_sector_count(&self) -> u32 {
        let bytes = self.root_entry_count as u32 * 32;
        (bytes + SECTOR_SIZE as u32 - 1) / SECTOR_SIZE as u32
    }

    pub fn first_data_sector(&self) -> u32 {
        self.first_root_sector() + self.root_dir_sector_count()
    }

    pub fn cluster_bytes(&self) -> usize {
        self.sectors_per_cluster as usize * SECTOR_SIZE
    }

    pub fn cluster_count(&self) -> u32 {
        (self.total_sectors.saturating_sub(self.first_data_sector())) / self.sectors_per_cluster as u32
    }

    /// First sector of data cluster `cluster` (numbered from 2).
    pub fn sector_of_cluster(&self, cluster: u32) -> u32 {
        self.first_data_sector() + (cluster - 2) * self.sectors_per_cluster as u32
    }
}

/// A decoded root directory entry, with the on-disk slot index retained so
/// updates can be written back in place.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DirEntryRecord {
    pub index: usize,
    pub short_name: [u8; 11],
    pub attributes: FatAttributes,
    pub create_time_tenth: u8,
    pub create_time: u16,
    pub create_date: u16,
    pub last_access_date: u16,
    pub write_time: u16,
    pub write_date: u16,
    pub first_cluster: u16,
    pub size: u32,
}

pub fn decode_dir_entry(bytes: &[u8], index: usize) -> DirEntryRecord {
    let mut short_name = [0u8; 11];
    short_name.copy_from_slice(&bytes[0..11]);
    DirEntryRecord {
        index,
        short_name,
        attributes: FatAttributes::from_bits_truncate(bytes[11]),
        create_time_tenth: bytes[13],
        create_time: LittleEndian::read_u16(&bytes[14..16]),
        create_date: LittleEndian::read_u16(&bytes[16..18]),
        last_access_date: LittleEndian::read_u16(&bytes[18..20]),
        write_time: LittleEndian::read_u16(&bytes[22..24]),
        write_date: LittleEndian::read_u16(&bytes[24..26]),
        first_cluster: LittleEndian::read_u16(&bytes[26..28]),
        size: LittleEndian::read_u32(&bytes[28..32]),
    }
}

pub fn encode_dir_entry(entry: &DirEntryRecord, out: &mut [u8]) {
    out[0..11].copy_from_slice(&entry.short_name);
    out[11] = entry.attributes.bits();
    out[12] = 0; // NTRes, always zero
    out[13] = entry.create_time_tenth;
    LittleEndian::write_u16(&mut out[14..16], entry.create_time);
    LittleEndian::write_u16(&mut out[16..18], entry.create_date);
    LittleEndian::write_u16(&mut out[18..20], entry.last_access_date);
    LittleEndian::write_u16(&mut out[20..22], 0); // FstClusHI, always zero on FAT16
    LittleEndian::write_u16(&mut out[22..24], entry.write_time);
    LittleEndian::write_u16(&mut out[24..26], entry.write_date);
    LittleEndian::write_u16(&mut out[26..28], entry.first_cluster);
    LittleEndian::write_u32(&mut out[28..32], entry.size);
}

/// Walks the root directory region in 32-byte strides: a first byte of
/// `0x00` terminates the scan, long-filename entries are skipped, and
/// everything else is decoded and kept.
pub fn parse_root_directory(bytes: &[u8], root_entry_count: u16) -> Vec<DirEntryRecord> {
    let mut entries = Vec::new();
    for index in 0..root_entry_count as usize {
        let start = index * 32;
        if start + 32 > bytes.len() {
            break;
        }
        let slot = &bytes[start..start + 32];
        if slot[0] == 0x00 {
            break;
        }
        if slot[11] == LONG_NAME_ATTR {
            continue;
        }
        entries.push(decode_dir_entry(slot, index));
    }
    entries
}

/// First root slot whose first name byte is `0x00`.
pub fn first_free_slot(root_bytes: &[u8], root_entry_count: u16) -> VmResult<usize> {
    for index in 0..root_entry_count as usize {
        let start = index * 32;
        if start >= root_bytes.len() {
            break;
        }
        if root_bytes[start] == 0x00 {
            return Ok(index);
        }
    }
    Err(VmError::Failure)
}

pub fn parse_fat_table(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(LittleEndian::read_u16)
        .collect()
}

pub fn encode_fat_table(table: &[u16], out: &mut [u8]) {
    for (chunk, &entry) in out.chunks_exact_mut(2).zip(table.iter()) {
        LittleEndian::write_u16(chunk, entry);
    }
}

/// First FAT entry equal to 0 (free), searching from cluster 2 onward
/// since 0 and 1 are reserved.
pub fn first_free_cluster(table: &[u16]) -> VmResult<u32> {
    table
        .iter()
        .enumerate()
        .skip(2)
        .find(|&(_, &v)| v == 0)
        .map(|(i, _)| i as u32)
        .ok_or(VmError::Failure)
}

pub fn is_end_of_chain(entry: u16) -> bool {
    entry >= END_OF_CHAIN_MIN
}

/// One step of walking a cluster chain.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ChainStep {
    Next(u32),
    End,
    /// The chain pointed at a free (`0`) entry, which never happens for a
    /// well-formed file; surfaced rather than panicking.
    Broken,
}

pub fn chain_step(table: &[u16], cluster: u32) -> ChainStep {
    match table.get(cluster as usize) {
        Some(&entry) if is_end_of_chain(entry) => ChainStep::End,
        Some(&0) => ChainStep::Broken,
        Some(&entry) => ChainStep::Next(entry as u32),
        None => ChainStep::Broken,
    }
}

/// Walks `steps` links forward from `start`, for `Open`'s `APPEND`
/// positioning: `currentCluster` is the cluster reached by walking the FAT
/// chain by `size / clusterBytes` steps from the first cluster. Fails if
/// the chain ends (or breaks) before `steps` links are walked -- that would
/// mean the entry's recorded size disagrees with its on-disk chain length.
pub fn walk_chain(table: &[u16], start: u32, steps: u32) -> VmResult<u32> {
    let mut cluster = start;
    for _ in 0..steps {
        match chain_step(table, cluster) {
            ChainStep::Next(next) => cluster = next,
            ChainStep::End | ChainStep::Broken => return Err(VmError::Failure),
        }
    }
    Ok(cluster)
}

/// Normalizes a guest-supplied filename into an 8.3 short name: exactly
/// one dot allowed and never at position 0, name and extension
/// upper-cased and space-padded, total length at most 12 characters
/// (8 + '.' + 3).
pub fn normalize_short_name(name: &str) -> VmResult<[u8; 11]> {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > 12 || !bytes.is_ascii() {
        return Err(VmError::InvalidParameter);
    }
    if bytes[0] == b'.' {
        return Err(VmError::InvalidParameter);
    }

    let dot = bytes.iter().position(|&b| b == b'.');
    if let Some(d) = dot {
        if d > 8 || bytes[d + 1..].contains(&b'.') {
            return Err(VmError::InvalidParameter);
        }
    }

    let mut out = [b' '; 11];
    match dot {
        Some(d) => {
            for (i, &b) in bytes[..d].iter().enumerate().take(8) {
                out[i] = b.to_ascii_uppercase();
            }
            let ext = &bytes[d + 1..];
            for (i, &b) in ext.iter().enumerate().take(3) {
                out[8 + i] = b.to_ascii_uppercase();
            }
        }
        None => {
            for (i, &b) in bytes.iter().enumerate().take(8) {
                out[i] = b.to_ascii_uppercase();
            }
        }
    }
    Ok(out)
}

/// Converts an ABI `DateTime` into the packed `(date, time)` pair stored
/// in a directory entry's write/create fields.
pub fn pack_datetime(dt: &DateTime) -> (u16, u16) {
    (abi::encode_fat_date(dt), abi::encode_fat_time(dt))
}

/// All state built at mount time: BPB, FAT table, and the root directory
/// region (raw bytes, kept around so an entry update can be spliced back
/// in before rewriting the affected sector).
pub struct FatState {
    pub bpb: Bpb,
    pub fat_table: Vec<u16>,
    pub root_sectors: Vec<u8>,
    pub entries: Vec<DirEntryRecord>,
}

impl FatState {
    pub fn find_entry(&self, short_name: &[u8; 11]) -> Option<&DirEntryRecord> {
        self.entries.iter().find(|e| &e.short_name == short_name)
    }

    pub fn find_entry_mut(&mut self, short_name: &[u8; 11]) -> Option<&mut DirEntryRecord> {
        self.entries.iter_mut().find(|e| &e.short_name == short_name)
    }

    pub fn is_directory(entry: &DirEntryRecord) -> bool {
        entry.attributes.contains(FatAttributes::DIRECTORY)
    }

    /// Splices `entry`'s current state back into the in-memory root byte
    /// buffer. The caller is responsible for rewriting the affected
    /// on-disk sector afterward.
    pub fn write_entry_bytes(&mut self, entry: &DirEntryRecord) {
        let start = entry.index * 32;
        encode_dir_entry(entry, &mut self.root_sectors[start..start + 32]);
    }

    /// Which root-region sector (0-based, relative to `first_root_sector`)
    /// holds a given entry index.
    pub fn sector_of_entry(&self, entry_index: usize) -> u32 {
        (entry_index * 32 / SECTOR_SIZE) as u32
    }
}
