//! Raw sector- and cluster-level I/O against the mounted image: seek then
//! transfer, as one compound operation. There is no separate lock object
//! here -- the hosted runtime is single-threaded by construction, so the
//! seek/transfer pair can never be interleaved with another caller's.
//!
//! Every sector's worth of data crosses the machine boundary by way of a
//! shared-memory section: one 512-byte section per sector, since a section
//! and a sector happen to be the same size here.

use abi::SeekWhence;
use abi::{ThreadId, SECTOR_SIZE};

use crate::err::{VmError, VmResult};
use crate::fat::Bpb;
use crate::machine::{IoResult, Machine};
use crate::runtime::Runtime;

fn image_fd<M: Machine>(rt: &Runtime<M>) -> VmResult<i32> {
    rt.image_fd.ok_or(VmError::Failure)
}

pub fn read_sector<M: Machine>(rt: &mut Runtime<M>, thread: ThreadId, sector: u32) -> VmResult<Vec<u8>> {
    read_sectors(rt, thread, sector, 1)
}

pub fn read_sectors<M: Machine>(
    rt: &mut Runtime<M>,
    thread: ThreadId,
    first_sector: u32,
    count: u32,
) -> VmResult<Vec<u8>> {
    let fd = image_fd(rt)?;
    let offset = first_sector as i64 * SECTOR_SIZE as i64;
    if offset > i32::MAX as i64 {
        return Err(VmError::InvalidParameter);
    }
    match rt.issue_seek(thread, fd, offset as i32, SeekWhence::Set) {
        IoResult::Sought(_) => {}
        _ => return Err(VmError::Failure),
    }
    let mut out = Vec::with_capacity(count as usize * SECTOR_SIZE);
    for _ in 0..count {
        let section = rt.acquire_section(thread);
        let result = rt.issue_read(thread, fd, SECTOR_SIZE);
        let outcome = match result {
            IoResult::Read(data) if data.len() == SECTOR_SIZE => {
                rt.pool.section_mut(section).copy_from_slice(&data);
                rt.pool.set_bytes_used(section, SECTOR_SIZE);
                out.extend_from_slice(rt.pool.section(section));
                Ok(())
            }
            _ => Err(VmError::Failure),
        };
        rt.release_section(section);
        outcome?;
    }
    Ok(out)
}

pub fn write_sector<M: Machine>(rt: &mut Runtime<M>, thread: ThreadId, sector: u32, data: &[u8]) -> VmResult<()> {
    write_sectors(rt, thread, sector, data)
}

pub fn write_sectors<M: Machine>(
    rt: &mut Runtime<M>,
    thread: ThreadId,
    first_sector: u32,
    data: &[u8],
) -> VmResult<()> {
    if data.len() % SECTOR_SIZE != 0 {
        return Err(VmError::InvalidParameter);
    }
    let fd = image_fd(rt)?;
    let offset = first_sector as i64 * SECTOR_SIZE as i64;
    if offset > i32::MAX as i64 {
        return Err(VmError::InvalidParameter);
    }
    match rt.issue_seek(thread, fd, offset as i32, SeekWhence::Set) {
        IoResult::Sought(_) => {}
        _ => return Err(VmError::Failure),
    }
    for chunk in data.chunks(SECTOR_SIZE) {
        let section = rt.acquire_section(thread);
        rt.pool.section_mut(section)[..chunk.len()].copy_from_slice(chunk);
        rt.pool.set_bytes_used(section, chunk.len());
        let to_write = rt.pool.section(section)[..chunk.len()].to_vec();
        let result = rt.issue_write(thread, fd, to_write);
        rt.release_section(section);
        match result {
            IoResult::Wrote(n) if n == chunk.len() => {}
            _ => return Err(VmError::Failure),
        }
    }
    Ok(())
}

/// Reads the single cluster `cluster` in full. Cluster numbers 0 and 1 are
/// reserved and always rejected.
pub fn read_cluster<M: Machine>(rt: &mut Runtime<M>, thread: ThreadId, bpb: &Bpb, cluster: u32) -> VmResult<Vec<u8>> {
    if cluster < 2 {
        return Err(VmError::InvalidParameter);
    }
    let first = bpb.sector_of_cluster(cluster);
    read_sectors(rt, thread, first, bpb.sectors_per_cluster as u32)
}

pub fn write_cluster<M: Machine>(
    rt: &mut Runtime<M>,
    thread: ThreadId,
    bpb: &Bpb,
    cluster: u32,
    data: &[u8],
) -> VmResult<()> {
    if cluster < 2 {
        return Err(VmError::InvalidParameter);
    }
    if data.len() != bpb.cluster_bytes() {
        return Err(VmError::InvalidParameter);
    }
    let first = bpb.sector_of_cluster(cluster);
    write_sectors(rt, thread, first, data)
}
