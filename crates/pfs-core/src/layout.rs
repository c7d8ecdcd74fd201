//! Layout & mapping (C3): round-robin striping placement and the mapping
//! from client-facing writes to the server-side writes that realize them.

use crate::call::{CallArena, CallId, CallKind};
use crate::error::MappingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slice {
    pub server_index: usize,
    pub local_offset: u64,
    pub local_length: u64,
}

/// Computes the per-storage-server slices of a client write region under
/// round-robin striping. With `padding > 0`, the region is first aligned
/// out to `padding` boundaries (used when the file system aggregates
/// writes into fixed blocks before striping).
pub fn locate(offset: u64, length: u64, n_storage: usize, stripe: u64, padding: u64) -> Vec<Slice> {
    assert!(n_storage > 0 && stripe > 0);

    let (mut offset, mut length) = (offset, length);
    if padding > 0 {
        let end = offset + length;
        let aligned_start = (offset / padding) * padding;
        let aligned_end = end.div_ceil(padding) * padding;
        offset = aligned_start;
        length = aligned_end - aligned_start;
    }

    let mut slices = Vec::new();
    let mut remaining = length;
    let mut cursor = offset;
    while remaining > 0 {
        let server_index = ((cursor / stripe) % n_storage as u64) as usize;
        let local_offset = (cursor / (stripe * n_storage as u64)) * stripe + (cursor % stripe);
        let local_length = (stripe - (cursor % stripe)).min(remaining);
        slices.push(Slice { server_index, local_offset, local_length });
        cursor += local_length;
        remaining -= local_length;
    }
    slices
}

/// A client-side Pwrite, its computed slices, and the server-side calls
/// that were matched against them.
#[derive(Debug)]
pub struct MatchedWrite {
    pub client_call: CallId,
    pub server_calls: Vec<CallId>,
}

/// Matches every client Pwrite in a single-file workload against the
/// storage servers' Pwrites under the configured striping, recording which
/// server call realizes which slice.
pub struct OpMapping<'a> {
    arena: &'a CallArena,
    n_storage: usize,
    stripe: u64,
    padding: u64,
    aggregation: bool,
}

impl<'a> OpMapping<'a> {
    pub fn new(arena: &'a CallArena, n_storage: usize, stripe: u64, padding: u64, aggregation: bool) -> Self {
        Self { arena, n_storage, stripe, padding, aggregation }
    }

    /// `server_pwrites[i]` is the ordered, mutable candidate pool of
    /// Pwrite ids on storage server `i`. Matched exact calls are removed
    /// from the pool; aggregation matches are only removed once their
    /// right edge aligns with the slice's right edge.
    pub fn match_writes(
        &self,
        client_writes: &[CallId],
        server_pwrites: &mut [Vec<CallId>],
    ) -> Result<Vec<MatchedWrite>, MappingError> {
        let mut out = Vec::new();
        for &client_call in client_writes {
            let (path, offset, length) = match &self.arena.get(client_call).kind {
                CallKind::Pwrite { path, offset, length, .. } => (path.clone(), *offset, *length),
                _ => continue,
            };
            let slices = locate(offset, length, self.n_storage, self.stripe, self.padding);
            let mut matched = Vec::with_capacity(slices.len());
            for slice in slices {
                let pool = &mut server_pwrites[slice.server_index];
                let found = self.find_match(pool, slice, &path)?;
                matched.push(found);
            }
            out.push(MatchedWrite { client_call, server_calls: matched });
        }
        Ok(out)
    }

    fn find_match(&self, pool: &mut Vec<CallId>, slice: Slice, path: &str) -> Result<CallId, MappingError> {
        // exact match first
        if let Some(pos) = pool.iter().position(|&id| {
            matches!(&self.arena.get(id).kind,
                CallKind::Pwrite { offset, length, .. }
                    if *offset == slice.local_offset && *length == slice.local_length)
        }) {
            return Ok(pool.remove(pos));
        }

        if self.aggregation {
            if let Some(pos) = pool.iter().position(|&id| {
                matches!(&self.arena.get(id).kind,
                    CallKind::Pwrite { offset, length, .. }
                        if *offset <= slice.local_offset
                            && offset + length >= slice.local_offset + slice.local_length)
            }) {
                let id = pool[pos];
                let right_aligned = matches!(&self.arena.get(id).kind,
                    CallKind::Pwrite { offset, length, .. }
                        if offset + length == slice.local_offset + slice.local_length);
                if right_aligned {
                    pool.remove(pos);
                }
                return Ok(id);
            }
        }

        Err(MappingError::NoMatchingCall {
            path: path.to_string(),
            offset: slice.local_offset,
            length: slice.local_length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_server_stripe_crossing_yields_two_slices() {
        let slices = locate(0, 262144, 2, 131072, 0);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0], Slice { server_index: 0, local_offset: 0, local_length: 131072 });
        assert_eq!(slices[1], Slice { server_index: 1, local_offset: 0, local_length: 131072 });
    }

    #[test]
    fn offset_within_first_stripe() {
        let slices = locate(65536, 131072, 2, 131072, 0);
        assert_eq!(slices[0], Slice { server_index: 0, local_offset: 65536, local_length: 65536 });
        assert_eq!(slices[1], Slice { server_index: 1, local_offset: 0, local_length: 65536 });
    }

    #[test]
    fn write_within_single_stripe_yields_one_slice() {
        let slices = locate(10, 20, 2, 131072, 0);
        assert_eq!(slices.len(), 1);
    }
}
