//! HDF5 object-range tagging (C3, optional). Reads a JSON index produced
//! by an external scan tool and builds an interval map from file offset to
//! (group, kind), used by the pruner to drop order-insensitive states.

use std::collections::BTreeMap;
use std::path::Path;

use crate::call::{Call, CallKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjTag {
    pub group: String,
    pub kind: String,
}

/// Reverse mapping from file offset to the object occupying that byte,
/// with gaps filled as `GLOBAL/FREE_SPACE` and a trailing `GLOBAL/END_OF_FILE`.
#[derive(Debug, Default)]
pub struct ObjMapping {
    reverse: BTreeMap<u64, ObjTag>,
}

/// A `[start, end)` byte range as the scanner reports it.
fn parse_range(v: &serde_json::Value) -> Option<(u64, u64)> {
    let arr = v.as_array()?;
    let start = arr.first().and_then(|v| v.as_u64())?;
    let end = arr.get(1).and_then(|v| v.as_u64())?;
    Some((start, end))
}

impl ObjMapping {
    /// `raw` mirrors the external HDF5 scanner's JSON index. Top-level keys
    /// are either a bare `[start, end]` pair (`SUPERBLOCK`, `GLOBAL_HEAP`) or
    /// an object of named sub-ranges (any `*_GROUP`/`*_DATASET` key): most
    /// sub-keys (`OBJ_HEADER`, `LOCAL_HEAP`, `DATA_SEGMENT`) hold a single
    /// pair, `BTREE_NODES`/`SYMBOL_TABLE`/`DATA_CHUNKS` hold a list of them,
    /// and a bare `BASE` sub-key carries no range and is skipped.
    pub fn build(raw: &serde_json::Value, file_size: u64) -> Self {
        let mut entries: Vec<(u64, u64, ObjTag)> = Vec::new();
        if let Some(obj) = raw.as_object() {
            for (key, value) in obj {
                if key == "SUPERBLOCK" || key == "GLOBAL_HEAP" {
                    if let Some((start, end)) = parse_range(value) {
                        entries.push((start, end, ObjTag { group: "GLOBAL".into(), kind: key.clone() }));
                    }
                } else if key.contains("_GROUP") || key.contains("_DATASET") {
                    let Some(sub) = value.as_object() else { continue };
                    for (sub_key, sub_value) in sub {
                        match sub_key.as_str() {
                            "OBJ_HEADER" | "LOCAL_HEAP" | "DATA_SEGMENT" => {
                                if let Some((start, end)) = parse_range(sub_value) {
                                    entries.push((start, end, ObjTag { group: key.clone(), kind: sub_key.clone() }));
                                }
                            }
                            "BTREE_NODES" | "SYMBOL_TABLE" | "DATA_CHUNKS" => {
                                if let Some(arr) = sub_value.as_array() {
                                    for r in arr {
                                        if let Some((start, end)) = parse_range(r) {
                                            entries.push((start, end, ObjTag { group: key.clone(), kind: sub_key.clone() }));
                                        }
                                    }
                                }
                            }
                            _ => {}
                        }
                    }
                }
            }
        }
        entries.sort_by_key(|&(start, _, _)| start);

        let mut reverse = BTreeMap::new();
        let mut cursor = 0u64;
        for (start, end, tag) in entries {
            if start > cursor {
                reverse.insert(cursor, ObjTag { group: "GLOBAL".into(), kind: "FREE_SPACE".into() });
            }
            reverse.insert(start, tag);
            cursor = end.max(cursor);
        }
        reverse.insert(
            file_size.max(cursor),
            ObjTag { group: "GLOBAL".into(), kind: "END_OF_FILE".into() },
        );
        Self { reverse }
    }

    pub fn load(path: &Path, file_size: u64) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let raw: serde_json::Value = serde_json::from_str(&content)?;
        Ok(Self::build(&raw, file_size))
    }

    /// Tags overlapping a write's `[offset, offset+length)` range: the tag
    /// active at `offset` (the greatest boundary key at or before it), plus
    /// any tag that starts strictly inside the range.
    pub fn query(&self, offset: u64, length: u64) -> Vec<&ObjTag> {
        use std::ops::Bound::{Excluded, Unbounded};
        let end = offset + length;
        let mut tags = Vec::new();
        if let Some((_, tag)) = self.reverse.range((Unbounded, std::ops::Bound::Included(offset))).next_back() {
            tags.push(tag);
        }
        tags.extend(self.reverse.range((Excluded(offset), Excluded(end))).map(|(_, tag)| tag));
        tags
    }

    pub fn is_datachunk(&self, call: &Call) -> bool {
        if let CallKind::Pwrite { offset, length, .. } = &call.kind {
            let tags = self.query(*offset, *length);
            tags.len() == 1 && tags[0].kind == "DATA_CHUNKS"
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn gaps_fill_with_free_space() {
        let raw = json!({ "ROOT_GROUP": { "OBJ_HEADER": [100, 150] } });
        let map = ObjMapping::build(&raw, 200);
        assert!(map.reverse.contains_key(&0));
        assert_eq!(map.reverse[&0].kind, "FREE_SPACE");
        assert_eq!(map.reverse[&100].kind, "OBJ_HEADER");
        assert_eq!(map.reverse[&200].kind, "END_OF_FILE");
    }

    #[test]
    fn superblock_and_global_heap_are_bare_ranges() {
        let raw = json!({
            "SUPERBLOCK": [0, 96],
            "GLOBAL_HEAP": [96, 200],
        });
        let map = ObjMapping::build(&raw, 200);
        assert_eq!(map.reverse[&0].kind, "SUPERBLOCK");
        assert_eq!(map.reverse[&0].group, "GLOBAL");
        assert_eq!(map.reverse[&96].kind, "GLOBAL_HEAP");
    }

    #[test]
    fn data_chunks_is_a_list_of_ranges() {
        let raw = json!({
            "FOO_DATASET": {
                "DATA_SEGMENT": [0, 50],
                "DATA_CHUNKS": [[50, 100], [100, 150]],
            }
        });
        let map = ObjMapping::build(&raw, 150);
        assert_eq!(map.reverse[&50].kind, "DATA_CHUNKS");
        assert_eq!(map.reverse[&100].kind, "DATA_CHUNKS");
        assert!(map.is_datachunk(&crate::call::Call {
            gid: 0,
            local_id: 0,
            server: "s".into(),
            timestamp: 0.0,
            kind: crate::call::CallKind::Pwrite {
                path: "/x".into(),
                offset: 60,
                length: 10,
                bytes: vec![],
                is_append: false,
            },
            retval: 0,
            error: None,
            correlated_call: None,
        }));
    }
}
