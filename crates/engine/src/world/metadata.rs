//! Per-cell metadata for stateful blocks (furnaces, signs, lamps).
//!
//! Stored beside the chunk file as a bincode sidecar so the chunk layout itself
//! stays fixed. The sidecar is the list of non-empty cells in slot-index order.

use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::{Context, Result, bail};
use bincode::Options;
use serde::{Deserialize, Serialize};

use super::position::LocalPos;

/// Closed set of metadata value types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetaValue {
    Int(i64),
    Float(f64),
    Vector3([f32; 3]),
    Text(String),
}

impl MetaValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            MetaValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            MetaValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

/// String-keyed fields attached to one cell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellMetadata {
    fields: BTreeMap<String, MetaValue>,
}

impl CellMetadata {
    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.fields.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: MetaValue) -> Option<MetaValue> {
        self.fields.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<MetaValue> {
        self.fields.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetaValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

fn sidecar_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

/// Encode a chunk's metadata.
pub fn encode(cells: &HashMap<LocalPos, CellMetadata>) -> Result<Vec<u8>> {
    let mut sorted: Vec<_> = cells.iter().filter(|(_, m)| !m.is_empty()).collect();
    sorted.sort_by_key(|(pos, _)| pos.index());
    sidecar_options()
        .serialize(&sorted)
        .context("encoding metadata sidecar")
}

/// Decode a metadata sidecar. Any trailing or missing byte is an error.
pub fn decode(bytes: &[u8]) -> Result<HashMap<LocalPos, CellMetadata>> {
    let list: Vec<(LocalPos, CellMetadata)> = sidecar_options()
        .deserialize(bytes)
        .context("decoding metadata sidecar")?;

    let mut seen = HashSet::new();
    let mut cells = HashMap::with_capacity(list.len());
    for (pos, meta) in list {
        let LocalPos { x, y, z } = pos;
        if LocalPos::try_new(x.into(), y.into(), z.into()).is_none() {
            bail!("metadata cell ({x}, {y}, {z}) outside chunk");
        }
        if !seen.insert(pos) {
            bail!("metadata cell ({x}, {y}, {z}) listed twice");
        }
        if !meta.is_empty() {
            cells.insert(pos, meta);
        }
    }
    Ok(cells)
}
