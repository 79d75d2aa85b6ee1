//! Snapshot format: a JSON array of `{"model", "pk", "fields"}` entries,
//! loadable in array order.

mod emit;
mod load;

pub use emit::{emit, EmitOptions};
pub use load::{load_snapshot, LoadReport};

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// One serialized record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub model: String,
    /// Null when the entry is identified by its natural key.
    pub pk: Value,
    pub fields: Map<String, Value>,
}

/// Write `entries` as a JSON array. `indent == 0` writes compact JSON.
pub fn write_snapshot<W: Write>(entries: &[SnapshotEntry], mut writer: W, indent: usize) -> Result<()> {
    if indent == 0 {
        serde_json::to_writer(&mut writer, entries)?;
    } else {
        let pad = vec![b' '; indent];
        let formatter = serde_json::ser::PrettyFormatter::with_indent(&pad);
        let mut ser = serde_json::Serializer::with_formatter(&mut writer, formatter);
        entries.serialize(&mut ser)?;
    }
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

pub fn read_snapshot<R: Read>(reader: R) -> Result<Vec<SnapshotEntry>> {
    Ok(serde_json::from_reader(reader)?)
}
