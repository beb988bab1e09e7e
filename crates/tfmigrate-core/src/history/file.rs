//! Versioned JSON wire format of the history file.
//!
//! ```json
//! {
//!     "version": 1,
//!     "records": {
//!         "20201109000001_foo.toml": {
//!             "type": "state",
//!             "name": "foo",
//!             "applied_at": "2020-11-09T00:00:01Z"
//!         }
//!     }
//! }
//! ```
//!
//! The version is read before anything else is decoded. Unknown versions
//! are rejected rather than parsed on a best-effort basis.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::{History, Record};
use super::HistoryError;

/// The only history file version this build reads and writes.
pub const HISTORY_FILE_VERSION: u64 = 1;

const INDENT: &[u8] = b"    ";

#[derive(Deserialize)]
struct VersionHeader {
    version: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct HistoryFileV1 {
    version: u64,
    records: BTreeMap<String, RecordV1>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RecordV1 {
    #[serde(rename = "type")]
    migration_type: String,
    name: String,
    applied_at: DateTime<Utc>,
}

impl From<&Record> for RecordV1 {
    fn from(record: &Record) -> Self {
        Self {
            migration_type: record.migration_type.clone(),
            name: record.name.clone(),
            applied_at: record.applied_at,
        }
    }
}

impl From<RecordV1> for Record {
    fn from(record: RecordV1) -> Self {
        Record::new(record.migration_type, record.name, record.applied_at)
    }
}

/// Parse history file bytes. Empty input yields an empty history.
pub fn parse_history(bytes: &[u8]) -> Result<History, HistoryError> {
    if bytes.is_empty() {
        return Ok(History::new());
    }

    let header: VersionHeader = serde_json::from_slice(bytes).map_err(HistoryError::Parse)?;
    match header.version {
        HISTORY_FILE_VERSION => {
            let file: HistoryFileV1 =
                serde_json::from_slice(bytes).map_err(HistoryError::Parse)?;
            Ok(file
                .records
                .into_iter()
                .map(|(id, record)| (id, record.into()))
                .collect())
        }
        other => Err(HistoryError::UnknownVersion(other)),
    }
}

/// Serialize a history as a pretty-printed version 1 file.
///
/// Records are emitted in key order, so saving an unchanged history produces
/// identical bytes.
pub fn serialize_history(history: &History) -> Result<Vec<u8>, HistoryError> {
    let file = HistoryFileV1 {
        version: HISTORY_FILE_VERSION,
        records: history
            .iter()
            .map(|(id, record)| (id.clone(), RecordV1::from(record)))
            .collect(),
    };

    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(INDENT);
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    file.serialize(&mut serializer)
        .map_err(HistoryError::Serialize)?;
    Ok(buf)
}
