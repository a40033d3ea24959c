//! Per-lot out-of-range record file.
//!
//! Each lot accumulates a JSON array; one record is appended per NG cycle.
//! Persistence failures are reported to the caller, who logs them — they
//! never block judgement or the IO output.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use chip_inspect_core::MeasurementItem;

#[derive(thiserror::Error, Debug)]
pub enum RecordError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// One failing measurement inside a record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutOfRangeEntry {
    pub item_name: String,
    pub value: f64,
    pub lower_limit: f64,
    pub upper_limit: f64,
    pub is_out_of_range: bool,
}

impl From<&MeasurementItem> for OutOfRangeEntry {
    fn from(item: &MeasurementItem) -> Self {
        Self {
            item_name: item.name.clone(),
            value: item.value,
            lower_limit: item.lower_limit,
            upper_limit: item.upper_limit,
            is_out_of_range: item.out_of_range,
        }
    }
}

/// One NG cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutOfRangeRecord {
    pub image_number: u64,
    pub defect_type: String,
    pub detection_time: String,
    pub items: Vec<OutOfRangeEntry>,
}

/// Append-only JSON array of NG records for one lot.
#[derive(Clone, Debug)]
pub struct OutOfRangeLog {
    path: PathBuf,
}

impl OutOfRangeLog {
    /// Log file for the given lot, `<dir>/<lot_id>_out_of_range.json`.
    pub fn for_lot(dir: impl AsRef<Path>, lot_id: &str) -> Self {
        Self {
            path: dir.as_ref().join(format!("{lot_id}_out_of_range.json")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record, preserving everything already in the file.
    pub fn append(&self, record: &OutOfRangeRecord) -> Result<(), RecordError> {
        let mut records = if self.path.exists() {
            self.load()?
        } else {
            Vec::new()
        };
        records.push(record.clone());
        let json = serde_json::to_string_pretty(&records)?;
        fs::write(&self.path, json)?;
        Ok(())
    }

    pub fn load(&self) -> Result<Vec<OutOfRangeRecord>, RecordError> {
        let raw = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chip_inspect_core::MeasurementSource;

    fn record(image_number: u64, name: &str) -> OutOfRangeRecord {
        let item = MeasurementItem::new(name, 1.4, 0.0, 1.0, true, MeasurementSource::ThreeD);
        OutOfRangeRecord {
            image_number,
            defect_type: name.to_owned(),
            detection_time: "2026-08-24T10:00:00Z".to_owned(),
            items: vec![OutOfRangeEntry::from(&item)],
        }
    }

    #[test]
    fn appends_instead_of_overwriting() {
        let dir = tempfile::tempdir().unwrap();
        let log = OutOfRangeLog::for_lot(dir.path(), "LOT42");

        log.append(&record(1, "G1")).unwrap();
        log.append(&record(2, "pitch")).unwrap();

        let records = log.load().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].image_number, 1);
        assert_eq!(records[1].defect_type, "pitch");
    }

    #[test]
    fn file_name_scoped_by_lot() {
        let log = OutOfRangeLog::for_lot("/data/records", "LOT42");
        assert!(log.path().ends_with("LOT42_out_of_range.json"));
    }

    #[test]
    fn record_serializes_with_contract_field_names() {
        let json = serde_json::to_string(&record(7, "G1")).unwrap();
        assert!(json.contains("\"imageNumber\":7"));
        assert!(json.contains("\"defectType\":\"G1\""));
        assert!(json.contains("\"detectionTime\""));
        assert!(json.contains("\"itemName\":\"G1\""));
    }
}
