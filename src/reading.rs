use crate::modem::csq::CsqReport;
use serde::{Deserialize, Serialize};

// One stored signal sample. Field names match the JSON used by history and ingest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalReading {
    pub timestamp: i64,
    pub rssi: Option<u32>,
    pub dbm: Option<f64>,
    pub ber: Option<u32>,
}

impl SignalReading {
    pub fn from_report(timestamp: i64, report: CsqReport) -> Self {
        Self {
            timestamp,
            rssi: Some(report.rssi),
            dbm: report.dbm,
            ber: Some(report.ber),
        }
    }
}
