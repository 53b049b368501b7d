use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

pub const AT_CSQ: &str = "AT+CSQ";

// Highest RSSI index the modem's half-dB table covers.
pub const MAX_RSSI_INDEX: u32 = 55;

static CSQ_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\+CSQ:\s*(\d+),(\d+)").expect("CSQ pattern is valid"));

// Parsed `+CSQ: <rssi>,<ber>` reply with the power looked up from the index.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CsqReport {
    pub rssi: u32,
    pub dbm: Option<f64>,
    pub ber: u32,
}

// Find the first `+CSQ` line in a raw modem reply.
// A reply without one is normal while the modem is between registrations.
pub fn parse_csq(text: &str) -> Option<CsqReport> {
    let caps = CSQ_PATTERN.captures(text)?;
    let rssi = caps.get(1)?.as_str().parse::<u32>().ok()?;
    let ber = caps.get(2)?.as_str().parse::<u32>().ok()?;
    Some(CsqReport {
        rssi,
        dbm: rssi_to_dbm(rssi),
        ber,
    })
}

/// Received power for an RSSI index.
///
/// Index 0 means "not detectable" and maps to 0. Indices 1..=55 step by
/// 0.5 dB from -133.0 dBm up to -106.0 dBm. Anything else has no mapping.
pub fn rssi_to_dbm(index: u32) -> Option<f64> {
    match index {
        0 => Some(0.0),
        1..=MAX_RSSI_INDEX => Some(-133.0 + 0.5 * f64::from(index - 1)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_db_table_covers_full_index_range() {
        assert_eq!(rssi_to_dbm(0), Some(0.0));
        assert_eq!(rssi_to_dbm(1), Some(-133.0));
        assert_eq!(rssi_to_dbm(2), Some(-132.5));
        assert_eq!(rssi_to_dbm(17), Some(-125.0));
        assert_eq!(rssi_to_dbm(31), Some(-118.0));
        assert_eq!(rssi_to_dbm(55), Some(-106.0));
        for index in 1..=MAX_RSSI_INDEX {
            assert_eq!(
                rssi_to_dbm(index),
                Some(-133.0 + 0.5 * f64::from(index - 1)),
                "index {index}"
            );
        }
    }

    #[test]
    fn indices_outside_table_have_no_power() {
        assert_eq!(rssi_to_dbm(56), None);
        assert_eq!(rssi_to_dbm(99), None);
    }

    #[test]
    fn parses_echoed_reply() {
        let report = parse_csq("AT+CSQ\r\r\n+CSQ: 17,0\r\n\r\nOK\r\n").unwrap();
        assert_eq!(
            report,
            CsqReport {
                rssi: 17,
                dbm: Some(-125.0),
                ber: 0
            }
        );
    }

    #[test]
    fn tolerates_missing_space_after_colon() {
        let report = parse_csq("+CSQ:5,99").unwrap();
        assert_eq!(report.rssi, 5);
        assert_eq!(report.dbm, Some(-131.0));
        assert_eq!(report.ber, 99);
    }

    #[test]
    fn unknown_index_keeps_reading_without_power() {
        let report = parse_csq("+CSQ: 99,99\r\nOK").unwrap();
        assert_eq!(report.rssi, 99);
        assert_eq!(report.dbm, None);
    }

    #[test]
    fn reply_without_token_is_no_match() {
        assert_eq!(parse_csq("AT+CSQ\r\nERROR\r\n"), None);
        assert_eq!(parse_csq(""), None);
    }
}
