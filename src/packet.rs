//! Telemetry wire decoding
//!
//! A datagram is UTF-8 text of the form
//! `ID,x,y;ID,x,y;...;<frame captured>;<packet sent>;`.
//! Fields without a comma are timing fields. Anything containing a colon is
//! an operator command rather than tracker data.

use crate::error::{ExperimentError, Result};

/// One `id,x,y` record exactly as received (y not yet flipped)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LandmarkRecord {
    pub id: u32,
    pub x: f64,
    pub y: f64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LandmarkFrame {
    pub records: Vec<LandmarkRecord>,
    /// Trailing timing fields, in order
    pub timing: Vec<String>,
    /// Records that looked like `id,x,y` but did not parse
    pub rejected: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    Command(String),
    Landmarks(LandmarkFrame),
}

pub fn decode(text: &str) -> Result<Packet> {
    if text.contains(':') {
        return Ok(Packet::Command(text.trim().to_string()));
    }
    // Also rejects a packet carrying a single record
    if !text.contains(';') {
        return Err(ExperimentError::MalformedPacket(format!(
            "no record separator in {:?}",
            truncate(text)
        )));
    }

    let mut frame = LandmarkFrame::default();
    for field in text.split(';') {
        if !field.contains(',') {
            let field = field.trim();
            if !field.is_empty() {
                frame.timing.push(field.to_string());
            }
            continue;
        }
        match parse_record(field) {
            Some(record) => frame.records.push(record),
            None => {
                log::warn!("Skipping unparseable landmark record {:?}", field);
                frame.rejected += 1;
            }
        }
    }
    Ok(Packet::Landmarks(frame))
}

fn parse_record(field: &str) -> Option<LandmarkRecord> {
    let mut parts = field.split(',').map(str::trim);
    let id = parts.next()?.parse().ok()?;
    let x = parts.next()?.parse().ok()?;
    let y = parts.next()?.parse().ok()?;
    Some(LandmarkRecord { id, x, y })
}

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(64) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_landmarks_and_timing() {
        let packet = decode("0,123.5,31.25;1,111,247;4,160,40;12:00:01.5x;").unwrap();
        // colon anywhere makes it a command
        assert!(matches!(packet, Packet::Command(_)));

        let packet = decode("0,123.5,31.25;1,111,247;4,160,40;1699999.1;1699999.2;").unwrap();
        let Packet::Landmarks(frame) = packet else {
            panic!("expected landmarks");
        };
        assert_eq!(frame.records.len(), 3);
        assert_eq!(
            frame.records[0],
            LandmarkRecord { id: 0, x: 123.5, y: 31.25 }
        );
        assert_eq!(frame.timing, vec!["1699999.1", "1699999.2"]);
        assert_eq!(frame.rejected, 0);
    }

    #[test]
    fn test_command_packet() {
        assert_eq!(
            decode("cmd:Skip").unwrap(),
            Packet::Command("cmd:Skip".to_string())
        );
    }

    #[test]
    fn test_missing_separator_is_malformed() {
        let err = decode("0,1,2").unwrap_err();
        assert!(matches!(err, ExperimentError::MalformedPacket(_)));
        assert!(decode("").is_err());
    }

    #[test]
    fn test_bad_record_is_skipped() {
        let Packet::Landmarks(frame) = decode("0,abc,2;1,3,4;").unwrap() else {
            panic!("expected landmarks");
        };
        assert_eq!(frame.records.len(), 1);
        assert_eq!(frame.records[0].id, 1);
        assert_eq!(frame.rejected, 1);
    }
}
