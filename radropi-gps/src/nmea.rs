//! NMEA 0183 sentence parsing

use crate::error::GpsError;
use chrono::{DateTime, Utc};
use radropi_core::PositionFix;
use std::time::Duration;

/// Fix data from a GGA sentence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GgaData {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub fix_quality: u8,
    pub satellites: u8,
    pub hdop: Option<f32>,
    pub altitude_m: Option<f64>,
}

/// Recommended minimum data from an RMC sentence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RmcData {
    /// Status `A`; `V` means the receiver has no valid fix
    pub active: bool,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Sentences the receiver understands
#[derive(Debug, Clone, PartialEq)]
pub enum NmeaSentence {
    Gga(GgaData),
    Rmc(RmcData),
    /// Dilution of precision from GSA
    Gsa { hdop: Option<f32> },
    /// Well-formed but not used, e.g. GSV or VTG
    Other(String),
}

/// Human-readable GGA fix quality
pub fn fix_quality_description(quality: u8) -> &'static str {
    match quality {
        0 => "No fix",
        1 => "GPS fix (SPS)",
        2 => "DGPS fix",
        3 => "PPS fix",
        4 => "Real Time Kinematic",
        5 => "Float RTK",
        6 => "Estimated (dead reckoning)",
        7 => "Manual input mode",
        8 => "Simulation mode",
        _ => "Unknown",
    }
}

/// XOR of every byte between `$` and `*`
pub fn checksum(body: &str) -> u8 {
    body.bytes().fold(0u8, |acc, b| acc ^ b)
}

/// Parse one sentence, verifying the `*hh` checksum when present
pub fn parse_sentence(line: &str) -> Result<NmeaSentence, GpsError> {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('$') else {
        return Err(GpsError::Parse(format!("missing '$' in {:?}", line)));
    };

    let body = match rest.split_once('*') {
        Some((body, hex)) => {
            let expected = u8::from_str_radix(hex.trim(), 16)
                .map_err(|_| GpsError::Parse(format!("bad checksum field {:?}", hex)))?;
            let computed = checksum(body);
            if expected != computed {
                return Err(GpsError::Checksum { expected, computed });
            }
            body
        }
        None => rest,
    };

    let fields: Vec<&str> = body.split(',').collect();
    let kind = fields
        .first()
        .filter(|id| id.len() >= 5 && id.is_ascii())
        .map(|id| &id[id.len() - 3..])
        .ok_or_else(|| GpsError::Parse(format!("bad sentence id in {:?}", line)))?;

    match kind {
        "GGA" => parse_gga(&fields).map(NmeaSentence::Gga),
        "RMC" => parse_rmc(&fields).map(NmeaSentence::Rmc),
        "GSA" => {
            require_fields(&fields, 17, "GSA")?;
            Ok(NmeaSentence::Gsa {
                hdop: parse_opt::<f32>(fields[16])?,
            })
        }
        other => Ok(NmeaSentence::Other(other.to_string())),
    }
}

fn require_fields(fields: &[&str], count: usize, kind: &str) -> Result<(), GpsError> {
    if fields.len() < count {
        return Err(GpsError::Parse(format!(
            "{} has {} fields, expected at least {}",
            kind,
            fields.len(),
            count
        )));
    }
    Ok(())
}

fn parse_opt<T: std::str::FromStr>(field: &str) -> Result<Option<T>, GpsError> {
    if field.is_empty() {
        return Ok(None);
    }
    field
        .parse::<T>()
        .map(Some)
        .map_err(|_| GpsError::Parse(format!("bad numeric field {:?}", field)))
}

/// `ddmm.mmmm` plus hemisphere into signed decimal degrees
fn parse_coordinate(value: &str, hemisphere: &str, max_degrees: f64) -> Result<Option<f64>, GpsError> {
    let Some(raw) = parse_opt::<f64>(value)? else {
        return Ok(None);
    };
    let degrees = (raw / 100.0).trunc();
    let minutes = raw - degrees * 100.0;
    if minutes >= 60.0 || raw < 0.0 {
        return Err(GpsError::Parse(format!("bad coordinate {:?}", value)));
    }
    let decimal = degrees + minutes / 60.0;
    if decimal > max_degrees {
        return Err(GpsError::Parse(format!("coordinate {:?} out of range", value)));
    }
    match hemisphere {
        "N" | "E" => Ok(Some(decimal)),
        "S" | "W" => Ok(Some(-decimal)),
        other => Err(GpsError::Parse(format!("bad hemisphere {:?}", other))),
    }
}

fn parse_gga(fields: &[&str]) -> Result<GgaData, GpsError> {
    require_fields(fields, 10, "GGA")?;
    Ok(GgaData {
        latitude: parse_coordinate(fields[2], fields[3], 90.0)?,
        longitude: parse_coordinate(fields[4], fields[5], 180.0)?,
        fix_quality: parse_opt::<u8>(fields[6])?.unwrap_or(0),
        satellites: parse_opt::<u8>(fields[7])?.unwrap_or(0),
        hdop: parse_opt::<f32>(fields[8])?,
        altitude_m: parse_opt::<f64>(fields[9])?,
    })
}

fn parse_rmc(fields: &[&str]) -> Result<RmcData, GpsError> {
    require_fields(fields, 7, "RMC")?;
    Ok(RmcData {
        active: fields[2] == "A",
        latitude: parse_coordinate(fields[3], fields[4], 90.0)?,
        longitude: parse_coordinate(fields[5], fields[6], 180.0)?,
    })
}

/// Folds a stream of sentences into the latest known fix
#[derive(Debug, Clone, Default)]
pub struct FixAccumulator {
    latitude: Option<f64>,
    longitude: Option<f64>,
    altitude_m: Option<f64>,
    satellites: u8,
    fix_quality: u8,
    hdop: Option<f32>,
    last_valid: Option<DateTime<Utc>>,
}

impl FixAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, sentence: &NmeaSentence, now: DateTime<Utc>) {
        match sentence {
            NmeaSentence::Gga(gga) => {
                self.fix_quality = gga.fix_quality;
                self.satellites = gga.satellites;
                if gga.hdop.is_some() {
                    self.hdop = gga.hdop;
                }
                if let (Some(lat), Some(lon), true) = (gga.latitude, gga.longitude, gga.fix_quality > 0) {
                    self.latitude = Some(lat);
                    self.longitude = Some(lon);
                    self.altitude_m = gga.altitude_m;
                    self.last_valid = Some(now);
                }
            }
            NmeaSentence::Rmc(rmc) => {
                if let (Some(lat), Some(lon), true) = (rmc.latitude, rmc.longitude, rmc.active) {
                    self.latitude = Some(lat);
                    self.longitude = Some(lon);
                    self.last_valid = Some(now);
                }
            }
            NmeaSentence::Gsa { hdop } => {
                if hdop.is_some() {
                    self.hdop = *hdop;
                }
            }
            NmeaSentence::Other(_) => {}
        }
    }

    pub fn last_valid(&self) -> Option<DateTime<Utc>> {
        self.last_valid
    }

    /// Snapshot at `now`; invalid once the last valid fix is older than `freshness`
    pub fn fix_at(&self, now: DateTime<Utc>, freshness: Duration) -> PositionFix {
        let Some(last_valid) = self.last_valid else {
            return PositionFix {
                satellites: self.satellites,
                fix_quality: self.fix_quality,
                hdop: self.hdop,
                ..PositionFix::unknown(now)
            };
        };

        let fix = PositionFix {
            latitude: self.latitude,
            longitude: self.longitude,
            altitude_m: self.altitude_m,
            satellites: self.satellites,
            fix_quality: self.fix_quality,
            hdop: self.hdop,
            fix_valid: true,
            timestamp: last_valid,
        };

        let age_ms = (now - last_valid).num_milliseconds();
        if age_ms > freshness.as_millis() as i64 || fix.latitude.is_none() || fix.longitude.is_none() {
            fix.invalidated()
        } else {
            fix
        }
    }
}
