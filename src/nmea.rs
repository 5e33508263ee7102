//! Parses NMEA sentences from the GPS module.
use std::fmt;
use std::{error, result};

use chrono::{NaiveDate, TimeZone, Utc};

pub type Result<T> = result::Result<T, NmeaError>;

const KNOTS_TO_M_S: f64 = 0.514_444_444;

#[derive(Debug)]
pub enum NmeaError {
    /// The sentence was recognized but could not be parsed.
    ParseSentence(String),
    /// The sentence type is not one we care about.
    UnknownSentence,
}

impl fmt::Display for NmeaError {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NmeaError::ParseSentence(message) => {
                write!(formatter, "Unable to parse sentence: {}", message)
            }
            NmeaError::UnknownSentence => write!(formatter, "Unknown sentence type"),
        }
    }
}

impl error::Error for NmeaError {}

/**
 * RMC: recommended minimum specific GNSS data.
 */
#[derive(Debug, PartialEq)]
pub struct RmcMessage {
    pub latitude_d: f64,
    pub longitude_d: f64,
    pub speed_m_s: f64,
    pub course_d: f64,
    pub timestamp_s: f64,
}

/**
 * GSA: GNSS DOP and active satellites.
 */
#[derive(Debug, PartialEq)]
pub struct GsaMessage {
    pub hdop: f64,
}

/**
 * PSTI: proprietary status message carrying the compass-calibrated flag.
 */
#[derive(Debug, PartialEq)]
pub struct StiMessage {
    pub compass_calibrated: bool,
}

#[derive(Debug, PartialEq)]
pub enum NmeaMessage {
    Rmc(RmcMessage),
    Gsa(GsaMessage),
    Sti(StiMessage),
}

impl NmeaMessage {
    pub fn parse(message: &str) -> Result<NmeaMessage> {
        if message.starts_with("$GPRMC") {
            NmeaMessage::parse_rmc(message).map(NmeaMessage::Rmc)
        } else if message.starts_with("$GPGSA") {
            NmeaMessage::parse_gsa(message).map(NmeaMessage::Gsa)
        } else if message.starts_with("$PSTI") {
            NmeaMessage::parse_sti(message).map(NmeaMessage::Sti)
        } else {
            Err(NmeaError::UnknownSentence)
        }
    }

    fn parse_rmc(message: &str) -> Result<RmcMessage> {
        // $GPRMC,hhmmss.sss,A,ddmm.mmmm,N,dddmm.mmmm,W,speed,course,ddmmyy,...
        let parts: Vec<&str> = message.split(',').collect();
        if parts.len() < 10 {
            return Err(bad(message));
        }

        let latitude_d = parse_coordinate(parts[3], parts[4] == "S").ok_or_else(|| bad(message))?;
        let longitude_d =
            parse_coordinate(parts[5], parts[6] == "W").ok_or_else(|| bad(message))?;

        let speed_knots: f64 = parts[7].parse().map_err(|_| bad(message))?;
        let course_d: f64 = parts[8].parse().map_err(|_| bad(message))?;

        Ok(RmcMessage {
            latitude_d,
            longitude_d,
            speed_m_s: speed_knots * KNOTS_TO_M_S,
            course_d,
            timestamp_s: parse_timestamp(parts[1], parts[9]).ok_or_else(|| bad(message))?,
        })
    }

    fn parse_gsa(message: &str) -> Result<GsaMessage> {
        // $GPGSA,A,3,23,03,26,09,27,16,22,31,,,,,1.9,1.1,1.5*31
        // type, mode, fix type, satellites used 1-12, PDOP, HDOP, VDOP
        let parts: Vec<&str> = message.trim_end().split(',').collect();
        if parts.len() < 3 {
            return Err(bad(message));
        }
        let hdop: f64 = parts[parts.len() - 2].parse().map_err(|_| bad(message))?;
        Ok(GsaMessage { hdop })
    }

    fn parse_sti(message: &str) -> Result<StiMessage> {
        let parts: Vec<&str> = message.split(',').collect();
        if parts.len() < 3 {
            return Err(bad(message));
        }
        Ok(StiMessage {
            compass_calibrated: parts[2] == "1",
        })
    }
}

fn bad(message: &str) -> NmeaError {
    NmeaError::ParseSentence(message.trim_end().to_string())
}

/**
 * Parses a ddmm.mmmm (or dddmm.mmmm) coordinate. The two characters before
 * the decimal point and everything after are minutes; the rest are degrees.
 */
fn parse_coordinate(value: &str, negate: bool) -> Option<f64> {
    let decimal_index = value.find('.')?;
    if decimal_index < 2 {
        return None;
    }
    let degrees: f64 = value[..decimal_index - 2].parse().ok()?;
    let minutes: f64 = value[decimal_index - 2..].parse().ok()?;
    let coordinate = degrees + minutes / 60.0;
    if negate {
        Some(-coordinate)
    } else {
        Some(coordinate)
    }
}

/**
 * Converts the hhmmss.sss time and ddmmyy date fields to a Unix timestamp.
 */
fn parse_timestamp(time: &str, date: &str) -> Option<f64> {
    if time.len() < 6 || date.len() < 6 {
        return None;
    }
    let hours: u32 = time[0..2].parse().ok()?;
    let minutes: u32 = time[2..4].parse().ok()?;
    let seconds: f64 = time[4..].parse().ok()?;

    let day: u32 = date[0..2].parse().ok()?;
    let month: u32 = date[2..4].parse().ok()?;
    let year: i32 = date[4..6].parse::<i32>().ok()? + 2000;

    // chrono doesn't do fractional seconds here, so add them afterwards
    let datetime = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hours, minutes, 0)?;
    Some(Utc.from_utc_datetime(&datetime).timestamp() as f64 + seconds)
}
