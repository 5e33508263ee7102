//! Codec for the dual-mode SUP800F GPS module. The module speaks NMEA
//! sentences in one mode and a proprietary binary frame (temperature,
//! accelerometer, magnetometer and pressure) in the other.
use std::fmt;
use std::io::{Read, Write};
use std::{error, io, result};

use byteorder::{BigEndian, ByteOrder};
use enum_primitive::FromPrimitive;

pub type Result<T> = result::Result<T, Sup800fError>;

#[derive(Debug)]
pub enum Sup800fError {
    /// Transient serial read or write failure.
    SerialIo(io::Error),
    /// No ack was seen after a mode change request.
    ModeChange,
    /// A binary frame payload had the wrong shape.
    ParseBinary,
}

impl fmt::Display for Sup800fError {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Sup800fError::SerialIo(err) => write!(formatter, "Serial IO error: {}", err),
            Sup800fError::ModeChange => write!(formatter, "Mode change not acknowledged"),
            Sup800fError::ParseBinary => write!(formatter, "Malformed binary frame"),
        }
    }
}

impl error::Error for Sup800fError {}

impl From<io::Error> for Sup800fError {
    fn from(err: io::Error) -> Sup800fError {
        Sup800fError::SerialIo(err)
    }
}

// Frames are A0 A1 | length u16 BE | payload | xor checksum | 0D 0A
const HEADER_LENGTH: usize = 4;
const TAIL_LENGTH: usize = 3;

// The module returns one extra byte before the acceleration fields and even
// reports the payload as one byte too long, so the parser skips it. See the
// firmware docs if this ever changes.
const BINARY_MESSAGE_LENGTH: usize = HEADER_LENGTH + 3 + 8 * 4 + TAIL_LENGTH;
const BINARY_DATA_OFFSET: usize = HEADER_LENGTH + 3;

const ACK_LENGTH: usize = HEADER_LENGTH + 2 + TAIL_LENGTH;

enum_from_primitive! {
    #[derive(Debug, PartialEq)]
    enum ResponseId {
        Ack = 83,
        Nack = 84
    }
}

/// A parsed proprietary binary frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BinaryMessage {
    pub acceleration_g_x: f32,
    pub acceleration_g_y: f32,
    pub acceleration_g_z: f32,
    pub magnetic_flux_ut_x: f32,
    pub magnetic_flux_ut_y: f32,
    pub magnetic_flux_ut_z: f32,
    pub pressure_p: u32,
    pub temperature_c: f32,
}

/**
 * Formats a message for the SUP800F, adding the length designator, the
 * checksum and the trailer.
 */
pub fn format_message(payload: &[u8]) -> Vec<u8> {
    let checksum = payload.iter().fold(0u8, |part, byte| part ^ byte);
    let mut message = Vec::with_capacity(HEADER_LENGTH + payload.len() + TAIL_LENGTH);
    message.push(0xA0);
    message.push(0xA1);
    let mut length = [0u8; 2];
    BigEndian::write_u16(&mut length, payload.len() as u16);
    message.extend_from_slice(&length);
    message.extend_from_slice(payload);
    message.push(checksum);
    message.push(0x0D);
    message.push(0x0A);
    message
}

/**
 * Returns a single framed message, including the header and trailer bytes.
 * Frames with a bad checksum or trailer are logged and discarded, and the
 * scan continues with the next start sequence.
 */
pub fn get_message<R: Read>(serial: &mut R) -> Result<Vec<u8>> {
    let mut byte = [0u8; 1];
    let mut length_buffer = [0u8; 2];
    // Keep consuming bytes until we see the start sequence
    loop {
        serial.read_exact(&mut byte)?;
        if byte[0] != 0xA0 {
            continue;
        }
        serial.read_exact(&mut byte)?;
        if byte[0] != 0xA1 {
            continue;
        }
        serial.read_exact(&mut length_buffer)?;
        let payload_length = BigEndian::read_u16(&length_buffer) as usize;
        // Sanity check so a corrupt length doesn't starve the reader
        if payload_length < 2 || payload_length > 1024 {
            warn!("Invalid payload length: {}", payload_length);
            continue;
        }

        let mut message = vec![0u8; HEADER_LENGTH + payload_length + TAIL_LENGTH];
        message[0] = 0xA0;
        message[1] = 0xA1;
        message[2] = length_buffer[0];
        message[3] = length_buffer[1];
        serial.read_exact(&mut message[HEADER_LENGTH..])?;

        let length = message.len();
        if message[length - 2] != 0x0D || message[length - 1] != 0x0A {
            warn!("Message didn't end in 0D 0A, dropping");
            continue;
        }
        let checksum = message[HEADER_LENGTH..HEADER_LENGTH + payload_length]
            .iter()
            .fold(0u8, |part, byte| part ^ byte);
        if checksum != message[length - TAIL_LENGTH] {
            warn!(
                "Checksum mismatch: computed {:02X}, message has {:02X}, dropping",
                checksum,
                message[length - TAIL_LENGTH]
            );
            continue;
        }
        return Ok(message);
    }
}

/**
 * Parses a binary frame (temperature, accelerometer, magnetometer and
 * pressure) from the SUP800F module.
 */
pub fn parse_binary(message: &[u8]) -> Result<BinaryMessage> {
    if message.len() != BINARY_MESSAGE_LENGTH {
        return Err(Sup800fError::ParseBinary);
    }
    let field = |index: usize| -> &[u8] {
        &message[BINARY_DATA_OFFSET + index * 4..BINARY_DATA_OFFSET + index * 4 + 4]
    };
    Ok(BinaryMessage {
        acceleration_g_x: BigEndian::read_f32(field(0)),
        acceleration_g_y: BigEndian::read_f32(field(1)),
        acceleration_g_z: BigEndian::read_f32(field(2)),
        magnetic_flux_ut_x: BigEndian::read_f32(field(3)),
        magnetic_flux_ut_y: BigEndian::read_f32(field(4)),
        magnetic_flux_ut_z: BigEndian::read_f32(field(5)),
        pressure_p: BigEndian::read_u32(field(6)),
        temperature_c: BigEndian::read_f32(field(7)),
    })
}

/**
 * Switches to the NMEA message mode.
 */
pub fn switch_to_nmea_mode<S: Read + Write>(serial: &mut S) -> Result<()> {
    change_mode(serial, 1)
}

/**
 * Switches to the binary message mode.
 */
pub fn switch_to_binary_mode<S: Read + Write>(serial: &mut S) -> Result<()> {
    change_mode(serial, 2)
}

/**
 * Changes the reporting mode between NMEA messages and binary mode. The
 * configuration is stored in RAM only, so a power cycle reverts it.
 */
fn change_mode<S: Read + Write>(serial: &mut S, mode: u8) -> Result<()> {
    // Message id 9 = configure message type; final 0 = SRAM only
    let payload = [9u8, mode, 0u8];
    let message = format_message(&payload);
    serial.write_all(&message)?;
    serial.flush()?;
    check_response(serial, 3)
}

/**
 * Checks for an ack or nack response within a bounded number of messages.
 */
fn check_response<R: Read>(serial: &mut R, limit: u32) -> Result<()> {
    for _ in 0..limit {
        let message = get_message(serial)?;
        if message.len() != ACK_LENGTH {
            continue;
        }
        match ResponseId::from_u8(message[HEADER_LENGTH]) {
            Some(ResponseId::Ack) => return Ok(()),
            Some(ResponseId::Nack) => return Err(Sup800fError::ModeChange),
            None => continue,
        }
    }
    Err(Sup800fError::ModeChange)
}
