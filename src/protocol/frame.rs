//! Wire frames.
//!
//! A request is the ASCII command followed by its CRC16/XMODEM in big-endian order
//! and the carriage return. A reply is conventionally `(<tokens>` followed by the
//! carriage return, sometimes with its own checksum right before the terminator.

use std::borrow::Cow;

use crc::{CRC_16_XMODEM, Crc};

pub const TERMINATOR: u8 = b'\r';

const XMODEM: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

#[must_use]
pub fn checksum(bytes: &[u8]) -> u16 {
    XMODEM.checksum(bytes)
}

/// Build the request frame for the command.
#[must_use]
pub fn encode(command: &str) -> Vec<u8> {
    let bytes = command.as_bytes();
    let mut frame = Vec::with_capacity(bytes.len() + 3);
    frame.extend_from_slice(bytes);
    frame.extend_from_slice(&checksum(bytes).to_be_bytes());
    frame.push(TERMINATOR);
    frame
}

/// Extract the payload from a raw reply.
///
/// Never fails: invalid UTF-8 falls back to Latin-1. The reply is not verified,
/// a trailing checksum is only stripped when it happens to match.
#[must_use]
pub fn decode(response: &[u8]) -> String {
    let response = strip_checksum(response);
    let text = match std::str::from_utf8(&response) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => Cow::Owned(response.iter().copied().map(char::from).collect::<String>()),
    };
    extract_payload(&text).to_owned()
}

fn extract_payload(text: &str) -> &str {
    match (text.find('('), text.find('\r')) {
        (Some(start), Some(end)) if end > start => &text[start + 1..end],
        _ => text.trim(),
    }
}

/// Remove the two bytes before the terminator if they are the checksum of the reply.
///
/// Printable tails are kept even when they match: they may as well be payload text.
fn strip_checksum(response: &[u8]) -> Cow<'_, [u8]> {
    let start = response.iter().position(|byte| *byte == b'(');
    let end = response.iter().position(|byte| *byte == TERMINATOR);
    if let (Some(start), Some(end)) = (start, end)
        && end >= start + 3
        && !response[end - 2..end].iter().all(|byte| byte.is_ascii_graphic() || *byte == b' ')
        && checksum(&response[start..end - 2])
            == u16::from_be_bytes([response[end - 2], response[end - 1]])
    {
        let mut stripped = Vec::with_capacity(response.len() - 2);
        stripped.extend_from_slice(&response[..end - 2]);
        stripped.extend_from_slice(&response[end..]);
        return Cow::Owned(stripped);
    }
    Cow::Borrowed(response)
}
