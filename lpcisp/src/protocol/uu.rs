//! UU-encoding of binary payloads for the LPC ISP line transport.
//!
//! The bootloader moves binary data as printable lines:
//!
//! ```text
//! +--------+-------------------------------------------+
//! | Length |            4-char groups                  |
//! +--------+-------------------------------------------+
//! | n + 32 | 3 bytes -> 4 x 6 bits, each + 32 (0 = ' ') |
//! +--------+-------------------------------------------+
//! ```
//!
//! A line carries at most 45 bytes. After every 20 lines (or at the end of
//! the transfer) the sender emits the decimal sum of the raw bytes.

use crate::error::{Error, Result};

/// Maximum number of raw bytes in one encoded line.
pub const LINE_SIZE: usize = 45;

/// Number of lines between two checksum exchanges.
pub const LINES_PER_BLOCK: usize = 20;

/// Raw bytes covered by one checksum exchange.
pub const BLOCK_SIZE: usize = LINE_SIZE * LINES_PER_BLOCK;

fn encode_char(value: u8) -> char {
    char::from(b' ' + (value & 0x3F))
}

fn decode_char(c: u8) -> u32 {
    u32::from(c.wrapping_sub(b' ') & 0x3F)
}

/// Encode one chunk of at most [`LINE_SIZE`] bytes.
fn encode_chunk(chunk: &[u8]) -> String {
    debug_assert!(chunk.len() <= LINE_SIZE);

    let mut line = String::with_capacity(1 + chunk.len().div_ceil(3) * 4);
    #[allow(clippy::cast_possible_truncation)] // chunk length <= 45
    line.push(encode_char(chunk.len() as u8));

    for group in chunk.chunks(3) {
        let b0 = group[0];
        let b1 = group.get(1).copied().unwrap_or(0);
        let b2 = group.get(2).copied().unwrap_or(0);

        line.push(encode_char(b0 >> 2));
        line.push(encode_char((b0 << 4) | (b1 >> 4)));
        line.push(encode_char((b1 << 2) | (b2 >> 6)));
        line.push(encode_char(b2));
    }

    line
}

/// Encode a payload into UU lines (without line terminators).
///
/// The payload is split into chunks of at most [`LINE_SIZE`] bytes, one line
/// per chunk. An empty payload produces no lines.
pub fn encode_lines(data: &[u8]) -> Vec<String> {
    data.chunks(LINE_SIZE).map(encode_chunk).collect()
}

/// Decode a single UU line (terminator already stripped).
pub fn decode_line(line: &str) -> Result<Vec<u8>> {
    let bytes = line.as_bytes();
    let Some((&len_char, body)) = bytes.split_first() else {
        return Err(Error::Protocol("empty UU line".into()));
    };

    let len = match len_char {
        b'`' => 0,
        c => usize::from(c.wrapping_sub(b' ')),
    };
    if len > LINE_SIZE {
        return Err(Error::Protocol(format!(
            "line length error: header announces {len} bytes"
        )));
    }
    let expected = len.div_ceil(3) * 4;
    if body.len() != expected {
        return Err(Error::Protocol(format!(
            "line length error: header announces {len} bytes ({expected} chars), got {} chars",
            body.len()
        )));
    }

    let mut decoded = Vec::with_capacity(expected / 4 * 3);
    for group in body.chunks(4) {
        let word = group
            .iter()
            .fold(0u32, |acc, &c| (acc << 6) | decode_char(c));
        decoded.extend_from_slice(&word.to_be_bytes()[1..]);
    }
    decoded.truncate(len);

    Ok(decoded)
}

/// Decode a sequence of UU lines and concatenate their payloads.
pub fn decode_lines<I, S>(lines: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut data = Vec::new();
    for line in lines {
        data.extend(decode_line(line.as_ref())?);
    }
    Ok(data)
}

/// Arithmetic checksum used by the bootloader: the sum of all byte values,
/// modulo 2^32. Text payloads are summed over their character codes.
pub fn checksum(data: &[u8]) -> u32 {
    data.iter()
        .fold(0u32, |sum, &b| sum.wrapping_add(u32::from(b)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| (i * 37 + 11) as u8)
            .collect()
    }

    #[test]
    fn test_round_trip_across_chunk_boundaries() {
        for len in [0, 1, 2, 3, 44, 45, 46, 90, 91, 900] {
            let data = pattern(len);
            let lines = encode_lines(&data);
            assert_eq!(lines.len(), len.div_ceil(LINE_SIZE), "len {len}");
            assert_eq!(decode_lines(&lines).unwrap(), data, "len {len}");
        }
    }

    #[test]
    fn test_known_encoding() {
        // Same output as the classic uuencode of "Cat".
        assert_eq!(encode_lines(b"Cat"), vec!["#0V%T".to_string()]);
        // Zero bits are written as spaces, not backticks.
        assert_eq!(encode_lines(&[0, 0, 0]), vec!["#    ".to_string()]);
    }

    #[test]
    fn test_full_line_length() {
        let lines = encode_lines(&pattern(46));
        assert_eq!(lines[0].len(), 1 + 60);
        assert_eq!(lines[0].as_bytes()[0], b'M');
        assert_eq!(lines[1], encode_lines(&pattern(46)[45..])[0]);
    }

    #[test]
    fn test_decode_accepts_backtick_zero() {
        assert_eq!(decode_line("#````").unwrap(), vec![0, 0, 0]);
    }

    #[test]
    fn test_decode_rejects_bad_length() {
        let err = decode_line("#0V%").unwrap_err();
        assert!(matches!(err, Error::Protocol(msg) if msg.contains("line length error")));

        let err = decode_line("").unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_decode_rejects_out_of_range_header() {
        let err = decode_line("a0V%T").unwrap_err();
        assert!(matches!(err, Error::Protocol(msg) if msg.contains("line length error")));
        assert!(decode_line("\u{1f}").is_err());
    }

    #[test]
    fn test_checksum_is_byte_sum() {
        let data = pattern(1000);
        let expected = data.iter().map(|&b| u32::from(b)).sum::<u32>();
        assert_eq!(checksum(&data), expected);
        assert_eq!(checksum(&[]), 0);
        assert_eq!(checksum(b"OK"), u32::from(b'O') + u32::from(b'K'));
    }

    #[test]
    fn test_checksum_append_and_order() {
        let mut data = pattern(77);
        let before = checksum(&data);
        data.push(0xAB);
        assert_eq!(checksum(&data), before.wrapping_add(0xAB));

        data.reverse();
        assert_eq!(checksum(&data), before.wrapping_add(0xAB));
    }
}
