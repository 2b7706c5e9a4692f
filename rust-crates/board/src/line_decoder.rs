use base64::{
    Engine,
    engine::general_purpose::STANDARD,
};
use std::fmt;

const ROW_HEADER_LEN: usize = 4;
const PIXEL_RECORD_LEN: usize = 8;
const RGB_MASK: u32 = 0x00ff_ffff;

/// One board cell color as read from a pixel record.
///
/// The raw little-endian word is kept as is; everything that renders the
/// color goes through [`Color::rgb`], which drops the top byte.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct Color(u32);

impl Color {
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn rgb(self) -> u32 {
        self.0 & RGB_MASK
    }

    pub const fn red(self) -> u8 {
        (self.rgb() >> 16) as u8
    }

    pub const fn green(self) -> u8 {
        (self.rgb() >> 8) as u8
    }

    pub const fn blue(self) -> u8 {
        self.rgb() as u8
    }

    /// Zero padded, lowercase, six hex digits.
    pub fn hex(self) -> String {
        format!("{:06x}", self.rgb())
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06x}", self.rgb())
    }
}

/// Raw bytes of one encoded row.
///
/// Iterating is lazy and can be repeated; a row that failed to decode is
/// simply empty.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DecodedLine {
    bytes: Vec<u8>,
}

impl DecodedLine {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn colors(&self) -> Colors<'_> {
        let records = self.bytes.get(ROW_HEADER_LEN..).unwrap_or_default();
        Colors {
            records: records.chunks_exact(PIXEL_RECORD_LEN),
        }
    }

    /// Number of complete pixel records after the header.
    pub fn len(&self) -> usize {
        self.bytes.len().saturating_sub(ROW_HEADER_LEN) / PIXEL_RECORD_LEN
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<'a> IntoIterator for &'a DecodedLine {
    type Item = Color;
    type IntoIter = Colors<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.colors()
    }
}

pub struct Colors<'a> {
    records: std::slice::ChunksExact<'a, u8>,
}

impl Iterator for Colors<'_> {
    type Item = Color;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.next()?;
        let word = [record[0], record[1], record[2], record[3]];
        Some(Color::from_raw(u32::from_le_bytes(word)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.records.size_hint()
    }
}

impl ExactSizeIterator for Colors<'_> {}

/// Decode a base64 row token. Invalid input decodes to an empty row.
pub fn decode_line(encoded: &str) -> DecodedLine {
    match STANDARD.decode(encoded.trim()) {
        Ok(bytes) => DecodedLine::from_bytes(bytes),
        Err(err) => {
            tracing::debug!(error = %err, "discarding undecodable board row");
            DecodedLine::default()
        }
    }
}

/// The whole board, row-major. Built once per reconciliation pass and
/// shared read-only afterwards.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BoardSnapshot {
    rows: Vec<Vec<Color>>,
}

impl BoardSnapshot {
    pub fn from_lines<S: AsRef<str>>(lines: &[S]) -> Self {
        let rows = lines
            .iter()
            .map(|line| decode_line(line.as_ref()).colors().collect())
            .collect();
        Self { rows }
    }

    pub fn from_rows(rows: Vec<Vec<Color>>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[Vec<Color>] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> Option<&[Color]> {
        self.rows.get(index).map(Vec::as_slice)
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn width(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }
}
