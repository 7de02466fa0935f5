//! Chunked record reader
//!
//! Source files are headerless, `;`-separated and encoded in a single-byte
//! Latin code page. Records are read as raw bytes and decoded explicitly,
//! never guessed. Large files are consumed in fixed-size windows from one
//! open reader so peak memory is bounded by the window, not the file.

use csv::{ByteRecord, ReaderBuilder};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use crate::error::Result;

/// Decoded fields of one source record
pub type RawRecord = Vec<String>;

pub const DELIMITER: u8 = b';';

const READ_BUFFER: usize = 1 << 20;
const PREALLOC_ROWS: usize = 1 << 16;

/// Streaming reader over one delimited source file
pub struct RecordReader<R: Read> {
    inner: csv::Reader<R>,
    record: ByteRecord,
    rows_read: u64,
}

impl RecordReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::from_reader(BufReader::with_capacity(READ_BUFFER, file)))
    }
}

impl<R: Read> RecordReader<R> {
    pub fn from_reader(reader: R) -> Self {
        let inner = ReaderBuilder::new()
            .delimiter(DELIMITER)
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);
        Self {
            inner,
            record: ByteRecord::new(),
            rows_read: 0,
        }
    }

    /// Records returned so far
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Next decoded record, or `None` at end of input
    pub fn read_record(&mut self) -> Result<Option<RawRecord>> {
        if !self.inner.read_byte_record(&mut self.record)? {
            return Ok(None);
        }
        self.rows_read += 1;
        Ok(Some(self.record.iter().map(decode_field).collect()))
    }

    /// Up to `max_rows` records; fewer only at end of input
    pub fn read_window(&mut self, max_rows: usize) -> Result<Vec<RawRecord>> {
        let mut window = Vec::with_capacity(max_rows.min(PREALLOC_ROWS));
        while window.len() < max_rows {
            match self.read_record()? {
                Some(record) => window.push(record),
                None => break,
            }
        }
        Ok(window)
    }

    pub fn read_all(&mut self) -> Result<Vec<RawRecord>> {
        self.read_window(usize::MAX)
    }

    /// Iterate over consecutive windows of `size` records
    pub fn windows(self, size: usize) -> Windows<R> {
        Windows {
            reader: self,
            size: size.max(1),
            done: false,
        }
    }
}

/// Consecutive fixed-size windows over a [`RecordReader`]
///
/// Stops after the first window shorter than the window size, and never
/// yields an empty window.
pub struct Windows<R: Read> {
    reader: RecordReader<R>,
    size: usize,
    done: bool,
}

impl<R: Read> Windows<R> {
    pub fn rows_read(&self) -> u64 {
        self.reader.rows_read()
    }
}

impl<R: Read> Iterator for Windows<R> {
    type Item = Result<Vec<RawRecord>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.read_window(self.size) {
            Ok(window) if window.is_empty() => {
                self.done = true;
                None
            },
            Ok(window) => {
                self.done = window.len() < self.size;
                Some(Ok(window))
            },
            Err(e) => {
                self.done = true;
                Some(Err(e))
            },
        }
    }
}

/// ISO-8859-1: every byte maps to the code point of the same value
///
/// Not windows-1252, which would remap 0x80..=0x9F.
fn decode_field(bytes: &[u8]) -> String {
    encoding_rs::mem::decode_latin1(bytes).into_owned()
}

/// Count lines in a file without decoding it
///
/// A final line without a trailing newline still counts.
pub fn count_lines(path: &Path) -> Result<u64> {
    let mut reader = BufReader::with_capacity(READ_BUFFER, File::open(path)?);
    let mut lines = 0u64;
    let mut last = None;

    loop {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            break;
        }
        lines += buf.iter().filter(|&&b| b == b'\n').count() as u64;
        last = buf.last().copied();
        let len = buf.len();
        reader.consume(len);
    }

    if matches!(last, Some(b) if b != b'\n') {
        lines += 1;
    }
    Ok(lines)
}

/// Windows needed to cover `rows` records
pub fn window_count(rows: u64, window: usize) -> u64 {
    rows.div_ceil(window.max(1) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn numbered(rows: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for i in 0..rows {
            writeln!(out, "\"{:08}\";\"ROW {}\"", i, i).unwrap();
        }
        out
    }

    #[test]
    fn test_decodes_latin1_fields() {
        // "SÃO PAULO" and "ÁGUA" in ISO-8859-1
        let bytes = b"\"7107\";\"S\xc3O PAULO\"\n\"1\";\"\xc1GUA\"\n".to_vec();
        let mut reader = RecordReader::from_reader(Cursor::new(bytes));

        assert_eq!(reader.read_record().unwrap().unwrap(), vec!["7107", "SÃO PAULO"]);
        assert_eq!(reader.read_record().unwrap().unwrap(), vec!["1", "ÁGUA"]);
        assert!(reader.read_record().unwrap().is_none());
    }

    #[test]
    fn test_c1_control_bytes_map_one_to_one() {
        let bytes = b"\"1\";\"A\x80B\x96C\x9f\"\n".to_vec();
        let rows = RecordReader::from_reader(Cursor::new(bytes)).read_all().unwrap();
        assert_eq!(rows[0][1], "A\u{80}B\u{96}C\u{9f}");
        assert!(!rows[0][1].contains('€'));
    }

    #[test]
    fn test_semicolon_separated_without_header() {
        let bytes = b"\"00000000\";\"BANCO DO BRASIL SA\";\"2038\";\"10\";\"120000000000,00\";\"05\";\"\"\n";
        let rows = RecordReader::from_reader(Cursor::new(bytes.to_vec())).read_all().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].len(), 7);
        assert_eq!(rows[0][4], "120000000000,00");
        assert_eq!(rows[0][6], "");
    }

    #[test]
    fn test_windows_cover_file_in_order() {
        let total = 25;
        let size = 10;
        let windows: Vec<Vec<RawRecord>> = RecordReader::from_reader(Cursor::new(numbered(total)))
            .windows(size)
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(windows.len() as u64, window_count(total as u64, size));
        assert_eq!(windows.iter().map(Vec::len).collect::<Vec<_>>(), vec![10, 10, 5]);

        let flattened: Vec<String> = windows.into_iter().flatten().map(|r| r[0].clone()).collect();
        let expected: Vec<String> = (0..total).map(|i| format!("{:08}", i)).collect();
        assert_eq!(flattened, expected);
    }

    #[test]
    fn test_evenly_divisible_windows() {
        let windows: Vec<usize> = RecordReader::from_reader(Cursor::new(numbered(20)))
            .windows(10)
            .map(|w| w.unwrap().len())
            .collect();
        assert_eq!(windows, vec![10, 10]);
    }

    #[test]
    fn test_empty_input_yields_no_windows() {
        let mut windows = RecordReader::from_reader(Cursor::new(Vec::new())).windows(10);
        assert!(windows.next().is_none());
        assert_eq!(windows.rows_read(), 0);
    }

    #[test]
    fn test_count_lines() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&numbered(7)).unwrap();
        assert_eq!(count_lines(file.path()).unwrap(), 7);

        file.write_all(b"\"tail\";\"no newline\"").unwrap();
        assert_eq!(count_lines(file.path()).unwrap(), 8);
    }

    #[test]
    fn test_window_count() {
        assert_eq!(window_count(0, 10), 0);
        assert_eq!(window_count(10, 10), 1);
        assert_eq!(window_count(11, 10), 2);
        assert_eq!(window_count(2_500_000, 1_000_000), 3);
    }
}
