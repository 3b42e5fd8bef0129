//! Delimited-file row source.
//!
//! Record boundaries are found here, one physical line per record unless a
//! quoted field spans lines, and each record is split into fields by `csv`.
//! A blank line is a record of zero fields: it reaches the dispatcher and is
//! counted under row length 0.

use crate::dispatch::Row;
use csvinsight_common::{CsvInsightError, DialectConfig, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// Header plus the rows that follow it in a delimited file.
pub struct DelimitedSource<R> {
    pub header: Vec<String>,
    pub rows: DelimitedRows<R>,
    pub input_bytes: Option<u64>,
}

pub struct DelimitedRows<R> {
    first: Option<Row>,
    records: RecordSplitter<R>,
}

impl<R: Read> Iterator for DelimitedRows<R> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(row) = self.first.take() {
            return Some(Ok(row));
        }
        self.records.next_row().transpose()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scan {
    StartField,
    InField,
    InQuoted,
    Escaped,
    AfterQuote,
}

/// Splits the input into raw records and parses each one with `csv`.
struct RecordSplitter<R> {
    input: BufReader<R>,
    fields: csv::ReaderBuilder,
    delimiter: u8,
    quote: Option<u8>,
    escape: Option<u8>,
}

impl<R: Read> RecordSplitter<R> {
    fn new(input: R, dialect: &DialectConfig) -> Result<Self> {
        let delimiter = ascii_byte("delimiter", dialect.delimiter)?;
        let quote = ascii_byte("quote", dialect.quote)?;
        let escape = dialect.escape.map(|c| ascii_byte("escape", c)).transpose()?;
        let mut fields = csv::ReaderBuilder::new();
        fields
            .has_headers(false)
            .flexible(true)
            .delimiter(delimiter)
            .quote(quote)
            .quoting(dialect.quoting)
            .escape(escape);
        Ok(Self {
            input: BufReader::with_capacity(1 << 16, input),
            fields,
            delimiter,
            quote: dialect.quoting.then_some(quote),
            escape,
        })
    }

    /// Whether `record` stops inside a quoted field.
    fn is_open(&self, record: &[u8]) -> bool {
        let Some(quote) = self.quote else {
            return false;
        };
        let mut state = Scan::StartField;
        for &b in record {
            state = match state {
                Scan::StartField if b == quote => Scan::InQuoted,
                Scan::StartField | Scan::InField | Scan::AfterQuote if b == self.delimiter => {
                    Scan::StartField
                }
                Scan::StartField | Scan::InField => Scan::InField,
                Scan::InQuoted if b == quote => Scan::AfterQuote,
                Scan::InQuoted if Some(b) == self.escape => Scan::Escaped,
                Scan::InQuoted | Scan::Escaped => Scan::InQuoted,
                Scan::AfterQuote if b == quote => Scan::InQuoted,
                Scan::AfterQuote => Scan::InField,
            };
        }
        matches!(state, Scan::InQuoted | Scan::Escaped)
    }

    fn next_record(&mut self) -> Result<Option<Vec<u8>>> {
        let mut record = Vec::new();
        loop {
            if self.input.read_until(b'\n', &mut record)? == 0 {
                if record.is_empty() {
                    return Ok(None);
                }
                break;
            }
            if !self.is_open(&record) {
                break;
            }
        }
        if record.last() == Some(&b'\n') {
            record.pop();
            if record.last() == Some(&b'\r') {
                record.pop();
            }
        }
        Ok(Some(record))
    }

    fn parse(&self, record: &[u8]) -> Result<Row> {
        if record.is_empty() {
            return Ok(Vec::new());
        }
        let mut reader = self.fields.from_reader(record);
        let mut fields = csv::StringRecord::new();
        reader.read_record(&mut fields).map_err(row_source_error)?;
        Ok(fields.iter().map(str::to_owned).collect())
    }

    fn next_row(&mut self) -> Result<Option<Row>> {
        match self.next_record()? {
            Some(record) => self.parse(&record).map(Some),
            None => Ok(None),
        }
    }
}

fn row_source_error(e: csv::Error) -> CsvInsightError {
    CsvInsightError::RowSource(e.to_string())
}

fn ascii_byte(what: &str, c: char) -> Result<u8> {
    if c.is_ascii() {
        Ok(c as u8)
    } else {
        Err(CsvInsightError::Configuration(format!(
            "{what} {c:?} must be a single ASCII character"
        )))
    }
}

/// Reads the header and first row of `input`.
///
/// An input without rows is [`CsvInsightError::EmptyInput`].
pub fn read_delimited<R: Read>(input: R, dialect: &DialectConfig) -> Result<DelimitedSource<R>> {
    let mut records = RecordSplitter::new(input, dialect)?;
    let header = records.next_row()?.ok_or(CsvInsightError::EmptyInput)?;
    let first = records.next_row()?.ok_or(CsvInsightError::EmptyInput)?;
    Ok(DelimitedSource {
        header,
        rows: DelimitedRows {
            first: Some(first),
            records,
        },
        input_bytes: None,
    })
}

pub fn open_delimited(path: &Path, dialect: &DialectConfig) -> Result<DelimitedSource<File>> {
    let file = File::open(path)?;
    let input_bytes = file.metadata()?.len();
    let mut source = read_delimited(file, dialect)?;
    source.input_bytes = Some(input_bytes);
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipe_dialect() -> DialectConfig {
        DialectConfig::default()
    }

    fn quoted_dialect() -> DialectConfig {
        DialectConfig {
            delimiter: ',',
            quoting: true,
            ..Default::default()
        }
    }

    fn rows_of(input: &str, dialect: &DialectConfig) -> Vec<Row> {
        let source = read_delimited(input.as_bytes(), dialect).unwrap();
        source.rows.collect::<Result<Vec<_>>>().unwrap()
    }

    #[test]
    fn reads_header_and_ragged_rows() {
        let input = "name|age|fave_color\nMisha|33|red;yellow\nshort|row\n";
        let source = read_delimited(input.as_bytes(), &pipe_dialect()).unwrap();
        assert_eq!(source.header, vec!["name", "age", "fave_color"]);
        let rows: Vec<Row> = source.rows.collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec!["Misha", "33", "red;yellow"]);
        assert_eq!(rows[1].len(), 2);
    }

    #[test]
    fn blank_lines_are_empty_rows() {
        let rows = rows_of("a|b\n1|2\n\n3|4\r\n\n", &pipe_dialect());
        let lens: Vec<usize> = rows.iter().map(Vec::len).collect();
        assert_eq!(lens, vec![2, 0, 2, 0]);
        assert_eq!(rows[2], vec!["3", "4"]);
    }

    #[test]
    fn missing_final_newline_keeps_last_row() {
        let rows = rows_of("a|b\n1|2\n3|", &pipe_dialect());
        assert_eq!(rows, vec![vec!["1", "2"], vec!["3", ""]]);
    }

    #[test]
    fn header_without_rows_is_empty_input() {
        let err = read_delimited("a|b\n".as_bytes(), &pipe_dialect()).err().unwrap();
        assert!(matches!(err, CsvInsightError::EmptyInput));
        let err = read_delimited("".as_bytes(), &pipe_dialect()).err().unwrap();
        assert!(matches!(err, CsvInsightError::EmptyInput));
    }

    #[test]
    fn quoting_is_configurable() {
        let rows = rows_of("a,b\n\"x,y\",z\n", &quoted_dialect());
        assert_eq!(rows[0], vec!["x,y", "z"]);
    }

    #[test]
    fn quoted_field_may_span_lines() {
        let rows = rows_of("a,b\n\"one\n\ntwo\",z\n1,2\n", &quoted_dialect());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec!["one\n\ntwo", "z"]);
        assert_eq!(rows[1], vec!["1", "2"]);
    }

    #[test]
    fn quote_inside_unquoted_field_is_literal() {
        let rows = rows_of("a,b\nab\"c,d\n1,2\n", &quoted_dialect());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec!["ab\"c", "d"]);
    }

    #[test]
    fn quotes_are_plain_text_without_quoting() {
        let rows = rows_of("a|b\n\"x|y\n", &pipe_dialect());
        assert_eq!(rows[0], vec!["\"x", "y"]);
    }

    #[test]
    fn non_ascii_delimiter_rejected() {
        let dialect = DialectConfig {
            delimiter: '¦',
            ..Default::default()
        };
        let err = read_delimited("a\n1\n".as_bytes(), &dialect).err().unwrap();
        assert!(matches!(err, CsvInsightError::Configuration(_)));
    }
}
