//! Tardis `incremental_book_L2` CSV reading.
//!
//! Rows are handed out as raw strings; every semantic check happens in the
//! validator so that bad rows can be quarantined with their original text.

use crate::common::errors::{PipelineError, RowRef};
use csv::StringRecord;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

pub const TARDIS_L2_COLUMNS: [&str; 8] = [
    "exchange",
    "symbol",
    "timestamp",
    "local_timestamp",
    "is_snapshot",
    "side",
    "price",
    "amount",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Exchange = 0,
    Symbol = 1,
    Timestamp = 2,
    LocalTimestamp = 3,
    IsSnapshot = 4,
    Side = 5,
    Price = 6,
    Amount = 7,
}

impl Column {
    pub fn name(self) -> &'static str {
        TARDIS_L2_COLUMNS[self as usize]
    }
}

/// One CSV record, unparsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    pub row_index: u64,
    pub line_number: u64,
    pub fields: Vec<String>,
}

impl RawRow {
    pub fn new(row_index: u64, line_number: u64, fields: Vec<String>) -> Self {
        Self {
            row_index,
            line_number,
            fields,
        }
    }

    pub fn row_ref(&self) -> RowRef {
        RowRef::new(self.row_index, self.line_number)
    }

    pub fn field(&self, column: Column) -> Option<&str> {
        self.fields.get(column as usize).map(String::as_str)
    }

    /// Column name → original text, for quarantine records. Surplus
    /// fields are keyed `extra_{n}`.
    pub fn raw_fields(&self) -> BTreeMap<String, String> {
        self.fields
            .iter()
            .enumerate()
            .map(|(i, value)| {
                let key = match TARDIS_L2_COLUMNS.get(i) {
                    Some(name) => name.to_string(),
                    None => format!("extra_{}", i - TARDIS_L2_COLUMNS.len()),
                };
                (key, value.clone())
            })
            .collect()
    }
}

pub struct CsvRowSource<R: Read> {
    reader: csv::Reader<R>,
    record: StringRecord,
    next_row_index: u64,
}

impl CsvRowSource<File> {
    pub fn open(path: &Path) -> Result<Self, PipelineError> {
        let file = File::open(path)
            .map_err(|e| PipelineError::io(format!("open input {}", path.display()), e))?;
        Self::from_reader(file)
    }
}

impl<R: Read> CsvRowSource<R> {
    /// Wrap a reader and check the header line.
    pub fn from_reader(inner: R) -> Result<Self, PipelineError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(inner);

        let headers = reader.headers().map_err(|e| map_csv_error(e, None))?;
        if headers.is_empty() {
            return Err(PipelineError::schema_run("input is empty (no header line)"));
        }
        if headers.iter().ne(TARDIS_L2_COLUMNS.iter().copied()) {
            return Err(PipelineError::schema_run(format!(
                "unexpected header {:?}, expected {:?}",
                headers.iter().collect::<Vec<_>>(),
                TARDIS_L2_COLUMNS
            )));
        }

        Ok(Self {
            reader,
            record: StringRecord::new(),
            next_row_index: 0,
        })
    }

    pub fn rows_read(&self) -> u64 {
        self.next_row_index
    }

    /// Next data row. A row that cannot even be decoded as text is returned
    /// as a row-scoped error so the caller can apply its failure policy.
    pub fn next_row(&mut self) -> Option<Result<RawRow, PipelineError>> {
        let row_index = self.next_row_index;
        match self.reader.read_record(&mut self.record) {
            Ok(false) => None,
            Ok(true) => {
                self.next_row_index += 1;
                let line_number = self.record.position().map(|p| p.line()).unwrap_or(0);
                let fields = self.record.iter().map(str::to_string).collect();
                Some(Ok(RawRow::new(row_index, line_number, fields)))
            }
            Err(e) => {
                let is_row_error = !e.is_io_error();
                if is_row_error {
                    self.next_row_index += 1;
                }
                Some(Err(map_csv_error(e, Some(row_index))))
            }
        }
    }
}

impl<R: Read> Iterator for CsvRowSource<R> {
    type Item = Result<RawRow, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row()
    }
}

fn map_csv_error(err: csv::Error, row_index: Option<u64>) -> PipelineError {
    let line = err.position().map(|p| p.line()).unwrap_or(0);
    match err.into_kind() {
        csv::ErrorKind::Io(source) => PipelineError::io("read input", source),
        other => {
            let detail = format!("unreadable CSV record: {:?}", other);
            match row_index {
                Some(row_index) => PipelineError::schema_row(RowRef::new(row_index, line), detail),
                None => PipelineError::schema_run(detail),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "exchange,symbol,timestamp,local_timestamp,is_snapshot,side,price,amount\n";

    #[test]
    fn test_reads_rows_with_line_numbers() {
        let data = format!(
            "{}binance,BTCUSDT,1,100,true,bid,100.5,1\nbinance,BTCUSDT,2,200,false,ask,101,2\n",
            HEADER
        );
        let rows: Vec<RawRow> = CsvRowSource::from_reader(data.as_bytes())
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].row_index, 0);
        assert_eq!(rows[0].line_number, 2);
        assert_eq!(rows[1].line_number, 3);
        assert_eq!(rows[1].field(Column::Side), Some("ask"));
        assert_eq!(rows[1].field(Column::Price), Some("101"));
    }

    #[test]
    fn test_rejects_wrong_header() {
        let result = CsvRowSource::from_reader("a,b,c\n1,2,3\n".as_bytes());
        assert!(matches!(
            result,
            Err(PipelineError::SchemaViolation { row: None, .. })
        ));
    }

    #[test]
    fn test_rejects_empty_input() {
        assert!(CsvRowSource::from_reader("".as_bytes()).is_err());
    }

    #[test]
    fn test_short_rows_are_passed_through() {
        let data = format!("{}binance,BTCUSDT,1\n", HEADER);
        let row = CsvRowSource::from_reader(data.as_bytes())
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(row.fields.len(), 3);
        assert_eq!(row.field(Column::Price), None);
    }

    #[test]
    fn test_raw_fields_names_extras() {
        let row = RawRow::new(
            0,
            2,
            (0..9).map(|i| i.to_string()).collect::<Vec<_>>(),
        );
        let raw = row.raw_fields();
        assert_eq!(raw.get("exchange").map(String::as_str), Some("0"));
        assert_eq!(raw.get("amount").map(String::as_str), Some("7"));
        assert_eq!(raw.get("extra_0").map(String::as_str), Some("8"));
    }
}
