//! Streaming CSV row reader.
//!
//! Rows are pulled one at a time from a buffered file handle, so memory stays
//! flat regardless of file size. The header is checked when the reader is
//! opened: a file that lacks any of [`REQUIRED_COLUMNS`] yields no rows at
//! all.
//!
//! Fields are read as bytes and decoded lossily, so a cell in a legacy
//! encoding degrades to replacement characters instead of failing the file.

use std::borrow::Cow;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use csv::{ByteRecord, Trim};
use thiserror::Error;

use crate::sanitize::normalize_email;

/// Columns every upload must carry. Order is irrelevant; extra columns are
/// ignored.
pub const REQUIRED_COLUMNS: [&str; 4] = ["name", "email", "phone", "company"];

#[derive(Error, Debug)]
pub enum ReaderError {
    /// The header lacks one or more required columns.
    #[error("Invalid CSV format. Missing columns: {}", missing.join(", "))]
    MissingColumns { missing: Vec<String> },

    #[error("Failed to open CSV file '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl ReaderError {
    /// True for header problems, which no retry can fix.
    pub fn is_structural(&self) -> bool {
        matches!(self, ReaderError::MissingColumns { .. })
    }
}

/// Field values of one data row as they appear in the file (trimmed).
/// Empty cells and cells missing from short rows are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
}

/// A data row with its zero-based position among data rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvRow {
    pub index: usize,
    pub raw: RawRow,
}

impl CsvRow {
    /// One-based line number including the header line.
    pub fn row_number(&self) -> u64 {
        self.index as u64 + 2
    }
}

/// Positions of the required columns within the header.
#[derive(Debug, Clone, Copy)]
struct ColumnIndex {
    name: usize,
    email: usize,
    phone: usize,
    company: usize,
}

impl ColumnIndex {
    fn from_headers(headers: &ByteRecord) -> Result<Self, ReaderError> {
        let position = |column: &str| headers.iter().position(|h| h == column.as_bytes());
        let found = REQUIRED_COLUMNS.map(position);

        match found {
            [Some(name), Some(email), Some(phone), Some(company)] => Ok(Self {
                name,
                email,
                phone,
                company,
            }),
            _ => Err(ReaderError::MissingColumns {
                missing: REQUIRED_COLUMNS
                    .iter()
                    .zip(found)
                    .filter(|(_, idx)| idx.is_none())
                    .map(|(column, _)| column.to_string())
                    .collect(),
            }),
        }
    }

    fn raw_row(&self, record: &ByteRecord) -> RawRow {
        let field = |idx: usize| {
            record
                .get(idx)
                .filter(|value| !value.is_empty())
                .map(|value| decode(value).into_owned())
        };
        RawRow {
            name: field(self.name),
            email: field(self.email),
            phone: field(self.phone),
            company: field(self.company),
        }
    }
}

fn decode(field: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(field)
}

fn open_csv(path: &Path) -> Result<csv::Reader<BufReader<File>>, ReaderError> {
    let file = File::open(path).map_err(|e| ReaderError::Open {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(BufReader::new(file)))
}

/// Opens `path` and validates its header. `None` means the file has no header
/// at all (zero bytes or only blank lines) and therefore no rows.
fn open_validated(
    path: &Path,
) -> Result<Option<(csv::Reader<BufReader<File>>, ColumnIndex)>, ReaderError> {
    let mut reader = open_csv(path)?;
    let headers = reader.byte_headers()?.clone();
    if headers.iter().all(<[u8]>::is_empty) {
        return Ok(None);
    }
    let columns = ColumnIndex::from_headers(&headers)?;
    Ok(Some((reader, columns)))
}

/// Pull-based iterator over the data rows of a CSV file.
pub struct RowReader {
    inner: Option<(csv::Reader<BufReader<File>>, ColumnIndex)>,
    record: ByteRecord,
    next_index: usize,
    finished: bool,
}

impl RowReader {
    /// Opens the file and checks its header. Fails with
    /// [`ReaderError::MissingColumns`] before producing any row.
    pub fn open(path: &Path) -> Result<Self, ReaderError> {
        Ok(Self {
            inner: open_validated(path)?,
            record: ByteRecord::new(),
            next_index: 0,
            finished: false,
        })
    }
}

impl Iterator for RowReader {
    type Item = Result<CsvRow, ReaderError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let Some((reader, columns)) = self.inner.as_mut() else {
            self.finished = true;
            return None;
        };

        match reader.read_byte_record(&mut self.record) {
            Ok(true) => {
                let row = CsvRow {
                    index: self.next_index,
                    raw: columns.raw_row(&self.record),
                };
                self.next_index += 1;
                Some(Ok(row))
            }
            Ok(false) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(ReaderError::Csv(e)))
            }
        }
    }
}

/// Counts data rows without decoding fields. Agrees with the number of rows
/// [`RowReader`] yields for the same file.
pub fn count_rows(path: &Path) -> Result<u64, ReaderError> {
    let Some((mut reader, _)) = open_validated(path)? else {
        return Ok(0);
    };
    let mut record = ByteRecord::new();
    let mut count = 0u64;
    while reader.read_byte_record(&mut record)? {
        count += 1;
    }
    Ok(count)
}

/// Streams the email column, returning every non-empty email normalized.
pub fn collect_emails(path: &Path) -> Result<Vec<String>, ReaderError> {
    let Some((mut reader, columns)) = open_validated(path)? else {
        return Ok(Vec::new());
    };
    let mut record = ByteRecord::new();
    let mut emails = Vec::new();
    while reader.read_byte_record(&mut record)? {
        if let Some(email) = record.get(columns.email) {
            let email = normalize_email(&decode(email));
            if !email.is_empty() {
                emails.push(email);
            }
        }
    }
    Ok(emails)
}
