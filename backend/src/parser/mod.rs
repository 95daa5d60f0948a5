//! CSV decoding with encoding and delimiter auto-detection.
//!
//! Turns raw bytes into [`RawRecord`]s (column name to cell text). No
//! dataset-specific rules live here; see [`crate::transform::cleaner`].

pub mod source;

use crate::models::RawRecord;

pub use source::{fingerprint_bytes, CsvSource, LoadedSource, SourceInfo, SourceSnapshot};

/// CSV parsing error with context
#[derive(Debug, Clone)]
pub struct CsvError {
    pub line: usize,
    pub column: Option<String>,
    pub message: String,
}

impl std::fmt::Display for CsvError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.column {
            Some(col) => write!(f, "Line {}, column '{}': {}", self.line, col, self.message),
            None => write!(f, "Line {}: {}", self.line, self.message),
        }
    }
}

impl std::error::Error for CsvError {}

impl CsvError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            column: None,
            message: message.into(),
        }
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }
}

impl From<csv::Error> for CsvError {
    fn from(err: csv::Error) -> Self {
        let line = err.position().map(|p| p.line() as usize).unwrap_or(0);
        CsvError::new(line, err.to_string())
    }
}

/// Result of parsing with metadata
#[derive(Debug, Clone)]
pub struct ParseResult {
    /// Parsed rows
    pub records: Vec<RawRecord>,
    /// Detected or used encoding
    pub encoding: String,
    /// Detected or used delimiter
    pub delimiter: char,
    /// Column headers
    pub headers: Vec<String>,
}

/// Detect the encoding of raw bytes using chardet
pub fn detect_encoding(bytes: &[u8]) -> String {
    let result = chardet::detect(bytes);
    let charset = result.0;

    // Normalize charset names
    match charset.to_lowercase().as_str() {
        "" | "ascii" | "utf-8" | "utf8" => "utf-8".to_string(),
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        _ => charset,
    }
}

/// Decode bytes to string using the specified encoding.
///
/// Unknown encodings and invalid UTF-8 fall back to lossy UTF-8.
pub fn decode_content(bytes: &[u8], encoding: &str) -> String {
    match encoding.to_lowercase().as_str() {
        "iso-8859-1" | "latin-1" | "latin1" => {
            encoding_rs::ISO_8859_15.decode(bytes).0.into_owned()
        }
        "windows-1252" | "cp1252" => encoding_rs::WINDOWS_1252.decode(bytes).0.into_owned(),
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Detect the delimiter by counting occurrences in the first line
pub fn detect_delimiter(content: &str) -> char {
    let first_line = content.lines().next().unwrap_or("");

    let separators = [',', ';', '\t', '|'];
    let mut best_sep = ',';
    let mut best_count = 0;

    for &sep in &separators {
        let count = first_line.matches(sep).count();
        if count > best_count {
            best_count = count;
            best_sep = sep;
        }
    }

    best_sep
}

/// Parse CSV text into raw records with an explicit delimiter.
///
/// Cells are trimmed, quoted fields may contain the delimiter, short rows
/// are padded with empty cells and blank rows are skipped.
///
/// # Example
/// ```ignore
/// use dietdata::parser::parse_csv;
///
/// let rows = parse_csv("name,diet\nSoup,vegan", ',').unwrap();
/// assert_eq!(rows[0]["name"], "Soup");
/// ```
pub fn parse_csv(content: &str, delimiter: char) -> Result<Vec<RawRecord>, CsvError> {
    parse_content(content, delimiter, "utf-8".to_string()).map(|r| r.records)
}

/// Parse CSV bytes with auto-detection of encoding and delimiter.
pub fn parse_bytes_auto(bytes: &[u8]) -> Result<ParseResult, CsvError> {
    let encoding = detect_encoding(bytes);
    let content = decode_content(bytes, &encoding);
    let delimiter = detect_delimiter(&content);
    parse_content(&content, delimiter, encoding)
}

/// Parse CSV text with explicit delimiter and return metadata.
pub fn parse_content(
    content: &str,
    delimiter: char,
    encoding: String,
) -> Result<ParseResult, CsvError> {
    let content = content.trim_start_matches('\u{feff}');
    if content.trim().is_empty() {
        return Err(CsvError::new(1, "Empty CSV file"));
    }

    let delimiter_byte = u8::try_from(delimiter)
        .map_err(|_| CsvError::new(1, format!("Unsupported delimiter '{}'", delimiter)))?;

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter_byte)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    if headers.iter().all(|h| h.is_empty()) {
        return Err(CsvError::new(1, "No headers found"));
    }

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        if row.iter().all(|cell| cell.is_empty()) {
            continue;
        }

        let record: RawRecord = headers
            .iter()
            .enumerate()
            .map(|(i, header)| (header.clone(), row.get(i).unwrap_or("").to_string()))
            .collect();
        records.push(record);
    }

    Ok(ParseResult {
        records,
        encoding,
        delimiter,
        headers,
    })
}
