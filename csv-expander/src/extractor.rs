use std::io::{self, BufRead};

use indexmap::IndexMap;

/// Field delimiter for header and data lines.
pub const DELIMITER: char = ';';

/// Joins the values of the key columns into one composite key.
pub const KEY_SEPARATOR: &str = "_";

const BYTE_ORDER_MARK: char = '\u{feff}';

/// Column name to value, in header order.
pub type ValueMap = IndexMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedRow {
    pub key: String,
    pub values: ValueMap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The row ends before the last key column.
    TooFewFields { found: usize, required: usize },
    /// The joined key column values are blank.
    BlankKey,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::TooFewFields { .. } => "too_few_fields",
            SkipReason::BlankKey => "blank_key",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRow {
    /// 1-based line number in the file, the header being line 1.
    pub line: usize,
    pub reason: SkipReason,
}

/// Why a whole file produced no rows even though it had a header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderRejection {
    MissingKeyColumns { missing: Vec<String>, columns: usize },
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub rows: Vec<ExtractedRow>,
    pub skipped: Vec<SkippedRow>,
    pub rejected: Option<HeaderRejection>,
}

/// Splits a semicolon-delimited file into rows keyed by the configured key columns.
///
/// The key columns are looked up by name in the header once per file. A file whose
/// header lacks one of them is rejected as a whole, without raising an error.
#[derive(Debug, Clone)]
pub struct TabularExtractor {
    key_columns: Vec<String>,
}

struct Layout {
    key_indices: Vec<usize>,
    required_fields: usize,
    value_columns: Vec<(usize, String)>,
}

impl TabularExtractor {
    pub fn new(key_columns: Vec<String>) -> Self {
        Self { key_columns }
    }

    pub fn key_columns(&self) -> &[String] {
        &self.key_columns
    }

    /// Reads the whole content. Only read failures, including invalid UTF-8, are errors.
    pub fn extract<R: BufRead>(&self, reader: R) -> io::Result<Extraction> {
        let mut extraction = Extraction::default();
        let mut lines = reader.lines();

        let Some(header_line) = lines.next().transpose()? else {
            return Ok(extraction);
        };
        let header = parse_header(&header_line);

        let layout = match self.layout(&header) {
            Ok(layout) => layout,
            Err(rejection) => {
                extraction.rejected = Some(rejection);
                return Ok(extraction);
            }
        };

        for (index, line) in lines.enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match extract_row(&line, &layout) {
                Ok(row) => extraction.rows.push(row),
                Err(reason) => extraction.skipped.push(SkippedRow {
                    line: index + 2,
                    reason,
                }),
            }
        }

        Ok(extraction)
    }

    fn layout(&self, header: &[String]) -> Result<Layout, HeaderRejection> {
        let mut key_indices = Vec::with_capacity(self.key_columns.len());
        let mut missing = Vec::new();
        for column in &self.key_columns {
            match header.iter().position(|name| name == column) {
                Some(index) => key_indices.push(index),
                None => missing.push(column.clone()),
            }
        }
        if !missing.is_empty() || key_indices.is_empty() {
            return Err(HeaderRejection::MissingKeyColumns {
                missing,
                columns: header.len(),
            });
        }

        let required_fields = key_indices.iter().max().map_or(0, |max| max + 1);
        let value_columns = header
            .iter()
            .enumerate()
            .filter(|(index, name)| !key_indices.contains(index) && !name.trim().is_empty())
            .map(|(index, name)| (index, name.clone()))
            .collect();

        Ok(Layout {
            key_indices,
            required_fields,
            value_columns,
        })
    }
}

/// Header names, without a leading byte order mark and without trailing blank names.
fn parse_header(line: &str) -> Vec<String> {
    let line = line.strip_prefix(BYTE_ORDER_MARK).unwrap_or(line);
    let mut names: Vec<String> = line.split(DELIMITER).map(str::to_string).collect();
    while names.last().is_some_and(|name| name.trim().is_empty()) {
        names.pop();
    }
    names
}

fn extract_row(line: &str, layout: &Layout) -> Result<ExtractedRow, SkipReason> {
    // Trailing empty fields are kept, unlike header names.
    let fields: Vec<&str> = line.split(DELIMITER).collect();
    if fields.len() < layout.required_fields {
        return Err(SkipReason::TooFewFields {
            found: fields.len(),
            required: layout.required_fields,
        });
    }

    let key = layout
        .key_indices
        .iter()
        .map(|&index| fields[index])
        .collect::<Vec<_>>()
        .join(KEY_SEPARATOR);
    if key.trim().is_empty() {
        return Err(SkipReason::BlankKey);
    }

    let mut values = ValueMap::with_capacity(layout.value_columns.len() + 2);
    for (index, name) in &layout.value_columns {
        let value = fields.get(*index).copied().unwrap_or_default();
        values.insert(name.clone(), value.to_string());
    }

    Ok(ExtractedRow { key, values })
}
