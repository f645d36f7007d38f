// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! lf-corpus: the sample corpus reader — loads an ordered `(id, text)`
//! sequence from a tabular source, filtering empty/NaN rows, matching
//! the original `DatasetLoader`'s `ID`/`Text` columns.

use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("corpus source not found: {0}")]
    NotFound(std::path::PathBuf),
    #[error("failed to read corpus: {0}")]
    Csv(#[from] csv::Error),
    #[error("corpus is missing required column(s): {0:?}")]
    MissingColumns(Vec<&'static str>),
    #[error("unsupported corpus file extension: {0}")]
    UnsupportedExtension(String),
    #[cfg(feature = "xlsx")]
    #[error("failed to read xlsx corpus: {0}")]
    Xlsx(#[from] calamine::Error),
}

/// One labeled unit of work: a stable `id` and the `text` to annotate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub id: String,
    pub text: String,
}

/// An immutable, ordered, position-indexed sequence of samples.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    samples: Vec<Sample>,
}

impl Corpus {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample at `index` (0-based), the position a worker's completed
    /// count indexes into. `None` once the corpus is exhausted.
    pub fn get(&self, index: usize) -> Option<&Sample> {
        self.samples.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    fn from_rows(rows: Vec<(String, String)>) -> Self {
        let samples = rows
            .into_iter()
            .filter(|(id, text)| is_present(id) && is_present(text))
            .map(|(id, text)| Sample { id, text })
            .collect();
        Self { samples }
    }

    /// Loads a CSV corpus. Header matching is case-insensitive; `ID`
    /// and `Text` (or `id`/`text`) must both be present.
    pub fn from_csv(path: impl AsRef<Path>) -> Result<Self, CorpusError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(CorpusError::NotFound(path.to_path_buf()));
        }
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
        let headers = reader.headers()?.clone();
        let id_col = find_column(&headers, "id").ok_or(CorpusError::MissingColumns(vec!["ID"]))?;
        let text_col = find_column(&headers, "text").ok_or(CorpusError::MissingColumns(vec!["Text"]))?;

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let id = record.get(id_col).unwrap_or("").to_string();
            let text = record.get(text_col).unwrap_or("").to_string();
            rows.push((id, text));
        }
        let original_count = rows.len();
        let corpus = Self::from_rows(rows);
        let removed = original_count - corpus.len();
        if removed > 0 {
            tracing::info!(removed, "filtered rows with missing id or text from corpus");
        }
        Ok(corpus)
    }

    /// Loads an XLSX corpus from its first sheet. Requires the `xlsx`
    /// feature.
    #[cfg(feature = "xlsx")]
    pub fn from_xlsx(path: impl AsRef<Path>) -> Result<Self, CorpusError> {
        use calamine::{open_workbook_auto, Data, Reader};

        let path = path.as_ref();
        if !path.is_file() {
            return Err(CorpusError::NotFound(path.to_path_buf()));
        }
        let mut workbook = open_workbook_auto(path)?;
        let sheet_name = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| CorpusError::MissingColumns(vec!["ID", "Text"]))?;
        let range = workbook.worksheet_range(&sheet_name)?;
        let mut rows = range.rows();
        let header_row = rows.next().ok_or(CorpusError::MissingColumns(vec!["ID", "Text"]))?;
        let headers: Vec<String> = header_row.iter().map(cell_to_string).collect();
        let id_col = headers.iter().position(|h| h.eq_ignore_ascii_case("id")).ok_or(CorpusError::MissingColumns(vec!["ID"]))?;
        let text_col =
            headers.iter().position(|h| h.eq_ignore_ascii_case("text")).ok_or(CorpusError::MissingColumns(vec!["Text"]))?;

        let mut pairs = Vec::new();
        for row in rows {
            let id = row.get(id_col).map(cell_to_string).unwrap_or_default();
            let text = row.get(text_col).map(cell_to_string).unwrap_or_default();
            pairs.push((id, text));
        }
        Ok(Self::from_rows(pairs))
    }

    /// Dispatches on file extension: `.csv` or `.xlsx`/`.xls` (the
    /// latter only with the `xlsx` feature enabled).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CorpusError> {
        let path = path.as_ref();
        match path.extension().and_then(|ext| ext.to_str()).map(|ext| ext.to_ascii_lowercase()) {
            Some(ext) if ext == "csv" => Self::from_csv(path),
            #[cfg(feature = "xlsx")]
            Some(ext) if ext == "xlsx" || ext == "xls" => Self::from_xlsx(path),
            Some(ext) => Err(CorpusError::UnsupportedExtension(ext)),
            None => Err(CorpusError::UnsupportedExtension(String::new())),
        }
    }
}

#[cfg(feature = "xlsx")]
fn cell_to_string(cell: &calamine::Data) -> String {
    use calamine::Data;
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

fn find_column(headers: &csv::StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h.eq_ignore_ascii_case(name))
}

/// Matches the original loader's NaN/empty filter: present means
/// non-empty after trimming and not the literal string `"nan"`.
fn is_present(value: &str) -> bool {
    let trimmed = value.trim();
    !trimmed.is_empty() && !trimmed.eq_ignore_ascii_case("nan")
}
