//! CSV Connector - delimited text to a dataset

use crate::dataset::{Dataset, Value};
use crate::error::{DatasetError, IngestError};
use crate::ingestion::DatasetSource;
use csv::ReaderBuilder;

/// How delimited text is split into cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DelimitedMode {
    /// Split on newline then on every comma. Quoted commas and embedded newlines are not
    /// understood; rows they break are rejected as ragged.
    Naive,
    /// RFC 4180 quoting through the `csv` reader.
    #[default]
    Quoted,
}

pub struct CsvConnector {
    csv_text: String,
    mode: DelimitedMode,
}

impl CsvConnector {
    pub fn new(csv_text: String) -> Self {
        Self {
            csv_text,
            mode: DelimitedMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: DelimitedMode) -> Self {
        self.mode = mode;
        self
    }

    fn parse_naive(&self) -> Result<Dataset, IngestError> {
        let mut lines = self
            .csv_text
            .lines()
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.trim().is_empty());

        let headers: Vec<String> = match lines.next() {
            Some(line) => line.split(',').map(|h| h.trim().to_string()).collect(),
            None => return Err(DatasetError::NoHeaders.into()),
        };

        let rows = lines
            .map(|line| line.split(',').map(Value::infer).collect())
            .collect();

        Ok(Dataset::new(headers, rows)?)
    }

    fn parse_quoted(&self) -> Result<Dataset, IngestError> {
        // flexible so ragged records reach Dataset::new and get a row-numbered error
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(self.csv_text.as_bytes());

        let headers = rdr
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect::<Vec<_>>();
        if headers.is_empty() {
            return Err(DatasetError::NoHeaders.into());
        }

        let mut rows = Vec::new();
        for result in rdr.records() {
            let record = result?;
            rows.push(record.iter().map(Value::infer).collect());
        }

        Ok(Dataset::new(headers, rows)?)
    }
}

impl DatasetSource for CsvConnector {
    fn source_type(&self) -> &str {
        "csv"
    }

    fn load(&self) -> Result<Dataset, IngestError> {
        match self.mode {
            DelimitedMode::Naive => self.parse_naive(),
            DelimitedMode::Quoted => self.parse_quoted(),
        }
    }
}
