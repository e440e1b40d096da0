use super::store::CrawlStatistics;
use crate::error::{Error, Result};
use std::io::Write;
use std::path::Path;

const HEADERS: [&str; 9] = [
    "owner", "name", "status", "total", "success", "failure", "left", "start", "exit",
];

/// Writes crawl counters as CSV, one row per owner.
pub struct CsvExporter<W: Write> {
    writer: csv::Writer<W>,
    headers_written: bool,
}

impl CsvExporter<std::fs::File> {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let writer = csv::Writer::from_path(path).map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self::from_writer(writer))
    }
}

impl<W: Write> CsvExporter<W> {
    pub fn new(inner: W) -> Self {
        Self::from_writer(csv::Writer::from_writer(inner))
    }

    fn from_writer(writer: csv::Writer<W>) -> Self {
        Self {
            writer,
            headers_written: false,
        }
    }

    pub fn write(&mut self, stats: &CrawlStatistics) -> Result<()> {
        if !self.headers_written {
            self.writer
                .write_record(HEADERS)
                .map_err(|e| Error::Internal(e.to_string()))?;
            self.headers_written = true;
        }

        let status = serde_json::to_value(stats.status())?;
        let record = [
            stats.owner.clone(),
            stats.name.clone().unwrap_or_default(),
            status.as_str().unwrap_or_default().to_string(),
            stats.total.to_string(),
            stats.success.to_string(),
            stats.failure.to_string(),
            stats.left().to_string(),
            stats.started_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
            stats.exited_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
        ];
        self.writer
            .write_record(&record)
            .map_err(|e| Error::Internal(e.to_string()))?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<W> {
        self.writer.flush()?;
        self.writer
            .into_inner()
            .map_err(|e| Error::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_header_once_and_derived_columns() {
        let mut first = CrawlStatistics::new("job1");
        first.name = Some("demo".to_string());
        first.total = 10;
        first.success = 3;
        first.failure = 2;
        let second = CrawlStatistics::new("job2");

        let mut exporter = CsvExporter::new(Vec::new());
        exporter.write(&first).unwrap();
        exporter.write(&second).unwrap();
        let output = String::from_utf8(exporter.finish().unwrap()).unwrap();

        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "owner,name,status,total,success,failure,left,start,exit");
        assert_eq!(lines[1], "job1,demo,pending,10,3,2,5,,");
        assert_eq!(lines[2], "job2,,pending,0,0,0,0,,");
    }
}
