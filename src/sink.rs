use std::io::Write;

use anyhow::{Context, Result};

use crate::state::AnalysisReport;

/// Receives finished reports for persistence or display.
pub trait ResultSink {
    fn record(&mut self, report: &AnalysisReport) -> Result<()>;
}

/// Writes each report as one JSON object per line.
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ResultSink for JsonLinesSink<W> {
    fn record(&mut self, report: &AnalysisReport) -> Result<()> {
        serde_json::to_writer(&mut self.writer, report).context("serializing report")?;
        self.writer.write_all(b"\n").context("writing report")?;
        self.writer.flush().context("flushing report")?;
        Ok(())
    }
}
