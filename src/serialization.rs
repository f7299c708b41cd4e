//! Writing finished envelopes to storage.

use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::converter::SubjectBundle;
use crate::envelope::Envelope;
use crate::error::OutputError;

/// File name used by [`write_ndjson_file`].
pub const NDJSON_FILE_NAME: &str = "bundles.ndjson";

/// NDJSON (Newline Delimited JSON) writer
///
/// Writes one JSON document per line.
pub struct NdjsonWriter<W: Write> {
    writer: W,
}

impl<W: Write> NdjsonWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write a single document as an NDJSON line
    pub fn write<T: Serialize>(&mut self, document: &T) -> Result<(), OutputError> {
        let json = serde_json::to_string(document)?;
        writeln!(self.writer, "{}", json)?;
        Ok(())
    }

    pub fn write_all<T: Serialize>(&mut self, documents: &[T]) -> Result<(), OutputError> {
        for document in documents {
            self.write(document)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Write each subject's envelope as pretty JSON to `<dir>/<index>.json`.
///
/// Creates `dir` if needed and returns the written paths in subject order.
pub fn write_envelopes<P: AsRef<Path>>(
    dir: P,
    bundles: &[SubjectBundle],
) -> Result<Vec<PathBuf>, OutputError> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;

    let mut written = Vec::with_capacity(bundles.len());
    for bundle in bundles {
        let path = dir.join(format!("{}.json", bundle.index));
        let mut writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(&mut writer, &bundle.envelope)?;
        writer.flush()?;
        written.push(path);
    }

    info!(dir = %dir.display(), files = written.len(), "wrote envelopes");
    Ok(written)
}

/// Write all envelopes, one per line, to `<dir>/bundles.ndjson`.
pub fn write_ndjson_file<P: AsRef<Path>>(
    dir: P,
    bundles: &[SubjectBundle],
) -> Result<PathBuf, OutputError> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;

    let path = dir.join(NDJSON_FILE_NAME);
    let envelopes: Vec<&Envelope> = bundles.iter().map(|bundle| &bundle.envelope).collect();
    let mut writer = NdjsonWriter::new(BufWriter::new(File::create(&path)?));
    writer.write_all(&envelopes)?;
    writer.flush()?;

    info!(path = %path.display(), envelopes = bundles.len(), "wrote envelopes");
    Ok(path)
}
