use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::app::ports::RecordSink;
use crate::error::Result;
use crate::pipeline::processing::emit::CsvEmitter;
use crate::pipeline::processing::normalize::{CanonicalJobRecord, CanonicalNodeRecord};

/// Where emitted CSV goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Stdout,
    File(PathBuf),
}

/// File- or stdout-backed implementation of RecordSink
pub struct CsvOutputAdapter {
    target: OutputTarget,
    emitter: CsvEmitter,
}

impl CsvOutputAdapter {
    pub fn new(output: Option<&Path>, emitter: CsvEmitter) -> Self {
        let target = match output {
            Some(path) if path != Path::new("-") => OutputTarget::File(path.to_path_buf()),
            _ => OutputTarget::Stdout,
        };
        Self { target, emitter }
    }

    pub fn target(&self) -> &OutputTarget {
        &self.target
    }

    fn open(&self) -> Result<Box<dyn Write>> {
        match &self.target {
            OutputTarget::Stdout => Ok(Box::new(io::stdout().lock())),
            OutputTarget::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent)?;
                }
                info!(path = %path.display(), "Writing CSV output");
                Ok(Box::new(BufWriter::new(File::create(path)?)))
            }
        }
    }
}

impl RecordSink for CsvOutputAdapter {
    fn write_jobs(&mut self, jobs: &[CanonicalJobRecord]) -> Result<u64> {
        let writer = self.open()?;
        self.emitter.write_jobs(writer, jobs)
    }

    fn write_nodes(&mut self, nodes: &[CanonicalNodeRecord]) -> Result<u64> {
        let writer = self.open()?;
        self.emitter.write_nodes(writer, nodes)
    }
}
