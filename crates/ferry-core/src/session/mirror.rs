//! Local copy of a streamed job log.

use std::fs::File;
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};

use crate::state::InstanceRef;
use crate::transfer::layout::results_dir;

/// Writes every forwarded line to `<root>/<label-or-id>/<YYYYMMDD-HHMMSS>/<filename>`.
pub struct LogMirror {
    path: PathBuf,
    writer: LineWriter<File>,
}

impl LogMirror {
    pub fn create(
        local_root: &Path,
        instance: &InstanceRef,
        filename: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Self> {
        let dir = results_dir(local_root, instance, now)?;
        let path = dir.join(filename);
        let file = File::create(&path)
            .with_context(|| format!("Failed to create log mirror: {}", path.display()))?;
        tracing::info!(path = %path.display(), "mirroring remote log");
        Ok(Self {
            path,
            writer: LineWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_line(&mut self, line: &str) -> anyhow::Result<()> {
        writeln!(self.writer, "{line}")
            .with_context(|| format!("Failed to write log mirror: {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn mirror_lands_in_timestamped_dir() {
        let temp = TempDir::new().unwrap();
        let instance = InstanceRef::new("inst-9", "", "10.0.0.2");
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();
        let mut mirror = LogMirror::create(temp.path(), &instance, "run.log", now)
            .expect("mirror should be created");
        mirror.write_line("[START] hello").unwrap();
        mirror.write_line("[END] exit_code=0").unwrap();

        let expected = temp.path().join("inst-9/20240501-083000/run.log");
        assert_eq!(mirror.path(), expected);
        drop(mirror);
        let content = std::fs::read_to_string(expected).unwrap();
        assert_eq!(content, "[START] hello\n[END] exit_code=0\n");
    }
}
