use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::record::LINE_ENDING;
use crate::rotation::RotationStrategy;
use crate::{Error, LogRecord, Result};

/// What a write did to the target file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteAction {
    /// The file did not exist and was created.
    Created,
    /// The data was appended.
    Appended,
    /// The old contents were rotated away and the file rewritten.
    Rotated,
    /// Rotation failed and the data was appended instead.
    RotationFailed,
}

/// Writes drained records to the target file, rotating it when it grows past
/// the size limit.
#[derive(Debug)]
pub struct FileWriter {
    /// Target log file.
    path: PathBuf,
    /// Rotate once the file would reach this many bytes.
    file_size: u64,
    strategy: RotationStrategy,
}

impl FileWriter {
    pub fn new(path: PathBuf, file_size: u64, strategy: RotationStrategy) -> Self {
        Self {
            path,
            file_size,
            strategy,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `records` in order, one line each.
    ///
    /// - target absent: create parent directories and the file;
    /// - current size plus new data below the limit: append;
    /// - otherwise: rotate, then overwrite with the new data.
    ///
    /// Rotation failures are handed to `report` rather than returned; only
    /// errors that lose the new data are returned.
    pub async fn write(&self, records: &[LogRecord], report: impl Fn(Error)) -> Result<WriteAction> {
        let data = render(records);

        let current = match fs::metadata(&self.path).await {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.create(&data).await?;
                return Ok(WriteAction::Created);
            }
            Err(e) => return Err(e.into()),
        };

        if current + (data.len() as u64) < self.file_size {
            self.append(&data).await?;
            return Ok(WriteAction::Appended);
        }

        match self.strategy.rotate(&self.path).await {
            Ok(()) => {
                fs::write(&self.path, &data).await?;
                Ok(WriteAction::Rotated)
            }
            Err(e) if self.strategy.overwrite_on_failure() => {
                report(e);
                fs::write(&self.path, &data).await?;
                Ok(WriteAction::Rotated)
            }
            Err(e) => {
                report(e);
                self.append(&data).await?;
                Ok(WriteAction::RotationFailed)
            }
        }
    }

    async fn create(&self, data: &[u8]) -> io::Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&self.path, data).await
    }

    async fn append(&self, data: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path).await?;
        file.write_all(data).await?;
        file.flush().await
    }
}

fn render(records: &[LogRecord]) -> Vec<u8> {
    let capacity = records.iter().map(LogRecord::byte_len).sum::<u64>() as usize;
    let mut data = Vec::with_capacity(capacity);
    for record in records {
        data.extend_from_slice(record.line().as_bytes());
        data.extend_from_slice(LINE_ENDING.as_bytes());
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Level;
    use crate::notify::ChannelSink;
    use crate::rotation::archive_dir;
    use std::sync::{Arc, Mutex};

    fn records(lines: &[&str]) -> Vec<LogRecord> {
        lines
            .iter()
            .enumerate()
            .map(|(i, line)| LogRecord::new(i as u64, Level::Log, *line))
            .collect()
    }

    fn no_errors(e: Error) {
        panic!("unexpected error: {}", e);
    }

    #[tokio::test]
    async fn test_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/inner/app.log");
        let writer = FileWriter::new(path.clone(), 1024, RotationStrategy::Archive);

        let action = writer.write(&records(&["hello"]), no_errors).await.unwrap();
        assert_eq!(action, WriteAction::Created);
        assert_eq!(fs::read_to_string(&path).await.unwrap(), format!("hello{}", LINE_ENDING));
    }

    #[tokio::test]
    async fn test_appends_below_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        let writer = FileWriter::new(path.clone(), 1024, RotationStrategy::Archive);

        writer.write(&records(&["one"]), no_errors).await.unwrap();
        let action = writer.write(&records(&["two"]), no_errors).await.unwrap();
        assert_eq!(action, WriteAction::Appended);
        assert_eq!(
            fs::read_to_string(&path).await.unwrap(),
            format!("one{0}two{0}", LINE_ENDING)
        );
    }

    #[tokio::test]
    async fn test_rotates_at_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "0123456789").await.unwrap();

        // 10 existing bytes + "abcd\n" reaches the 15 byte limit exactly.
        let limit = 10 + 4 + LINE_ENDING.len() as u64;
        let writer = FileWriter::new(path.clone(), limit, RotationStrategy::Archive);
        let action = writer.write(&records(&["abcd"]), no_errors).await.unwrap();

        assert_eq!(action, WriteAction::Rotated);
        assert_eq!(fs::read_to_string(&path).await.unwrap(), format!("abcd{}", LINE_ENDING));
        let archive = archive_dir(&path).unwrap().join("app.log.gz");
        assert!(archive.exists());
    }

    #[tokio::test]
    async fn test_failed_export_still_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "old contents").await.unwrap();

        let (sink, receiver) = ChannelSink::new(1);
        drop(receiver);
        let strategy = RotationStrategy::new(Some(Arc::new(sink)), None);
        let writer = FileWriter::new(path.clone(), 4, strategy);

        let reported = Mutex::new(Vec::new());
        let action = writer
            .write(&records(&["fresh"]), |e| reported.lock().unwrap().push(e.to_string()))
            .await
            .unwrap();

        assert_eq!(action, WriteAction::Rotated);
        assert_eq!(fs::read_to_string(&path).await.unwrap(), format!("fresh{}", LINE_ENDING));
        assert_eq!(reported.lock().unwrap().len(), 1);
    }
}
