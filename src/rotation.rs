use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_compression::tokio::write::GzipEncoder;
use bytes::Bytes;
use time::macros::format_description;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufReader};

use crate::notify::{Attachment, Notification, NotificationSink, NotificationTemplate};
use crate::record::local_now;
use crate::{Error, Result};

/// What happens to a log file that has reached its size limit.
#[derive(Clone)]
pub enum RotationStrategy {
    /// Compress the file into `<dir>/<YYYY-MM-DD>/<basename>.gz`.
    Archive,
    /// Send the file as an attachment through a notification sink.
    Export {
        /// Where the notification goes.
        sink: Arc<dyn NotificationSink>,
        /// Fields staged on every exported message.
        template: NotificationTemplate,
    },
}

impl RotationStrategy {
    /// Pick the strategy: a sink selects export, its absence selects archive.
    pub fn new(
        sink: Option<Arc<dyn NotificationSink>>,
        template: Option<NotificationTemplate>,
    ) -> Self {
        match sink {
            Some(sink) => Self::Export {
                sink,
                template: template.unwrap_or_default(),
            },
            None => Self::Archive,
        }
    }

    /// Move the current contents of `path` out of the way.
    ///
    /// The file itself is left untouched; the caller overwrites it afterwards.
    pub async fn rotate(&self, path: &Path) -> Result<()> {
        match self {
            Self::Archive => {
                let archive = archive(path).await?;
                tracing::info!(file = %path.display(), archive = %archive.display(), "log file archived");
                Ok(())
            }
            Self::Export { sink, template } => {
                export(path, sink.as_ref(), template).await?;
                tracing::info!(file = %path.display(), "log file exported");
                Ok(())
            }
        }
    }

    /// Whether the file is overwritten even though [`rotate`](Self::rotate) failed.
    ///
    /// A failed export still truncates; a failed archive keeps appending so the
    /// old contents are not lost.
    pub fn overwrite_on_failure(&self) -> bool {
        matches!(self, Self::Export { .. })
    }
}

impl fmt::Debug for RotationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Archive => f.write_str("Archive"),
            Self::Export { template, .. } => f
                .debug_struct("Export")
                .field("template", template)
                .finish_non_exhaustive(),
        }
    }
}

/// Directory archives of `path` are written to today.
pub fn archive_dir(path: &Path) -> io::Result<PathBuf> {
    let date = local_now()
        .format(format_description!("[year]-[month]-[day]"))
        .map_err(io::Error::other)?;
    Ok(parent_dir(path).join(date))
}

/// Gzip `path` into the first free archive name and return that name.
///
/// Returns only after the gzip stream has been shut down, so the archive is
/// complete before the source gets overwritten.
pub async fn archive(path: &Path) -> Result<PathBuf> {
    let dir = archive_dir(path)?;
    fs::create_dir_all(&dir).await?;

    let basename = basename(path);
    let (target, output) = create_archive_file(&dir, &basename).await?;

    let mut input = BufReader::new(File::open(path).await?);
    let mut encoder = GzipEncoder::new(output);
    tokio::io::copy_buf(&mut input, &mut encoder).await?;
    encoder.shutdown().await?;

    Ok(target)
}

/// Archive file names tried in order: `name.gz`, `name.1.gz`, `name.2.gz`, ...
pub fn archive_name(basename: &str, attempt: u32) -> String {
    if attempt == 0 {
        format!("{}.gz", basename)
    } else {
        format!("{}.{}.gz", basename, attempt)
    }
}

async fn create_archive_file(dir: &Path, basename: &str) -> io::Result<(PathBuf, File)> {
    let mut attempt = 0;
    loop {
        let candidate = dir.join(archive_name(basename, attempt));
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e),
        }
    }
}

async fn export(
    path: &Path,
    sink: &dyn NotificationSink,
    template: &NotificationTemplate,
) -> Result<()> {
    let content = fs::read(path).await?;
    let notification = Notification::from_template(template).with_only_attachment(Attachment {
        filename: basename(path),
        content: Bytes::from(content),
    });
    sink.send(notification).await.map_err(|e| match e {
        Error::Notification(_) => e,
        other => Error::Notification(other.to_string()),
    })
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn basename(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "log".to_string())
}
