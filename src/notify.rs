//! Notification sink used by the export rotation strategy.
//!
//! When a sink is attached to a logger, a file that reaches its size limit is
//! sent away as an attachment instead of being archived. Delivery (mail, chat,
//! object storage) is up to the sink implementation.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{Error, Result};

/// Body used when the template does not stage a text body.
pub const DEFAULT_TEXT: &str = "Please review the attachment.";
/// Body used when the template does not stage an HTML body.
pub const DEFAULT_HTML: &str = "<p>Please review the attachment.</p>";

/// Message fields staged for every exported file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationTemplate {
    /// Subject line.
    #[serde(default)]
    pub subject: Option<String>,
    /// Sender address.
    #[serde(default)]
    pub from: Option<String>,
    /// Recipients.
    #[serde(default)]
    pub to: Vec<String>,
    /// Plain text body.
    #[serde(default)]
    pub text: Option<String>,
    /// HTML body.
    #[serde(default)]
    pub html: Option<String>,
}

/// A file attached to a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// File name shown to the receiver.
    pub filename: String,
    /// Raw file contents.
    pub content: Bytes,
}

/// An outbound message carrying a rotated log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subject: Option<String>,
    pub from: Option<String>,
    pub to: Vec<String>,
    pub text: String,
    pub html: String,
    pub attachments: Vec<Attachment>,
}

impl Notification {
    /// Build a message from a template, filling in placeholder bodies.
    pub fn from_template(template: &NotificationTemplate) -> Self {
        Self {
            subject: template.subject.clone(),
            from: template.from.clone(),
            to: template.to.clone(),
            text: template
                .text
                .clone()
                .unwrap_or_else(|| DEFAULT_TEXT.to_string()),
            html: template
                .html
                .clone()
                .unwrap_or_else(|| DEFAULT_HTML.to_string()),
            attachments: Vec::new(),
        }
    }

    /// Drop previously staged attachments and attach `attachment` alone.
    pub fn with_only_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.clear();
        self.attachments.push(attachment);
        self
    }
}

/// Delivers exported log files.
#[async_trait]
pub trait NotificationSink: Send + Sync + 'static {
    /// Send the notification, resolving once delivery succeeded or failed.
    async fn send(&self, notification: Notification) -> Result<()>;
}

/// A sink that hands notifications to an in-process receiver.
///
/// The application owns the receiving end and delivers messages however it
/// likes; a dropped receiver makes every send fail.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::Sender<Notification>,
}

impl ChannelSink {
    /// Create a sink and the receiver notifications are delivered to.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl NotificationSink for ChannelSink {
    async fn send(&self, notification: Notification) -> Result<()> {
        self.sender
            .send(notification)
            .await
            .map_err(|_| Error::Notification("notification receiver dropped".to_string()))
    }
}
