// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Mail collaborator.
//
// The daemon never talks SMTP itself.  `OutboxMailer` spools each message
// as a PDF plus a JSON envelope; an external relay picks them up and sends
// them.  The envelope is written last, so its presence marks a complete
// message.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use greenbar_core::error::{GreenbarError, Result};

/// A message with one PDF attachment.
#[derive(Debug, Clone)]
pub struct MailMessage {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub body: String,
    pub attachment_name: String,
    pub attachment: Vec<u8>,
}

/// Sends finished documents to their owners.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &MailMessage) -> Result<()>;
}

/// JSON envelope written next to the spooled attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEnvelope {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub body: String,
    pub attachment_name: String,
    /// File name of the spooled PDF within the outbox directory.
    pub attachment_file: String,
}

/// Mailer that spools messages into a directory.
#[derive(Debug, Clone)]
pub struct OutboxMailer {
    dir: PathBuf,
}

impl OutboxMailer {
    /// Use `dir` as the outbox, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl Mailer for OutboxMailer {
    #[instrument(skip(self, message), fields(to = %message.to))]
    async fn send(&self, message: &MailMessage) -> Result<()> {
        let id = Uuid::new_v4();
        let pdf_name = format!("{id}.pdf");
        let envelope = OutboxEnvelope {
            to: message.to.clone(),
            from: message.from.clone(),
            subject: message.subject.clone(),
            body: message.body.clone(),
            attachment_name: message.attachment_name.clone(),
            attachment_file: pdf_name.clone(),
        };
        let json = serde_json::to_vec_pretty(&envelope)?;

        tokio::fs::write(self.dir.join(&pdf_name), &message.attachment)
            .await
            .map_err(|e| GreenbarError::Delivery(format!("spool attachment: {e}")))?;
        tokio::fs::write(self.dir.join(format!("{id}.json")), json)
            .await
            .map_err(|e| GreenbarError::Delivery(format!("spool envelope: {e}")))?;

        debug!(%id, "message spooled");
        Ok(())
    }
}
