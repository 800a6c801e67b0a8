// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Delivery notifier: archives each finished document and mails it to the
// account owner.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use greenbar_core::error::{GreenbarError, Result};
use greenbar_core::types::Account;
use greenbar_document::RenderedDocument;
use greenbar_store::DocumentArchive;

use crate::job::ParsedJob;
use crate::mailer::{MailMessage, Mailer};

/// Where a delivered document ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub archived: PathBuf,
    /// `false` when the account opted out of email.
    pub mailed: bool,
}

/// Hands finished documents to the archive and the mail collaborator.
pub struct DeliveryNotifier {
    archive: DocumentArchive,
    mailer: Arc<dyn Mailer>,
    from: String,
    contact: Option<String>,
}

impl DeliveryNotifier {
    pub fn new(archive: DocumentArchive, mailer: Arc<dyn Mailer>, from: impl Into<String>) -> Self {
        Self {
            archive,
            mailer,
            from: from.into(),
            contact: None,
        }
    }

    /// Name an administrator address at the foot of every message.
    pub fn with_contact(mut self, contact: impl Into<String>) -> Self {
        let contact = contact.into();
        self.contact = (!contact.is_empty()).then_some(contact);
        self
    }

    /// Archive `doc` and, unless the account opted out, mail it.
    ///
    /// The document is archived first so it stays retrievable whatever
    /// happens to the mail.  Failures come back as `Delivery` errors; the
    /// job is not retried here.
    pub async fn deliver(
        &self,
        account: &Account,
        job: &ParsedJob,
        doc: &RenderedDocument,
    ) -> Result<DeliveryReceipt> {
        let archive = self.archive.clone();
        let bytes = doc.bytes.clone();
        let archived = tokio::task::spawn_blocking(move || archive.store(&bytes))
            .await
            .map_err(|e| GreenbarError::Delivery(format!("archive task failed: {e}")))?
            .map_err(|e| GreenbarError::Delivery(format!("archive document: {e}")))?;

        if account.email_opt_out {
            info!(job_id = %job.id, email = %account.email, "email opt-out; document archived only");
            return Ok(DeliveryReceipt {
                archived,
                mailed: false,
            });
        }

        let message = self.compose(account, job, doc);
        if let Err(e) = self.mailer.send(&message).await {
            warn!(job_id = %job.id, email = %account.email, error = %e, "mail hand-off failed");
            return Err(match e {
                GreenbarError::Delivery(_) => e,
                other => GreenbarError::Delivery(other.to_string()),
            });
        }

        info!(job_id = %job.id, email = %account.email, pages = doc.pages, "document mailed");
        Ok(DeliveryReceipt {
            archived,
            mailed: true,
        })
    }

    fn compose(&self, account: &Account, job: &ParsedJob, doc: &RenderedDocument) -> MailMessage {
        let plural = if doc.pages == 1 { "" } else { "s" };
        let mut body = format!(
            "Your print job {} ({} page{plural}) is attached.\n",
            job.job_name, doc.pages
        );
        if let Some(owner) = &job.owner {
            body.push_str(&format!("Submitted by: {owner}\n"));
        }
        if let Some(host) = &job.host {
            body.push_str(&format!("From host: {host}\n"));
        }
        if let Some(contact) = &self.contact {
            body.push_str(&format!("\nQuestions about this printer: {contact}\n"));
        }

        MailMessage {
            to: account.email.clone(),
            from: self.from.clone(),
            subject: format!("Print job: {}", job.job_name),
            body,
            attachment_name: format!("{}.pdf", attachment_stem(&job.job_name)),
            attachment: doc.bytes.clone(),
        }
    }
}

/// File-name-safe version of a client-declared job name.
fn attachment_stem(job_name: &str) -> String {
    let stem: String = job_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(64)
        .collect();
    if stem.is_empty() {
        "printout".to_string()
    } else {
        stem
    }
}
