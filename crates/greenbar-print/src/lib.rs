// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Greenbar Print: the LPD listener and everything a received job passes
// through on its way to a mailed PDF: queue resolution, nuisance filtering,
// quota enforcement, bounded rendering, and delivery.  Also hosts the
// retention scheduler that expires stale accounts and documents.

pub mod delivery;
pub mod dispatcher;
pub mod job;
pub mod lpd;
pub mod lpd_server;
pub mod mailer;
pub mod nuisance;
pub mod pipeline;
pub mod quota;
pub mod resolver;
pub mod retention;

pub use delivery::{DeliveryNotifier, DeliveryReceipt};
pub use dispatcher::RenderDispatcher;
pub use job::{JobLimits, ParsedJob};
pub use lpd_server::{ConnectionLimits, LpdServer};
pub use mailer::{MailMessage, Mailer, OutboxMailer};
pub use nuisance::NuisanceFilter;
pub use pipeline::JobPipeline;
pub use quota::{QuotaLimits, QuotaTracker, Reservation, ReservationGuard};
pub use resolver::QueueResolver;
pub use retention::{RetentionPolicy, RetentionReport, RetentionScheduler};
