// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Render dispatcher: a fixed number of render slots shared by every
// connection.
//
// A connection whose job was accepted waits here for a slot; that wait is
// the daemon's only backpressure.  Rendering is CPU-bound, so each job runs
// on the blocking pool and owns its permit until the renderer returns, even
// if the waiting connection has gone away.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Semaphore;
use tracing::{debug, error};

use greenbar_core::error::{GreenbarError, Result};
use greenbar_core::types::RenderProfile;
use greenbar_document::{RenderedDocument, Renderer};

use crate::job::{JobLine, ParsedJob};

/// Bounded pool of render slots.
pub struct RenderDispatcher {
    renderer: Arc<dyn Renderer>,
    slots: Arc<Semaphore>,
    capacity: usize,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

/// Decrements the in-flight counter however the render ends.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RenderDispatcher {
    pub fn new(renderer: Arc<dyn Renderer>, concurrent_jobs: usize) -> Self {
        let capacity = concurrent_jobs.max(1);
        Self {
            renderer,
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Renders executing right now.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous renders observed.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Render `job` with `profile`, waiting for a free slot first.
    ///
    /// A renderer error or panic is reported as `GreenbarError::Render`.
    pub async fn render(
        &self,
        job: Arc<ParsedJob>,
        profile: RenderProfile,
    ) -> Result<RenderedDocument> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| GreenbarError::Render("render pool closed".into()))?;

        let renderer = Arc::clone(&self.renderer);
        let in_flight = Arc::clone(&self.in_flight);
        let peak = Arc::clone(&self.peak);
        let job_id = job.id;

        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            let _in_flight = InFlight(in_flight);

            drive(renderer.as_ref(), &job, &profile)
        });

        match task.await {
            Ok(result) => {
                if let Ok(doc) = &result {
                    debug!(job_id = %job_id, pages = doc.pages, "render complete");
                }
                result.map_err(|e| match e {
                    GreenbarError::Render(_) => e,
                    other => GreenbarError::Render(other.to_string()),
                })
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "render task crashed");
                Err(GreenbarError::Render(format!("render task crashed: {e}")))
            }
        }
    }
}

/// Feed every copy of `job` through one render job.
fn drive(renderer: &dyn Renderer, job: &ParsedJob, profile: &RenderProfile) -> Result<RenderedDocument> {
    let mut doc = renderer.open(profile, &job.job_name)?;

    for copy in 0..job.copies {
        if copy > 0 {
            doc.new_page()?;
        }
        for line in &job.lines {
            match line {
                JobLine::Text(text) => doc.add_line(text)?,
                JobLine::NewPage => doc.new_page()?,
            }
        }
    }

    doc.finish()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use greenbar_core::profiles::profile_by_name;
    use greenbar_document::RenderJob;

    use crate::job::{ControlFile, JobLimits};

    /// What a fake render job should do.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) enum Behavior {
        Succeed,
        Fail,
        Panic,
    }

    /// Renderer double: counts lines, optionally sleeps, fails, or panics.
    pub(crate) struct FakeRenderer {
        pub behavior: Mutex<Behavior>,
        pub delay: Duration,
        pub lines_per_page: u32,
        pub opened: AtomicUsize,
    }

    impl FakeRenderer {
        pub(crate) fn new(behavior: Behavior) -> Self {
            Self {
                behavior: Mutex::new(behavior),
                delay: Duration::ZERO,
                lines_per_page: 60,
                opened: AtomicUsize::new(0),
            }
        }

        pub(crate) fn opened(&self) -> usize {
            self.opened.load(Ordering::SeqCst)
        }
    }

    struct FakeJob {
        behavior: Behavior,
        delay: Duration,
        lines_per_page: u32,
        line: u32,
        pages: u32,
    }

    impl Renderer for FakeRenderer {
        fn open(&self, _profile: &RenderProfile, _title: &str) -> Result<Box<dyn RenderJob>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            let behavior = *self.behavior.lock().unwrap();
            Ok(Box::new(FakeJob {
                behavior,
                delay: self.delay,
                lines_per_page: self.lines_per_page,
                line: 0,
                pages: 1,
            }))
        }
    }

    impl RenderJob for FakeJob {
        fn add_line(&mut self, _text: &str) -> Result<()> {
            if self.line == self.lines_per_page {
                self.new_page()?;
            }
            self.line += 1;
            Ok(())
        }

        fn new_page(&mut self) -> Result<()> {
            self.pages += 1;
            self.line = 0;
            Ok(())
        }

        fn page_count(&self) -> u32 {
            self.pages
        }

        fn finish(self: Box<Self>) -> Result<RenderedDocument> {
            std::thread::sleep(self.delay);
            match self.behavior {
                Behavior::Succeed => Ok(RenderedDocument {
                    bytes: b"%PDF-fake".to_vec(),
                    pages: self.pages,
                }),
                Behavior::Fail => Err(GreenbarError::Io(std::io::Error::other("disk full"))),
                Behavior::Panic => panic!("renderer blew up"),
            }
        }
    }

    pub(crate) fn job(lines: usize) -> Arc<ParsedJob> {
        let data = "LINE\n".repeat(lines);
        Arc::new(
            ParsedJob::build(
                &ControlFile::default(),
                "dfA001",
                data.as_bytes(),
                &JobLimits {
                    max_lines: 100_000,
                    max_copies: 10,
                },
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn renders_and_reports_pages() {
        let dispatcher = RenderDispatcher::new(Arc::new(FakeRenderer::new(Behavior::Succeed)), 2);
        let doc = dispatcher
            .render(job(130), profile_by_name("default-green"))
            .await
            .unwrap();
        assert_eq!(doc.pages, 3);
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn copies_start_on_new_pages() {
        let dispatcher = RenderDispatcher::new(Arc::new(FakeRenderer::new(Behavior::Succeed)), 1);
        let mut parsed = (*job(10)).clone();
        parsed.copies = 3;
        let doc = dispatcher
            .render(Arc::new(parsed), profile_by_name("default-green"))
            .await
            .unwrap();
        assert_eq!(doc.pages, 3);
    }

    #[tokio::test]
    async fn errors_and_panics_become_render_errors_and_free_the_slot() {
        let renderer = Arc::new(FakeRenderer::new(Behavior::Fail));
        let dispatcher = RenderDispatcher::new(renderer.clone(), 1);
        let profile = profile_by_name("default-green");

        let err = dispatcher.render(job(1), profile.clone()).await.unwrap_err();
        assert!(matches!(err, GreenbarError::Render(_)));

        *renderer.behavior.lock().unwrap() = Behavior::Panic;
        let err = dispatcher.render(job(1), profile.clone()).await.unwrap_err();
        assert!(matches!(err, GreenbarError::Render(_)));

        // The single slot must be free again.
        *renderer.behavior.lock().unwrap() = Behavior::Succeed;
        let doc = tokio::time::timeout(Duration::from_secs(5), dispatcher.render(job(1), profile))
            .await
            .expect("slot leaked")
            .unwrap();
        assert_eq!(doc.pages, 1);
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrency_never_exceeds_slots() {
        let mut renderer = FakeRenderer::new(Behavior::Succeed);
        renderer.delay = Duration::from_millis(50);
        let dispatcher = Arc::new(RenderDispatcher::new(Arc::new(renderer), 3));

        let mut handles = Vec::new();
        for _ in 0..12 {
            let d = Arc::clone(&dispatcher);
            handles.push(tokio::spawn(async move {
                d.render(job(5), profile_by_name("modern-green")).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert!(dispatcher.peak() <= 3, "peak was {}", dispatcher.peak());
        assert!(dispatcher.peak() >= 1);
        assert_eq!(dispatcher.in_flight(), 0);
    }
}
