use std::fmt::Write as _;
use std::sync::Arc;

use bytes::Bytes;
use chrono::format::{Item, StrftimeItems};
use foundation::Aabb2;
use futures_util::future::BoxFuture;
use runtime::cancel::CancelHandle;
use streaming::task::{FetchError, FetchTask, Fetcher, Resolution};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::composer::FrameComposer;
use crate::error::{ComposeError, FrameError};
use crate::flyover::{Flyover, Period};
use crate::frame::{FrameFilter, PlannedFrame, TimelapseFrame, plan_frames};
use crate::overlay::{OverlayClient, OverlayProvider};
use crate::source::FrameSource;

/// Everything needed to turn a flyover list into frames.
#[derive(Debug, Clone)]
pub struct TimelapseRequest {
    pub period: Period,
    pub filter: FrameFilter,
    pub bbox: Aabb2,
    pub width: u32,
    pub height: u32,
    /// Ground distance spanned by the frame width, for the scale bar.
    pub ground_width_m: f64,
    pub show_branding_logos: bool,
    /// `chrono` format string for the burned-in date.
    pub date_format: String,
    /// Frame downloads allowed to run at once.
    pub max_in_flight: usize,
}

impl TimelapseRequest {
    pub fn new(period: Period, bbox: Aabb2, width: u32, height: u32) -> Self {
        Self {
            period,
            filter: FrameFilter::default(),
            bbox,
            width,
            height,
            ground_width_m: 0.0,
            show_branding_logos: false,
            date_format: "%Y-%m-%d".to_string(),
            max_in_flight: 4,
        }
    }

    /// Rejects date formats chrono cannot render.
    pub fn validate(&self) -> Result<(), ComposeError> {
        check_date_format(&self.date_format)
    }
}

pub fn check_date_format(format: &str) -> Result<(), ComposeError> {
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(ComposeError::DateFormat(format.to_string()));
    }
    Ok(())
}

/// Outcome for one planned frame, in timeline order.
#[derive(Debug)]
pub struct FrameOutcome {
    pub flyover: Flyover,
    pub result: Result<TimelapseFrame, FrameError>,
}

/// Adapts a [`FrameSource`] to the task machinery, keyed by frame index.
struct FrameFetcher<S> {
    source: Arc<S>,
    flyovers: Vec<Flyover>,
}

impl<S: FrameSource> Fetcher<usize> for FrameFetcher<S> {
    type Output = Bytes;

    fn fetch(
        &self,
        index: usize,
        cancel: CancelHandle,
    ) -> BoxFuture<'static, Result<Bytes, FetchError>> {
        match self.flyovers.get(index) {
            Some(flyover) => self.source.fetch_frame(flyover, cancel),
            None => Box::pin(async move { Err(FetchError::failed(format!("no frame {index}"))) }),
        }
    }
}

/// Fetches, composites and annotates the frames of one timelapse.
pub struct TimelapseSession<S, C> {
    source: Arc<S>,
    client: C,
    composer: FrameComposer,
    overlays: Vec<Box<dyn OverlayProvider>>,
}

impl<S, C> TimelapseSession<S, C>
where
    S: FrameSource,
    C: OverlayClient,
{
    pub fn new(source: Arc<S>, client: C, composer: FrameComposer) -> Self {
        Self {
            source,
            client,
            composer,
            overlays: Vec::new(),
        }
    }

    pub fn with_overlay(mut self, overlay: impl OverlayProvider + 'static) -> Self {
        self.overlays.push(Box::new(overlay));
        self
    }

    pub fn composer(&self) -> &FrameComposer {
        &self.composer
    }

    /// Produce one result per planned frame.
    ///
    /// Raising `abort` cancels every download still in flight; those frames come back
    /// as [`FrameError::Cancelled`]. A failure in one frame never affects the others.
    pub async fn run(
        &self,
        flyovers: &[Flyover],
        request: &TimelapseRequest,
        abort: &CancelHandle,
    ) -> Vec<FrameOutcome> {
        let planned = plan_frames(flyovers, request.period, &request.filter);
        info!(
            candidates = flyovers.len(),
            frames = planned.len(),
            period = %request.period,
            "timelapse planned"
        );

        let downloads = self.download(&planned, request.max_in_flight, abort).await;

        let mut results = Vec::with_capacity(planned.len());
        for (plan, downloaded) in planned.into_iter().zip(downloads) {
            let outcome = match downloaded {
                Ok(bytes) if !abort.is_cancelled() => self.finish(&plan, bytes, request).await,
                Ok(_) => Err(FrameError::Cancelled),
                Err(err) => Err(err),
            };
            if let Err(err) = &outcome
                && !matches!(err, FrameError::Cancelled)
            {
                warn!(from = %plan.flyover.from_time, error = %err, "frame failed");
            }
            results.push(FrameOutcome {
                flyover: plan.flyover,
                result: outcome,
            });
        }

        let done = results.iter().filter(|r| r.result.is_ok()).count();
        info!(frames = results.len(), done, "timelapse finished");
        results
    }

    async fn download(
        &self,
        planned: &[PlannedFrame],
        max_in_flight: usize,
        abort: &CancelHandle,
    ) -> Vec<Result<Bytes, FrameError>> {
        let n = planned.len();
        let fetcher = Arc::new(FrameFetcher {
            source: Arc::clone(&self.source),
            flyovers: planned.iter().map(|p| p.flyover.clone()).collect(),
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut tasks: Vec<FetchTask<usize>> = (0..n).map(FetchTask::new).collect();
        let mut results: Vec<Option<Result<Bytes, FrameError>>> = (0..n).map(|_| None).collect();

        let limit = max_in_flight.max(1);
        let mut next = 0;
        let mut in_flight = 0;

        while next < n || in_flight > 0 {
            while next < n && in_flight < limit && !abort.is_cancelled() {
                tasks[next].fetch(&fetcher, &tx, None);
                next += 1;
                in_flight += 1;
            }
            if in_flight == 0 {
                break;
            }

            tokio::select! {
                biased;
                _ = abort.cancelled() => break,
                Some(completion) = rx.recv() => {
                    let index = completion.key;
                    let Some(task) = tasks.get_mut(index) else {
                        continue;
                    };
                    let resolved = match task.resolve(completion.attempt, completion.result) {
                        Resolution::Finished(bytes) => Ok(bytes),
                        Resolution::Cancelled => Err(FrameError::Cancelled),
                        Resolution::Failed(err) => Err(FrameError::from(err)),
                        Resolution::Stale => continue,
                    };
                    debug!(index, ok = resolved.is_ok(), "frame downloaded");
                    results[index] = Some(resolved);
                    in_flight -= 1;
                }
            }
        }

        for task in tasks.iter_mut().filter(|t| t.is_in_flight()) {
            task.cancel();
        }

        results
            .into_iter()
            .map(|r| r.unwrap_or(Err(FrameError::Cancelled)))
            .collect()
    }

    async fn finish(
        &self,
        plan: &PlannedFrame,
        bytes: Bytes,
        request: &TimelapseRequest,
    ) -> Result<TimelapseFrame, FrameError> {
        let composed = self
            .composer
            .compose_frame(
                &self.client,
                &bytes,
                request.width,
                request.height,
                &request.bbox,
                &self.overlays,
                request.width,
                request.height,
            )
            .await;
        let mut label = String::new();
        write!(label, "{}", plan.flyover.from_time.format(&request.date_format))
            .map_err(|_| ComposeError::DateFormat(request.date_format.clone()))?;
        let jpeg = self.composer.render_labels_and_logos(
            &label,
            &composed,
            request.width,
            request.height,
            request.ground_width_m,
            request.show_branding_logos,
        )?;
        Ok(TimelapseFrame {
            bytes: jpeg,
            timestamp: plan.flyover.from_time,
            is_selected: plan.is_selected,
        })
    }
}
