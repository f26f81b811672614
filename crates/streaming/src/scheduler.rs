use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace, warn};

use crate::config::{ConfigError, StreamingConfig};
use crate::selector::compute_visible_tiles;
use crate::stats::FetchStats;
use crate::task::{Completion, FetchError, FetchTask, Fetcher, Resolution, TaskStatus};
use crate::tile::{DesiredTiles, TileCoord, in_priority_order};
use crate::viewport::Viewport;

/// Successful tile fetch: the decoded payload plus its highest terrain sample.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedTile<P> {
    pub payload: P,
    pub max_altitude: f64,
}

/// Rendering side of the scheduler.
///
/// Only the scheduler calls into the sink, and only after a fetch completed, so the
/// sink is the single writer of whatever surface it draws on.
pub trait TileSink<P> {
    fn ingest(&mut self, coord: TileCoord, payload: P, max_altitude: f64);

    /// A fetch failed with an error. Cancellations are never reported here.
    fn tile_failed(&mut self, _coord: TileCoord, _reason: &FetchError) {}

    /// Coalesced redraw request after one or more ingests.
    fn repaint(&mut self) {}
}

/// What one reconciliation pass did.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub desired: usize,
    pub created: usize,
    pub refetched: usize,
    pub cancelled: usize,
}

/// What happened to one completion.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TileEvent {
    Ingested(TileCoord),
    Failed(TileCoord),
    Aborted(TileCoord),
    Stale(TileCoord),
}

type TileCompletion<P> = Completion<TileCoord, FetchedTile<P>>;

/// Keeps one fetch slot per wanted tile and reconciles it against the viewport.
///
/// The grid is only mutated here; fetches report back through a channel that the
/// owner drains with [`TileFetchScheduler::process_ready`] or
/// [`TileFetchScheduler::process_next`].
pub struct TileFetchScheduler<P, F, S>
where
    P: Send + 'static,
    F: Fetcher<TileCoord, Output = FetchedTile<P>>,
    S: TileSink<P>,
{
    config: StreamingConfig,
    fetcher: Arc<F>,
    sink: S,
    grid: HashMap<TileCoord, FetchTask<TileCoord>>,
    completions_tx: UnboundedSender<TileCompletion<P>>,
    completions_rx: UnboundedReceiver<TileCompletion<P>>,
    stats: FetchStats,
}

impl<P, F, S> TileFetchScheduler<P, F, S>
where
    P: Send + 'static,
    F: Fetcher<TileCoord, Output = FetchedTile<P>>,
    S: TileSink<P>,
{
    pub fn new(config: StreamingConfig, fetcher: Arc<F>, sink: S) -> Result<Self, ConfigError> {
        config.validate()?;
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Ok(Self {
            config,
            fetcher,
            sink,
            grid: HashMap::new(),
            completions_tx,
            completions_rx,
            stats: FetchStats::default(),
        })
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn stats(&self) -> FetchStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.grid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grid.is_empty()
    }

    pub fn status(&self, coord: TileCoord) -> Option<TaskStatus> {
        self.grid.get(&coord).map(FetchTask::status)
    }

    pub fn in_flight(&self) -> usize {
        self.grid.values().filter(|t| t.is_in_flight()).count()
    }

    /// Recompute the visible tiles for `viewport` and reconcile against them.
    pub fn on_viewport_changed(&mut self, viewport: &impl Viewport) -> ReconcileSummary {
        let desired = compute_visible_tiles(
            viewport,
            self.config.tile_size(),
            self.config.max_distance(),
        );
        self.reconcile(&desired)
    }

    /// One reconciliation pass.
    ///
    /// Cancellations are issued before any new work; new tiles and then stale or
    /// failed tiles are issued nearest first. Entries that leave the view stay in the
    /// grid (cancelled) so they can be reused if they come back.
    pub fn reconcile(&mut self, desired: &DesiredTiles) -> ReconcileSummary {
        let mut summary = ReconcileSummary {
            desired: desired.len(),
            ..ReconcileSummary::default()
        };

        for (coord, task) in self.grid.iter_mut() {
            if !desired.contains_key(coord) && task.is_in_flight() {
                trace!(tile = %coord, "cancel: left the view");
                task.cancel();
                summary.cancelled += 1;
            }
        }

        let ordered = in_priority_order(desired);

        let to_create: Vec<TileCoord> = ordered
            .iter()
            .map(|t| t.coord)
            .filter(|coord| !self.grid.contains_key(coord))
            .collect();
        for coord in to_create {
            let mut task = FetchTask::new(coord);
            task.fetch(&self.fetcher, &self.completions_tx, self.config.fetch_timeout());
            self.grid.insert(coord, task);
            summary.created += 1;
        }

        for tile in &ordered {
            let Some(task) = self.grid.get_mut(&tile.coord) else {
                continue;
            };
            if task.attempt() > 0 && task.status().is_retryable() {
                task.fetch(&self.fetcher, &self.completions_tx, self.config.fetch_timeout());
                summary.refetched += 1;
            }
        }

        self.stats.passes += 1;
        self.stats.issued += summary.created as u64;
        self.stats.refetched += summary.refetched as u64;
        self.stats.cancelled += summary.cancelled as u64;

        debug!(
            desired = summary.desired,
            created = summary.created,
            refetched = summary.refetched,
            cancelled = summary.cancelled,
            grid = self.grid.len(),
            "reconciled tiles"
        );
        summary
    }

    /// Apply one completion, forwarding successes and failures to the sink.
    pub fn handle_completion(&mut self, completion: TileCompletion<P>) -> TileEvent {
        let Completion {
            key: coord,
            attempt,
            result,
        } = completion;

        let Some(task) = self.grid.get_mut(&coord) else {
            self.stats.stale += 1;
            return TileEvent::Stale(coord);
        };

        match task.resolve(attempt, result) {
            Resolution::Finished(tile) => {
                self.stats.finished += 1;
                self.sink.ingest(coord, tile.payload, tile.max_altitude);
                TileEvent::Ingested(coord)
            }
            Resolution::Cancelled => {
                debug!(tile = %coord, attempt, "fetch aborted");
                self.stats.aborted += 1;
                TileEvent::Aborted(coord)
            }
            Resolution::Failed(err) => {
                warn!(tile = %coord, attempt, error = %err, "tile fetch failed");
                self.stats.failed += 1;
                self.sink.tile_failed(coord, &err);
                TileEvent::Failed(coord)
            }
            Resolution::Stale => {
                trace!(tile = %coord, attempt, "discarding stale completion");
                self.stats.stale += 1;
                TileEvent::Stale(coord)
            }
        }
    }

    /// Apply every completion that is already waiting. Never blocks.
    pub fn process_ready(&mut self) -> Vec<TileEvent> {
        let mut events = Vec::new();
        while let Ok(completion) = self.completions_rx.try_recv() {
            events.push(self.handle_completion(completion));
        }
        events
    }

    /// Wait for the next completion.
    pub async fn next_completion(&mut self) -> Option<TileCompletion<P>> {
        self.completions_rx.recv().await
    }

    /// Wait for the next completion and apply it.
    pub async fn process_next(&mut self) -> Option<TileEvent> {
        let completion = self.next_completion().await?;
        Some(self.handle_completion(completion))
    }

    pub fn repaint(&mut self) {
        self.sink.repaint();
    }

    /// Cancel everything in flight and forget all tiles. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        let mut cancelled = 0u64;
        for task in self.grid.values_mut() {
            if task.is_in_flight() {
                task.cancel();
                cancelled += 1;
            }
        }
        if !self.grid.is_empty() {
            debug!(cancelled, tiles = self.grid.len(), "tile scheduler shut down");
        }
        self.stats.cancelled += cancelled;
        self.grid.clear();
    }
}

impl<P, F, S> Drop for TileFetchScheduler<P, F, S>
where
    P: Send + 'static,
    F: Fetcher<TileCoord, Output = FetchedTile<P>>,
    S: TileSink<P>,
{
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::{FetchedTile, TileEvent, TileFetchScheduler, TileSink};
    use crate::config::StreamingConfig;
    use crate::task::{FetchError, Fetcher, TaskStatus};
    use crate::tile::{DesiredTile, DesiredTiles, TileCoord};
    use crate::viewport::PerspectiveCamera;
    use foundation::math::Vec3;
    use futures_util::FutureExt;
    use futures_util::future::BoxFuture;
    use pretty_assertions::assert_eq;
    use runtime::cancel::CancelHandle;
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex};
    use tokio::sync::Semaphore;

    #[derive(Default)]
    struct Scripted {
        issued: Mutex<Vec<TileCoord>>,
        handles: Mutex<Vec<(TileCoord, CancelHandle)>>,
        /// Coordinates already cancelled when each fetch was issued.
        cancelled_at_issue: Mutex<HashMap<TileCoord, Vec<TileCoord>>>,
        failing: Mutex<HashSet<TileCoord>>,
        /// When set, fetches wait for a permit and ignore cancellation.
        gate: Option<Arc<Semaphore>>,
    }

    impl Scripted {
        fn gated() -> (Arc<Self>, Arc<Semaphore>) {
            let gate = Arc::new(Semaphore::new(0));
            let fetcher = Self {
                gate: Some(gate.clone()),
                ..Self::default()
            };
            (Arc::new(fetcher), gate)
        }

        fn issued(&self) -> Vec<TileCoord> {
            self.issued.lock().unwrap().clone()
        }

        fn live_attempts(&self, coord: TileCoord) -> usize {
            self.handles
                .lock()
                .unwrap()
                .iter()
                .filter(|(c, h)| *c == coord && !h.is_cancelled())
                .count()
        }
    }

    impl Fetcher<TileCoord> for Scripted {
        type Output = FetchedTile<i32>;

        fn fetch(
            &self,
            coord: TileCoord,
            cancel: CancelHandle,
        ) -> BoxFuture<'static, Result<FetchedTile<i32>, FetchError>> {
            let mut handles = self.handles.lock().unwrap();
            let already: Vec<TileCoord> = handles
                .iter()
                .filter(|(_, h)| h.is_cancelled())
                .map(|(c, _)| *c)
                .collect();
            self.cancelled_at_issue
                .lock()
                .unwrap()
                .insert(coord, already);
            handles.push((coord, cancel.clone()));
            self.issued.lock().unwrap().push(coord);

            let fail = self.failing.lock().unwrap().contains(&coord);
            let gate = self.gate.clone();
            async move {
                if let Some(gate) = gate {
                    gate.acquire_owned()
                        .await
                        .map_err(|_| FetchError::failed("gate closed"))?
                        .forget();
                } else {
                    cancel.check()?;
                }
                if fail {
                    return Err(FetchError::failed("http 503"));
                }
                Ok(FetchedTile {
                    payload: coord.x * 100 + coord.y,
                    max_altitude: f64::from(coord.x),
                })
            }
            .boxed()
        }
    }

    #[derive(Debug, Default)]
    struct Recorder {
        tiles: Vec<(TileCoord, i32, f64)>,
        failures: Vec<TileCoord>,
        repaints: usize,
    }

    impl TileSink<i32> for Recorder {
        fn ingest(&mut self, coord: TileCoord, payload: i32, max_altitude: f64) {
            self.tiles.push((coord, payload, max_altitude));
        }

        fn tile_failed(&mut self, coord: TileCoord, _reason: &FetchError) {
            self.failures.push(coord);
        }

        fn repaint(&mut self) {
            self.repaints += 1;
        }
    }

    fn desired(tiles: &[(i32, i32, i64)]) -> DesiredTiles {
        tiles
            .iter()
            .map(|&(x, y, distance)| {
                let coord = TileCoord::new(x, y);
                (coord, DesiredTile { coord, distance })
            })
            .collect()
    }

    fn scheduler(fetcher: Arc<Scripted>) -> TileFetchScheduler<i32, Scripted, Recorder> {
        TileFetchScheduler::new(StreamingConfig::default(), fetcher, Recorder::default()).unwrap()
    }

    #[tokio::test]
    async fn issues_nearest_tiles_first() {
        let (fetcher, _gate) = Scripted::gated();
        let mut s = scheduler(fetcher.clone());

        let summary = s.reconcile(&desired(&[(0, 0, 1), (1, 1, 9), (2, 2, 4)]));
        assert_eq!(summary.created, 3);
        assert_eq!(
            fetcher.issued(),
            vec![TileCoord::new(0, 0), TileCoord::new(2, 2), TileCoord::new(1, 1)]
        );
    }

    #[tokio::test]
    async fn cancels_departed_tiles_before_creating_new_ones() {
        let (fetcher, _gate) = Scripted::gated();
        let mut s = scheduler(fetcher.clone());

        s.reconcile(&desired(&[(0, 0, 0)]));
        let summary = s.reconcile(&desired(&[(5, 5, 0)]));
        assert_eq!(summary.cancelled, 1);
        assert_eq!(summary.created, 1);

        let seen = fetcher.cancelled_at_issue.lock().unwrap();
        assert_eq!(seen[&TileCoord::new(5, 5)], vec![TileCoord::new(0, 0)]);
        assert_eq!(s.status(TileCoord::new(0, 0)), Some(TaskStatus::Cancelled));
        assert_eq!(s.status(TileCoord::new(5, 5)), Some(TaskStatus::InProgress));
    }

    #[tokio::test]
    async fn never_two_live_attempts_for_one_tile() {
        let (fetcher, _gate) = Scripted::gated();
        let mut s = scheduler(fetcher.clone());

        let passes = [
            desired(&[(0, 0, 0), (0, 1, 1)]),
            desired(&[(0, 1, 0)]),
            desired(&[(0, 0, 0), (0, 1, 1), (1, 1, 2)]),
            desired(&[]),
            desired(&[(0, 0, 0), (1, 1, 1)]),
        ];
        for pass in &passes {
            s.reconcile(pass);
            for coord in [TileCoord::new(0, 0), TileCoord::new(0, 1), TileCoord::new(1, 1)] {
                assert!(fetcher.live_attempts(coord) <= 1, "{coord} double-fetched");
                let in_progress = s.status(coord) == Some(TaskStatus::InProgress);
                assert_eq!(fetcher.live_attempts(coord), usize::from(in_progress));
            }
        }
    }

    #[tokio::test]
    async fn stale_success_is_not_ingested() {
        let (fetcher, gate) = Scripted::gated();
        let mut s = scheduler(fetcher.clone());

        s.reconcile(&desired(&[(0, 0, 0)]));
        s.reconcile(&desired(&[]));
        assert_eq!(s.status(TileCoord::new(0, 0)), Some(TaskStatus::Cancelled));

        // The fetch ignores its cancel handle and succeeds anyway.
        gate.add_permits(1);
        let event = s.process_next().await.unwrap();
        assert_eq!(event, TileEvent::Stale(TileCoord::new(0, 0)));
        assert!(s.sink().tiles.is_empty());
        assert_eq!(s.stats().stale, 1);
    }

    #[tokio::test]
    async fn completed_tiles_reach_the_sink_once() {
        let fetcher = Arc::new(Scripted::default());
        let mut s = scheduler(fetcher.clone());

        s.reconcile(&desired(&[(1, 2, 0), (3, 4, 1)]));
        for _ in 0..2 {
            assert!(matches!(s.process_next().await, Some(TileEvent::Ingested(_))));
        }
        let mut got = s.sink().tiles.clone();
        got.sort_by_key(|(c, _, _)| *c);
        assert_eq!(
            got,
            vec![(TileCoord::new(1, 2), 102, 1.0), (TileCoord::new(3, 4), 304, 3.0)]
        );

        // Finished tiles are not fetched again.
        let summary = s.reconcile(&desired(&[(1, 2, 0), (3, 4, 1)]));
        assert_eq!((summary.created, summary.refetched), (0, 0));
        assert_eq!(fetcher.issued().len(), 2);
    }

    #[tokio::test]
    async fn failed_tiles_are_reported_and_retried() {
        let fetcher = Arc::new(Scripted::default());
        fetcher.failing.lock().unwrap().insert(TileCoord::new(0, 0));
        let mut s = scheduler(fetcher.clone());

        s.reconcile(&desired(&[(0, 0, 0)]));
        assert_eq!(
            s.process_next().await,
            Some(TileEvent::Failed(TileCoord::new(0, 0)))
        );
        assert_eq!(s.sink().failures, vec![TileCoord::new(0, 0)]);
        assert_eq!(s.status(TileCoord::new(0, 0)), Some(TaskStatus::Error));

        fetcher.failing.lock().unwrap().clear();
        let summary = s.reconcile(&desired(&[(0, 0, 0)]));
        assert_eq!(summary.refetched, 1);
        assert_eq!(
            s.process_next().await,
            Some(TileEvent::Ingested(TileCoord::new(0, 0)))
        );
    }

    #[tokio::test]
    async fn returning_tiles_are_refetched_in_priority_order() {
        let (fetcher, _gate) = Scripted::gated();
        let mut s = scheduler(fetcher.clone());

        s.reconcile(&desired(&[(0, 0, 0), (0, 1, 1), (0, 2, 2)]));
        s.reconcile(&desired(&[]));
        let summary = s.reconcile(&desired(&[(0, 0, 5), (0, 1, 9), (0, 2, 1)]));
        assert_eq!(summary.refetched, 3);
        assert_eq!(summary.created, 0);
        assert_eq!(
            fetcher.issued()[3..].to_vec(),
            vec![TileCoord::new(0, 2), TileCoord::new(0, 0), TileCoord::new(0, 1)]
        );
    }

    #[tokio::test]
    async fn shutdown_cancels_everything_and_is_idempotent() {
        let (fetcher, _gate) = Scripted::gated();
        let mut s = scheduler(fetcher.clone());

        s.reconcile(&desired(&[(0, 0, 0), (1, 0, 1)]));
        assert_eq!(s.in_flight(), 2);
        s.shutdown();
        assert!(s.is_empty());
        assert_eq!(fetcher.live_attempts(TileCoord::new(0, 0)), 0);
        assert_eq!(fetcher.live_attempts(TileCoord::new(1, 0)), 0);
        s.shutdown();
        assert!(s.is_empty());
        assert_eq!(s.stats().cancelled, 2);
    }

    #[tokio::test]
    async fn viewport_change_drives_the_selector() {
        let (fetcher, _gate) = Scripted::gated();
        let mut s = scheduler(fetcher.clone());
        let cam = PerspectiveCamera::new(
            Vec3::new(128.0, 300.0, 128.0),
            Vec3::new(0.0, -1.0, 0.0),
            Vec3::UP,
            90.0,
            1.0,
        );

        let summary = s.on_viewport_changed(&cam);
        assert_eq!(summary.created, 9);
        assert_eq!(fetcher.issued()[0], TileCoord::new(0, 0));
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let config = StreamingConfig {
            tile_size_y: -4.0,
            ..StreamingConfig::default()
        };
        let result: Result<TileFetchScheduler<i32, Scripted, Recorder>, _> =
            TileFetchScheduler::new(config, Arc::new(Scripted::default()), Recorder::default());
        assert!(result.is_err());
    }
}
