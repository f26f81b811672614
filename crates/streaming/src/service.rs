use runtime::coalesce::{Coalescer, earliest};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info};

use crate::scheduler::{FetchedTile, TileEvent, TileFetchScheduler, TileSink};
use crate::task::Fetcher;
use crate::tile::TileCoord;
use crate::viewport::Viewport;

fn now() -> std::time::Instant {
    Instant::now().into_std()
}

/// Drive `scheduler` from viewport changes until the sender side is dropped.
///
/// A burst of viewport changes collapses into one reconciliation against the latest
/// viewport once the rescan window has been quiet. Ingested tiles arm a throttled
/// repaint and another rescan. On exit every in-flight fetch is cancelled and the
/// scheduler is handed back.
pub async fn run_streaming<V, P, F, S>(
    mut scheduler: TileFetchScheduler<P, F, S>,
    mut viewports: mpsc::Receiver<V>,
) -> TileFetchScheduler<P, F, S>
where
    V: Viewport,
    P: Send + 'static,
    F: Fetcher<TileCoord, Output = FetchedTile<P>>,
    S: TileSink<P>,
{
    let mut rescan = Coalescer::debounce(scheduler.config().rescan_window());
    let mut repaint = Coalescer::throttle(scheduler.config().repaint_window());
    let mut latest: Option<V> = None;

    loop {
        let deadline = earliest(rescan.deadline(), repaint.deadline());
        let timer = async move {
            match deadline {
                Some(at) => sleep_until(Instant::from_std(at)).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            event = viewports.recv() => match event {
                Some(viewport) => {
                    latest = Some(viewport);
                    rescan.request(now());
                }
                None => break,
            },
            Some(completion) = scheduler.next_completion() => {
                if let TileEvent::Ingested(_) = scheduler.handle_completion(completion) {
                    let at = now();
                    repaint.request(at);
                    rescan.request(at);
                }
            }
            () = timer => {
                let at = now();
                if rescan.fire_if_due(at)
                    && let Some(viewport) = latest.as_ref()
                {
                    scheduler.on_viewport_changed(viewport);
                }
                if repaint.fire_if_due(at) {
                    scheduler.repaint();
                }
            }
        }
    }

    debug!(stats = %scheduler.stats(), "viewport stream closed");
    scheduler.shutdown();
    scheduler
}

/// Spawn [`run_streaming`] on the current runtime.
///
/// Send viewports through the returned sender; drop it to stop streaming and get the
/// scheduler back from the join handle.
pub fn spawn_streaming<V, P, F, S>(
    scheduler: TileFetchScheduler<P, F, S>,
    capacity: usize,
) -> (mpsc::Sender<V>, JoinHandle<TileFetchScheduler<P, F, S>>)
where
    V: Viewport + Send + 'static,
    P: Send + 'static,
    F: Fetcher<TileCoord, Output = FetchedTile<P>>,
    S: TileSink<P> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));
    info!(
        tile_size_x = scheduler.config().tile_size_x,
        tile_size_y = scheduler.config().tile_size_y,
        max_distance = scheduler.config().max_distance(),
        "tile streaming started"
    );
    let handle = tokio::spawn(run_streaming(scheduler, rx));
    (tx, handle)
}

#[cfg(test)]
mod tests {
    use super::spawn_streaming;
    use crate::config::StreamingConfig;
    use crate::scheduler::{FetchedTile, TileFetchScheduler, TileSink};
    use crate::task::{FetchError, Fetcher};
    use crate::tile::TileCoord;
    use crate::viewport::PerspectiveCamera;
    use foundation::math::Vec3;
    use futures_util::FutureExt;
    use futures_util::future::BoxFuture;
    use runtime::cancel::CancelHandle;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::time::sleep;

    struct Instantly {
        issued: Mutex<Vec<TileCoord>>,
        never_finish: bool,
    }

    impl Instantly {
        fn new(never_finish: bool) -> Arc<Self> {
            Arc::new(Self {
                issued: Mutex::new(Vec::new()),
                never_finish,
            })
        }
    }

    impl Fetcher<TileCoord> for Instantly {
        type Output = FetchedTile<()>;

        fn fetch(
            &self,
            coord: TileCoord,
            cancel: CancelHandle,
        ) -> BoxFuture<'static, Result<FetchedTile<()>, FetchError>> {
            self.issued.lock().unwrap().push(coord);
            let never_finish = self.never_finish;
            async move {
                if never_finish {
                    cancel.cancelled().await;
                }
                cancel.check()?;
                Ok(FetchedTile {
                    payload: (),
                    max_altitude: 0.0,
                })
            }
            .boxed()
        }
    }

    #[derive(Default)]
    struct Counter {
        tiles: usize,
        repaints: usize,
    }

    impl TileSink<()> for Counter {
        fn ingest(&mut self, _coord: TileCoord, _payload: (), _max_altitude: f64) {
            self.tiles += 1;
        }

        fn repaint(&mut self) {
            self.repaints += 1;
        }
    }

    fn top_down_at(x: f64, z: f64) -> PerspectiveCamera {
        PerspectiveCamera::new(
            Vec3::new(x, 300.0, z),
            Vec3::new(0.0, -1.0, 0.0),
            Vec3::UP,
            90.0,
            1.0,
        )
    }

    fn scheduler(
        fetcher: Arc<Instantly>,
    ) -> TileFetchScheduler<(), Instantly, Counter> {
        TileFetchScheduler::new(StreamingConfig::default(), fetcher, Counter::default()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn viewport_burst_reconciles_once_against_latest() {
        let fetcher = Instantly::new(true);
        let (tx, handle) = spawn_streaming(scheduler(fetcher.clone()), 16);

        for i in 0..5 {
            tx.send(top_down_at(128.0 + f64::from(i) * 10_000.0, 128.0))
                .await
                .unwrap();
            sleep(Duration::from_micros(500)).await;
        }
        sleep(Duration::from_millis(20)).await;
        drop(tx);

        let s = handle.await.unwrap();
        assert_eq!(s.stats().passes, 1);
        let issued = fetcher.issued.lock().unwrap().clone();
        assert_eq!(issued.len(), 9);
        // Only the last camera (x = 40_128) was reconciled.
        assert!(issued.iter().all(|c| (155..=157).contains(&c.x)));
        assert_eq!(s.stats().cancelled, 9);
    }

    #[tokio::test(start_paused = true)]
    async fn ingests_coalesce_into_one_repaint() {
        let fetcher = Instantly::new(false);
        let (tx, handle) = spawn_streaming(scheduler(fetcher.clone()), 4);

        tx.send(top_down_at(128.0, 128.0)).await.unwrap();
        sleep(Duration::from_millis(100)).await;
        drop(tx);

        let s = handle.await.unwrap();
        assert_eq!(s.sink().tiles, 9);
        assert_eq!(s.sink().repaints, 1);
        // The post-ingest rescan found nothing new to fetch.
        assert_eq!(s.stats().passes, 2);
        assert_eq!(fetcher.issued.lock().unwrap().len(), 9);
    }
}
