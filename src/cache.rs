// TTL-gated feed cache. Each query calls ensure_* before reading; there is
// no background refresh task, so a request arriving after TTL expiry is
// what triggers the next fetch (and the natural retry after a failure).

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::error::{Result, TransitError};
use crate::fetch::FeedFetcher;
use crate::realtime::RealtimeSnapshot;
use crate::schedule::ScheduleSnapshot;

const SCHEDULE_TTL: Duration = Duration::from_secs(24 * 3600);
const REALTIME_TTL: Duration = Duration::from_secs(15);

const DEFAULT_GTFS_ZIP_URL: &str = "https://iportal.sacrt.com/gtfs/srtd/google_transit.zip";
const DEFAULT_GTFSRT_TRIPS_URL: &str = "https://bustime.sacrt.com/gtfsrt/trips";
const DEFAULT_GTFSRT_ALERTS_URL: &str = "https://bustime.sacrt.com/gtfsrt/alerts";

#[derive(Debug, Clone)]
pub struct FeedUrls {
    pub static_zip: String,
    pub trip_updates: String,
    pub alerts: String,
}

impl FeedUrls {
    pub fn from_env() -> Self {
        let var = |name: &str, default: &str| {
            std::env::var(name).unwrap_or_else(|_| default.to_string())
        };
        FeedUrls {
            static_zip: var("GTFS_ZIP_URL", DEFAULT_GTFS_ZIP_URL),
            trip_updates: var("GTFSRT_TRIPS_URL", DEFAULT_GTFSRT_TRIPS_URL),
            alerts: var("GTFSRT_ALERTS_URL", DEFAULT_GTFSRT_ALERTS_URL),
        }
    }
}

struct Entry<T> {
    snapshot: Arc<T>,
    loaded_at: Instant,
}

/// Process-scoped feed state, owned by the server instance and injected
/// into handlers. Snapshots are immutable once published; replacement is a
/// single swap behind a briefly-held lock, so a concurrent reader sees
/// either the whole old snapshot or the whole new one.
pub struct TransitCache {
    fetcher: Arc<dyn FeedFetcher>,
    urls: FeedUrls,
    schedule_ttl: Duration,
    realtime_ttl: Duration,
    schedule: RwLock<Option<Entry<ScheduleSnapshot>>>,
    realtime: RwLock<Option<Entry<RealtimeSnapshot>>>,
    // Coalesce simultaneous refreshes of the same feed to one fetch;
    // waiters re-check the TTL after acquiring.
    schedule_refresh: tokio::sync::Mutex<()>,
    realtime_refresh: tokio::sync::Mutex<()>,
}

impl TransitCache {
    pub fn new(fetcher: Arc<dyn FeedFetcher>, urls: FeedUrls) -> Self {
        Self::with_ttls(fetcher, urls, SCHEDULE_TTL, REALTIME_TTL)
    }

    pub fn with_ttls(
        fetcher: Arc<dyn FeedFetcher>,
        urls: FeedUrls,
        schedule_ttl: Duration,
        realtime_ttl: Duration,
    ) -> Self {
        TransitCache {
            fetcher,
            urls,
            schedule_ttl,
            realtime_ttl,
            schedule: RwLock::new(None),
            realtime: RwLock::new(None),
            schedule_refresh: tokio::sync::Mutex::new(()),
            realtime_refresh: tokio::sync::Mutex::new(()),
        }
    }

    /// Current schedule snapshot regardless of age, if one ever loaded.
    pub fn schedule(&self) -> Option<Arc<ScheduleSnapshot>> {
        // Guards only ever wrap a clone or an assignment, so a snapshot
        // behind a poisoned lock is still intact; recover rather than panic.
        let entry = self.schedule.read().unwrap_or_else(|e| e.into_inner());
        entry.as_ref().map(|e| e.snapshot.clone())
    }

    /// Current realtime snapshot regardless of age, if one ever loaded.
    pub fn realtime(&self) -> Option<Arc<RealtimeSnapshot>> {
        let entry = self.realtime.read().unwrap_or_else(|e| e.into_inner());
        entry.as_ref().map(|e| e.snapshot.clone())
    }

    fn fresh_schedule(&self) -> Option<Arc<ScheduleSnapshot>> {
        let entry = self.schedule.read().unwrap_or_else(|e| e.into_inner());
        entry
            .as_ref()
            .filter(|e| e.loaded_at.elapsed() < self.schedule_ttl)
            .map(|e| e.snapshot.clone())
    }

    fn fresh_realtime(&self) -> Option<Arc<RealtimeSnapshot>> {
        let entry = self.realtime.read().unwrap_or_else(|e| e.into_inner());
        entry
            .as_ref()
            .filter(|e| e.loaded_at.elapsed() < self.realtime_ttl)
            .map(|e| e.snapshot.clone())
    }

    /// Returns a schedule snapshot no older than the 24h TTL when the
    /// upstream cooperates. On a failed refresh the previous snapshot (if
    /// any) is served stale and the failure only logged; with no snapshot
    /// at all the error propagates.
    pub async fn ensure_schedule(&self) -> Result<Arc<ScheduleSnapshot>> {
        if let Some(snapshot) = self.fresh_schedule() {
            return Ok(snapshot);
        }

        let _guard = self.schedule_refresh.lock().await;
        // another request may have refreshed while we waited
        if let Some(snapshot) = self.fresh_schedule() {
            return Ok(snapshot);
        }

        log::info!("refreshing static GTFS bundle");
        let fetcher = self.fetcher.clone();
        let url = self.urls.static_zip.clone();
        // A panicked refresh task takes the same stale-fallback path as a
        // fetch or parse failure.
        let result = tokio::task::spawn_blocking(move || -> Result<ScheduleSnapshot> {
            let bytes = fetcher.fetch(&url)?;
            ScheduleSnapshot::from_zip(&bytes)
        })
        .await
        .unwrap_or_else(|e| {
            Err(TransitError::Transport(format!(
                "schedule refresh task failed: {}",
                e
            )))
        });

        match result {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                let mut entry = self.schedule.write().unwrap_or_else(|e| e.into_inner());
                *entry = Some(Entry {
                    snapshot: snapshot.clone(),
                    loaded_at: Instant::now(),
                });
                Ok(snapshot)
            }
            Err(e) => match self.schedule() {
                Some(stale) => {
                    log::warn!("schedule refresh failed, serving stale snapshot: {}", e);
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }

    /// Same TTL-gated replace-on-success pattern for the realtime pair.
    /// Both feeds are fetched and decoded before either is published, so a
    /// snapshot never mixes trip updates and alerts from different
    /// moments; if either half fails, neither replaces.
    pub async fn ensure_realtime(&self) -> Result<Arc<RealtimeSnapshot>> {
        if let Some(snapshot) = self.fresh_realtime() {
            return Ok(snapshot);
        }

        let _guard = self.realtime_refresh.lock().await;
        if let Some(snapshot) = self.fresh_realtime() {
            return Ok(snapshot);
        }

        log::debug!("refreshing GTFS-RT feeds (trips + alerts)");
        let fetcher = self.fetcher.clone();
        let trips_url = self.urls.trip_updates.clone();
        let alerts_url = self.urls.alerts.clone();
        let result = tokio::task::spawn_blocking(move || -> Result<RealtimeSnapshot> {
            let trips_bin = fetcher.fetch(&trips_url)?;
            let alerts_bin = fetcher.fetch(&alerts_url)?;
            RealtimeSnapshot::decode(&trips_bin, &alerts_bin)
        })
        .await
        .unwrap_or_else(|e| {
            Err(TransitError::Transport(format!(
                "realtime refresh task failed: {}",
                e
            )))
        });

        match result {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                let mut entry = self.realtime.write().unwrap_or_else(|e| e.into_inner());
                *entry = Some(Entry {
                    snapshot: snapshot.clone(),
                    loaded_at: Instant::now(),
                });
                Ok(snapshot)
            }
            Err(e) => match self.realtime() {
                Some(stale) => {
                    log::warn!("realtime refresh failed, serving stale snapshot: {}", e);
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }
}
