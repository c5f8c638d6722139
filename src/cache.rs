use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Datelike, Utc};
use tracing::{debug, info, warn};

use crate::domain::Study;
use crate::error::AstroError;
use crate::osdr::OsdrClient;
use crate::stats::{StatisticsSnapshot, derive_statistics};

/// Broad, overlapping keywords that approximate full enumeration of the
/// repository; OSDR has no stable "list everything" endpoint, so breadth
/// comes from many term searches deduplicated by accession.
const CRAWL_TERMS: [&str; 24] = [
    "microgravity",
    "spaceflight",
    "ISS",
    "space station",
    "radiation",
    "arabidopsis",
    "mouse",
    "rodent",
    "plant",
    "bone",
    "muscle",
    "gene expression",
    "RNA",
    "cell culture",
    "bacteria",
    "microbiome",
    "immune",
    "cardiovascular",
    "neural",
    "drosophila",
    "zebrafish",
    "yeast",
    "stem cell",
    "transcriptome",
];

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub bulk_ttl: Duration,
    pub stats_ttl: Duration,
    /// Global unique-study target; the crawl stops early once reached.
    pub target_unique: usize,
    pub max_concurrent: usize,
    pub page_size: usize,
    pub max_pages: usize,
    pub max_retries: usize,
    pub retry_base_ms: u64,
    pub pacing_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            bulk_ttl: Duration::from_secs(24 * 60 * 60),
            stats_ttl: Duration::from_secs(6 * 60 * 60),
            target_unique: 200,
            max_concurrent: 3,
            page_size: 50,
            max_pages: 10,
            max_retries: 3,
            retry_base_ms: 1000,
            pacing_ms: 200,
        }
    }
}

struct BulkEntry {
    studies: Vec<Study>,
    fetched_at: DateTime<Utc>,
}

struct StatsEntry {
    snapshot: StatisticsSnapshot,
    fetched_at: DateTime<Utc>,
}

/// Process-wide study cache with stale-while-revalidate semantics. Owned by
/// the application's dependency-injection root; the clock is injected so TTL
/// behavior is testable.
pub struct StudyCache<C: OsdrClient> {
    inner: Arc<Inner<C>>,
}

impl<C: OsdrClient> Clone for StudyCache<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<C> {
    client: C,
    clock: Box<dyn Clock>,
    config: CacheConfig,
    bulk: RwLock<Option<BulkEntry>>,
    stats: RwLock<Option<StatsEntry>>,
    /// Single-flight guard: checked and set under the same lock, so two
    /// callers can never both start a refresh.
    refresh_active: Mutex<bool>,
}

impl<C: OsdrClient + 'static> StudyCache<C> {
    pub fn new(client: C, clock: Box<dyn Clock>, config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                clock,
                config,
                bulk: RwLock::new(None),
                stats: RwLock::new(None),
                refresh_active: Mutex::new(false),
            }),
        }
    }

    pub fn with_defaults(client: C) -> Self {
        Self::new(client, Box::new(SystemClock), CacheConfig::default())
    }

    /// Direct access for per-request search paths that bypass the bulk set.
    pub fn client(&self) -> &C {
        &self.inner.client
    }

    /// Bulk study set. Fresh cache returns immediately; a stale cache is
    /// returned as-is while a background refresh is kicked off; only a cold
    /// start blocks on the crawl.
    pub fn get_database(&self) -> Result<Vec<Study>, AstroError> {
        let now = self.inner.clock.now();
        {
            let guard = read_lock(&self.inner.bulk);
            if let Some(entry) = guard.as_ref() {
                if is_fresh(now, entry.fetched_at, self.inner.config.bulk_ttl) {
                    return Ok(entry.studies.clone());
                }
            }
        }

        let stale = {
            let guard = read_lock(&self.inner.bulk);
            guard.as_ref().map(|entry| entry.studies.clone())
        };
        if let Some(studies) = stale {
            self.spawn_background_refresh();
            return Ok(studies);
        }

        self.blocking_populate()
    }

    /// Synchronous crawl-and-replace, used by the CLI `refresh` command.
    pub fn force_refresh(&self) -> Result<usize, AstroError> {
        loop {
            if self.try_begin_refresh() {
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }
        let studies = crawl(&self.inner.client, &self.inner.config);
        let result = if !studies.is_empty() {
            let count = studies.len();
            self.store_bulk(studies);
            Ok(count)
        } else if read_lock(&self.inner.bulk).is_some() {
            warn!("refresh crawl returned no studies, keeping previous cache");
            Ok(0)
        } else {
            Err(AstroError::ServiceUnavailable(
                "crawl returned no studies".to_string(),
            ))
        };
        self.end_refresh();
        result
    }

    /// Aggregate statistics, recomputed from the bulk set on a 6h cycle. On
    /// failure the last good snapshot is served; only a cold start with no
    /// snapshot ever computed surfaces an error.
    pub fn get_statistics(&self) -> Result<StatisticsSnapshot, AstroError> {
        let now = self.inner.clock.now();
        {
            let guard = read_lock(&self.inner.stats);
            if let Some(entry) = guard.as_ref() {
                if is_fresh(now, entry.fetched_at, self.inner.config.stats_ttl) {
                    return Ok(entry.snapshot.clone());
                }
            }
        }

        match self.get_database() {
            Ok(studies) => {
                let snapshot = derive_statistics(&studies, now.year());
                let mut guard = write_lock(&self.inner.stats);
                *guard = Some(StatsEntry {
                    snapshot: snapshot.clone(),
                    fetched_at: now,
                });
                Ok(snapshot)
            }
            Err(err) => {
                let guard = read_lock(&self.inner.stats);
                if let Some(entry) = guard.as_ref() {
                    warn!(error = %err, "statistics refresh failed, serving last snapshot");
                    return Ok(entry.snapshot.clone());
                }
                Err(err)
            }
        }
    }

    fn blocking_populate(&self) -> Result<Vec<Study>, AstroError> {
        loop {
            // Another cold-start caller may have populated the cache while
            // we waited on the refresh gate.
            {
                let guard = read_lock(&self.inner.bulk);
                if let Some(entry) = guard.as_ref() {
                    return Ok(entry.studies.clone());
                }
            }
            if self.try_begin_refresh() {
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }

        let studies = crawl(&self.inner.client, &self.inner.config);
        let result = if !studies.is_empty() {
            self.store_bulk(studies.clone());
            Ok(studies)
        } else {
            Err(AstroError::ServiceUnavailable(
                "no studies could be obtained from any crawl term".to_string(),
            ))
        };
        self.end_refresh();
        result
    }

    fn spawn_background_refresh(&self) {
        if !self.try_begin_refresh() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        thread::spawn(move || {
            debug!("background cache refresh started");
            let studies = crawl(&inner.client, &inner.config);
            if studies.is_empty() {
                warn!("background refresh found no studies, keeping previous cache");
            } else {
                let fetched_at = inner.clock.now();
                let count = studies.len();
                let mut guard = write_lock(&inner.bulk);
                *guard = Some(BulkEntry {
                    studies,
                    fetched_at,
                });
                info!(count, "background cache refresh complete");
            }
            let mut active = lock(&inner.refresh_active);
            *active = false;
        });
    }

    fn try_begin_refresh(&self) -> bool {
        let mut active = lock(&self.inner.refresh_active);
        if *active {
            return false;
        }
        *active = true;
        true
    }

    fn end_refresh(&self) {
        let mut active = lock(&self.inner.refresh_active);
        *active = false;
    }

    fn store_bulk(&self, studies: Vec<Study>) {
        let fetched_at = self.inner.clock.now();
        let mut guard = write_lock(&self.inner.bulk);
        *guard = Some(BulkEntry {
            studies,
            fetched_at,
        });
    }
}

fn is_fresh(now: DateTime<Utc>, fetched_at: DateTime<Utc>, ttl: Duration) -> bool {
    let age = now.signed_duration_since(fetched_at);
    age < chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX)
}

/// Bulk crawl: bounded worker fan-out over the shared term list. Within one
/// term pages are sequential to respect offset semantics; across terms no
/// ordering is guaranteed. The unique target is checked cooperatively
/// between fetches; an in-flight page always completes.
fn crawl<C: OsdrClient>(client: &C, config: &CacheConfig) -> Vec<Study> {
    let next_term = AtomicUsize::new(0);
    let accumulated: Mutex<HashMap<String, Study>> = Mutex::new(HashMap::new());

    thread::scope(|scope| {
        for _ in 0..config.max_concurrent.max(1) {
            scope.spawn(|| crawl_worker(client, config, &next_term, &accumulated));
        }
    });

    let mut studies: Vec<Study> = accumulated
        .into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .into_values()
        .filter(|study| study.year.is_some())
        .collect();
    studies.sort_by(|a, b| b.year.cmp(&a.year));
    studies
}

fn crawl_worker<C: OsdrClient>(
    client: &C,
    config: &CacheConfig,
    next_term: &AtomicUsize,
    accumulated: &Mutex<HashMap<String, Study>>,
) {
    loop {
        let index = next_term.fetch_add(1, Ordering::SeqCst);
        let Some(term) = CRAWL_TERMS.get(index) else {
            return;
        };
        for page in 0..config.max_pages {
            if lock(accumulated).len() >= config.target_unique {
                return;
            }
            let Some(studies) = fetch_page_with_retries(client, config, term, page) else {
                // Retries exhausted: abandon this page, advance to the next.
                continue;
            };
            if studies.is_empty() {
                break;
            }
            {
                let mut guard = lock(accumulated);
                for study in studies {
                    guard.entry(study.id.clone()).or_insert(study);
                }
            }
            thread::sleep(Duration::from_millis(config.pacing_ms));
        }
    }
}

/// Cap on the exponential-backoff doubling; a `1 << attempt` with an
/// oversized configured retry budget would otherwise overflow.
const MAX_BACKOFF_SHIFT: u32 = 16;

fn fetch_page_with_retries<C: OsdrClient>(
    client: &C,
    config: &CacheConfig,
    term: &str,
    page: usize,
) -> Option<Vec<Study>> {
    let offset = page * config.page_size;
    for attempt in 0..=config.max_retries {
        match client.search_with_pagination(term, offset, config.page_size) {
            Ok(studies) => return Some(studies),
            Err(err) => {
                warn!(term, page, attempt, error = %err, "crawl page fetch failed");
                if attempt < config.max_retries {
                    let shift = (attempt as u32).min(MAX_BACKOFF_SHIFT);
                    let delay = config.retry_base_ms.saturating_mul(1u64 << shift);
                    thread::sleep(Duration::from_millis(delay));
                }
            }
        }
    }
    None
}

fn lock<'a, T>(mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read_lock<'a, T>(lock: &'a RwLock<T>) -> std::sync::RwLockReadGuard<'a, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<'a, T>(lock: &'a RwLock<T>) -> std::sync::RwLockWriteGuard<'a, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
