pub mod filters;
pub mod known;

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::{error, info, warn};
use url::Url;

use crate::db;
use crate::render::{Session, SessionFactory};
use crate::settings::{FilterToggle, PartitionConfig, Selectors, Settings};
use filters::ToggleOutcome;
use known::KnownUrls;

#[derive(Debug, Clone, Copy)]
pub struct Timing {
    /// Upper bound for any single wait on the page.
    pub wait: Duration,
    /// Pause after navigation and clicks so results can re-render.
    pub settle: Duration,
}

#[cfg(test)]
impl Timing {
    pub fn instant() -> Self {
        Timing {
            wait: Duration::ZERO,
            settle: Duration::ZERO,
        }
    }
}

pub struct DriverOptions {
    pub selectors: Selectors,
    pub filters: Vec<FilterToggle>,
    pub timing: Timing,
    pub max_pages: usize,
}

impl DriverOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        DriverOptions {
            selectors: settings.selectors.clone(),
            filters: settings.filters.clone(),
            timing: Timing {
                wait: settings.wait_timeout(),
                settle: settings.settle(),
            },
            max_pages: settings.max_pages.max(1),
        }
    }
}

/// Why a partition's page loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No result cards could be read on the current page.
    NoCards,
    /// The next-page control was missing or could not be clicked.
    NoNextPage,
    /// The page ceiling was reached.
    PageCeiling,
    /// The entry page never loaded, so nothing was read.
    EntryUnreachable,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            StopReason::NoCards => "no result cards",
            StopReason::NoNextPage => "no next page",
            StopReason::PageCeiling => "page ceiling reached",
            StopReason::EntryUnreachable => "entry page unreachable",
        })
    }
}

pub struct PartitionReport {
    pub partition: String,
    pub pages: usize,
    pub inserted: usize,
    pub reason: StopReason,
    pub toggles: Vec<(String, ToggleOutcome)>,
    pub elapsed: Duration,
}

/// Walk every result page of one partition with its own browser session.
/// The session is closed whether or not the walk succeeds.
pub async fn discover_partition(
    conn: &Connection,
    factory: &dyn SessionFactory,
    partition: &PartitionConfig,
    opts: &DriverOptions,
) -> Result<PartitionReport> {
    let mut session = factory
        .open()
        .await
        .with_context(|| format!("Failed to open browser session for {}", partition.name))?;
    let result = walk(conn, session.as_mut(), partition, opts).await;
    if let Err(e) = session.close().await {
        warn!("Failed to close session for {}: {:#}", partition.name, e);
    }
    result
}

async fn walk(
    conn: &Connection,
    session: &mut dyn Session,
    partition: &PartitionConfig,
    opts: &DriverOptions,
) -> Result<PartitionReport> {
    let start = Instant::now();
    let entry = Url::parse(&partition.entry_url)
        .with_context(|| format!("Invalid entry URL for {}", partition.name))?;
    info!("Starting discovery in {}", partition.name);

    let mut report = PartitionReport {
        partition: partition.name.clone(),
        pages: 0,
        inserted: 0,
        reason: StopReason::NoCards,
        toggles: Vec::new(),
        elapsed: Duration::ZERO,
    };

    if let Err(e) = session.navigate(entry.as_str()).await {
        warn!("Could not load {}: {:#}", entry, e);
        report.reason = StopReason::EntryUnreachable;
        report.elapsed = start.elapsed();
        return Ok(report);
    }
    let _ = session.wait_for(&opts.selectors.ready, opts.timing.wait).await;
    tokio::time::sleep(opts.timing.settle).await;

    for toggle in &opts.filters {
        let outcome = filters::apply_toggle(session, toggle, &opts.timing).await;
        report.toggles.push((toggle.name.clone(), outcome));
    }
    tokio::time::sleep(opts.timing.settle).await;

    let mut known = KnownUrls::seed(conn, &partition.name)?;

    report.reason = loop {
        let Some(links) = read_cards(session, opts).await else {
            break StopReason::NoCards;
        };
        report.pages += 1;

        let links = resolve_links(&entry, links);
        let fresh = known.split_new(&links);
        let added = db::insert_pending(conn, &partition.name, &fresh)
            .with_context(|| format!("Failed to store links for {}", partition.name))?;
        for url in fresh {
            known.remember(url);
        }
        report.inserted += added;
        info!(
            "{} new links in {}, page {} ({} known)",
            added,
            partition.name,
            report.pages,
            known.len()
        );

        if report.pages >= opts.max_pages {
            warn!("Stopping {} at the {}-page ceiling", partition.name, opts.max_pages);
            break StopReason::PageCeiling;
        }
        if !next_page(session, opts).await {
            break StopReason::NoNextPage;
        }
    };

    report.elapsed = start.elapsed();
    info!(
        "Finished {}: {} new links over {} pages in {:.2} min ({})",
        partition.name,
        report.inserted,
        report.pages,
        report.elapsed.as_secs_f64() / 60.0,
        report.reason
    );
    Ok(report)
}

/// Card hrefs on the current page, or `None` when there are no cards or they
/// cannot be read.
async fn read_cards(session: &mut dyn Session, opts: &DriverOptions) -> Option<Vec<String>> {
    let cards = &opts.selectors.cards;
    match session.wait_for(cards, opts.timing.wait).await {
        Ok(true) => {}
        Ok(false) => return None,
        Err(e) => {
            warn!("Waiting for result cards failed: {:#}", e);
            return None;
        }
    }
    match session.read_all(cards, "href").await {
        Ok(links) => Some(links),
        Err(e) => {
            warn!("Reading result cards failed: {:#}", e);
            None
        }
    }
}

async fn next_page(session: &mut dyn Session, opts: &DriverOptions) -> bool {
    let next = &opts.selectors.next_page;
    if !matches!(session.wait_for(next, opts.timing.wait).await, Ok(true)) {
        return false;
    }
    if is_disabled(session, next).await {
        return false;
    }
    if let Err(e) = session.click(next).await {
        warn!("Next page control could not be clicked: {:#}", e);
        return false;
    }
    tokio::time::sleep(opts.timing.settle).await;
    true
}

/// A rendered but inert control: `disabled` or `aria-disabled="true"`.
async fn is_disabled(session: &mut dyn Session, selector: &str) -> bool {
    if let Ok(Some(_)) = session.read_attribute(selector, "disabled").await {
        return true;
    }
    matches!(
        session.read_attribute(selector, "aria-disabled").await,
        Ok(Some(v)) if v == "true"
    )
}

/// Absolute http(s) urls without fragments; anything else is dropped.
fn resolve_links(base: &Url, hrefs: Vec<String>) -> Vec<String> {
    hrefs
        .iter()
        .filter_map(|href| base.join(href.trim()).ok())
        .filter(|u| matches!(u.scheme(), "http" | "https"))
        .map(|mut u| {
            u.set_fragment(None);
            u.to_string()
        })
        .collect()
}

pub struct DiscoverySummary {
    pub reports: Vec<PartitionReport>,
    /// Partitions that stopped on an error, with the error text.
    pub failed: Vec<(String, String)>,
}

impl DiscoverySummary {
    pub fn inserted(&self) -> usize {
        self.reports.iter().map(|r| r.inserted).sum()
    }

    /// Partitions that ran without error but never reached their results.
    pub fn degraded(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| r.reason == StopReason::EntryUnreachable)
            .count()
    }
}

/// Discover partitions one after another. An error in one partition is
/// logged and does not stop the rest.
pub async fn discover_all(
    conn: &Connection,
    factory: &dyn SessionFactory,
    partitions: &[PartitionConfig],
    opts: &DriverOptions,
) -> Result<DiscoverySummary> {
    db::register_partitions(conn, partitions)?;

    let mut summary = DiscoverySummary {
        reports: Vec::new(),
        failed: Vec::new(),
    };
    for partition in partitions {
        match discover_partition(conn, factory, partition, opts).await {
            Ok(report) => summary.reports.push(report),
            Err(e) => {
                error!("Discovery in {} failed: {:#}", partition.name, e);
                summary.failed.push((partition.name.clone(), format!("{:#}", e)));
            }
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::fake::{Checkbox, ScriptedFactory, ScriptedSession};

    const ENTRY: &str = "https://www.example.test/network/us/mt";

    fn montana() -> PartitionConfig {
        PartitionConfig {
            name: "montana".into(),
            entry_url: ENTRY.into(),
        }
    }

    fn opts() -> DriverOptions {
        DriverOptions {
            selectors: Selectors::default(),
            filters: Vec::new(),
            timing: Timing::instant(),
            max_pages: 50,
        }
    }

    fn stored(conn: &Connection) -> Vec<String> {
        let mut urls = db::fetch_known_urls(conn, "montana").unwrap();
        urls.sort();
        urls
    }

    fn abs(paths: &[&str]) -> Vec<String> {
        paths
            .iter()
            .map(|p| format!("https://www.example.test/network/p/{}", p))
            .collect()
    }

    #[tokio::test]
    async fn overlapping_pages_store_each_url_once() {
        let conn = db::test_conn(&["montana"]);
        let factory = ScriptedFactory::new(ScriptedSession::new(vec![
            vec!["/network/p/a", "/network/p/b", "/network/p/c"],
            vec!["/network/p/c", "/network/p/d"],
        ]));

        let report = discover_partition(&conn, &factory, &montana(), &opts()).await.unwrap();
        assert_eq!(report.pages, 2);
        assert_eq!(report.inserted, 4);
        assert_eq!(report.reason, StopReason::NoNextPage);
        assert_eq!(stored(&conn), abs(&["a", "b", "c", "d"]));
        assert_eq!(db::fetch_pending(&conn, None, None).unwrap().len(), 4);
    }

    #[tokio::test]
    async fn second_run_inserts_nothing() {
        let conn = db::test_conn(&["montana"]);
        let factory = ScriptedFactory::new(ScriptedSession::new(vec![
            vec!["/network/p/a", "/network/p/b"],
            vec!["/network/p/c"],
        ]));

        let first = discover_partition(&conn, &factory, &montana(), &opts()).await.unwrap();
        let second = discover_partition(&conn, &factory, &montana(), &opts()).await.unwrap();
        assert_eq!(first.inserted, 3);
        assert_eq!(second.inserted, 0);
        assert_eq!(second.pages, 2);
        assert_eq!(stored(&conn).len(), 3);
    }

    #[tokio::test]
    async fn page_of_known_links_does_not_end_the_walk() {
        let conn = db::test_conn(&["montana"]);
        let factory = ScriptedFactory::new(ScriptedSession::new(vec![
            vec!["/network/p/a"],
            vec!["/network/p/a"],
            vec!["/network/p/b"],
        ]));

        let report = discover_partition(&conn, &factory, &montana(), &opts()).await.unwrap();
        assert_eq!(report.pages, 3);
        assert_eq!(stored(&conn), abs(&["a", "b"]));
    }

    #[tokio::test]
    async fn empty_page_ends_with_no_cards() {
        let conn = db::test_conn(&["montana"]);
        let factory = ScriptedFactory::new(ScriptedSession::new(vec![
            vec!["/network/p/a"],
            vec![],
            vec!["/network/p/z"],
        ]));

        let report = discover_partition(&conn, &factory, &montana(), &opts()).await.unwrap();
        assert_eq!(report.reason, StopReason::NoCards);
        assert_eq!(report.pages, 1);
        assert_eq!(stored(&conn), abs(&["a"]));
    }

    #[tokio::test]
    async fn read_failure_truncates_partition() {
        let conn = db::test_conn(&["montana"]);
        let session = ScriptedSession::new(vec![
            vec!["/network/p/a"],
            vec!["/network/p/b"],
            vec!["/network/p/c"],
        ])
        .failing_read_on(1);
        let factory = ScriptedFactory::new(session);

        let report = discover_partition(&conn, &factory, &montana(), &opts()).await.unwrap();
        assert_eq!(report.reason, StopReason::NoCards);
        assert_eq!(stored(&conn), abs(&["a"]));
    }

    #[tokio::test]
    async fn ineffective_next_control_hits_ceiling() {
        let conn = db::test_conn(&["montana"]);
        let factory = ScriptedFactory::new(
            ScriptedSession::new(vec![vec!["/network/p/a", "/network/p/b"]]).with_stuck_next(),
        );
        let opts = DriverOptions {
            max_pages: 5,
            ..opts()
        };

        let report = discover_partition(&conn, &factory, &montana(), &opts).await.unwrap();
        assert_eq!(report.reason, StopReason::PageCeiling);
        assert_eq!(report.pages, 5);
        assert_eq!(report.inserted, 2);
    }

    #[tokio::test]
    async fn disabled_next_control_ends_partition() {
        let conn = db::test_conn(&["montana"]);
        let factory = ScriptedFactory::new(
            ScriptedSession::new(vec![vec!["/network/p/a", "/network/p/b"]]).with_disabled_next(),
        );
        let opts = DriverOptions {
            max_pages: 500,
            ..opts()
        };

        let report = discover_partition(&conn, &factory, &montana(), &opts).await.unwrap();
        assert_eq!(report.reason, StopReason::NoNextPage);
        assert_eq!(report.pages, 1);
        assert_eq!(report.inserted, 2);
    }

    #[tokio::test]
    async fn disabled_next_only_on_last_page() {
        let conn = db::test_conn(&["montana"]);
        let factory = ScriptedFactory::new(
            ScriptedSession::new(vec![vec!["/network/p/a"], vec!["/network/p/b"]])
                .with_disabled_next(),
        );

        let report = discover_partition(&conn, &factory, &montana(), &opts()).await.unwrap();
        assert_eq!(report.reason, StopReason::NoNextPage);
        assert_eq!(report.pages, 2);
    }

    #[tokio::test]
    async fn unreachable_entry_is_reported_as_degraded() {
        let conn = db::test_conn(&[]);
        let factory =
            ScriptedFactory::new(ScriptedSession::new(vec![vec!["/network/p/a"]]).unreachable());

        let summary = discover_all(&conn, &factory, &[montana()], &opts()).await.unwrap();
        assert!(summary.failed.is_empty());
        assert_eq!(summary.reports[0].reason, StopReason::EntryUnreachable);
        assert_eq!(summary.reports[0].pages, 0);
        assert_eq!(summary.degraded(), 1);
        assert_eq!(summary.inserted(), 0);
        assert_eq!(factory.closed(), 1);
    }

    #[tokio::test]
    async fn filters_applied_before_reading() {
        let conn = db::test_conn(&["montana"]);
        let session = ScriptedSession::new(vec![vec!["/network/p/a"]])
            .with_checkbox("span.sc", Checkbox::checked())
            .with_checkbox("span.gc", Checkbox::stuck());
        let factory = ScriptedFactory::new(session);
        let opts = DriverOptions {
            filters: vec![
                FilterToggle {
                    name: "Specialty Contractors".into(),
                    selector: "span.sc".into(),
                },
                FilterToggle {
                    name: "General Contractors".into(),
                    selector: "span.gc".into(),
                },
            ],
            ..opts()
        };

        let report = discover_partition(&conn, &factory, &montana(), &opts).await.unwrap();
        assert_eq!(
            report.toggles,
            vec![
                ("Specialty Contractors".to_string(), ToggleOutcome::AlreadyActive),
                ("General Contractors".to_string(), ToggleOutcome::Failed),
            ]
        );
        // A failed toggle still reads whatever is shown.
        assert_eq!(report.inserted, 1);
    }

    #[tokio::test]
    async fn session_closed_even_on_store_error() {
        // Partition never registered, so the insert violates the foreign key.
        let conn = db::test_conn(&[]);
        let factory = ScriptedFactory::new(ScriptedSession::new(vec![vec!["/network/p/a"]]));

        let result = discover_partition(&conn, &factory, &montana(), &opts()).await;
        assert!(result.is_err());
        assert_eq!(factory.closed(), 1);
    }

    #[tokio::test]
    async fn discover_all_continues_after_failure() {
        let conn = db::test_conn(&[]);
        let factory = ScriptedFactory::new(ScriptedSession::new(vec![vec!["/network/p/a"]]));
        let partitions = vec![
            PartitionConfig {
                name: "broken".into(),
                entry_url: "not a url".into(),
            },
            montana(),
        ];

        let summary = discover_all(&conn, &factory, &partitions, &opts()).await.unwrap();
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, "broken");
        assert_eq!(summary.inserted(), 1);
        assert_eq!(factory.opened.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(factory.closed(), 2);
    }

    #[test]
    fn links_resolved_against_entry() {
        let base = Url::parse(ENTRY).unwrap();
        let links = resolve_links(
            &base,
            vec![
                "/network/p/a#reviews".into(),
                "https://other.test/x".into(),
                "javascript:void(0)".into(),
            ],
        );
        assert_eq!(
            links,
            vec![
                "https://www.example.test/network/p/a".to_string(),
                "https://other.test/x".to_string(),
            ]
        );
    }
}
