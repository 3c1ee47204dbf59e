pub mod fetch;
pub mod progress;

use std::sync::Arc;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::db::{self, PendingRecord, RecordFields};
use crate::parser::{self, Ruleset};
use fetch::{FetchError, Fetcher};
use progress::{Progress, Tally};

/// What a worker made of one record.
pub enum Outcome {
    Processed(RecordFields),
    /// Left pending for a later run.
    Skipped(FetchError),
}

struct Done {
    record: PendingRecord,
    outcome: Outcome,
}

/// Fetch and parse one record's page. Any fetch problem or non-2xx status
/// skips the record; missing fields never do.
pub async fn enrich_one(fetcher: &dyn Fetcher, ruleset: &Ruleset, url: &str) -> Outcome {
    let response = match fetcher.get(url).await {
        Ok(r) => r,
        Err(e) => return Outcome::Skipped(e),
    };
    if !response.is_success() {
        return Outcome::Skipped(FetchError::Status(response.status));
    }
    Outcome::Processed(parser::extract(&response.body, ruleset))
}

/// Enrich a snapshot of pending records with at most `workers` fetches in
/// flight. Workers only fetch and parse; every store write happens here, one
/// record at a time, as results arrive.
pub async fn enrich_pending(
    conn: &Connection,
    fetcher: Arc<dyn Fetcher>,
    ruleset: Arc<Ruleset>,
    records: Vec<PendingRecord>,
    workers: usize,
) -> Result<Tally> {
    let workers = workers.max(1);
    let semaphore = Arc::new(Semaphore::new(workers));
    let progress = Arc::new(Progress::default());
    let total = records.len();

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let (tx, mut rx) = tokio::sync::mpsc::channel::<Done>(workers * 2);

    for record in records {
        let fetcher = Arc::clone(&fetcher);
        let ruleset = Arc::clone(&ruleset);
        let sem = Arc::clone(&semaphore);
        let progress = Arc::clone(&progress);
        let tx = tx.clone();

        tokio::spawn(async move {
            let Ok(_permit) = sem.acquire().await else {
                return;
            };
            let outcome = enrich_one(fetcher.as_ref(), &ruleset, &record.url).await;
            if matches!(outcome, Outcome::Skipped(_)) {
                progress.record_skipped();
            }
            let _ = tx.send(Done { record, outcome }).await;
        });
    }

    // Channel closes once every task has sent its result.
    drop(tx);

    let mut received = 0;
    while let Some(Done { record, outcome }) = rx.recv().await {
        received += 1;
        match outcome {
            Outcome::Processed(fields) => {
                match db::mark_processed(conn, &record.partition, record.id, &fields) {
                    Ok(true) => {
                        let n = progress.record_processed();
                        pb.println(format!(
                            "Processed: {} in {} (total: {})",
                            record.url, record.partition, n
                        ));
                    }
                    Ok(false) => {
                        progress.record_skipped();
                        warn!("Record {} is no longer pending, left as is", record.id);
                    }
                    Err(e) => {
                        progress.record_failed();
                        error!("Failed to save {} in {}: {:#}", record.url, record.partition, e);
                    }
                }
            }
            Outcome::Skipped(reason) => {
                warn!("Skipped {} in {}: {}", record.url, record.partition, reason);
                if let Err(e) = db::record_failure(conn, record.id, &reason.to_string()) {
                    error!("Failed to note attempt on {}: {:#}", record.url, e);
                }
            }
        }
        pb.inc(1);
    }

    pb.finish_and_clear();

    // A task that panicked never sent its result.
    if received < total {
        error!(
            "{} of {} records never reported back and stay pending",
            total - received,
            total
        );
        for _ in received..total {
            progress.record_failed();
        }
    }

    let tally = progress.snapshot();
    info!(
        "Enriched {} records ({} processed, {} skipped, {} failed)",
        total, tally.processed, tally.skipped, tally.failed
    );
    Ok(tally)
}
