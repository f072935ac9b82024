use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::aggregator::Aggregator;
use crate::config::{LoadJobSpec, Protocol};
use crate::payload::PayloadBuilder;
use crate::report::Report;
use crate::strategy::{Outcome, Strategy};
use crate::transport::Transport;

/// Run `job.req_num` trials of `strategy` against a shared transport with at
/// most `job.concurrency` in flight, then summarize them.
///
/// Every trial yields exactly one outcome; a trial task that panics is
/// recorded as a failed outcome so the totals still add up.
pub async fn run<T, B>(
    transport: Arc<T>,
    payloads: Arc<B>,
    strategy: Arc<Strategy>,
    job: &LoadJobSpec,
    protocol: Protocol,
) -> Result<Report>
where
    T: Transport,
    B: PayloadBuilder<Payload = T::Payload>,
{
    info!(
        ?protocol,
        mode = ?strategy.mode(),
        requests = job.req_num,
        concurrency = job.concurrency,
        "starting load run"
    );
    let started = Instant::now();

    // never more permits than trials, and within what tokio can allocate
    let width = job
        .concurrency
        .min(job.req_num)
        .clamp(1, Semaphore::MAX_PERMITS);
    let (tx, rx) = mpsc::channel::<Outcome>(width.saturating_mul(2).min(Semaphore::MAX_PERMITS));
    let aggregator = tokio::spawn(Aggregator::consume(rx));

    let semaphore = Arc::new(Semaphore::new(width));
    let mut tasks = JoinSet::new();
    for trial in 0..job.req_num {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .context("acquire concurrency permit")?;

        let transport = transport.clone();
        let payloads = payloads.clone();
        let strategy = strategy.clone();
        let tx = tx.clone();

        tasks.spawn(async move {
            let _permit = permit;
            let outcome = strategy.execute(&*transport, &*payloads, trial).await;
            // receiver only goes away if the aggregator died, reported below
            let _ = tx.send(outcome).await;
        });
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined {
            error!(%err, "trial task failed");
            let _ = tx.send(Outcome::failed()).await;
        }
    }
    drop(tx);

    let totals = aggregator.await.context("aggregator task join failed")?;
    let report = totals.finish(protocol, job, started.elapsed());
    info!(
        completed = report.completed,
        successful = report.successful,
        failed = report.failed,
        wall_secs = report.total_wall_secs,
        "load run finished"
    );
    Ok(report)
}
