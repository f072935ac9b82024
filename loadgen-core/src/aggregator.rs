//! Folds outcomes, in whatever order they arrive, into run totals
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::config::{LoadJobSpec, Protocol};
use crate::report::{Report, RunConfigSnapshot};
use crate::strategy::Outcome;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Aggregator {
    pub completed: usize,
    pub successful: usize,
    pub total_latency_secs: f64,
    pub streaming: usize,
    pub total_events: usize,
}

impl Aggregator {
    pub fn record(&mut self, outcome: &Outcome) {
        self.completed += 1;
        self.total_latency_secs += outcome.latency_secs();
        if outcome.successful {
            self.successful += 1;
        }
        if outcome.streaming {
            self.streaming += 1;
            self.total_events += outcome.events;
        }
    }

    /// drain `rx` until every sender is gone
    pub async fn consume(mut rx: mpsc::Receiver<Outcome>) -> Self {
        let mut agg = Self::default();
        while let Some(outcome) = rx.recv().await {
            debug!(
                latency = outcome.latency_secs(),
                successful = outcome.successful,
                events = outcome.events,
                streaming = outcome.streaming,
                "trial complete"
            );
            agg.record(&outcome);
        }
        agg
    }

    pub fn failed(&self) -> usize {
        self.completed - self.successful
    }

    pub fn average_latency_secs(&self) -> Option<f64> {
        ratio(self.total_latency_secs, self.completed)
    }

    pub fn success_percent(&self) -> Option<f64> {
        ratio(self.successful as f64 * 100.0, self.completed)
    }

    /// only defined when at least one streaming outcome was seen
    pub fn average_events(&self) -> Option<f64> {
        ratio(self.total_events as f64, self.streaming)
    }

    pub fn finish(self, protocol: Protocol, job: &LoadJobSpec, wall: Duration) -> Report {
        let total_wall_secs = wall.as_secs_f64();
        let throughput_per_sec = if job.req_num == 0 || total_wall_secs <= 0.0 {
            None
        } else {
            Some(job.req_num as f64 / total_wall_secs)
        };

        Report {
            config: RunConfigSnapshot::new(protocol, job),
            planned: job.req_num,
            completed: self.completed,
            successful: self.successful,
            failed: self.failed(),
            average_latency_secs: self.average_latency_secs(),
            success_percent: self.success_percent(),
            average_events: self.average_events(),
            total_wall_secs,
            throughput_per_sec,
        }
    }
}

fn ratio(total: f64, count: usize) -> Option<f64> {
    (count > 0).then(|| total / count as f64)
}
