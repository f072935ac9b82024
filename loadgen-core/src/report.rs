use std::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::config::{LoadJobSpec, Mode, Protocol};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfigSnapshot {
    pub protocol: Protocol,
    pub mode: Mode,
    pub req_num: usize,
    pub concurrency: usize,
    pub timeout_secs: u64,
    pub max_retries: usize,
    pub payload_size_bytes: usize,
    pub seed: u64,
}

impl RunConfigSnapshot {
    pub fn new(protocol: Protocol, job: &LoadJobSpec) -> Self {
        Self {
            protocol,
            mode: job.mode,
            req_num: job.req_num,
            concurrency: job.concurrency,
            timeout_secs: job.timeout_secs,
            max_retries: job.max_retries,
            payload_size_bytes: job.payload_size_bytes,
            seed: job.seed,
        }
    }
}

/// Aggregate statistics of one run. Rates are `None` when undefined
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub config: RunConfigSnapshot,
    pub planned: usize,
    pub completed: usize,
    pub successful: usize,
    pub failed: usize,
    pub average_latency_secs: Option<f64>,
    pub success_percent: Option<f64>,
    pub average_events: Option<f64>,
    pub total_wall_secs: f64,
    pub throughput_per_sec: Option<f64>,
}

fn fixed(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(value) if value.is_finite() => format!("{value:.precision$}"),
        _ => "n/a".to_string(),
    }
}

impl Report {
    pub fn human_summary(&self) -> String {
        let mut output = String::new();
        output.push_str("Load test report\n");
        let _ = writeln!(
            output,
            "mode: protocol={:?}, mode={:?}, requests={}, concurrency={}",
            self.config.protocol, self.config.mode, self.planned, self.config.concurrency
        );
        let _ = writeln!(
            output,
            "trials: completed={}, successful={}, failed={}",
            self.completed, self.successful, self.failed
        );
        let _ = writeln!(
            output,
            "Average Latency: {} Second",
            fixed(self.average_latency_secs, 3)
        );
        let _ = writeln!(
            output,
            "Total Success percent: {}%",
            fixed(self.success_percent, 2)
        );
        if self.config.mode.is_streaming() {
            let _ = writeln!(output, "Average Events: {}", fixed(self.average_events, 2));
        }
        let _ = writeln!(
            output,
            "Total time taken: {} Second",
            fixed(Some(self.total_wall_secs), 4)
        );
        let _ = writeln!(
            output,
            "Total throughput: {} Request/Second",
            fixed(self.throughput_per_sec, 4)
        );
        output
    }
}

#[cfg(test)]
mod tests {
    use super::{Report, RunConfigSnapshot};
    use crate::config::{LoadJobSpec, Mode, Protocol};

    fn report(mode: Mode) -> Report {
        let job = LoadJobSpec {
            req_num: 4,
            concurrency: 2,
            ..LoadJobSpec::new(mode)
        };
        Report {
            config: RunConfigSnapshot::new(Protocol::Grpc, &job),
            planned: 4,
            completed: 4,
            successful: 3,
            failed: 1,
            average_latency_secs: Some(0.12345),
            success_percent: Some(75.0),
            average_events: Some(2.5),
            total_wall_secs: 1.5,
            throughput_per_sec: Some(4.0 / 1.5),
        }
    }

    #[test]
    fn summary_uses_fixed_precision() {
        let summary = report(Mode::ServerStream).human_summary();

        assert!(summary.contains("Average Latency: 0.123 Second"));
        assert!(summary.contains("Total Success percent: 75.00%"));
        assert!(summary.contains("Average Events: 2.50"));
        assert!(summary.contains("Total time taken: 1.5000 Second"));
        assert!(summary.contains("Total throughput: 2.6667 Request/Second"));
    }

    #[test]
    fn events_only_shown_for_streaming_modes() {
        let summary = report(Mode::Unary).human_summary();
        assert!(!summary.contains("Average Events"));
    }

    #[test]
    fn undefined_rates_print_as_na() {
        let mut report = report(Mode::Unary);
        report.average_latency_secs = None;
        report.success_percent = None;
        report.throughput_per_sec = None;

        let summary = report.human_summary();
        assert!(summary.contains("Average Latency: n/a Second"));
        assert!(summary.contains("Total Success percent: n/a%"));
        assert!(summary.contains("Total throughput: n/a Request/Second"));
    }

    #[test]
    fn serializes_to_json() {
        let json = serde_json::to_value(report(Mode::Unary)).expect("serialize report");
        assert_eq!(json["config"]["protocol"], "grpc");
        assert_eq!(json["config"]["mode"], "unary");
        assert_eq!(json["successful"], 3);
    }
}
