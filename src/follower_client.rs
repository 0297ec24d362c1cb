//! FollowerClient: the follower side of the leader/follower
//! split. Long-polls the leader for work, executes it locally through
//! [`crate::executor::Executor`], and streams progress back.
//!
//! `reqwest::blocking` is the HTTP client dependency this crate already
//! carries (see `network_proxy.rs`'s `apply_reqwest_blocking_builder` for
//! the builder-configuration style); no prior code here implements a retry
//! loop over it — the exponential backoff below (base 1 s,
//! cap 30 s, unbounded attempts) is new and documented as
//! such in DESIGN.md.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::argument_builder::ArgVector;
use crate::domain::JobId;
use crate::executor::{CancelToken, Executor, ExecutorOutcome};
use crate::progress_parser::Progress;

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunJobRequest {
    pub job_id: JobId,
    pub arg_vector_args: Vec<String>,
    pub output_path: std::path::PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressReport {
    pub job_id: JobId,
    pub progress_percent: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "outcome")]
pub enum TerminalReport {
    Completed { job_id: JobId, stderr_tail: String },
    Cancelled { job_id: JobId, stderr_tail: String },
    Failed { job_id: JobId, reason: String, stderr_tail: String },
}

/// Abstraction over "talk to the leader" so the retry/backoff loop and the
/// local-execute-and-report logic are testable without a real socket.
/// A production transport implements this with `reqwest::blocking`.
pub trait LeaderConduit: Send + Sync {
    /// Long-polls for the next job to run; blocks until one is assigned or
    /// the connection should be retried (returning `Ok(None)` is treated
    /// the same as a transient miss, not a terminal error).
    fn poll_next_job(&self) -> Result<Option<RunJobRequest>, String>;
    fn report_progress(&self, report: ProgressReport);
    fn report_terminal(&self, report: TerminalReport);
}

pub struct FollowerClient<C: LeaderConduit> {
    conduit: Arc<C>,
    executor: Executor,
}

impl<C: LeaderConduit> FollowerClient<C> {
    pub fn new(conduit: Arc<C>) -> Self {
        FollowerClient {
            conduit,
            executor: Executor::new(),
        }
    }

    /// Runs one poll-execute-report cycle. Returns the backoff the caller
    /// should sleep for before trying again if the poll itself failed;
    /// `None` means proceed immediately (a job ran, or a poll came back
    /// empty and retrying immediately is fine).
    pub fn run_once(&self, attempt: u32, cancel: &CancelToken) -> Option<Duration> {
        let next = match self.conduit.poll_next_job() {
            Ok(next) => next,
            Err(_) => return Some(backoff_for(attempt)),
        };

        let Some(request) = next else {
            return None;
        };

        let vector = ArgVector {
            args: request.arg_vector_args,
            display_string: String::new(),
            input_path: std::path::PathBuf::new(),
            output_path: request.output_path,
        };

        let job_id = request.job_id;
        let conduit = self.conduit.clone();
        let result = self.executor.run(&vector, cancel, move |progress: Progress| {
            conduit.report_progress(ProgressReport {
                job_id,
                progress_percent: progress.progress_percent,
            });
        });

        let terminal = match result {
            Ok(ExecutorOutcome::Completed { stderr_tail }) => TerminalReport::Completed { job_id, stderr_tail },
            Ok(ExecutorOutcome::Cancelled { stderr_tail }) => TerminalReport::Cancelled { job_id, stderr_tail },
            Ok(ExecutorOutcome::Failed { reason, stderr_tail }) => TerminalReport::Failed {
                job_id,
                reason,
                stderr_tail,
            },
            Err(err) => TerminalReport::Failed {
                job_id,
                reason: err.to_string(),
                stderr_tail: String::new(),
            },
        };
        // Reported exactly once per job: this is the single
        // call site in the poll-execute-report cycle.
        self.conduit.report_terminal(terminal);

        None
    }
}

fn backoff_for(attempt: u32) -> Duration {
    let scaled = BACKOFF_BASE.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    scaled.min(BACKOFF_CAP)
}

const POLL_TIMEOUT: Duration = Duration::from_secs(35);
const REPORT_TIMEOUT: Duration = Duration::from_secs(10);

/// Production [`LeaderConduit`]: long-polls `{base_url}/followers/{id}/next-job`
/// and posts progress/terminal reports back over `reqwest::blocking`.
/// The client's own request timeout (35 s) is kept comfortably above the
/// leader's long-poll window so an empty, successful poll is never mistaken
/// for a dropped connection.
pub struct HttpLeaderConduit {
    base_url: String,
    follower_id: String,
    client: reqwest::blocking::Client,
}

impl HttpLeaderConduit {
    pub fn new(base_url: impl Into<String>, follower_id: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder().timeout(POLL_TIMEOUT).build()?;
        Ok(HttpLeaderConduit {
            base_url: base_url.into(),
            follower_id: follower_id.into(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/followers/{}{path}", self.base_url.trim_end_matches('/'), self.follower_id)
    }
}

impl LeaderConduit for HttpLeaderConduit {
    fn poll_next_job(&self) -> Result<Option<RunJobRequest>, String> {
        let response = self
            .client
            .get(self.url("/next-job"))
            .send()
            .map_err(|err| err.to_string())?;

        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let response = response.error_for_status().map_err(|err| err.to_string())?;
        response.json::<Option<RunJobRequest>>().map_err(|err| err.to_string())
    }

    fn report_progress(&self, report: ProgressReport) {
        let client = self.client.clone();
        let url = self.url("/progress");
        if let Err(err) = client
            .post(url)
            .timeout(REPORT_TIMEOUT)
            .json(&report)
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
        {
            crate::debug_eprintln!("follower_client: failed to report progress for job {}: {err}", report.job_id);
        }
    }

    fn report_terminal(&self, report: TerminalReport) {
        let client = self.client.clone();
        let url = self.url("/terminal");
        if let Err(err) = client
            .post(url)
            .timeout(REPORT_TIMEOUT)
            .json(&report)
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
        {
            crate::debug_eprintln!("follower_client: failed to report terminal outcome: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockConduit {
        jobs: Mutex<Vec<RunJobRequest>>,
        progress_reports: Mutex<Vec<ProgressReport>>,
        terminal_reports: Mutex<Vec<TerminalReport>>,
        fail_poll: bool,
    }

    impl LeaderConduit for MockConduit {
        fn poll_next_job(&self) -> Result<Option<RunJobRequest>, String> {
            if self.fail_poll {
                return Err("connection reset".into());
            }
            Ok(self.jobs.lock().unwrap().pop())
        }

        fn report_progress(&self, report: ProgressReport) {
            self.progress_reports.lock().unwrap().push(report);
        }

        fn report_terminal(&self, report: TerminalReport) {
            self.terminal_reports.lock().unwrap().push(report);
        }
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        assert_eq!(backoff_for(0), Duration::from_secs(1));
        assert_eq!(backoff_for(1), Duration::from_secs(2));
        assert_eq!(backoff_for(2), Duration::from_secs(4));
        assert_eq!(backoff_for(10), Duration::from_secs(30));
    }

    #[test]
    fn empty_poll_returns_no_backoff() {
        let conduit = Arc::new(MockConduit::default());
        let client = FollowerClient::new(conduit);
        let cancel = CancelToken::new();
        assert!(client.run_once(0, &cancel).is_none());
    }

    #[test]
    fn failed_poll_returns_a_backoff_duration() {
        let conduit = Arc::new(MockConduit {
            fail_poll: true,
            ..Default::default()
        });
        let client = FollowerClient::new(conduit);
        let cancel = CancelToken::new();
        assert_eq!(client.run_once(0, &cancel), Some(Duration::from_secs(1)));
    }

    #[test]
    fn a_job_with_a_disallowed_executable_still_reports_terminal_exactly_once() {
        let conduit = Arc::new(MockConduit::default());
        conduit.jobs.lock().unwrap().push(RunJobRequest {
            job_id: 1,
            arg_vector_args: vec!["sh".to_string()],
            output_path: "out.mp4".into(),
        });
        let client = FollowerClient::new(conduit.clone());
        let cancel = CancelToken::new();
        client.run_once(0, &cancel);
        let reports = conduit.terminal_reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert!(matches!(reports[0], TerminalReport::Failed { job_id: 1, .. }));
    }
}
