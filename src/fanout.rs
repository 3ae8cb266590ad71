//! Fan-out coordinator: one logical request against many targets.
//!
//! Targets run concurrently; per-target failures are embedded in the result
//! vector rather than raised, so one dead host never sinks the whole call.

use regex::RegexBuilder;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::capture::tail_bounded;
use crate::errors::{Error, Result};
use crate::ops::TmuxClient;
use crate::target::{PaneRef, TargetResolver};

/// How each target's read is performed after the optional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FanoutMode {
    /// Send keys, then one-shot capture.
    SendCapture,
    /// Send keys, then a bounded polling tail.
    Tail,
    /// Send keys, capture once, and test the capture against a regex.
    Pattern,
}

/// One addressed target within a fan-out request.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FanoutTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Pane token in any accepted notation.
    pub target: String,
}

/// A fan-out request: the same keys and read mode applied to every target.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct FanoutRequest {
    pub targets: Vec<FanoutTarget>,
    pub mode: FanoutMode,
    /// Keys to send before reading; omit to only read.
    #[serde(default)]
    pub keys: Option<String>,
    #[serde(default)]
    pub enter: bool,
    /// Best-effort pause between write and read, milliseconds.
    #[serde(default, rename = "delayMs")]
    pub delay_ms: Option<u64>,
    /// Lines for the capture/tail reads.
    #[serde(default, rename = "captureLines")]
    pub capture_lines: Option<u32>,
    #[serde(default, rename = "tailIterations")]
    pub tail_iterations: Option<u32>,
    #[serde(default, rename = "tailIntervalMs")]
    pub tail_interval_ms: Option<u64>,
    /// Regex for `pattern` mode.
    #[serde(default)]
    pub pattern: Option<String>,
    /// Regex flags for `pattern` mode: any of `i`, `m`, `s`.
    #[serde(default, rename = "patternFlags")]
    pub pattern_flags: Option<String>,
}

/// Per-target outcome, in request order.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FanoutEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set in `pattern` mode only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched: Option<bool>,
}

/// Aggregated fan-out result.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FanoutResult {
    pub results: Vec<FanoutEntry>,
    /// `"{n} succeeded, {k} failed"`.
    pub summary: String,
}

/// Runs fan-out requests over the shared client and resolver.
#[derive(Clone)]
pub struct Fanout {
    client: TmuxClient,
    resolver: TargetResolver,
}

impl Fanout {
    pub fn new(client: TmuxClient, resolver: TargetResolver) -> Self {
        Self { client, resolver }
    }

    pub async fn run(&self, req: FanoutRequest, cancel: &CancellationToken) -> Result<FanoutResult> {
        if req.targets.is_empty() {
            return Err(Error::InvalidTarget {
                message: "at least one target required".into(),
            });
        }
        let pattern = match &req.pattern {
            Some(pattern) if req.mode == FanoutMode::Pattern => {
                Some(build_pattern(pattern, req.pattern_flags.as_deref())?)
            }
            None if req.mode == FanoutMode::Pattern => {
                return Err(Error::Parse {
                    message: "pattern mode requires a pattern".into(),
                })
            }
            _ => None,
        };

        let mut join_set = JoinSet::new();
        for (index, spec) in req.targets.iter().cloned().enumerate() {
            let this = self.clone();
            let req = req.clone();
            let pattern = pattern.clone();
            let cancel = cancel.clone();
            join_set.spawn(async move {
                let outcome = this.run_one(&spec, &req, pattern.as_ref(), &cancel).await;
                (index, spec, outcome)
            });
        }

        let mut slots: Vec<Option<FanoutEntry>> = vec![None; req.targets.len()];
        while let Some(joined) = join_set.join_next().await {
            let (index, spec, outcome) = joined.map_err(|e| Error::Parse {
                message: format!("fan-out task panicked: {e}"),
            })?;
            let entry = match outcome {
                Ok((output, matched)) => FanoutEntry {
                    host: spec.host,
                    target: spec.target,
                    output: Some(output),
                    error: None,
                    matched,
                },
                Err(e) => FanoutEntry {
                    host: spec.host,
                    target: spec.target,
                    output: None,
                    error: Some(e.to_string()),
                    matched: None,
                },
            };
            slots[index] = Some(entry);
        }

        let results: Vec<FanoutEntry> = slots.into_iter().flatten().collect();
        let failed = results.iter().filter(|r| r.error.is_some()).count();
        let summary = format!("{} succeeded, {} failed", results.len() - failed, failed);
        Ok(FanoutResult { results, summary })
    }

    async fn run_one(
        &self,
        spec: &FanoutTarget,
        req: &FanoutRequest,
        pattern: Option<&regex::Regex>,
        cancel: &CancellationToken,
    ) -> Result<(String, Option<bool>)> {
        let input = PaneRef {
            host: spec.host.clone(),
            session: None,
            window: None,
            pane: Some(spec.target.clone()),
        };
        let (target, pane) = self.resolver.resolve(&input).await?;
        let host = target.host().map(str::to_string);

        if cancel.is_cancelled() {
            return Err(Error::Canceled);
        }

        if let Some(keys) = &req.keys {
            self.client
                .send_keys(host.as_deref(), &pane, keys, req.enter)
                .await?;
        }

        if let Some(delay_ms) = req.delay_ms {
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Canceled),
                _ = tokio::time::sleep(std::time::Duration::from_millis(delay_ms)) => {}
            }
        }

        let lines = req.capture_lines.unwrap_or(crate::capture::DEFAULT_CAPTURE_LINES);
        match req.mode {
            FanoutMode::SendCapture => {
                let output = self
                    .client
                    .capture_pane(host.as_deref(), &pane, Some(-i64::from(lines)), None)
                    .await?;
                Ok((output, None))
            }
            FanoutMode::Tail => {
                let output = tail_bounded(
                    &self.client,
                    host.as_deref(),
                    &pane,
                    lines,
                    req.tail_iterations.unwrap_or(3),
                    std::time::Duration::from_millis(req.tail_interval_ms.unwrap_or(1000)),
                    cancel,
                )
                .await?;
                Ok((output, None))
            }
            FanoutMode::Pattern => {
                let output = self
                    .client
                    .capture_pane(host.as_deref(), &pane, Some(-i64::from(lines)), None)
                    .await?;
                let matched = pattern.map(|re| re.is_match(&output));
                Ok((output, matched))
            }
        }
    }
}

fn build_pattern(pattern: &str, flags: Option<&str>) -> Result<regex::Regex> {
    let mut builder = RegexBuilder::new(pattern);
    for flag in flags.unwrap_or_default().chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            other => {
                return Err(Error::Parse {
                    message: format!("unsupported pattern flag: {other}"),
                })
            }
        };
    }
    builder.build().map_err(|e| Error::Parse {
        message: format!("invalid pattern: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{DefaultRegistry, HostProfiles};
    use crate::test_support::client_with_fake;
    use std::sync::Arc;

    fn fanout_with_fake() -> (Fanout, crate::test_support::FakeTransport) {
        let (client, fake) = client_with_fake();
        let resolver = TargetResolver::new(
            Arc::new(DefaultRegistry::new(PaneRef::default(), None)),
            Arc::new(HostProfiles::default()),
        );
        (Fanout::new(client, resolver), fake)
    }

    fn send_capture_request(targets: Vec<FanoutTarget>) -> FanoutRequest {
        FanoutRequest {
            targets,
            mode: FanoutMode::SendCapture,
            keys: Some("true".into()),
            enter: true,
            delay_ms: None,
            capture_lines: Some(10),
            tail_iterations: None,
            tail_interval_ms: None,
            pattern: None,
            pattern_flags: None,
        }
    }

    #[tokio::test]
    async fn mixed_success_and_failure_keeps_order_and_counts() {
        let (fanout, fake) = fanout_with_fake();
        fake.fail_for_host("b", "connection refused");

        let req = send_capture_request(vec![
            FanoutTarget {
                host: Some("a".into()),
                target: "s:0".into(),
            },
            FanoutTarget {
                host: Some("b".into()),
                target: "s:0".into(),
            },
        ]);
        let result = fanout.run(req, &CancellationToken::new()).await.expect("fan-out");

        assert_eq!(result.results.len(), 2);
        assert_eq!(result.results[0].host.as_deref(), Some("a"));
        assert!(result.results[0].output.is_some());
        assert!(result.results[0].error.is_none());
        assert_eq!(result.results[1].host.as_deref(), Some("b"));
        assert!(result.results[1].output.is_none());
        assert!(result.results[1]
            .error
            .as_deref()
            .expect("error")
            .contains("connection refused"));
        assert_eq!(result.summary, "1 succeeded, 1 failed");
    }

    #[tokio::test]
    async fn all_targets_get_keys_then_capture() {
        let (fanout, fake) = fanout_with_fake();
        let req = send_capture_request(vec![
            FanoutTarget {
                host: None,
                target: "s:0".into(),
            },
            FanoutTarget {
                host: None,
                target: "s:1".into(),
            },
        ]);
        let result = fanout.run(req, &CancellationToken::new()).await.expect("fan-out");
        assert_eq!(result.summary, "2 succeeded, 0 failed");

        let calls = fake.calls();
        let send_count = calls.iter().filter(|c| c.args[0] == "send-keys").count();
        let capture_count = calls.iter().filter(|c| c.args[0] == "capture-pane").count();
        assert_eq!(send_count, 2);
        assert_eq!(capture_count, 2);
    }

    #[tokio::test]
    async fn pattern_mode_reports_matches() {
        let (fanout, fake) = fanout_with_fake();
        fake.push_output(""); // send-keys ack
        fake.push_output("BUILD PASSED in 3s");
        let req = FanoutRequest {
            pattern: Some("build passed".into()),
            pattern_flags: Some("i".into()),
            mode: FanoutMode::Pattern,
            ..send_capture_request(vec![FanoutTarget {
                host: None,
                target: "ci:0".into(),
            }])
        };
        let result = fanout.run(req, &CancellationToken::new()).await.expect("fan-out");
        assert_eq!(result.results[0].matched, Some(true));
    }

    #[tokio::test]
    async fn pattern_mode_requires_pattern() {
        let (fanout, _fake) = fanout_with_fake();
        let req = FanoutRequest {
            mode: FanoutMode::Pattern,
            pattern: None,
            ..send_capture_request(vec![FanoutTarget {
                host: None,
                target: "s:0".into(),
            }])
        };
        let err = fanout.run(req, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[tokio::test]
    async fn invalid_target_is_embedded_not_raised() {
        let (fanout, _fake) = fanout_with_fake();
        let req = send_capture_request(vec![FanoutTarget {
            host: None,
            target: String::new(),
        }]);
        let result = fanout.run(req, &CancellationToken::new()).await.expect("fan-out");
        assert_eq!(result.summary, "0 succeeded, 1 failed");
        assert!(result.results[0].error.is_some());
    }

    #[tokio::test]
    async fn empty_request_is_rejected() {
        let (fanout, _fake) = fanout_with_fake();
        let req = send_capture_request(Vec::new());
        let err = fanout.run(req, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidTarget { .. }));
    }

    #[tokio::test]
    async fn cancellation_propagates_to_pending_targets() {
        let (fanout, _fake) = fanout_with_fake();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut req = send_capture_request(vec![FanoutTarget {
            host: None,
            target: "s:0".into(),
        }]);
        req.delay_ms = Some(60_000);
        let result = fanout.run(req, &cancel).await.expect("fan-out");
        assert_eq!(result.summary, "0 succeeded, 1 failed");
        assert!(result.results[0].error.as_deref().expect("error").contains("canceled"));
    }
}
