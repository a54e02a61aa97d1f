//! Remote-pin side channel.
//!
//! Successful puts are mirrored to a pinning service with a `POST /pins`
//! per CID, serialized through a dedicated FIFO rate limiter. A circuit
//! breaker counts consecutive failures and, once tripped, disables the
//! side channel for the rest of the process lifetime.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use cairn_core::Cid;

/// Latching consecutive-failure breaker.
pub struct CircuitBreaker {
    threshold: u32,
    consecutive_failures: AtomicU32,
    open: AtomicBool,
}

impl CircuitBreaker {
    /// Create a breaker that opens after `threshold` consecutive failures.
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            consecutive_failures: AtomicU32::new(0),
            open: AtomicBool::new(false),
        }
    }

    /// Whether the breaker has tripped. Never resets.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Record a success, clearing the failure streak.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }

    /// Record a failure; returns true when this one tripped the breaker.
    pub fn record_failure(&self) -> bool {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.threshold && !self.open.swap(true, Ordering::SeqCst) {
            return true;
        }
        false
    }
}

/// Queue-fed remote pinner.
pub struct RemotePinner {
    queue: mpsc::UnboundedSender<Cid>,
    breaker: Arc<CircuitBreaker>,
}

impl RemotePinner {
    /// Start the pinning worker against `base_url`.
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        min_delay: Duration,
        threshold: u32,
    ) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(threshold));
        let (queue, mut rx) = mpsc::unbounded_channel::<Cid>();
        let worker_breaker = Arc::clone(&breaker);
        let endpoint = format!("{}/pins", base_url.into().trim_end_matches('/'));
        tokio::spawn(async move {
            let mut last_call: Option<Instant> = None;
            while let Some(cid) = rx.recv().await {
                if worker_breaker.is_open() {
                    debug!(%cid, "remote pin skipped, circuit open");
                    continue;
                }
                if let Some(last) = last_call {
                    let elapsed = last.elapsed();
                    if elapsed < min_delay {
                        tokio::time::sleep(min_delay - elapsed).await;
                    }
                }
                last_call = Some(Instant::now());

                let outcome = http
                    .post(&endpoint)
                    .json(&serde_json::json!({"cid": cid.to_string()}))
                    .send()
                    .await;
                match outcome {
                    Ok(response) if response.status().is_success() => {
                        worker_breaker.record_success();
                        debug!(%cid, "remote pin accepted");
                    }
                    Ok(response) => {
                        warn!(%cid, status = %response.status(), "remote pin rejected");
                        if worker_breaker.record_failure() {
                            warn!("remote pin circuit opened, side channel disabled");
                        }
                    }
                    Err(e) => {
                        warn!(%cid, error = %e, "remote pin request failed");
                        if worker_breaker.record_failure() {
                            warn!("remote pin circuit opened, side channel disabled");
                        }
                    }
                }
            }
        });
        Self { queue, breaker }
    }

    /// Queue a CID for pinning. Drops silently once the circuit is open.
    pub fn enqueue(&self, cid: Cid) {
        if self.breaker.is_open() {
            return;
        }
        let _ = self.queue.send(cid);
    }

    /// The breaker guarding this channel.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}
