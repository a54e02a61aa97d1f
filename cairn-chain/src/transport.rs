//! JSON-RPC transport with rate limiting and retry.
//!
//! All chain traffic funnels through a [`Throttled`] wrapper: a single
//! worker drains a FIFO queue, enforcing a minimum inter-call delay and
//! retrying transient failures with full-jitter exponential backoff.
//! Concurrent callers are serialized in insertion order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

use cairn_core::{Error, Result};

/// A JSON-RPC request channel.
#[async_trait]
pub trait JsonRpcTransport: Send + Sync {
    /// Issue one request and return its `result` value.
    async fn request(&self, method: &str, params: Value) -> Result<Value>;
}

/// Plain HTTP POST JSON-RPC transport.
pub struct HttpTransport {
    http: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl HttpTransport {
    /// Create a transport for `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            next_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl JsonRpcTransport for HttpTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::transport(format!("{method}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::transport(format!("{method}: http {status}")));
        }
        let value: Value = response
            .json()
            .await
            .map_err(|e| Error::transport(format!("{method}: invalid response body: {e}")))?;
        if let Some(err) = value.get("error").filter(|e| !e.is_null()) {
            return Err(Error::transport(format!("{method}: rpc error {err}")));
        }
        value
            .get("result")
            .cloned()
            .ok_or_else(|| Error::transport(format!("{method}: response missing result")))
    }
}

/// Throttle and retry policy.
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Minimum delay between consecutive calls.
    pub min_delay: Duration,
    /// Retries after the first attempt fails.
    pub max_retries: u32,
    /// Backoff before the first retry; doubles per attempt.
    pub initial_backoff: Duration,
    /// Cap on the backoff.
    pub max_backoff: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(200),
            max_retries: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

struct Job {
    method: String,
    params: Value,
    reply: oneshot::Sender<Result<Value>>,
}

/// FIFO rate-limited retry wrapper around another transport.
pub struct Throttled {
    queue: mpsc::UnboundedSender<Job>,
}

impl Throttled {
    /// Wrap `inner` with the given policy. Spawns the worker task.
    pub fn new(inner: Arc<dyn JsonRpcTransport>, config: ThrottleConfig) -> Self {
        let (queue, mut rx) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            let mut last_call: Option<Instant> = None;
            while let Some(job) = rx.recv().await {
                if job.reply.is_closed() {
                    continue;
                }
                let result =
                    run_with_retry(inner.as_ref(), &config, &mut last_call, &job.method, &job.params)
                        .await;
                let _ = job.reply.send(result);
            }
        });
        Self { queue }
    }
}

async fn run_with_retry(
    inner: &dyn JsonRpcTransport,
    config: &ThrottleConfig,
    last_call: &mut Option<Instant>,
    method: &str,
    params: &Value,
) -> Result<Value> {
    let mut attempt = 0u32;
    loop {
        // Minimum spacing plus additive full jitter so a fleet of
        // clients does not synchronize on the endpoint.
        let spacing = config.min_delay + jitter(config.min_delay);
        if let Some(last) = *last_call {
            let elapsed = last.elapsed();
            if elapsed < spacing {
                tokio::time::sleep(spacing - elapsed).await;
            }
        }
        *last_call = Some(Instant::now());

        match inner.request(method, params.clone()).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                let ceiling = backoff_ceiling(config, attempt);
                let pause = jitter(ceiling);
                debug!(method, attempt, ?pause, error = %e, "rpc retry");
                tokio::time::sleep(pause).await;
                attempt += 1;
            }
            Err(e) => {
                if attempt > 0 {
                    warn!(method, attempts = attempt + 1, error = %e, "rpc gave up");
                }
                return Err(e);
            }
        }
    }
}

fn backoff_ceiling(config: &ThrottleConfig, attempt: u32) -> Duration {
    let base = config.initial_backoff.as_millis() as u64;
    let scaled = base.saturating_mul(1u64 << attempt.min(16));
    Duration::from_millis(scaled.min(config.max_backoff.as_millis() as u64))
}

fn jitter(ceiling: Duration) -> Duration {
    let millis = ceiling.as_millis() as u64;
    if millis == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
}

#[async_trait]
impl JsonRpcTransport for Throttled {
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let (reply, rx) = oneshot::channel();
        self.queue
            .send(Job {
                method: method.to_string(),
                params,
                reply,
            })
            .map_err(|_| Error::transport("rpc worker stopped"))?;
        rx.await.map_err(|_| Error::Cancelled)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Scripted transport: records call order, fails the first
    /// `failures` attempts per method with a transport error.
    struct Scripted {
        calls: Mutex<Vec<String>>,
        failures: Mutex<u32>,
    }

    impl Scripted {
        fn new(failures: u32) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                failures: Mutex::new(failures),
            }
        }
    }

    #[async_trait]
    impl JsonRpcTransport for Scripted {
        async fn request(&self, method: &str, _params: Value) -> Result<Value> {
            self.calls.lock().push(method.to_string());
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(Error::transport("scripted failure"));
            }
            Ok(Value::String(format!("ok:{method}")))
        }
    }

    fn quick_config() -> ThrottleConfig {
        ThrottleConfig {
            min_delay: Duration::from_millis(10),
            max_retries: 5,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(50),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_are_served_in_order() {
        let scripted = Arc::new(Scripted::new(0));
        let throttled = Arc::new(Throttled::new(scripted.clone(), quick_config()));

        let mut handles = Vec::new();
        for i in 0..5 {
            let t = Arc::clone(&throttled);
            handles.push(tokio::spawn(async move {
                t.request(&format!("m{i}"), Value::Null).await.unwrap()
            }));
            // Let each caller enqueue before the next one.
            tokio::task::yield_now().await;
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let calls = scripted.calls.lock().clone();
        assert_eq!(calls, vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let scripted = Arc::new(Scripted::new(3));
        let throttled = Throttled::new(scripted.clone(), quick_config());

        let value = throttled.request("eth_call", Value::Null).await.unwrap();
        assert_eq!(value, Value::String("ok:eth_call".into()));
        assert_eq!(scripted.calls.lock().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded() {
        let scripted = Arc::new(Scripted::new(u32::MAX));
        let throttled = Throttled::new(
            scripted.clone(),
            ThrottleConfig {
                max_retries: 2,
                ..quick_config()
            },
        );

        let err = throttled.request("eth_call", Value::Null).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(scripted.calls.lock().len(), 3);
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let config = ThrottleConfig {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            ..ThrottleConfig::default()
        };
        assert_eq!(backoff_ceiling(&config, 0), Duration::from_millis(100));
        assert_eq!(backoff_ceiling(&config, 1), Duration::from_millis(200));
        assert_eq!(backoff_ceiling(&config, 2), Duration::from_millis(350));
        assert_eq!(backoff_ceiling(&config, 10), Duration::from_millis(350));
    }
}
