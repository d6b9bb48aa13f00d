//! Request gateway: one outbound call per `fetch`, wrapped in API-key
//! injection, the per-source rate limiter and bounded retry with backoff.

use crate::app::ports::{Clock, HttpRequest, HttpTransport, Method, Params};
use crate::constants;
use crate::error::{GatewayError, TransportError};
use crate::observability::metrics;
use crate::pipeline::ingestion::rate_limiter::{RateLimitConfig, RateLimiter};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Exponential backoff: `base * 2^attempt`, capped at `max_delay`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: constants::DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_secs(constants::DEFAULT_BACKOFF_BASE_SECS),
            max_delay: Duration::from_secs(constants::DEFAULT_BACKOFF_MAX_SECS),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Everything the gateway needs to talk to one provider, resolved once.
#[derive(Clone)]
pub struct SourceConfig {
    pub name: String,
    pub base_url: String,
    pub api_key: Option<String>,
    /// Query/body parameter the key is sent as.
    pub api_key_param: String,
    /// `None` leaves the source unthrottled.
    pub rate_limit: Option<RateLimitConfig>,
    pub retry: RetryPolicy,
    pub timeout: Duration,
}

impl SourceConfig {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            api_key: None,
            api_key_param: constants::DEFAULT_API_KEY_PARAM.to_string(),
            rate_limit: None,
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(constants::DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_rate_limit(mut self, limit: RateLimitConfig) -> Self {
        self.rate_limit = Some(limit);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn url_for(&self, endpoint: &str) -> String {
        if endpoint.is_empty() {
            return self.base_url.clone();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }
}

// Never print the key.
impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("api_key_param", &self.api_key_param)
            .field("rate_limit", &self.rate_limit)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Why one attempt failed in a way worth retrying.
enum AttemptFailure {
    RateLimited,
    Status(u16),
    Transport(TransportError),
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::RateLimited => write!(f, "HTTP 429"),
            AttemptFailure::Status(status) => write!(f, "HTTP {}", status),
            AttemptFailure::Transport(e) => write!(f, "{}", e),
        }
    }
}

pub struct RequestGateway {
    transport: Arc<dyn HttpTransport>,
    limiter: Arc<RateLimiter>,
    clock: Arc<dyn Clock>,
    sources: HashMap<String, SourceConfig>,
}

impl RequestGateway {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        limiter: Arc<RateLimiter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transport,
            limiter,
            clock,
            sources: HashMap::new(),
        }
    }

    /// Add a source; its rate limit (if any) is registered with the limiter.
    pub fn register_source(&mut self, config: SourceConfig) {
        if let Some(limit) = &config.rate_limit {
            self.limiter.register(&config.name, limit.clone());
        }
        info!(source = %config.name, base_url = %config.base_url, "Registered source");
        self.sources.insert(config.name.clone(), config);
    }

    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.get(name)
    }

    pub fn fetch(
        &self,
        source: &str,
        endpoint: &str,
        params: &Params,
        method: Method,
    ) -> Result<serde_json::Value, GatewayError> {
        let config = self
            .sources
            .get(source)
            .ok_or_else(|| GatewayError::UnknownSource(source.to_string()))?;

        let url = config.url_for(endpoint);
        let mut request_params = params.clone();
        if let Some(key) = &config.api_key {
            request_params.insert(config.api_key_param.clone(), key.clone());
        }
        let request = HttpRequest {
            method,
            url,
            params: request_params,
            timeout: config.timeout,
        };

        let result = self.fetch_with_retry(config, &request, params);
        if let Err(e) = &result {
            metrics::gateway::error(source, &format!("{:?}", e.kind()).to_lowercase());
        }
        result
    }

    fn fetch_with_retry(
        &self,
        config: &SourceConfig,
        request: &HttpRequest,
        loggable_params: &Params,
    ) -> Result<serde_json::Value, GatewayError> {
        let source = config.name.as_str();
        let mut attempt: u32 = 0;
        loop {
            if config.rate_limit.is_some() {
                self.limiter.acquire(source)?;
            }

            debug!(source, url = %request.url, params = ?loggable_params, attempt, "Sending request");
            let started = self.clock.now();
            let outcome = self.transport.execute(request);
            let elapsed = self.clock.now().saturating_duration_since(started).as_secs_f64();

            let failure = match outcome {
                Ok(response) => {
                    metrics::gateway::request(source, status_class(response.status), elapsed);
                    match response.status {
                        200..=299 => return parse_payload(source, &response.bytes),
                        401 | 403 => {
                            return Err(GatewayError::Auth {
                                source_name: source.to_string(),
                                status: response.status,
                            })
                        }
                        429 => {
                            let delay = config
                                .rate_limit
                                .as_ref()
                                .map(|l| l.retry_delay)
                                .unwrap_or(config.retry.max_delay);
                            warn!(source, delay_secs = delay.as_secs_f64(), "Provider returned 429, backing off");
                            self.clock.sleep(delay);
                            AttemptFailure::RateLimited
                        }
                        // Redirects are followed by the transport, so one that reaches here is terminal.
                        300..=499 => {
                            return Err(GatewayError::Client {
                                source_name: source.to_string(),
                                status: response.status,
                                body: snippet(&response.bytes),
                            })
                        }
                        status => AttemptFailure::Status(status),
                    }
                }
                Err(e) => {
                    metrics::gateway::request(source, "transport_error", elapsed);
                    AttemptFailure::Transport(e)
                }
            };

            if attempt >= config.retry.max_retries {
                let attempts = attempt + 1;
                warn!(source, attempts, error = %failure, "Giving up on request");
                return Err(match failure {
                    AttemptFailure::RateLimited => GatewayError::RateLimited {
                        source_name: source.to_string(),
                        attempts,
                    },
                    other => GatewayError::Transient {
                        source_name: source.to_string(),
                        attempts,
                        last_error: other.to_string(),
                    },
                });
            }

            let delay = config.retry.backoff(attempt);
            warn!(
                source,
                attempt = attempt + 1,
                delay_secs = delay.as_secs_f64(),
                error = %failure,
                "Request failed, retrying"
            );
            metrics::gateway::retry(source);
            self.clock.sleep(delay);
            attempt += 1;
        }
    }
}

fn parse_payload(source: &str, bytes: &[u8]) -> Result<serde_json::Value, GatewayError> {
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(GatewayError::Parse {
            source_name: source.to_string(),
            message: "empty response body".to_string(),
        });
    }
    serde_json::from_slice(bytes).map_err(|e| GatewayError::Parse {
        source_name: source.to_string(),
        message: e.to_string(),
    })
}

fn status_class(status: u16) -> &'static str {
    match status {
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    }
}

fn snippet(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::HttpResponse;
    use crate::infra::clock::ManualClock;
    use std::sync::Mutex;

    /// Replays canned outcomes in order and remembers every request.
    struct ScriptedTransport {
        script: Mutex<Vec<Result<HttpResponse, TransportError>>>,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        fn new(mut script: Vec<Result<HttpResponse, TransportError>>) -> Self {
            script.reverse();
            Self {
                script: Mutex::new(script),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    impl HttpTransport for ScriptedTransport {
        fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            self.seen.lock().unwrap().push(request.clone());
            self.script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(TransportError::Other("script exhausted".into())))
        }
    }

    fn ok(body: &str) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse {
            status: 200,
            bytes: body.as_bytes().to_vec(),
        })
    }

    fn status(code: u16) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse {
            status: code,
            bytes: b"{\"error\":\"x\"}".to_vec(),
        })
    }

    fn gateway(
        script: Vec<Result<HttpResponse, TransportError>>,
        config: SourceConfig,
    ) -> (Arc<ScriptedTransport>, Arc<ManualClock>, RequestGateway) {
        let transport = Arc::new(ScriptedTransport::new(script));
        let clock = Arc::new(ManualClock::new());
        let limiter = Arc::new(RateLimiter::new(clock.clone()));
        let mut gateway = RequestGateway::new(transport.clone(), limiter, clock.clone());
        gateway.register_source(config);
        (transport, clock, gateway)
    }

    fn source() -> SourceConfig {
        SourceConfig::new("alpha", "https://api.example.com/")
            .with_api_key("secret")
            .with_rate_limit(RateLimitConfig::new(
                5,
                Duration::from_secs(60),
                Duration::from_secs(60),
            ))
    }

    #[test]
    fn injects_api_key_and_joins_url() {
        let (transport, _, gateway) = gateway(vec![ok("{\"a\":1}")], source());
        let mut params = Params::new();
        params.insert("symbol".into(), "AAPL".into());
        let payload = gateway.fetch("alpha", "/query", &params, Method::Get).unwrap();
        assert_eq!(payload["a"], 1);

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].url, "https://api.example.com/query");
        assert_eq!(seen[0].params.get("apikey").map(String::as_str), Some("secret"));
        assert_eq!(seen[0].timeout, Duration::from_secs(30));
    }

    #[test]
    fn server_errors_are_retried_with_backoff() {
        let (transport, clock, gateway) =
            gateway(vec![status(500), status(503), ok("[]")], source());
        let payload = gateway.fetch("alpha", "q", &Params::new(), Method::Get).unwrap();
        assert_eq!(payload, serde_json::json!([]));
        assert_eq!(transport.calls(), 3);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(1), Duration::from_secs(2)]);
    }

    #[test]
    fn exhaustion_surfaces_transient_with_last_error() {
        let script = vec![
            Err(TransportError::Timeout("t1".into())),
            Err(TransportError::Timeout("t2".into())),
            Err(TransportError::Timeout("t3".into())),
            Err(TransportError::Connect("refused".into())),
        ];
        let (transport, _, gateway) = gateway(script, source());
        let err = gateway.fetch("alpha", "q", &Params::new(), Method::Get).unwrap_err();
        assert_eq!(transport.calls(), 4);
        match err {
            GatewayError::Transient {
                attempts,
                last_error,
                ..
            } => {
                assert_eq!(attempts, 4);
                assert!(last_error.contains("refused"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn client_errors_are_not_retried() {
        let (transport, _, gateway) = gateway(vec![status(404), ok("{}")], source());
        let err = gateway.fetch("alpha", "q", &Params::new(), Method::Get).unwrap_err();
        assert!(matches!(err, GatewayError::Client { status: 404, .. }));
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn unfollowed_redirects_are_client_errors() {
        let (transport, _, gateway) = gateway(vec![status(304), ok("{}")], source());
        let err = gateway.fetch("alpha", "q", &Params::new(), Method::Get).unwrap_err();
        assert!(matches!(err, GatewayError::Client { status: 304, .. }));
        assert!(!err.is_retryable());
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn auth_errors_are_not_retried() {
        let (transport, _, gateway) = gateway(vec![status(401)], source());
        let err = gateway.fetch("alpha", "q", &Params::new(), Method::Get).unwrap_err();
        assert!(matches!(err, GatewayError::Auth { status: 401, .. }));
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn too_many_requests_waits_retry_delay_then_retries() {
        let (transport, clock, gateway) = gateway(vec![status(429), ok("{}")], source());
        gateway.fetch("alpha", "q", &Params::new(), Method::Get).unwrap();
        assert_eq!(transport.calls(), 2);
        // Extra wait of retry_delay, then the first backoff step.
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(60), Duration::from_secs(1)]);
    }

    #[test]
    fn persistent_429_surfaces_rate_limited() {
        let config = source().with_retry(RetryPolicy {
            max_retries: 1,
            ..RetryPolicy::default()
        });
        let (_, _, gateway) = gateway(vec![status(429), status(429)], config);
        let err = gateway.fetch("alpha", "q", &Params::new(), Method::Get).unwrap_err();
        assert!(matches!(err, GatewayError::RateLimited { attempts: 2, .. }));
    }

    #[test]
    fn garbled_or_empty_body_is_a_parse_error() {
        let (transport, _, gateway) = gateway(vec![ok("not json"), ok("  ")], source());
        let err = gateway.fetch("alpha", "q", &Params::new(), Method::Get).unwrap_err();
        assert!(matches!(err, GatewayError::Parse { .. }));
        let err = gateway.fetch("alpha", "q", &Params::new(), Method::Get).unwrap_err();
        assert!(matches!(err, GatewayError::Parse { .. }));
        assert_eq!(transport.calls(), 2);
    }

    #[test]
    fn source_without_rate_limit_still_works() {
        let config = SourceConfig::new("free", "https://free.example.com");
        let (_, clock, gateway) = gateway(vec![ok("{}"); 10], config);
        for _ in 0..10 {
            gateway.fetch("free", "", &Params::new(), Method::Get).unwrap();
        }
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn every_attempt_consumes_a_rate_limit_slot() {
        let config = source().with_rate_limit(RateLimitConfig::new(
            2,
            Duration::from_secs(60),
            Duration::from_secs(30),
        ));
        let (_, clock, gateway) = gateway(vec![status(500), status(500), ok("{}")], config);
        gateway.fetch("alpha", "q", &Params::new(), Method::Get).unwrap();
        // backoff 1s, backoff 2s, then the third attempt finds the window full.
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(30)]
        );
    }

    #[test]
    fn unknown_source_is_rejected() {
        let (_, _, gateway) = gateway(vec![], source());
        assert!(matches!(
            gateway.fetch("beta", "q", &Params::new(), Method::Get),
            Err(GatewayError::UnknownSource(_))
        ));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
        assert_eq!(policy.backoff(10), Duration::from_secs(60));
        assert_eq!(policy.backoff(40), Duration::from_secs(60));
    }
}
