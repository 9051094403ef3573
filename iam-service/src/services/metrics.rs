use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

// Global registry
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

// HTTP metrics
pub static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static HTTP_REQUEST_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();

// IAM metrics
pub static LOGIN_ATTEMPTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static SESSIONS_REVOKED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static API_TOKEN_RATE_LIMITED_TOTAL: OnceLock<IntCounter> = OnceLock::new();
pub static REFRESH_REUSE_TOTAL: OnceLock<IntCounter> = OnceLock::new();

/// Registers every collector once. Later calls are no-ops.
pub fn init_metrics() {
    if REGISTRY.get().is_some() {
        return;
    }
    if let Err(e) = build() {
        tracing::error!("Failed to initialize metrics: {}", e);
    }
}

fn build() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let requests_total = IntCounterVec::new(
        Opts::new("http_requests_total", "Total number of HTTP requests"),
        &["method", "path", "status"],
    )?;
    let request_duration = HistogramVec::new(
        HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request duration in seconds",
        ),
        &["method", "path", "status"],
    )?;
    let login_attempts = IntCounterVec::new(
        Opts::new("iam_login_attempts_total", "Login attempts by outcome"),
        &["outcome"],
    )?;
    let sessions_revoked = IntCounterVec::new(
        Opts::new("iam_sessions_revoked_total", "Sessions revoked by reason"),
        &["reason"],
    )?;
    let rate_limited = IntCounter::new(
        "iam_api_token_rate_limited_total",
        "API token requests denied by the per-token rate limiter",
    )?;
    let refresh_reuse = IntCounter::new(
        "iam_refresh_reuse_total",
        "Refresh tokens presented after being consumed",
    )?;

    registry.register(Box::new(requests_total.clone()))?;
    registry.register(Box::new(request_duration.clone()))?;
    registry.register(Box::new(login_attempts.clone()))?;
    registry.register(Box::new(sessions_revoked.clone()))?;
    registry.register(Box::new(rate_limited.clone()))?;
    registry.register(Box::new(refresh_reuse.clone()))?;

    // Initialize globals
    let _ = REGISTRY.set(registry);
    let _ = HTTP_REQUESTS_TOTAL.set(requests_total);
    let _ = HTTP_REQUEST_DURATION_SECONDS.set(request_duration);
    let _ = LOGIN_ATTEMPTS_TOTAL.set(login_attempts);
    let _ = SESSIONS_REVOKED_TOTAL.set(sessions_revoked);
    let _ = API_TOKEN_RATE_LIMITED_TOTAL.set(rate_limited);
    let _ = REFRESH_REUSE_TOTAL.set(refresh_reuse);
    Ok(())
}

pub fn record_login(outcome: &str) {
    if let Some(counter) = LOGIN_ATTEMPTS_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

pub fn record_sessions_revoked(reason: &str, count: usize) {
    if let Some(counter) = SESSIONS_REVOKED_TOTAL.get() {
        counter.with_label_values(&[reason]).inc_by(count as u64);
    }
}

pub fn record_rate_limited() {
    if let Some(counter) = API_TOKEN_RATE_LIMITED_TOTAL.get() {
        counter.inc();
    }
}

pub fn record_refresh_reuse() {
    if let Some(counter) = REFRESH_REUSE_TOTAL.get() {
        counter.inc();
    }
}

pub fn record_http_request(method: &str, path: &str, status: &str, seconds: f64) {
    if let Some(counter) = HTTP_REQUESTS_TOTAL.get() {
        counter.with_label_values(&[method, path, status]).inc();
    }
    if let Some(histogram) = HTTP_REQUEST_DURATION_SECONDS.get() {
        histogram
            .with_label_values(&[method, path, status])
            .observe(seconds);
    }
}

pub fn get_metrics() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();

    let registry = match REGISTRY.get() {
        Some(r) => r,
        None => {
            tracing::error!("Metrics registry not initialized");
            return "# Metrics registry not initialized\n".to_string();
        }
    };

    let metric_families = registry.gather();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return format!("# Failed to encode metrics: {}\n", e);
    }

    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to convert metrics to UTF-8: {}", e);
            format!("# Failed to convert metrics to UTF-8: {}\n", e)
        }
    }
}
