use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Instant;

use clap::ValueEnum;
use serde::Deserialize;
use veil_core::{FilteringEngine, PageFilteringContext};

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum BenchMode {
    /// Every request goes to the matcher
    Uncached,
    /// Requests go through per-page contexts and their verdict caches
    Paged,
    Both,
}

pub struct BenchOptions {
    pub mode: BenchMode,
    pub iterations: usize,
    pub requests: usize,
    pub trace_path: Option<String>,
    pub trace_limit: usize,
    pub seed: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
struct BenchRequest {
    url: String,
    #[serde(rename = "type", default = "default_request_type")]
    request_type: String,
    #[serde(default)]
    initiator: Option<String>,
}

fn default_request_type() -> String {
    "other".to_string()
}

pub fn run(engine: &FilteringEngine, opts: BenchOptions) -> Result<(), String> {
    println!("============================================================");
    println!("Veil Benchmark");
    println!("============================================================");

    let requests = match &opts.trace_path {
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|e| format!("Failed to read trace '{}': {}", path, e))?;
            let requests = parse_trace(&text, opts.trace_limit);
            if requests.is_empty() {
                return Err(format!("Trace loaded 0 requests from {}", path));
            }
            requests
        }
        None => generate_test_requests(opts.requests, opts.seed),
    };
    println!("Requests: {} x {} iterations", requests.len(), opts.iterations);

    let blocked = requests
        .iter()
        .filter(|r| engine.match_url(&r.url, r.initiator.as_deref().unwrap_or(""), &r.request_type).is_blocked())
        .count();
    println!("Blocked:  {} of {} distinct requests", blocked, requests.len());

    if matches!(opts.mode, BenchMode::Uncached | BenchMode::Both) {
        println!("------------------------------------------------------------");
        let result = run_uncached(engine, &requests, opts.iterations);
        println!("{}", format_result("Uncached", &result));
    }
    if matches!(opts.mode, BenchMode::Paged | BenchMode::Both) {
        println!("------------------------------------------------------------");
        let result = run_paged(engine, &requests, opts.iterations);
        println!("{}", format_result("Paged (cached)", &result));
    }

    Ok(())
}

struct BenchResult {
    ops: usize,
    total_ms: f64,
    avg_us: f64,
    p50_us: f64,
    p95_us: f64,
    p99_us: f64,
    ops_per_sec: u64,
}

fn run_uncached(engine: &FilteringEngine, requests: &[BenchRequest], iterations: usize) -> BenchResult {
    let mut latencies = Vec::with_capacity(requests.len() * iterations);
    for _ in 0..iterations {
        for req in requests {
            let start = Instant::now();
            let _ = engine.match_url(&req.url, req.initiator.as_deref().unwrap_or(""), &req.request_type);
            latencies.push(start.elapsed().as_secs_f64() * 1_000_000.0);
        }
    }
    summarize(latencies)
}

fn run_paged(engine: &FilteringEngine, requests: &[BenchRequest], iterations: usize) -> BenchResult {
    let mut pages: HashMap<String, PageFilteringContext> = HashMap::new();
    let mut latencies = Vec::with_capacity(requests.len() * iterations);
    for _ in 0..iterations {
        for req in requests {
            let page_url = req.initiator.as_deref().unwrap_or(&req.url);
            let start = Instant::now();
            let page = pages
                .entry(page_url.to_string())
                .or_insert_with(|| engine.new_page(page_url));
            let _ = engine.filter_page_request(page, &req.url, &req.request_type);
            latencies.push(start.elapsed().as_secs_f64() * 1_000_000.0);
        }
    }
    log::debug!("paged bench used {} page contexts", pages.len());
    summarize(latencies)
}

fn summarize(mut latencies: Vec<f64>) -> BenchResult {
    latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let ops = latencies.len();
    let total_us: f64 = latencies.iter().sum();
    let total_ms = total_us / 1000.0;
    BenchResult {
        ops,
        total_ms,
        avg_us: if ops == 0 { 0.0 } else { total_us / ops as f64 },
        p50_us: percentile(&latencies, 0.50),
        p95_us: percentile(&latencies, 0.95),
        p99_us: percentile(&latencies, 0.99),
        ops_per_sec: if total_ms > 0.0 { (ops as f64 / (total_ms / 1000.0)) as u64 } else { 0 },
    }
}

fn format_result(name: &str, result: &BenchResult) -> String {
    format!(
        "{}:\n  Operations:  {}\n  Total time:  {:.2}ms\n  Avg latency: {:.2}μs\n  P50 latency: {:.2}μs\n  P95 latency: {:.2}μs\n  P99 latency: {:.2}μs\n  Throughput:  {} ops/sec",
        name,
        result.ops,
        result.total_ms,
        result.avg_us,
        result.p50_us,
        result.p95_us,
        result.p99_us,
        result.ops_per_sec,
    )
}

fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let idx = ((values.len() as f64) * p).ceil() as usize;
    let idx = idx.saturating_sub(1).min(values.len() - 1);
    values[idx]
}

/// One JSON object per line: `{"url", "type", "initiator"}`. Lines that
/// do not parse or lack a URL are skipped.
fn parse_trace(text: &str, limit: usize) -> Vec<BenchRequest> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| serde_json::from_str::<BenchRequest>(line).ok())
        .filter(|req| !req.url.is_empty())
        .take(limit)
        .collect()
}

pub const DEFAULT_SEED: u32 = 0xc0ffee;

fn create_rng(seed: u32) -> impl FnMut() -> f64 {
    let mut state = seed;
    move || {
        state = state.wrapping_mul(1664525).wrapping_add(1013904223);
        (state as f64) / (u32::MAX as f64)
    }
}

fn pick<'a>(items: &[&'a str], rand: &mut impl FnMut() -> f64) -> &'a str {
    let idx = (rand() * items.len() as f64).floor() as usize;
    items[idx.min(items.len() - 1)]
}

fn generate_test_requests(count: usize, seed: u32) -> Vec<BenchRequest> {
    const AD_DOMAINS: &[&str] = &[
        "ads.example.com",
        "tracking.example.com",
        "analytics.test.com",
        "doubleclick.net",
        "googlesyndication.com",
        "google-analytics.com",
        "pagead2.googlesyndication.com",
        "cdn.ads.com",
        "metrics.example.com",
    ];
    const CLEAN_DOMAINS: &[&str] = &[
        "example.com",
        "github.com",
        "stackoverflow.com",
        "reddit.com",
        "wikipedia.org",
        "mozilla.org",
        "news.co.uk",
    ];
    const PATHS: &[&str] = &[
        "/",
        "/assets/main.js",
        "/api/v1/data",
        "/images/logo.png",
        "/styles/app.css",
        "/ads/banner.gif",
        "/tracking/pixel.gif",
        "/analytics.js",
    ];
    const REQUEST_TYPES: &[&str] = &["sub_frame", "script", "stylesheet", "image", "xmlhttprequest", "object", "ping"];

    let mut rng = create_rng(seed);
    let mut requests = Vec::with_capacity(count);

    for _ in 0..count {
        let domain = if rng() < 0.3 {
            pick(AD_DOMAINS, &mut rng)
        } else {
            pick(CLEAN_DOMAINS, &mut rng)
        };
        let path = pick(PATHS, &mut rng);
        let request_type = pick(REQUEST_TYPES, &mut rng);
        let initiator = if rng() < 0.6 {
            format!("https://www.{}/", pick(CLEAN_DOMAINS, &mut rng))
        } else {
            format!("https://{}/", domain)
        };

        requests.push(BenchRequest {
            url: format!("https://{}{}", domain, path),
            request_type: request_type.to_string(),
            initiator: Some(initiator),
        });
    }

    requests
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&values, 0.5), 2.0);
        assert_eq!(percentile(&values, 0.99), 4.0);
        assert_eq!(percentile(&[], 0.5), 0.0);
    }

    #[test]
    fn test_generated_requests_are_deterministic() {
        let a = generate_test_requests(50, DEFAULT_SEED);
        let b = generate_test_requests(50, DEFAULT_SEED);
        assert_eq!(a, b);
        assert_eq!(a.len(), 50);
        assert!(a.iter().all(|r| r.url.starts_with("https://")));
    }

    #[test]
    fn test_parse_trace() {
        let text = r#"{"url":"https://ads.net/a.js","type":"script","initiator":"https://news.com/"}
not json
{"url":"","type":"image"}
{"url":"https://cdn.net/x"}
{"url":"https://late.net/"}"#;
        let requests = parse_trace(text, 2);
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].request_type, "script");
        assert_eq!(requests[1].request_type, "other");
        assert_eq!(requests[1].initiator, None);
    }
}
