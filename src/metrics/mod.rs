use metrics::{counter, histogram};
use std::time::Duration;

pub const METRIC_TOOL_CALLS: &str = "snapshot_tool_calls_total";
pub const METRIC_TOOL_LATENCY: &str = "snapshot_tool_latency_seconds";
pub const METRIC_PRICE_SOURCE: &str = "snapshot_price_source_total";
pub const METRIC_PRICE_UNAVAILABLE: &str = "snapshot_price_unavailable_total";
pub const METRIC_CACHE_HITS: &str = "snapshot_price_cache_hits_total";
pub const METRIC_CACHE_MISSES: &str = "snapshot_price_cache_misses_total";
pub const METRIC_STATE_CALLS: &str = "snapshot_state_calls_total";

pub fn record_tool_call(tool: &str, success: bool, elapsed: Duration) {
    let outcome = if success { "success" } else { "failure" };
    counter!(METRIC_TOOL_CALLS, 1, "tool" => tool.to_string(), "outcome" => outcome);
    histogram!(METRIC_TOOL_LATENCY, elapsed.as_secs_f64(), "tool" => tool.to_string());
}

pub fn record_price_source(source: &'static str) {
    counter!(METRIC_PRICE_SOURCE, 1, "source" => source);
}

pub fn record_price_unavailable() {
    counter!(METRIC_PRICE_UNAVAILABLE, 1);
}

pub fn record_cache_lookup(hit: bool) {
    if hit {
        counter!(METRIC_CACHE_HITS, 1);
    } else {
        counter!(METRIC_CACHE_MISSES, 1);
    }
}

pub fn record_state_calls(attempted: usize, succeeded: usize) {
    counter!(METRIC_STATE_CALLS, succeeded as u64, "outcome" => "success");
    counter!(METRIC_STATE_CALLS, (attempted - succeeded.min(attempted)) as u64, "outcome" => "failure");
}
