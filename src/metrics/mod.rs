//! Metrics module
//!
//! Prometheus counters for authentication, authorization decisions and the
//! SubjectAccessReview backend.

pub mod server;

use crate::authz::Verdict;
use lazy_static::lazy_static;
use prometheus::{register_counter_vec, CounterVec};

lazy_static! {
    pub static ref DECISIONS_TOTAL: CounterVec = register_counter_vec!(
        "kube_rbac_gate_decisions_total",
        "Final authorization decisions",
        &["decision"]  // "allow", "deny" or "error"
    ).unwrap();

    pub static ref AUTH_ATTEMPTS: CounterVec = register_counter_vec!(
        "kube_rbac_gate_auth_attempts_total",
        "Authentication attempts",
        &["method", "status"]
    ).unwrap();

    pub static ref SAR_REQUESTS: CounterVec = register_counter_vec!(
        "kube_rbac_gate_sar_requests_total",
        "SubjectAccessReview calls by outcome",
        &["result"]
    ).unwrap();

    pub static ref SAR_CACHE: CounterVec = register_counter_vec!(
        "kube_rbac_gate_sar_cache_total",
        "SubjectAccessReview cache lookups",
        &["result"]  // "hit" or "miss"
    ).unwrap();
}

/// Record a final decision as seen by the HTTP filter
pub fn record_decision(verdict: Verdict) {
    let label = match verdict {
        Verdict::Allow => "allow",
        // residual no-opinion is folded into deny
        Verdict::Deny | Verdict::NoOpinion => "deny",
    };
    DECISIONS_TOTAL.with_label_values(&[label]).inc();
}

/// Record an authorization that ended in an error
pub fn record_decision_error() {
    DECISIONS_TOTAL.with_label_values(&["error"]).inc();
}

/// Record authentication attempt
pub fn record_auth_attempt(method: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    AUTH_ATTEMPTS.with_label_values(&[method, status]).inc();
}

/// Record the outcome of one SubjectAccessReview round trip
pub fn record_sar_request(result: &str) {
    SAR_REQUESTS.with_label_values(&[result]).inc();
}

pub fn record_sar_cache(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    SAR_CACHE.with_label_values(&[result]).inc();
}
