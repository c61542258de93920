//! Minimal metrics registry for the policy client.
//!
//! Counter and gauge vectors with dynamic labels backed by `DashMap`. Labels
//! are flattened into sorted key vectors so rendering order is stable per
//! label set.

use dashmap::DashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

fn escape_label(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn label_key(labels: &[(&str, &str)]) -> Vec<(String, String)> {
    let mut key: Vec<(String, String)> = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    key.sort();
    key
}

fn render_labels(key: &[(String, String)]) -> String {
    key.iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label(v)))
        .collect::<Vec<_>>()
        .join(",")
}

fn series(name: &str, key: &[(String, String)]) -> String {
    if key.is_empty() {
        name.to_string()
    } else {
        format!("{}{{{}}}", name, render_labels(key))
    }
}

#[derive(Default)]
pub struct CounterVec {
    map: DashMap<Vec<(String, String)>, AtomicU64>,
}

impl CounterVec {
    pub fn inc(&self, labels: &[(&str, &str)]) {
        self.map
            .entry(label_key(labels))
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Current value for an exact label set (0 if never touched).
    pub fn get(&self, labels: &[(&str, &str)]) -> u64 {
        self.map
            .get(&label_key(labels))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {} counter", name);
        for r in self.map.iter() {
            let val = r.value().load(Ordering::Relaxed);
            let _ = writeln!(out, "{} {}", series(name, r.key()), val);
        }
    }
}

#[derive(Default)]
pub struct GaugeVec {
    map: DashMap<Vec<(String, String)>, AtomicI64>,
}

impl GaugeVec {
    pub fn set(&self, labels: &[(&str, &str)], v: i64) {
        self.map
            .entry(label_key(labels))
            .or_insert_with(|| AtomicI64::new(0))
            .store(v, Ordering::Relaxed);
    }

    pub fn get(&self, labels: &[(&str, &str)]) -> i64 {
        self.map
            .get(&label_key(labels))
            .map(|g| g.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {} gauge", name);
        for r in self.map.iter() {
            let val = r.value().load(Ordering::Relaxed);
            let _ = writeln!(out, "{} {}", series(name, r.key()), val);
        }
    }
}

/// Request kinds used as the `kind` label.
pub const KIND_REGISTER: &str = "register";
pub const KIND_POLICY: &str = "policy";

#[derive(Default)]
pub struct ClientMetrics {
    /// Requests sent, by `kind`.
    pub requests_sent: CounterVec,
    /// Request outcomes, by `kind` and `outcome` (`ok` or an error code).
    pub request_outcomes: CounterVec,
    /// Policy-changed notifications emitted.
    pub policy_changes: CounterVec,
    /// Cache writes requested, by `reason`.
    pub cache_writes: CounterVec,
    /// Keys in the current snapshot.
    pub snapshot_keys: GaugeVec,
    /// 1 while a request of `kind` is outstanding.
    pub request_pending: GaugeVec,
    draining: AtomicBool,
}

impl ClientMetrics {
    pub fn set_draining(&self) {
        self.draining.store(true, Ordering::Relaxed);
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Relaxed)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        self.requests_sent.render("dmpolicy_requests_total", &mut out);
        self.request_outcomes.render("dmpolicy_request_outcomes_total", &mut out);
        self.policy_changes.render("dmpolicy_policy_changes_total", &mut out);
        self.cache_writes.render("dmpolicy_cache_writes_total", &mut out);
        self.snapshot_keys.render("dmpolicy_snapshot_keys", &mut out);
        self.request_pending.render("dmpolicy_request_pending", &mut out);
        let _ = writeln!(
            out,
            "# TYPE dmpolicy_draining gauge\ndmpolicy_draining {}",
            if self.is_draining() { 1 } else { 0 }
        );
        out
    }
}
