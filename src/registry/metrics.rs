//! Registry-level counters and snapshots

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::cache::CacheStats;

/// Live counters, updated lock-free
#[derive(Debug, Default)]
pub(crate) struct EngineCounters {
    loads: AtomicU64,
    load_failures: AtomicU64,
    compilations: AtomicU64,
    compile_failures: AtomicU64,
    renders: AtomicU64,
    render_failures: AtomicU64,
    total_render_micros: AtomicU64,
}

impl EngineCounters {
    pub fn record_load(&self, ok: bool) {
        self.loads.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.load_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_compile(&self, ok: bool) {
        self.compilations.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.compile_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_render(&self, elapsed: Duration, ok: bool) {
        self.renders.fetch_add(1, Ordering::Relaxed);
        self.total_render_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        if !ok {
            self.render_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self, render_cache: CacheStats, compiled_cache: CacheStats) -> RegistryMetrics {
        let renders = self.renders.load(Ordering::Relaxed);
        let total = self.total_render_micros.load(Ordering::Relaxed);
        RegistryMetrics {
            loads: self.loads.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            compilations: self.compilations.load(Ordering::Relaxed),
            compile_failures: self.compile_failures.load(Ordering::Relaxed),
            renders,
            render_failures: self.render_failures.load(Ordering::Relaxed),
            avg_render_latency_us: if renders > 0 {
                total as f64 / renders as f64
            } else {
                0.0
            },
            render_cache,
            compiled_cache,
        }
    }
}

/// Point-in-time view of registry activity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistryMetrics {
    /// Content loader invocations
    pub loads: u64,
    pub load_failures: u64,
    /// Compilations actually performed (not served from cache)
    pub compilations: u64,
    pub compile_failures: u64,
    /// Completed `render` calls, hits included
    pub renders: u64,
    pub render_failures: u64,
    pub avg_render_latency_us: f64,
    pub render_cache: CacheStats,
    pub compiled_cache: CacheStats,
}
