//! Frame phase timing.
//!
//! `SimWorld` times each phase of a frame (pre-phase, then each LOD tier)
//! under a named section. Hosts read the numbers back through
//! `SimWorld::profiler`, export them with [`Profiler::report`], or print them
//! with [`Profiler::summary`].

use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::{Duration, Instant};

/// Accumulated timings of one frame phase.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct SectionStats {
    pub total_time: Duration,
    pub call_count: u64,
    pub min_time: Option<Duration>,
    pub max_time: Option<Duration>,
    /// Duration of the most recent call.
    pub last_time: Duration,
}

impl SectionStats {
    pub fn avg_time(&self) -> Duration {
        match u32::try_from(self.call_count) {
            Ok(0) => Duration::ZERO,
            Ok(n) => self.total_time / n,
            Err(_) => Duration::from_secs_f64(self.total_time.as_secs_f64() / self.call_count as f64),
        }
    }

    fn record(&mut self, elapsed: Duration) {
        self.total_time += elapsed;
        self.call_count += 1;
        self.last_time = elapsed;
        self.min_time = Some(self.min_time.map_or(elapsed, |m| m.min(elapsed)));
        self.max_time = Some(self.max_time.map_or(elapsed, |m| m.max(elapsed)));
    }
}

/// One row of a [`Profiler::report`].
#[derive(Debug, Clone, Serialize)]
pub struct SectionReport {
    pub name: &'static str,
    pub avg_ms: f64,
    pub max_ms: f64,
    pub last_ms: f64,
    /// Average milliseconds this phase costs per profiled frame.
    pub per_frame_ms: f64,
    /// Share of all profiled time, in percent.
    pub share: f64,
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Timing data for named frame phases.
#[derive(Debug, Default)]
pub struct Profiler {
    sections: HashMap<&'static str, SectionStats>,
    frames: u64,
    enabled: bool,
}

impl Profiler {
    pub fn new() -> Self {
        Self {
            enabled: true,
            ..Default::default()
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Time `f` under `name`. The closure runs whether or not profiling is on.
    pub fn time_section<F, R>(&mut self, name: &'static str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        if !self.enabled {
            return f();
        }
        let start = Instant::now();
        let result = f();
        self.sections.entry(name).or_default().record(start.elapsed());
        result
    }

    /// Mark the end of a frame.
    pub fn tick(&mut self) {
        self.frames += 1;
    }

    pub fn tick_count(&self) -> u64 {
        self.frames
    }

    pub fn get_section(&self, name: &str) -> Option<&SectionStats> {
        self.sections.get(name)
    }

    pub fn section_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.sections.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Per-phase rows, most expensive first.
    pub fn report(&self) -> Vec<SectionReport> {
        let total: Duration = self.sections.values().map(|s| s.total_time).sum();
        let frames = self.frames.max(1) as f64;
        let mut rows: Vec<SectionReport> = self
            .sections
            .iter()
            .map(|(&name, s)| SectionReport {
                name,
                avg_ms: ms(s.avg_time()),
                max_ms: ms(s.max_time.unwrap_or_default()),
                last_ms: ms(s.last_time),
                per_frame_ms: ms(s.total_time) / frames,
                share: if total.is_zero() {
                    0.0
                } else {
                    s.total_time.as_secs_f64() / total.as_secs_f64() * 100.0
                },
            })
            .collect();
        rows.sort_by(|a, b| b.per_frame_ms.total_cmp(&a.per_frame_ms).then(a.name.cmp(b.name)));
        rows
    }

    /// Printable table of [`Profiler::report`].
    pub fn summary(&self) -> String {
        let rows = self.report();
        let mut out = String::new();
        let _ = writeln!(out, "frame phases over {} frames", self.frames);
        let _ = writeln!(
            out,
            "{:<14} {:>9} {:>9} {:>9} {:>9} {:>7}",
            "phase", "ms/frame", "avg ms", "max ms", "last ms", "share"
        );
        for row in &rows {
            let _ = writeln!(
                out,
                "{:<14} {:>9.3} {:>9.3} {:>9.3} {:>9.3} {:>6.1}%",
                row.name, row.per_frame_ms, row.avg_ms, row.max_ms, row.last_ms, row.share
            );
        }
        let per_frame: f64 = rows.iter().map(|r| r.per_frame_ms).sum();
        let _ = writeln!(out, "{:<14} {:>9.3}", "total", per_frame);
        out
    }

    pub fn reset(&mut self) {
        self.sections.clear();
        self.frames = 0;
    }
}
