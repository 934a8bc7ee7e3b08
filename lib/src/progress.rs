//! Named progress counters behind the human-readable progress lines.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

struct Counter {
    n: AtomicUsize,
    total: usize,
}

/// A store of named counters; increments are atomic, so concurrently running
/// tasks can share one meter.
#[derive(Default)]
pub struct ProgressMeter {
    counters: RwLock<HashMap<String, Arc<Counter>>>,
}

impl ProgressMeter {
    /// An empty meter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or reset) the counter `id` with a known total.
    pub fn init(&self, id: &str, total: usize) {
        self.counters
            .write()
            .expect("progress lock poisoned")
            .insert(
                id.to_string(),
                Arc::new(Counter {
                    n: AtomicUsize::new(0),
                    total,
                }),
            );
    }

    /// Increment `id` and return the new count (1-based).
    ///
    /// Counters not seen before start at zero with an unknown total.
    pub fn increment(&self, id: &str) -> usize {
        self.counter(id).n.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Render `template`, substituting `{n}` with the given count, `{t}` with
    /// the total and `{p}` with the integer percentage.
    ///
    /// `n` is the value a previous [`ProgressMeter::increment`] returned, so
    /// the `(n, total)` pair is consistent even under concurrency.
    pub fn format(&self, id: &str, n: usize, template: &str) -> String {
        let total = self.counter(id).total;
        let percent = if total == 0 {
            100
        } else {
            (n * 100) / total
        };
        template
            .replace("{n}", &n.to_string())
            .replace("{t}", &total.to_string())
            .replace("{p}", &percent.to_string())
    }

    fn counter(&self, id: &str) -> Arc<Counter> {
        if let Some(c) = self
            .counters
            .read()
            .expect("progress lock poisoned")
            .get(id)
        {
            return c.clone();
        }
        self.counters
            .write()
            .expect("progress lock poisoned")
            .entry(id.to_string())
            .or_insert_with(|| {
                Arc::new(Counter {
                    n: AtomicUsize::new(0),
                    total: 0,
                })
            })
            .clone()
    }
}

impl std::fmt::Debug for ProgressMeter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counters = self.counters.read().expect("progress lock poisoned");
        let mut dbg = f.debug_map();
        for (id, c) in counters.iter() {
            dbg.entry(&id, &format!("{}/{}", c.n.load(Ordering::Relaxed), c.total));
        }
        dbg.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increments_are_strictly_increasing() {
        let meter = ProgressMeter::new();
        meter.init("files", 3);
        assert_eq!(meter.increment("files"), 1);
        assert_eq!(meter.increment("files"), 2);
        assert_eq!(meter.increment("files"), 3);
    }

    #[test]
    fn format_substitutes_all_placeholders() {
        let meter = ProgressMeter::new();
        meter.init("files", 4);
        let n = meter.increment("files");
        assert_eq!(meter.format("files", n, "({n}/{t} {p}%)"), "(1/4 25%)");
    }

    #[test]
    fn unknown_counter_defaults_to_zero_total() {
        let meter = ProgressMeter::new();
        let n = meter.increment("spontaneous");
        assert_eq!(n, 1);
        assert_eq!(meter.format("spontaneous", n, "{n}/{t} {p}%"), "1/0 100%");
    }

    #[test]
    fn concurrent_increments_do_not_lose_counts() {
        let meter = Arc::new(ProgressMeter::new());
        meter.init("x", 100);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let meter = meter.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        meter.increment("x");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(meter.increment("x"), 101);
    }
}
