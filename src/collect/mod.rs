//! The producer side of the cache: turning entity stats into samples.
//!
//! A [`Collector`] walks whatever a [`StatsProvider`] is tracking, maps each
//! entity's stats snapshot to its label set, and pushes one sample per metric
//! through an open update session. A malformed sample is logged and skipped;
//! one bad entity never aborts the whole pass.

mod cgroupfs;

pub use cgroupfs::CgroupStatsProvider;

use crate::cache::UpdateSession;
use crate::metrics::{MetricType, Sample};

/// One entity's raw stats snapshot, opaque to the cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityStats {
    pub id: String,
    /// Cumulative CPU time in microseconds, if the entity exposes it.
    pub cpu_usage_usec: Option<u64>,
    /// Current memory usage in bytes, if the entity exposes it.
    pub memory_usage_bytes: Option<u64>,
}

/// The entity-inspection boundary: returns the current stats snapshot for
/// every tracked entity.
pub trait StatsProvider {
    fn stats(&self) -> Vec<EntityStats>;
}

/// Maps one entity's stats to its label set, invoked once per entity per
/// collection pass.
pub type LabelFn = dyn Fn(&EntityStats) -> Vec<(String, String)> + Send + Sync;

/// The baseline label set: just the entity id.
pub fn default_labels(stats: &EntityStats) -> Vec<(String, String)> {
    vec![("id".to_owned(), stats.id.clone())]
}

const CPU_USAGE_NAME: &str = "container_cpu_usage_seconds_total";
const CPU_USAGE_HELP: &str = "Cumulative cpu time consumed in seconds.";
const MEMORY_USAGE_NAME: &str = "container_memory_usage_bytes";
const MEMORY_USAGE_HELP: &str = "Current memory usage in bytes.";

/// Iterates entities and writes their metrics into an update session.
pub struct Collector<P> {
    provider: P,
    label_fn: Box<LabelFn>,
}

impl<P: StatsProvider> Collector<P> {
    pub fn new(
        provider: P,
        label_fn: impl Fn(&EntityStats) -> Vec<(String, String)> + Send + Sync + 'static,
    ) -> Self {
        Self {
            provider,
            label_fn: Box::new(label_fn),
        }
    }

    /// Runs one collection pass, stamping every sample with `timestamp_ms`.
    pub fn collect_into(&self, session: &mut UpdateSession<'_>, timestamp_ms: i64) {
        for entity in self.provider.stats() {
            let labels = (self.label_fn)(&entity);
            let labels: Vec<(&str, &str)> = labels
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_str()))
                .collect();

            if let Some(usec) = entity.cpu_usage_usec {
                self.insert(
                    session,
                    &entity,
                    Sample {
                        name: CPU_USAGE_NAME,
                        help: CPU_USAGE_HELP,
                        kind: MetricType::Counter,
                        labels: &labels,
                        value: usec as f64 / 1_000_000.0,
                        timestamp_ms: Some(timestamp_ms),
                    },
                );
            }
            if let Some(bytes) = entity.memory_usage_bytes {
                self.insert(
                    session,
                    &entity,
                    Sample {
                        name: MEMORY_USAGE_NAME,
                        help: MEMORY_USAGE_HELP,
                        kind: MetricType::Gauge,
                        labels: &labels,
                        value: bytes as f64,
                        timestamp_ms: Some(timestamp_ms),
                    },
                );
            }
        }
    }

    fn insert(&self, session: &mut UpdateSession<'_>, entity: &EntityStats, sample: Sample<'_>) {
        if let Err(err) = session.insert(sample) {
            log::error!(
                target: "collector",
                "skipping malformed sample: entity={}, error={}",
                entity.id,
                err
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CachedGatherer;

    #[derive(Debug, Clone)]
    struct FakeProvider(Vec<EntityStats>);

    impl StatsProvider for FakeProvider {
        fn stats(&self) -> Vec<EntityStats> {
            self.0.clone()
        }
    }

    fn entity(id: &str, cpu: Option<u64>, memory: Option<u64>) -> EntityStats {
        EntityStats {
            id: id.to_owned(),
            cpu_usage_usec: cpu,
            memory_usage_bytes: memory,
        }
    }

    #[test]
    fn test_collect_produces_one_family_per_metric() {
        let provider = FakeProvider(vec![
            entity("container-0", Some(2_500_000), Some(1024)),
            entity("container-1", Some(5_000_000), Some(2048)),
        ]);
        let collector = Collector::new(provider, default_labels);
        let gatherer = CachedGatherer::new();

        let mut session = gatherer.begin_update();
        collector.collect_into(&mut session, 42_000);
        session.commit();

        let snapshot = gatherer.gather().unwrap();
        assert_eq!(snapshot.len(), 2);

        let cpu = &snapshot[0];
        assert_eq!(cpu.name(), CPU_USAGE_NAME);
        assert_eq!(cpu.kind(), MetricType::Counter);
        assert_eq!(cpu.points().len(), 2);
        assert_eq!(cpu.points()[0].value(), 2.5);
        assert_eq!(cpu.points()[0].timestamp_ms(), Some(42_000));

        let memory = &snapshot[1];
        assert_eq!(memory.name(), MEMORY_USAGE_NAME);
        assert_eq!(memory.kind(), MetricType::Gauge);
        assert_eq!(memory.points()[1].value(), 2048.0);
    }

    #[test]
    fn test_label_fn_runs_once_per_entity() {
        let provider = FakeProvider(vec![entity("container-0", Some(1_000_000), None)]);
        let collector = Collector::new(provider, |stats: &EntityStats| {
            let mut labels = default_labels(stats);
            labels.push(("zone_name".to_owned(), "hello".to_owned()));
            labels
        });
        let gatherer = CachedGatherer::new();

        let mut session = gatherer.begin_update();
        collector.collect_into(&mut session, 0);
        session.commit();

        let snapshot = gatherer.gather().unwrap();
        let labels = snapshot[0].points()[0].labels();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[0].name, "id");
        assert_eq!(labels[0].value, "container-0");
        assert_eq!(labels[1].name, "zone_name");
        assert_eq!(labels[1].value, "hello");
    }

    #[test]
    fn test_bad_label_set_skips_entity_not_pass() {
        let provider = FakeProvider(vec![
            entity("bad", Some(1_000_000), None),
            entity("good", Some(2_000_000), None),
        ]);
        let collector = Collector::new(provider, |stats: &EntityStats| {
            if stats.id == "bad" {
                // duplicate label name fails validation
                vec![
                    ("id".to_owned(), stats.id.clone()),
                    ("id".to_owned(), stats.id.clone()),
                ]
            } else {
                default_labels(stats)
            }
        });
        let gatherer = CachedGatherer::new();

        let mut session = gatherer.begin_update();
        collector.collect_into(&mut session, 0);
        session.commit();

        let snapshot = gatherer.gather().unwrap();
        assert_eq!(snapshot[0].points().len(), 1);
        assert_eq!(snapshot[0].points()[0].labels()[0].value, "good");
    }

    #[test]
    fn test_entity_without_stats_produces_no_samples() {
        let provider = FakeProvider(vec![entity("container-0", None, None)]);
        let collector = Collector::new(provider, default_labels);
        let gatherer = CachedGatherer::new();

        let mut session = gatherer.begin_update();
        collector.collect_into(&mut session, 0);
        session.commit();

        assert!(gatherer.gather().unwrap().is_empty());
    }
}
