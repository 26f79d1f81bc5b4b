//! The metric family data model held by the cache.
//!
//! Families and points are written once per update session and then read by
//! any number of scrapes until the next session commits. To keep steady-state
//! collection allocation-free, the owned types here are slot-reusable: a
//! [`MetricPoint`] or [`MetricFamily`] slot is overwritten in place via
//! `assign`/`begin`, reusing the `String` and `Vec` capacity already backing
//! it, and only growing when the new data does not fit.
//!
//! Producers hand the cache borrowed [`Sample`]s; the cache copies them into
//! owned storage, so the producer's borrow ends at the insert call.

mod error;

pub use error::{Error, Result};

/// The type of a metric family, as exposed to scrapers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetricType {
    Counter,
    Gauge,
    #[default]
    Untyped,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
            MetricType::Untyped => "untyped",
        }
    }
}

/// One owned label name/value pair of a [`MetricPoint`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelPair {
    pub name: String,
    pub value: String,
}

impl LabelPair {
    /// Overwrites this pair in place, keeping the existing string capacity.
    fn assign(&mut self, name: &str, value: &str) {
        self.name.clear();
        self.name.push_str(name);
        self.value.clear();
        self.value.push_str(value);
    }
}

/// One borrowed metric sample as produced by a collection pass.
///
/// `labels` must not repeat a label name; `timestamp_ms` is milliseconds
/// since the UNIX epoch, or `None` for an unstamped sample.
#[derive(Debug, Clone, Copy)]
pub struct Sample<'a> {
    pub name: &'a str,
    pub help: &'a str,
    pub kind: MetricType,
    pub labels: &'a [(&'a str, &'a str)],
    pub value: f64,
    pub timestamp_ms: Option<i64>,
}

impl Sample<'_> {
    /// Validates the sample without touching any cache storage, so a rejected
    /// sample leaves the target buffer exactly as it was.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::EmptyName);
        }
        for (i, (name, _)) in self.labels.iter().enumerate() {
            if self.labels[..i].iter().any(|(seen, _)| seen == name) {
                return Err(Error::DuplicateLabel {
                    metric: self.name.to_owned(),
                    label: (*name).to_owned(),
                });
            }
        }
        Ok(())
    }
}

/// One label-set-plus-value observation within a [`MetricFamily`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricPoint {
    labels: Vec<LabelPair>,
    value: f64,
    timestamp_ms: Option<i64>,
}

impl MetricPoint {
    pub fn labels(&self) -> &[LabelPair] {
        &self.labels
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn timestamp_ms(&self) -> Option<i64> {
        self.timestamp_ms
    }

    /// Overwrites this point in place from a validated sample, reusing label
    /// slots that fit and growing only for extra labels.
    pub(crate) fn assign(&mut self, sample: &Sample<'_>) {
        self.labels.truncate(sample.labels.len());
        for (i, (name, value)) in sample.labels.iter().enumerate() {
            match self.labels.get_mut(i) {
                Some(slot) => slot.assign(name, value),
                None => self.labels.push(LabelPair {
                    name: (*name).to_owned(),
                    value: (*value).to_owned(),
                }),
            }
        }
        self.value = sample.value;
        self.timestamp_ms = sample.timestamp_ms;
    }
}

/// A named group of points sharing type and help text.
///
/// Point slots beyond the logical length are retained capacity from earlier
/// sessions and are never exposed through [`MetricFamily::points`].
#[derive(Debug, Clone, Default)]
pub struct MetricFamily {
    name: String,
    help: String,
    kind: MetricType,
    points: Vec<MetricPoint>,
    len: usize,
}

impl MetricFamily {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn help(&self) -> &str {
        &self.help
    }

    pub fn kind(&self) -> MetricType {
        self.kind
    }

    pub fn points(&self) -> &[MetricPoint] {
        &self.points[..self.len]
    }

    /// Rebinds this family slot to a new name/help/type and logically empties
    /// its points, keeping their backing storage for reuse.
    pub(crate) fn begin(&mut self, name: &str, help: &str, kind: MetricType) {
        self.name.clear();
        self.name.push_str(name);
        self.help.clear();
        self.help.push_str(help);
        self.kind = kind;
        self.len = 0;
    }

    /// Appends one point from a validated sample, overwriting a retained slot
    /// when one is available.
    pub(crate) fn push_point(&mut self, sample: &Sample<'_>) {
        if self.len == self.points.len() {
            self.points.push(MetricPoint::default());
        }
        self.points[self.len].assign(sample);
        self.len += 1;
    }
}
