use crate::metrics::{self, MetricFamily, Sample};

/// A resettable, reusable container of metric families.
///
/// `reset` only moves the logical length; family slots and their point
/// storage survive across sessions, so a collection pass over a stable set
/// of entities settles into zero new allocations.
#[derive(Debug, Default)]
pub(super) struct Buffer {
    families: Vec<MetricFamily>,
    len: usize,
}

impl Buffer {
    /// Logically truncates the buffer without releasing backing capacity.
    pub(super) fn reset(&mut self) {
        self.len = 0;
    }

    pub(super) fn families(&self) -> &[MetricFamily] {
        &self.families[..self.len]
    }

    /// Appends one sample, reusing the family slot it belongs to.
    ///
    /// Samples for the same family name may arrive interleaved with other
    /// names (a producer typically walks entities, not families); they are
    /// folded into the one family slot carrying that name so family names
    /// stay unique within the snapshot. A slot whose retained point storage
    /// does not fit the new shape grows; it is never reused beyond capacity.
    ///
    /// # Errors
    ///
    /// Returns a [`metrics::Error`] for a structurally invalid sample (empty
    /// name, duplicate label names). The buffer is left untouched.
    pub(super) fn insert_in_place(&mut self, sample: Sample<'_>) -> metrics::Result<()> {
        sample.validate()?;

        let family = match self.families[..self.len]
            .iter()
            .position(|f| f.name() == sample.name)
        {
            Some(i) => &mut self.families[i],
            None => {
                if self.len == self.families.len() {
                    self.families.push(MetricFamily::default());
                }
                let family = &mut self.families[self.len];
                family.begin(sample.name, sample.help, sample.kind);
                self.len += 1;
                family
            }
        };
        family.push_point(&sample);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricType;

    fn sample<'a>(name: &'a str, labels: &'a [(&'a str, &'a str)], value: f64) -> Sample<'a> {
        Sample {
            name,
            help: "help",
            kind: MetricType::Counter,
            labels,
            value,
            timestamp_ms: None,
        }
    }

    #[test]
    fn test_interleaved_names_fold_into_one_family() {
        let mut buffer = Buffer::default();
        buffer.insert_in_place(sample("cpu", &[("id", "a")], 1.0)).unwrap();
        buffer.insert_in_place(sample("mem", &[("id", "a")], 10.0)).unwrap();
        buffer.insert_in_place(sample("cpu", &[("id", "b")], 2.0)).unwrap();
        buffer.insert_in_place(sample("mem", &[("id", "b")], 20.0)).unwrap();

        let families = buffer.families();
        assert_eq!(families.len(), 2);
        assert_eq!(families[0].name(), "cpu");
        assert_eq!(families[0].points().len(), 2);
        assert_eq!(families[1].name(), "mem");
        assert_eq!(families[1].points().len(), 2);
    }

    #[test]
    fn test_reset_keeps_family_slots() {
        let mut buffer = Buffer::default();
        buffer.insert_in_place(sample("cpu", &[("id", "a")], 1.0)).unwrap();
        buffer.insert_in_place(sample("mem", &[("id", "a")], 2.0)).unwrap();

        buffer.reset();
        assert!(buffer.families().is_empty());
        assert_eq!(buffer.families.len(), 2);

        buffer.insert_in_place(sample("io", &[("id", "a")], 3.0)).unwrap();
        assert_eq!(buffer.families().len(), 1);
        assert_eq!(buffer.families()[0].name(), "io");
    }

    #[test]
    fn test_varying_shape_reuses_then_grows() {
        let mut buffer = Buffer::default();
        for i in 0..3 {
            buffer
                .insert_in_place(sample("cpu", &[("id", "x")], f64::from(i)))
                .unwrap();
        }

        // shrink to one point, then grow past the old capacity
        buffer.reset();
        buffer.insert_in_place(sample("cpu", &[("id", "x")], 9.0)).unwrap();
        assert_eq!(buffer.families()[0].points().len(), 1);

        buffer.reset();
        for i in 0..5 {
            buffer
                .insert_in_place(sample("cpu", &[("id", "x")], f64::from(i)))
                .unwrap();
        }
        assert_eq!(buffer.families()[0].points().len(), 5);
        assert_eq!(buffer.families()[0].points()[4].value(), 4.0);
    }

    #[test]
    fn test_malformed_sample_leaves_buffer_unchanged() {
        let mut buffer = Buffer::default();
        buffer.insert_in_place(sample("cpu", &[("id", "a")], 1.0)).unwrap();

        let err = buffer
            .insert_in_place(sample("cpu", &[("id", "a"), ("id", "b")], 2.0))
            .unwrap_err();
        assert!(matches!(err, metrics::Error::DuplicateLabel { .. }));

        assert_eq!(buffer.families().len(), 1);
        assert_eq!(buffer.families()[0].points().len(), 1);
        assert_eq!(buffer.families()[0].points()[0].value(), 1.0);
    }
}
