use indexmap::IndexMap;
use thiserror::Error;

use crate::defaults::{Aggregation, MetricKind};

/// Errors that reject a metric call before it is buffered.
#[derive(Debug, Error)]
pub enum MetricError {
    /// The metric name was empty.
    #[error("metric name must not be empty")]
    EmptyName,

    /// The metric value was NaN or infinite.
    #[error("metric value must be finite")]
    NonFiniteValue,

    /// The aggregation frequency was zero.
    #[error("aggregation frequency must be a positive number of seconds")]
    ZeroAggFreq,
}

/// A numeric metric value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MetricValue {
    /// An integral value, rendered without a decimal point.
    Integer(i64),
    /// A floating-point value, rendered in its shortest exact form.
    Float(f64),
}

impl From<i64> for MetricValue {
    fn from(value: i64) -> Self {
        MetricValue::Integer(value)
    }
}

impl From<i32> for MetricValue {
    fn from(value: i32) -> Self {
        MetricValue::Integer(i64::from(value))
    }
}

impl From<u32> for MetricValue {
    fn from(value: u32) -> Self {
        MetricValue::Integer(i64::from(value))
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::Float(value)
    }
}

impl From<f32> for MetricValue {
    fn from(value: f32) -> Self {
        MetricValue::Float(f64::from(value))
    }
}

struct ValueFormatter {
    int_buf: itoa::Buffer,
    float_buf: ryu::Buffer,
}

impl ValueFormatter {
    fn new() -> Self {
        Self { int_buf: itoa::Buffer::new(), float_buf: ryu::Buffer::new() }
    }

    fn format(&mut self, value: MetricValue) -> &str {
        match value {
            MetricValue::Integer(v) => self.int_buf.format(v),
            MetricValue::Float(v) => self.float_buf.format(v),
        }
    }
}

/// Renders resolved metric events as wire-format lines.
///
/// One line per event:
///
/// ```text
/// <namespace>.<kind>.<name>[,<k1>=<v1>,...] <value> <timestamp> <agg1,agg2,...>,<aggFreq>
/// ```
///
/// The tags segment is omitted when the resolved tag set is empty, and the
/// trailing aggregation descriptor is omitted for pre-aggregated submissions
/// or an empty aggregation list.
pub(crate) struct LineWriter {
    namespace: String,
}

impl LineWriter {
    pub fn new(namespace: impl Into<String>) -> Self {
        LineWriter { namespace: namespace.into() }
    }

    /// Encodes one metric event.
    ///
    /// `descriptor` carries the resolved aggregation list and frequency of a
    /// raw submission; pre-aggregated submissions pass `None`.
    pub fn write_line(
        &self,
        kind: MetricKind,
        name: &str,
        value: MetricValue,
        tags: &IndexMap<String, String>,
        descriptor: Option<(&[Aggregation], u32)>,
        timestamp: u64,
    ) -> Result<String, MetricError> {
        if name.is_empty() {
            return Err(MetricError::EmptyName);
        }
        if let MetricValue::Float(v) = value {
            if !v.is_finite() {
                return Err(MetricError::NonFiniteValue);
            }
        }
        if let Some((_, agg_freq)) = descriptor {
            if agg_freq == 0 {
                return Err(MetricError::ZeroAggFreq);
            }
        }

        let mut formatter = ValueFormatter::new();
        let mut int_buf = itoa::Buffer::new();

        let mut line = String::with_capacity(64);
        line.push_str(&self.namespace);
        line.push('.');
        line.push_str(kind.as_str());
        line.push('.');
        line.push_str(name);
        for (key, tag_value) in tags {
            line.push(',');
            line.push_str(key);
            line.push('=');
            line.push_str(tag_value);
        }
        line.push(' ');
        line.push_str(formatter.format(value));
        line.push(' ');
        line.push_str(int_buf.format(timestamp));

        if let Some((agg, agg_freq)) = descriptor {
            if !agg.is_empty() {
                line.push(' ');
                for (idx, agg) in agg.iter().enumerate() {
                    if idx > 0 {
                        line.push(',');
                    }
                    line.push_str(agg.as_str());
                }
                line.push(',');
                line.push_str(int_buf.format(agg_freq));
            }
        }

        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;
    use proptest::{collection::vec as arb_vec, prelude::*, proptest};

    use super::{LineWriter, MetricError, MetricValue};
    use crate::defaults::{Aggregation, MetricKind};

    const TIMER_AGG: &[Aggregation] = &[Aggregation::Avg, Aggregation::P90, Aggregation::Count];

    fn tags(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
    }

    #[test]
    fn timer_line() {
        // Cases are defined as: kind, name, value, tags, descriptor, expected output.
        let cases = [
            (
                MetricKind::Timer,
                "my_metric",
                MetricValue::Integer(1),
                tags(&[("unit", "ms")]),
                Some((TIMER_AGG, 10)),
                "application.timer.my_metric,unit=ms 1 1500000000 avg,p90,count,10",
            ),
            (
                MetricKind::Timer,
                "my_metric",
                MetricValue::Integer(1),
                tags(&[("cluster", "test"), ("unit", "ms")]),
                Some((TIMER_AGG, 10)),
                "application.timer.my_metric,cluster=test,unit=ms 1 1500000000 avg,p90,count,10",
            ),
            (
                MetricKind::Timer,
                "my_metric",
                MetricValue::Integer(1),
                tags(&[("unit", "ms")]),
                Some((TIMER_AGG, 120)),
                "application.timer.my_metric,unit=ms 1 1500000000 avg,p90,count,120",
            ),
            (
                MetricKind::Counter,
                "requests",
                MetricValue::Integer(3),
                tags(&[]),
                Some((&[Aggregation::Sum, Aggregation::Count][..], 10)),
                "application.counter.requests 3 1500000000 sum,count,10",
            ),
            (
                MetricKind::Gauge,
                "load",
                MetricValue::Float(1.23),
                tags(&[]),
                Some((&[Aggregation::Last][..], 10)),
                "application.gauge.load 1.23 1500000000 last,10",
            ),
        ];

        let writer = LineWriter::new("application");
        for (kind, name, value, tags, descriptor, expected) in cases {
            let line = writer
                .write_line(kind, name, value, &tags, descriptor, 1_500_000_000)
                .expect("encode line");
            assert_eq!(line, expected);
        }
    }

    #[test]
    fn pre_aggregated_line_has_no_descriptor() {
        let writer = LineWriter::new("application");
        let line = writer
            .write_line(
                MetricKind::Timer,
                "my_metric",
                MetricValue::Integer(1),
                &tags(&[("unit", "ms")]),
                None,
                1_500_000_000,
            )
            .expect("encode line");
        assert_eq!(line, "application.timer.my_metric,unit=ms 1 1500000000");
    }

    #[test]
    fn empty_agg_list_omits_descriptor() {
        let writer = LineWriter::new("application");
        let line = writer
            .write_line(
                MetricKind::Timer,
                "my_metric",
                MetricValue::Integer(1),
                &tags(&[("unit", "ms")]),
                Some((&[], 10)),
                1_500_000_000,
            )
            .expect("encode line");
        assert_eq!(line, "application.timer.my_metric,unit=ms 1 1500000000");
    }

    #[test]
    fn custom_namespace() {
        let writer = LineWriter::new("acme");
        let line = writer
            .write_line(
                MetricKind::Counter,
                "requests",
                MetricValue::Integer(1),
                &tags(&[]),
                Some((&[Aggregation::Sum][..], 10)),
                1_500_000_000,
            )
            .expect("encode line");
        assert_eq!(line, "acme.counter.requests 1 1500000000 sum,10");
    }

    #[test]
    fn float_values_render_exactly() {
        let writer = LineWriter::new("application");
        let line = writer
            .write_line(
                MetricKind::Gauge,
                "load",
                MetricValue::Float(1.0),
                &tags(&[]),
                None,
                1_500_000_000,
            )
            .expect("encode line");
        assert_eq!(line, "application.gauge.load 1.0 1500000000");
    }

    #[test]
    fn rejects_empty_name() {
        let writer = LineWriter::new("application");
        let result = writer.write_line(
            MetricKind::Timer,
            "",
            MetricValue::Integer(1),
            &tags(&[]),
            None,
            1_500_000_000,
        );
        assert!(matches!(result, Err(MetricError::EmptyName)));
    }

    #[test]
    fn rejects_non_finite_values() {
        let writer = LineWriter::new("application");
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let result = writer.write_line(
                MetricKind::Gauge,
                "load",
                MetricValue::Float(value),
                &tags(&[]),
                None,
                1_500_000_000,
            );
            assert!(matches!(result, Err(MetricError::NonFiniteValue)));
        }
    }

    #[test]
    fn rejects_zero_agg_freq() {
        let writer = LineWriter::new("application");
        let result = writer.write_line(
            MetricKind::Timer,
            "my_metric",
            MetricValue::Integer(1),
            &tags(&[]),
            Some((TIMER_AGG, 0)),
            1_500_000_000,
        );
        assert!(matches!(result, Err(MetricError::ZeroAggFreq)));
    }

    fn arb_tag() -> impl Strategy<Value = (String, String)> {
        ("[a-z]{2,8}", "[a-z0-9]{1,12}")
    }

    proptest! {
        #[test]
        fn encoded_lines_split_cleanly(
            name in "[a-zA-Z0-9_]{1,24}",
            value in any::<i64>(),
            timestamp in any::<u64>(),
            agg_freq in 1..3600u32,
            input_tags in arb_vec(arb_tag(), 0..4),
        ) {
            let writer = LineWriter::new("application");
            let tags: IndexMap<String, String> = input_tags.into_iter().collect();
            let line = writer
                .write_line(
                    MetricKind::Timer,
                    &name,
                    MetricValue::Integer(value),
                    &tags,
                    Some((TIMER_AGG, agg_freq)),
                    timestamp,
                )
                .expect("encode line");

            let segments: Vec<&str> = line.split(' ').collect();
            prop_assert_eq!(segments.len(), 4);

            let path = segments[0];
            let expected_prefix = format!("application.timer.{}", name);
            prop_assert!(path.starts_with(&expected_prefix));
            let rendered_tags = path.matches('=').count();
            prop_assert_eq!(rendered_tags, tags.len());

            prop_assert_eq!(segments[1], value.to_string());
            prop_assert_eq!(segments[2], timestamp.to_string());
            prop_assert_eq!(segments[3], format!("avg,p90,count,{agg_freq}"));
        }
    }
}
