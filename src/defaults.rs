use indexmap::IndexMap;

/// The kind of metric being submitted.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum MetricKind {
    /// A duration measurement, in milliseconds unless retagged.
    Timer,
    /// An accumulated count of occurrences.
    Counter,
    /// A point-in-time value.
    Gauge,
}

impl MetricKind {
    /// Returns the kind's segment of the encoded metric path.
    pub const fn as_str(self) -> &'static str {
        match self {
            MetricKind::Timer => "timer",
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
        }
    }
}

/// An aggregation the downstream collector should apply to raw samples.
///
/// These are labels carried on the wire, not computations performed by the
/// client.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Aggregation {
    /// Arithmetic mean over the window.
    Avg,
    /// 90th percentile.
    P90,
    /// 95th percentile.
    P95,
    /// 99th percentile.
    P99,
    /// Smallest sample.
    Min,
    /// Largest sample.
    Max,
    /// Sum of all samples.
    Sum,
    /// Number of samples.
    Count,
    /// First sample in the window.
    First,
    /// Last sample in the window.
    Last,
}

impl Aggregation {
    /// Returns the wire keyword for this aggregation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Aggregation::Avg => "avg",
            Aggregation::P90 => "p90",
            Aggregation::P95 => "p95",
            Aggregation::P99 => "p99",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
            Aggregation::Sum => "sum",
            Aggregation::Count => "count",
            Aggregation::First => "first",
            Aggregation::Last => "last",
        }
    }
}

/// Per-call options, layered on top of the client and built-in defaults.
///
/// Tags and aggregations given here merge *additively* with the resolved
/// defaults; the aggregation frequency, when given, replaces them.
#[derive(Clone, Debug, Default)]
pub struct MetricOpts {
    pub(crate) tags: IndexMap<String, String>,
    pub(crate) agg: Vec<Aggregation>,
    pub(crate) agg_freq: Option<u32>,
}

impl MetricOpts {
    /// Creates an empty set of call options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tag to this call.
    ///
    /// Call tags render before default tags and win on key collision, keeping
    /// their call-time position.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Requests an additional aggregation, appended after the resolved
    /// default list. Duplicates are dropped.
    #[must_use]
    pub fn with_agg(mut self, agg: Aggregation) -> Self {
        self.agg.push(agg);
        self
    }

    /// Overrides the aggregation frequency, in seconds, for this call.
    #[must_use]
    pub fn with_agg_freq(mut self, agg_freq: u32) -> Self {
        self.agg_freq = Some(agg_freq);
        self
    }
}

/// Client-level defaults for one metric kind.
///
/// Each field that is set replaces the corresponding built-in default for
/// that kind *entirely*; unset fields leave the built-in value in place.
/// Replacing the tag set discards built-ins such as the timer's `unit=ms`
/// unless they are re-declared.
#[derive(Clone, Debug, Default)]
pub struct MetricDefaults {
    pub(crate) tags: Option<IndexMap<String, String>>,
    pub(crate) agg: Option<Vec<Aggregation>>,
    pub(crate) agg_freq: Option<u32>,
}

impl MetricDefaults {
    /// Creates an empty defaults record. All fields unset; resolution falls
    /// through to the built-in defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the built-in tag set with the given tags.
    ///
    /// An empty iterator yields metrics with no default tags at all.
    #[must_use]
    pub fn with_tags<K, V>(mut self, tags: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.tags =
            Some(tags.into_iter().map(|(key, value)| (key.into(), value.into())).collect());
        self
    }

    /// Adds one tag to the replacement tag set.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.get_or_insert_with(IndexMap::new).insert(key.into(), value.into());
        self
    }

    /// Replaces the built-in aggregation list.
    #[must_use]
    pub fn with_aggs(mut self, aggs: impl IntoIterator<Item = Aggregation>) -> Self {
        self.agg = Some(aggs.into_iter().collect());
        self
    }

    /// Adds one aggregation to the replacement list.
    #[must_use]
    pub fn with_agg(mut self, agg: Aggregation) -> Self {
        self.agg.get_or_insert_with(Vec::new).push(agg);
        self
    }

    /// Replaces the built-in aggregation frequency, in seconds.
    #[must_use]
    pub fn with_agg_freq(mut self, agg_freq: u32) -> Self {
        self.agg_freq = Some(agg_freq);
        self
    }

    pub(crate) fn agg_freq(&self) -> Option<u32> {
        self.agg_freq
    }
}

/// Client-level defaults, one optional slot per metric kind.
#[derive(Clone, Debug, Default)]
pub(crate) struct KindDefaults {
    timer: Option<MetricDefaults>,
    counter: Option<MetricDefaults>,
    gauge: Option<MetricDefaults>,
}

impl KindDefaults {
    pub fn set(&mut self, kind: MetricKind, defaults: MetricDefaults) {
        match kind {
            MetricKind::Timer => self.timer = Some(defaults),
            MetricKind::Counter => self.counter = Some(defaults),
            MetricKind::Gauge => self.gauge = Some(defaults),
        }
    }

    pub fn get(&self, kind: MetricKind) -> Option<&MetricDefaults> {
        match kind {
            MetricKind::Timer => self.timer.as_ref(),
            MetricKind::Counter => self.counter.as_ref(),
            MetricKind::Gauge => self.gauge.as_ref(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricDefaults> {
        [self.timer.as_ref(), self.counter.as_ref(), self.gauge.as_ref()]
            .into_iter()
            .flatten()
    }
}

struct BaseDefaults {
    tags: &'static [(&'static str, &'static str)],
    agg: &'static [Aggregation],
    agg_freq: u32,
}

const fn base_defaults(kind: MetricKind) -> BaseDefaults {
    match kind {
        MetricKind::Timer => BaseDefaults {
            tags: &[("unit", "ms")],
            agg: &[Aggregation::Avg, Aggregation::P90, Aggregation::Count],
            agg_freq: 10,
        },
        MetricKind::Counter => BaseDefaults {
            tags: &[],
            agg: &[Aggregation::Sum, Aggregation::Count],
            agg_freq: 10,
        },
        MetricKind::Gauge => {
            BaseDefaults { tags: &[], agg: &[Aggregation::Last], agg_freq: 10 }
        }
    }
}

/// The effective settings for one metric call.
#[derive(Debug)]
pub(crate) struct ResolvedCall {
    pub tags: IndexMap<String, String>,
    pub agg: Vec<Aggregation>,
    pub agg_freq: u32,
}

/// Merges the three configuration layers into the effective settings for one
/// call.
///
/// Layer order is fixed: built-in defaults per kind, then client-level
/// defaults (each present field replaces its built-in counterpart wholesale),
/// then call options (tags and aggregations merge additively, the frequency
/// replaces). The configured application tag, if any, is appended last and
/// never overrides an explicit `app` tag.
pub(crate) fn resolve(
    kind: MetricKind,
    client_defaults: Option<&MetricDefaults>,
    opts: &MetricOpts,
    app: Option<&str>,
) -> ResolvedCall {
    let base = base_defaults(kind);

    // Call tags go in first so they keep their call-time positions and win
    // key collisions against the surviving defaults.
    let mut tags = opts.tags.clone();
    match client_defaults.and_then(|defaults| defaults.tags.as_ref()) {
        Some(default_tags) => {
            for (key, value) in default_tags {
                tags.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        None => {
            for (key, value) in base.tags {
                tags.entry((*key).to_string()).or_insert_with(|| (*value).to_string());
            }
        }
    }
    if let Some(app) = app {
        tags.entry("app".to_string()).or_insert_with(|| app.to_string());
    }

    let mut agg = match client_defaults.and_then(|defaults| defaults.agg.as_ref()) {
        Some(default_agg) => default_agg.clone(),
        None => base.agg.to_vec(),
    };
    for candidate in &opts.agg {
        if !agg.contains(candidate) {
            agg.push(*candidate);
        }
    }

    let agg_freq = opts
        .agg_freq
        .or_else(|| client_defaults.and_then(|defaults| defaults.agg_freq))
        .unwrap_or(base.agg_freq);

    ResolvedCall { tags, agg, agg_freq }
}

#[cfg(test)]
mod tests {
    use super::{resolve, Aggregation, MetricDefaults, MetricKind, MetricOpts};

    fn tag_pairs(resolved: &super::ResolvedCall) -> Vec<(&str, &str)> {
        resolved.tags.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect()
    }

    #[test]
    fn builtin_defaults_per_kind() {
        let cases = [
            (
                MetricKind::Timer,
                vec![("unit", "ms")],
                vec![Aggregation::Avg, Aggregation::P90, Aggregation::Count],
            ),
            (MetricKind::Counter, vec![], vec![Aggregation::Sum, Aggregation::Count]),
            (MetricKind::Gauge, vec![], vec![Aggregation::Last]),
        ];

        for (kind, tags, agg) in cases {
            let resolved = resolve(kind, None, &MetricOpts::new(), None);
            assert_eq!(tag_pairs(&resolved), tags);
            assert_eq!(resolved.agg, agg);
            assert_eq!(resolved.agg_freq, 10);
        }
    }

    #[test]
    fn call_tags_render_before_defaults() {
        let opts = MetricOpts::new().with_tag("cluster", "test");
        let resolved = resolve(MetricKind::Timer, None, &opts, None);
        assert_eq!(tag_pairs(&resolved), vec![("cluster", "test"), ("unit", "ms")]);
    }

    #[test]
    fn call_tags_win_collisions_in_place() {
        let opts = MetricOpts::new().with_tag("unit", "s").with_tag("cluster", "test");
        let resolved = resolve(MetricKind::Timer, None, &opts, None);
        assert_eq!(tag_pairs(&resolved), vec![("unit", "s"), ("cluster", "test")]);
    }

    #[test]
    fn client_tags_replace_builtins() {
        let defaults = MetricDefaults::new().with_tag("cluster", "test");
        let resolved = resolve(MetricKind::Timer, Some(&defaults), &MetricOpts::new(), None);
        // The built-in unit=ms is gone unless re-declared.
        assert_eq!(tag_pairs(&resolved), vec![("cluster", "test")]);
    }

    #[test]
    fn client_tags_replace_then_call_tags_merge() {
        let defaults = MetricDefaults::new().with_tag("env", "qa");
        let opts = MetricOpts::new().with_tag("cluster", "test");
        let resolved = resolve(MetricKind::Timer, Some(&defaults), &opts, None);
        assert_eq!(tag_pairs(&resolved), vec![("cluster", "test"), ("env", "qa")]);
    }

    #[test]
    fn empty_replacement_tag_set_sticks() {
        let defaults = MetricDefaults::new().with_tags(Vec::<(String, String)>::new());
        let resolved = resolve(MetricKind::Timer, Some(&defaults), &MetricOpts::new(), None);
        assert!(resolved.tags.is_empty());
    }

    #[test]
    fn call_agg_is_order_stable_union() {
        let opts = MetricOpts::new().with_agg(Aggregation::Sum).with_agg(Aggregation::Avg);
        let resolved = resolve(MetricKind::Timer, None, &opts, None);
        assert_eq!(
            resolved.agg,
            vec![Aggregation::Avg, Aggregation::P90, Aggregation::Count, Aggregation::Sum]
        );
    }

    #[test]
    fn client_agg_replaces_then_call_agg_merges() {
        let defaults = MetricDefaults::new().with_agg(Aggregation::Sum);
        let opts = MetricOpts::new().with_agg(Aggregation::Last);
        let resolved = resolve(MetricKind::Timer, Some(&defaults), &opts, None);
        assert_eq!(resolved.agg, vec![Aggregation::Sum, Aggregation::Last]);
    }

    #[test]
    fn agg_freq_precedence() {
        // Client default beats built-in.
        let defaults = MetricDefaults::new().with_agg_freq(60);
        let resolved = resolve(MetricKind::Timer, Some(&defaults), &MetricOpts::new(), None);
        assert_eq!(resolved.agg_freq, 60);

        // Call-level beats both.
        let opts = MetricOpts::new().with_agg_freq(120);
        let resolved = resolve(MetricKind::Timer, Some(&defaults), &opts, None);
        assert_eq!(resolved.agg_freq, 120);
    }

    #[test]
    fn empty_defaults_record_falls_through() {
        let resolved =
            resolve(MetricKind::Timer, Some(&MetricDefaults::new()), &MetricOpts::new(), None);
        assert_eq!(tag_pairs(&resolved), vec![("unit", "ms")]);
        assert_eq!(
            resolved.agg,
            vec![Aggregation::Avg, Aggregation::P90, Aggregation::Count]
        );
        assert_eq!(resolved.agg_freq, 10);
    }

    #[test]
    fn app_tag_appends_last_without_overriding() {
        let resolved = resolve(MetricKind::Timer, None, &MetricOpts::new(), Some("billing"));
        assert_eq!(tag_pairs(&resolved), vec![("unit", "ms"), ("app", "billing")]);

        let opts = MetricOpts::new().with_tag("app", "checkout");
        let resolved = resolve(MetricKind::Timer, None, &opts, Some("billing"));
        assert_eq!(tag_pairs(&resolved), vec![("app", "checkout"), ("unit", "ms")]);
    }
}
