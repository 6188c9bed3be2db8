//! Prometheus text exposition format (v0.0.4) parsing
//!
//! Parses scraped metric bodies into per-family values. Only the shapes the
//! autoscaler consumes are modeled: counters and gauges yield a scalar (the
//! first series of the family), histograms yield cumulative buckets plus
//! count and sum. Untyped families are read as gauges. Malformed lines are
//! skipped rather than failing the whole scrape.

use std::collections::HashMap;

use tracing::debug;

/// Declared type of a metric family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FamilyKind {
    Counter,
    Gauge,
    Histogram,
    Untyped,
}

/// Buckets and totals of one histogram series
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistogramData {
    /// `(upper_bound, cumulative_count)` in ascending bound order.
    pub buckets: Vec<(f64, u64)>,
    pub count: u64,
    pub sum: f64,
}

/// Parsed value of a metric family
#[derive(Debug, Clone, PartialEq)]
pub enum FamilyValue {
    Scalar(f64),
    Histogram(HistogramData),
}

/// One metric family from a scraped exposition body
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub kind: FamilyKind,
    pub value: FamilyValue,
}

/// Parse an exposition body into families, in first-appearance order.
pub fn parse_families(text: &str) -> Vec<MetricFamily> {
    let mut types: HashMap<String, FamilyKind> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    let mut scalars: HashMap<String, f64> = HashMap::new();
    let mut histograms: HashMap<String, HistogramBuilder> = HashMap::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(comment) = line.strip_prefix('#') {
            if let Some((name, kind)) = parse_type_line(comment) {
                types.insert(name, kind);
            }
            continue;
        }

        let Some(sample) = parse_sample(line) else {
            debug!(line = %line, "skipping malformed exposition line");
            continue;
        };

        let (family, part) = split_family_name(&sample.name, &types);
        if !order.contains(&family) {
            order.push(family.clone());
        }

        match part {
            SamplePart::Bucket => {
                let builder = histograms.entry(family).or_default();
                let Some(le) = sample.labels.get("le").and_then(|v| v.parse::<f64>().ok())
                else {
                    debug!(line = %line, "histogram bucket without a parsable le label");
                    continue;
                };
                builder.add_bucket(le, sample.value as u64, &sample.labels);
            }
            SamplePart::Sum => {
                let builder = histograms.entry(family).or_default();
                if builder.sum.is_none() {
                    builder.sum = Some(sample.value);
                }
            }
            SamplePart::Count => {
                let builder = histograms.entry(family).or_default();
                if builder.count.is_none() {
                    builder.count = Some(sample.value as u64);
                }
            }
            SamplePart::Scalar => {
                // First series of the family wins.
                scalars.entry(family).or_insert(sample.value);
            }
        }
    }

    order
        .into_iter()
        .filter_map(|name| {
            let kind = types.get(&name).copied().unwrap_or(FamilyKind::Untyped);
            if let Some(builder) = histograms.remove(&name) {
                Some(MetricFamily {
                    name,
                    kind: FamilyKind::Histogram,
                    value: FamilyValue::Histogram(builder.finish()),
                })
            } else {
                scalars.remove(&name).map(|value| MetricFamily {
                    name,
                    kind,
                    value: FamilyValue::Scalar(value),
                })
            }
        })
        .collect()
}

#[derive(Debug, Default)]
struct HistogramBuilder {
    buckets: Vec<(f64, u64)>,
    /// Non-`le` labels of the first bucket seen; later series are dropped.
    series_labels: Option<Vec<(String, String)>>,
    count: Option<u64>,
    sum: Option<f64>,
}

impl HistogramBuilder {
    fn add_bucket(&mut self, le: f64, count: u64, labels: &HashMap<String, String>) {
        let mut key: Vec<(String, String)> = labels
            .iter()
            .filter(|(k, _)| k.as_str() != "le")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        key.sort();

        match &self.series_labels {
            None => self.series_labels = Some(key),
            Some(first) if *first != key => return,
            Some(_) => {}
        }
        self.buckets.push((le, count));
    }

    fn finish(mut self) -> HistogramData {
        self.buckets
            .sort_by(|(a, _), (b, _)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let count = self
            .count
            .or_else(|| self.buckets.last().map(|(_, c)| *c))
            .unwrap_or(0);
        HistogramData {
            buckets: self.buckets,
            count,
            sum: self.sum.unwrap_or(0.0),
        }
    }
}

enum SamplePart {
    Scalar,
    Bucket,
    Sum,
    Count,
}

/// Map a sample name to its family name and role within the family.
///
/// `_bucket`/`_sum`/`_count` suffixes only denote histogram parts when the
/// base name was declared as a histogram; a plain counter named
/// `requests_count` stays a scalar.
fn split_family_name(
    name: &str,
    types: &HashMap<String, FamilyKind>,
) -> (String, SamplePart) {
    for (suffix, part) in [
        ("_bucket", SamplePart::Bucket),
        ("_sum", SamplePart::Sum),
        ("_count", SamplePart::Count),
    ] {
        if let Some(base) = name.strip_suffix(suffix) {
            if types.get(base) == Some(&FamilyKind::Histogram) {
                return (base.to_string(), part);
            }
        }
    }
    (name.to_string(), SamplePart::Scalar)
}

fn parse_type_line(comment: &str) -> Option<(String, FamilyKind)> {
    let mut parts = comment.split_whitespace();
    if parts.next()? != "TYPE" {
        return None;
    }
    let name = parts.next()?;
    let kind = match parts.next()? {
        "counter" => FamilyKind::Counter,
        "gauge" => FamilyKind::Gauge,
        "histogram" => FamilyKind::Histogram,
        _ => FamilyKind::Untyped,
    };
    Some((name.to_string(), kind))
}

struct Sample {
    name: String,
    labels: HashMap<String, String>,
    value: f64,
}

fn parse_sample(line: &str) -> Option<Sample> {
    let (name_part, rest) = match line.find('{') {
        Some(open) => {
            let close = line[open..].find('}')? + open;
            let labels = &line[open + 1..close];
            (&line[..open], Some((labels, &line[close + 1..])))
        }
        None => (line.split_whitespace().next()?, None),
    };

    let name = name_part.trim().to_string();
    if name.is_empty() {
        return None;
    }

    let (labels, value_part) = match rest {
        Some((labels, tail)) => (parse_labels(labels), tail),
        None => (HashMap::new(), line[name.len()..].trim_start()),
    };

    // Value is the first field after name/labels; an optional timestamp
    // may follow and is ignored.
    let value = value_part.split_whitespace().next()?.parse::<f64>().ok()?;

    Some(Sample { name, labels, value })
}

fn parse_labels(text: &str) -> HashMap<String, String> {
    let mut labels = HashMap::new();
    let mut rest = text.trim();
    while !rest.is_empty() {
        let Some(eq) = rest.find('=') else { break };
        let key = rest[..eq].trim().to_string();
        let after = rest[eq + 1..].trim_start();
        let Some(after) = after.strip_prefix('"') else { break };

        // Find the closing quote, honoring backslash escapes.
        let mut value = String::new();
        let mut chars = after.char_indices();
        let mut end = None;
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => {
                    if let Some((_, escaped)) = chars.next() {
                        match escaped {
                            'n' => value.push('\n'),
                            '\\' => value.push('\\'),
                            '"' => value.push('"'),
                            other => value.push(other),
                        }
                    }
                }
                '"' => {
                    end = Some(i);
                    break;
                }
                other => value.push(other),
            }
        }
        let Some(end) = end else { break };

        labels.insert(key, value);
        rest = after[end + 1..].trim_start().trim_start_matches(',').trim_start();
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gauge_and_counter() {
        let families = parse_families(
            "# HELP load Current load per instance.\n\
             # TYPE load gauge\n\
             load 12.5\n\
             # TYPE requests_total counter\n\
             requests_total 42\n",
        );
        assert_eq!(families.len(), 2);
        assert_eq!(families[0].name, "load");
        assert_eq!(families[0].kind, FamilyKind::Gauge);
        assert_eq!(families[0].value, FamilyValue::Scalar(12.5));
        assert_eq!(families[1].name, "requests_total");
        assert_eq!(families[1].kind, FamilyKind::Counter);
        assert_eq!(families[1].value, FamilyValue::Scalar(42.0));
    }

    #[test]
    fn test_untyped_family_parses_as_scalar() {
        let families = parse_families("load 3\n");
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].kind, FamilyKind::Untyped);
        assert_eq!(families[0].value, FamilyValue::Scalar(3.0));
    }

    #[test]
    fn test_first_series_wins_for_scalars() {
        let families = parse_families(
            "# TYPE load gauge\n\
             load{shard=\"a\"} 1\n\
             load{shard=\"b\"} 2\n",
        );
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].value, FamilyValue::Scalar(1.0));
    }

    #[test]
    fn test_parse_histogram_family() {
        let families = parse_families(
            "# TYPE request_latency_seconds histogram\n\
             request_latency_seconds_bucket{le=\"0.1\"} 3\n\
             request_latency_seconds_bucket{le=\"0.5\"} 9\n\
             request_latency_seconds_bucket{le=\"+Inf\"} 10\n\
             request_latency_seconds_sum 2.7\n\
             request_latency_seconds_count 10\n",
        );
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].name, "request_latency_seconds");
        assert_eq!(families[0].kind, FamilyKind::Histogram);
        let FamilyValue::Histogram(data) = &families[0].value else {
            panic!("expected histogram value");
        };
        assert_eq!(data.buckets.len(), 3);
        assert_eq!(data.buckets[0], (0.1, 3));
        assert_eq!(data.buckets[1], (0.5, 9));
        assert!(data.buckets[2].0.is_infinite());
        assert_eq!(data.buckets[2].1, 10);
        assert_eq!(data.count, 10);
        assert!((data.sum - 2.7).abs() < 1e-9);
    }

    #[test]
    fn test_histogram_keeps_first_series_only() {
        let families = parse_families(
            "# TYPE lat histogram\n\
             lat_bucket{pod=\"a\",le=\"1\"} 4\n\
             lat_bucket{pod=\"a\",le=\"+Inf\"} 5\n\
             lat_bucket{pod=\"b\",le=\"1\"} 100\n\
             lat_bucket{pod=\"b\",le=\"+Inf\"} 100\n\
             lat_count{pod=\"a\"} 5\n",
        );
        let FamilyValue::Histogram(data) = &families[0].value else {
            panic!("expected histogram value");
        };
        assert_eq!(data.buckets, vec![(1.0, 4), (f64::INFINITY, 5)]);
        assert_eq!(data.count, 5);
    }

    #[test]
    fn test_count_suffix_without_histogram_type_is_a_scalar() {
        let families = parse_families(
            "# TYPE queue_count gauge\n\
             queue_count 7\n",
        );
        assert_eq!(families[0].name, "queue_count");
        assert_eq!(families[0].value, FamilyValue::Scalar(7.0));
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let families = parse_families(
            "garbage line without value extra tokens nonnumeric\n\
             load not_a_number\n\
             # TYPE load gauge\n\
             load 4\n",
        );
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].value, FamilyValue::Scalar(4.0));
    }

    #[test]
    fn test_timestamp_suffix_is_ignored() {
        let families = parse_families("# TYPE load gauge\nload 4 1712000000000\n");
        assert_eq!(families[0].value, FamilyValue::Scalar(4.0));
    }

    #[test]
    fn test_escaped_label_values() {
        let families = parse_families(
            "# TYPE load gauge\n\
             load{path=\"/a\\\"b\",zone=\"eu\"} 1\n",
        );
        assert_eq!(families[0].value, FamilyValue::Scalar(1.0));
    }
}
