use std::sync::Arc;

/// Abstract metrics sink. Components depend on `Arc<dyn MetricsSink>`,
/// never on a concrete exporter or a global registry.
pub trait MetricsSink: Send + Sync {
    fn incr_counter(&self, name: &str, labels: &[(&str, &str)]);
    fn observe_histogram(&self, name: &str, labels: &[(&str, &str)], value: f64);
}

#[derive(Default)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn incr_counter(&self, _name: &str, _labels: &[(&str, &str)]) {}
    fn observe_histogram(&self, _name: &str, _labels: &[(&str, &str)], _value: f64) {}
}

pub fn noop_sink() -> Arc<dyn MetricsSink> {
    Arc::new(NoopMetricsSink)
}

#[cfg(feature = "prometheus-sink")]
pub mod prometheus_sink {
    use super::MetricsSink;
    use prometheus::{CounterVec, HistogramVec, Opts, Registry};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Backs the sink with `prometheus`, registering counter/histogram
    /// families lazily on first use since label sets aren't known up
    /// front.
    pub struct PrometheusMetricsSink {
        registry: Registry,
        counters: Mutex<HashMap<String, CounterVec>>,
        histograms: Mutex<HashMap<String, HistogramVec>>,
    }

    impl PrometheusMetricsSink {
        pub fn new(registry: Registry) -> Self {
            Self {
                registry,
                counters: Mutex::new(HashMap::new()),
                histograms: Mutex::new(HashMap::new()),
            }
        }

        fn counter_for(&self, name: &str, label_names: &[&str]) -> CounterVec {
            let mut counters = self.counters.lock().unwrap();
            counters
                .entry(name.to_string())
                .or_insert_with(|| {
                    let opts = Opts::new(name, format!("{name} counter"));
                    let counter = CounterVec::new(opts, label_names).expect("valid counter spec");
                    let _ = self.registry.register(Box::new(counter.clone()));
                    counter
                })
                .clone()
        }

        fn histogram_for(&self, name: &str, label_names: &[&str]) -> HistogramVec {
            let mut histograms = self.histograms.lock().unwrap();
            histograms
                .entry(name.to_string())
                .or_insert_with(|| {
                    let opts = prometheus::HistogramOpts::new(name, format!("{name} histogram"));
                    let histogram =
                        HistogramVec::new(opts, label_names).expect("valid histogram spec");
                    let _ = self.registry.register(Box::new(histogram.clone()));
                    histogram
                })
                .clone()
        }
    }

    impl MetricsSink for PrometheusMetricsSink {
        fn incr_counter(&self, name: &str, labels: &[(&str, &str)]) {
            let names: Vec<&str> = labels.iter().map(|(k, _)| *k).collect();
            let values: Vec<&str> = labels.iter().map(|(_, v)| *v).collect();
            self.counter_for(name, &names).with_label_values(&values).inc();
        }

        fn observe_histogram(&self, name: &str, labels: &[(&str, &str)], value: f64) {
            let names: Vec<&str> = labels.iter().map(|(k, _)| *k).collect();
            let values: Vec<&str> = labels.iter().map(|(_, v)| *v).collect();
            self.histogram_for(name, &names)
                .with_label_values(&values)
                .observe(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    fn noop_sink_is_inert() {
        let sink = noop_sink();
        sink.incr_counter("widgets_total", &[("kind", "gadget")]);
        sink.observe_histogram("latency_seconds", &[], 0.25);
    }
}
