//! The scrape-facing surface: snapshot serialization and the HTTP server.
//!
//! The cache core is wire-format-free; this layer gathers a snapshot,
//! serializes it while the handle is alive, and drops the handle as soon as
//! the response body is built.

use std::fmt::Write as _;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::ToSocketAddrs;

use crate::cache::{self, CachedGatherer};
use crate::metrics::MetricFamily;

const TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Renders metric families in the Prometheus text exposition format.
pub fn encode_text(families: &[MetricFamily], out: &mut String) {
    for family in families {
        if !family.help().is_empty() {
            out.push_str("# HELP ");
            out.push_str(family.name());
            out.push(' ');
            push_escaped(out, family.help(), false);
            out.push('\n');
        }
        out.push_str("# TYPE ");
        out.push_str(family.name());
        out.push(' ');
        out.push_str(family.kind().as_str());
        out.push('\n');

        for point in family.points() {
            out.push_str(family.name());
            if !point.labels().is_empty() {
                out.push('{');
                for (i, label) in point.labels().iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&label.name);
                    out.push_str("=\"");
                    push_escaped(out, &label.value, true);
                    out.push('"');
                }
                out.push('}');
            }
            let _ = write!(out, " {}", point.value());
            if let Some(timestamp_ms) = point.timestamp_ms() {
                let _ = write!(out, " {timestamp_ms}");
            }
            out.push('\n');
        }
    }
}

/// Escapes backslashes and newlines; inside label values also double quotes.
fn push_escaped(out: &mut String, raw: &str, quoted: bool) {
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '"' if quoted => out.push_str("\\\""),
            c => out.push(c),
        }
    }
}

async fn serve_metrics(State(gatherer): State<Arc<CachedGatherer>>) -> Response {
    match gatherer.gather() {
        Ok(snapshot) => {
            let mut body = String::new();
            encode_text(&snapshot, &mut body);
            (
                [(axum::http::header::CONTENT_TYPE, TEXT_CONTENT_TYPE)],
                body,
            )
                .into_response()
        }
        Err(cache::Error::NotReady) => (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            "no metric snapshot published yet",
        )
            .into_response(),
        Err(err) => {
            log::error!("failed to gather metrics: {}", err);
            (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                "failed to gather metrics",
            )
                .into_response()
        }
    }
}

#[derive(Debug, serde::Serialize)]
struct StatusBody {
    sessions_committed: u64,
    in_flight_readers: usize,
    metric_families: usize,
}

async fn serve_status(State(gatherer): State<Arc<CachedGatherer>>) -> Json<StatusBody> {
    let metric_families = gatherer.gather().map_or(0, |snapshot| snapshot.len());
    Json(StatusBody {
        sessions_committed: gatherer.sessions_committed(),
        in_flight_readers: gatherer.in_flight_readers(),
        metric_families,
    })
}

pub struct MetricsServer {
    router: axum::Router,
}

impl MetricsServer {
    pub fn new(gatherer: Arc<CachedGatherer>) -> Self {
        let router = axum::Router::new()
            .route("/metrics", get(serve_metrics))
            .route("/status", get(serve_status))
            .with_state(gatherer);
        Self { router }
    }

    pub async fn listen(self, addr: impl ToSocketAddrs) {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .expect("TCP Listener bind");
        axum::serve(listener, self.router.into_make_service())
            .await
            .expect("metrics server failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{MetricType, Sample};

    fn snapshot_of(samples: &[Sample<'_>]) -> cache::Snapshot {
        let gatherer = CachedGatherer::new();
        let mut session = gatherer.begin_update();
        for sample in samples {
            session.insert(*sample).unwrap();
        }
        session.commit();
        gatherer.gather().unwrap()
    }

    #[test]
    fn test_encode_counter_with_labels_and_timestamp() {
        let snapshot = snapshot_of(&[
            Sample {
                name: "container_cpu_usage_seconds_total",
                help: "Cumulative cpu time consumed in seconds.",
                kind: MetricType::Counter,
                labels: &[("id", "a"), ("zone_name", "hello")],
                value: 2.5,
                timestamp_ms: Some(1000),
            },
            Sample {
                name: "container_cpu_usage_seconds_total",
                help: "Cumulative cpu time consumed in seconds.",
                kind: MetricType::Counter,
                labels: &[("id", "b")],
                value: 5.0,
                timestamp_ms: Some(1000),
            },
        ]);

        let mut out = String::new();
        encode_text(&snapshot, &mut out);
        assert_eq!(
            out,
            "\
# HELP container_cpu_usage_seconds_total Cumulative cpu time consumed in seconds.
# TYPE container_cpu_usage_seconds_total counter
container_cpu_usage_seconds_total{id=\"a\",zone_name=\"hello\"} 2.5 1000
container_cpu_usage_seconds_total{id=\"b\"} 5 1000
"
        );
    }

    #[test]
    fn test_encode_unlabeled_gauge_without_timestamp() {
        let snapshot = snapshot_of(&[Sample {
            name: "up",
            help: "",
            kind: MetricType::Gauge,
            labels: &[],
            value: 1.0,
            timestamp_ms: None,
        }]);

        let mut out = String::new();
        encode_text(&snapshot, &mut out);
        assert_eq!(out, "# TYPE up gauge\nup 1\n");
    }

    #[test]
    fn test_encode_escapes_help_and_label_values() {
        let snapshot = snapshot_of(&[Sample {
            name: "m",
            help: "line one\nback\\slash",
            kind: MetricType::Untyped,
            labels: &[("path", "a\"b\\c\nd")],
            value: 0.0,
            timestamp_ms: None,
        }]);

        let mut out = String::new();
        encode_text(&snapshot, &mut out);
        assert_eq!(
            out,
            "# HELP m line one\\nback\\\\slash\n# TYPE m untyped\nm{path=\"a\\\"b\\\\c\\nd\"} 0\n"
        );
    }

    #[test]
    fn test_status_body_serializes() {
        let body = StatusBody {
            sessions_committed: 3,
            in_flight_readers: 1,
            metric_families: 2,
        };
        let value = serde_json::to_value(&body).expect("serialization failed");
        assert_eq!(value["sessions_committed"], 3);
        assert_eq!(value["in_flight_readers"], 1);
        assert_eq!(value["metric_families"], 2);
    }
}
