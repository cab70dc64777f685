// Process-global request and relay metrics, rendered as Prometheus text.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, OnceLock},
};

use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EndpointMetricKey {
    endpoint: String,
    method: String,
}

#[derive(Default)]
pub struct ServerMetrics {
    request_total: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_duration_sum_ms: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_errors_total: Mutex<HashMap<EndpointMetricKey, u64>>,
    ws_events_total: Mutex<HashMap<String, u64>>,
}

static GLOBAL_METRICS: OnceLock<Arc<ServerMetrics>> = OnceLock::new();

pub fn set_global_metrics(metrics: Arc<ServerMetrics>) {
    let _ = GLOBAL_METRICS.set(metrics);
}

fn global_metrics() -> Option<&'static Arc<ServerMetrics>> {
    GLOBAL_METRICS.get()
}

pub fn record_http_request(method: &str, path: &str, status_code: u16, latency_ms: u64) {
    if let Some(metrics) = global_metrics() {
        metrics.record_http_request(method, path, status_code, latency_ms);
    }
}

pub fn record_ws_event(event: &str) {
    if let Some(metrics) = global_metrics() {
        metrics.record_ws_event(event);
    }
}

impl ServerMetrics {
    pub fn record_http_request(&self, method: &str, path: &str, status_code: u16, latency_ms: u64) {
        let key = EndpointMetricKey {
            endpoint: normalize_endpoint(path),
            method: method.to_ascii_uppercase(),
        };

        increment(&self.request_total, &key, 1);
        increment(&self.request_duration_sum_ms, &key, latency_ms);
        if status_code >= 500 {
            increment(&self.request_errors_total, &key, 1);
        }
    }

    pub fn record_ws_event(&self, event: &str) {
        let mut guard = self.ws_events_total.lock().expect("ws metrics mutex poisoned");
        *guard.entry(event.to_owned()).or_insert(0) += 1;
    }

    /// Render all counters in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut output = String::new();

        render_endpoint_counter(
            &mut output,
            "primal_http_requests_total",
            &self.request_total,
        );
        render_endpoint_counter(
            &mut output,
            "primal_http_request_duration_ms_sum",
            &self.request_duration_sum_ms,
        );
        render_endpoint_counter(
            &mut output,
            "primal_http_request_errors_total",
            &self.request_errors_total,
        );

        output.push_str("# TYPE primal_ws_events_total counter\n");
        let ws_events = self.ws_events_total.lock().expect("ws metrics mutex poisoned");
        let mut events: Vec<_> = ws_events.iter().collect();
        events.sort_by_key(|(event, _)| event.as_str());
        for (event, count) in events {
            output.push_str(&format!("primal_ws_events_total{{event=\"{event}\"}} {count}\n"));
        }

        output
    }
}

fn increment(map: &Mutex<HashMap<EndpointMetricKey, u64>>, key: &EndpointMetricKey, amount: u64) {
    let mut guard = map.lock().expect("http metrics mutex poisoned");
    *guard.entry(key.clone()).or_insert(0) += amount;
}

fn render_endpoint_counter(
    output: &mut String,
    name: &str,
    map: &Mutex<HashMap<EndpointMetricKey, u64>>,
) {
    output.push_str(&format!("# TYPE {name} counter\n"));
    let guard = map.lock().expect("http metrics mutex poisoned");
    let mut entries: Vec<_> = guard.iter().collect();
    entries.sort_by(|(a, _), (b, _)| (&a.endpoint, &a.method).cmp(&(&b.endpoint, &b.method)));
    for (key, value) in entries {
        output.push_str(&format!(
            "{name}{{endpoint=\"{}\",method=\"{}\"}} {value}\n",
            key.endpoint, key.method
        ));
    }
}

/// Collapse id path segments so every stream/user gets the same series.
fn normalize_endpoint(path: &str) -> String {
    path.split('/')
        .map(|segment| if Uuid::parse_str(segment).is_ok() { "{id}" } else { segment })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_endpoint_replaces_uuid_segments() {
        let path = "/api/streams/8c9f6f1e-8a5a-4b5e-9c80-13d9cbd0a1f4/heartbeat";
        assert_eq!(normalize_endpoint(path), "/api/streams/{id}/heartbeat");
        assert_eq!(normalize_endpoint("/api/streams/live"), "/api/streams/live");
    }

    #[test]
    fn http_requests_aggregate_by_normalized_endpoint() {
        let metrics = ServerMetrics::default();
        metrics.record_http_request(
            "post",
            "/api/streams/8c9f6f1e-8a5a-4b5e-9c80-13d9cbd0a1f4/heartbeat",
            200,
            3,
        );
        metrics.record_http_request(
            "POST",
            "/api/streams/0e6f8a9b-1111-4222-8333-444455556666/heartbeat",
            200,
            5,
        );

        let rendered = metrics.render();
        assert!(rendered.contains(
            "primal_http_requests_total{endpoint=\"/api/streams/{id}/heartbeat\",method=\"POST\"} 2"
        ));
        assert!(rendered.contains(
            "primal_http_request_duration_ms_sum{endpoint=\"/api/streams/{id}/heartbeat\",method=\"POST\"} 8"
        ));
    }

    #[test]
    fn only_5xx_responses_count_as_errors() {
        let metrics = ServerMetrics::default();
        metrics.record_http_request("GET", "/api/streams/live", 200, 1);
        metrics.record_http_request("GET", "/api/streams/live", 404, 1);
        metrics.record_http_request("GET", "/api/streams/live", 500, 1);

        let rendered = metrics.render();
        assert!(rendered.contains(
            "primal_http_request_errors_total{endpoint=\"/api/streams/live\",method=\"GET\"} 1"
        ));
    }

    #[test]
    fn ws_events_render_sorted_by_label() {
        let metrics = ServerMetrics::default();
        metrics.record_ws_event("relay");
        metrics.record_ws_event("join");
        metrics.record_ws_event("join");

        let rendered = metrics.render();
        let join_pos = rendered.find("event=\"join\"} 2").expect("join counter should render");
        let relay_pos = rendered.find("event=\"relay\"} 1").expect("relay counter should render");
        assert!(join_pos < relay_pos);
    }
}
