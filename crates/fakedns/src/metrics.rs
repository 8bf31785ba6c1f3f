use axum::{http::StatusCode, routing};
use prometheus::{
    opts, register_histogram_vec, register_int_counter, register_int_counter_vec, HistogramVec,
    IntCounter, IntCounterVec, TextEncoder,
};
use std::net::SocketAddr;

pub const RESPONSE_TIME_BUCKETS: &[f64] = &[
    0.0001, // 0.1 ms
    0.0005, // 0.5 ms
    0.0010, // 1   ms
    0.0025, // 2.5 ms
    0.0050, // 5   ms
    0.0100, // 10  ms
    0.0250, // 25  ms
    0.0500, // 50  ms
    0.1000, // 100 ms
    0.5000, // 500 ms
    1.0000, // 1    s
];

pub static DNS_REQUESTS_TOTAL: std::sync::LazyLock<IntCounterVec> =
    std::sync::LazyLock::new(|| {
        register_int_counter_vec!(
            opts!(
                "dns_requests_total",
                "Total number of DNS requests received, whether valid or invalid."
            ),
            &["protocol"]
        )
        .unwrap()
    });

pub static DNS_QUERIES_TOTAL: std::sync::LazyLock<IntCounterVec> =
    std::sync::LazyLock::new(|| {
        register_int_counter_vec!(
            opts!(
                "dns_queries_total",
                "Total number of DNS questions answered (only the first question of a request is answered)."
            ),
            &["qtype", "qclass", "success"]
        )
        .unwrap()
    });

pub static DNS_RESPONSES_TOTAL: std::sync::LazyLock<IntCounterVec> =
    std::sync::LazyLock::new(|| {
        register_int_counter_vec!(
            opts!("dns_responses_total", "Total number of DNS responses sent."),
            &["rcode"]
        )
        .unwrap()
    });

pub static DNS_RESPONSE_TIME_SECONDS: std::sync::LazyLock<HistogramVec> =
    std::sync::LazyLock::new(|| {
        register_histogram_vec!(
            "dns_response_time_seconds",
            "Response time of DNS requests, whether valid or invalid.",
            &["protocol"],
            RESPONSE_TIME_BUCKETS.to_vec()
        )
        .unwrap()
    });

pub static DYNAMIC_ASSIGNMENTS_TOTAL: std::sync::LazyLock<IntCounter> =
    std::sync::LazyLock::new(|| {
        register_int_counter!(opts!(
            "dynamic_assignments_total",
            "Total number of hostnames given a new random address."
        ))
        .unwrap()
    });

pub static STORE_HIT_TOTAL: std::sync::LazyLock<IntCounter> = std::sync::LazyLock::new(|| {
    register_int_counter!(opts!(
        "store_hit_total",
        "Total number of lookups answered from the mapping store."
    ))
    .unwrap()
});

async fn get_metrics() -> (StatusCode, String) {
    match TextEncoder::new().encode_to_string(&prometheus::gather()) {
        Ok(metrics_str) => (StatusCode::OK, metrics_str),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

pub async fn serve_prometheus_endpoint_task(address: SocketAddr) -> std::io::Result<()> {
    let app = axum::Router::new().route("/metrics", routing::get(get_metrics));
    let listener = tokio::net::TcpListener::bind(address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
