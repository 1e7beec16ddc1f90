use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};

lazy_static::lazy_static! {
    pub static ref QUERIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "imsearch_queries_total", "Queries issued", &["method", "status"]
    ).unwrap();
    pub static ref QUERY_DURATION: HistogramVec = register_histogram_vec!(
        "imsearch_query_duration_seconds", "Query duration", &["method"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();
    pub static ref RECORDS_INSERTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "imsearch_records_inserted_total", "Records submitted for insert", &["collection", "status"]
    ).unwrap();
    pub static ref INFERENCE_CALLS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "imsearch_inference_calls_total", "Inference requests", &["model", "status"]
    ).unwrap();
}

pub fn init() {
    lazy_static::initialize(&QUERIES_TOTAL);
    lazy_static::initialize(&QUERY_DURATION);
    lazy_static::initialize(&RECORDS_INSERTED_TOTAL);
    lazy_static::initialize(&INFERENCE_CALLS_TOTAL);
}

pub(crate) fn status(ok: bool) -> &'static str {
    if ok {
        "ok"
    } else {
        "error"
    }
}

/// Default registry in the Prometheus text exposition format.
pub fn render() -> String {
    let mut buf = Vec::new();
    if TextEncoder::new().encode(&prometheus::gather(), &mut buf).is_err() {
        return String::new();
    }
    String::from_utf8(buf).unwrap_or_default()
}
