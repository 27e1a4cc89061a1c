//! Prometheus metrics for message bus

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec,
};

lazy_static! {
    /// Total messages published
    pub static ref MESSAGE_PUBLISH_TOTAL: IntCounterVec = register_int_counter_vec!(
        "message_bus_publish_total",
        "Total messages published",
        &["message_type", "status"]
    )
    .unwrap();

    /// Message publish duration
    pub static ref MESSAGE_PUBLISH_DURATION: HistogramVec = register_histogram_vec!(
        "message_bus_publish_duration_seconds",
        "Message publish duration in seconds",
        &["message_type"]
    )
    .unwrap();

    /// Total messages received
    pub static ref MESSAGE_RECEIVE_TOTAL: IntCounterVec = register_int_counter_vec!(
        "message_bus_receive_total",
        "Total messages received",
        &["message_type", "status"]
    )
    .unwrap();

    /// Message processing duration
    pub static ref MESSAGE_PROCESS_DURATION: HistogramVec = register_histogram_vec!(
        "message_bus_process_duration_seconds",
        "Message processing duration in seconds",
        &["message_type"]
    )
    .unwrap();

    /// Redeliveries after a handler error
    pub static ref MESSAGE_REDELIVERY_TOTAL: IntCounterVec = register_int_counter_vec!(
        "message_bus_redelivery_total",
        "Messages redelivered after a handler error",
        &["message_type"]
    )
    .unwrap();

    /// Messages routed to the dead-letter queue
    pub static ref DLQ_ROUTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "message_bus_dlq_routed_total",
        "Messages routed to the dead-letter queue",
        &["message_type", "reprocessable"]
    )
    .unwrap();
}
