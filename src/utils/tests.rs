use std::error::Error;
use std::time::Duration;

use super::error::BrokerError;
use super::logging;
use crate::broker::message::DeliveryId;

#[test]
fn logging_init_accepts_levels() {
    // Should not panic
    logging::init("info");
    logging::init("debug");
    logging::init("warn");
}

#[test]
fn parse_level_falls_back_to_info() {
    assert_eq!(logging::parse_level("WARNING"), tracing::Level::WARN);
    assert_eq!(logging::parse_level(" trace "), tracing::Level::TRACE);
    assert_eq!(logging::parse_level("verbose"), tracing::Level::INFO);
}

#[test]
fn answer_timeout_message_names_topic_and_id() {
    let err = BrokerError::AnswerTimeout {
        topic: "replies.42".to_string(),
        answer_id: "42".to_string(),
        max_delay: Duration::from_millis(5),
    };
    let text = err.to_string();
    assert!(text.contains("replies.42"));
    assert!(text.contains("42"));
}

#[test]
fn handler_error_keeps_source() {
    let err = BrokerError::Handler {
        topic: "orders".to_string(),
        delivery_id: DeliveryId::from(3),
        source: "boom".into(),
    };
    assert_eq!(err.source().map(|s| s.to_string()), Some("boom".to_string()));
    assert!(err.to_string().contains("delivery 3"));
}
