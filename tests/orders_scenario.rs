use std::sync::{Arc, Mutex};
use std::time::Duration;

use membroker::broker::BrokerState;
use membroker::config::Settings;
use membroker::{BrokerError, MemoryBroker, MessageMeta};
use serde_json::json;

#[test]
fn orders_are_consumed_in_order() {
    membroker::utils::logging::init("debug");

    let broker = MemoryBroker::default();
    broker.initialize(["orders"], Vec::<String>::new());

    let received = Arc::new(Mutex::new(Vec::new()));
    let log = received.clone();
    broker
        .add_consumer("orders", 2, move |message: &MessageMeta, manager| {
            log.lock().unwrap().push(message.clone());
            manager.ack();
            Ok(())
        })
        .expect("add consumer");

    let orders: Vec<MessageMeta> = (1..=3)
        .map(|n| MessageMeta::new(json!({ "order": n })))
        .collect();
    broker
        .publish("orders", orders.clone())
        .expect("publish orders");
    broker.start_consuming().expect("start consuming");

    assert_eq!(*received.lock().unwrap(), orders);
    assert_eq!(broker.get_topic_approximate_messages_count("orders"), 0);
    assert!(matches!(
        broker.start_consuming(),
        Err(BrokerError::AlreadyConsuming)
    ));
}

#[test]
fn worker_answers_requests() {
    let mut settings = Settings::default();
    settings.broker.topics = vec!["pricing".to_string()];
    settings.broker.answer_topics = vec!["pricing__answer".to_string()];
    settings.broker.answer_poll_interval_ms = 1;

    let broker = MemoryBroker::from_settings(&settings);
    broker.wait_for_connection().expect("connect");

    let responder = broker.clone();
    broker
        .add_consumer_default("pricing", move |request: &MessageMeta, manager| {
            let quantity = request.payload["quantity"].as_i64().unwrap_or_default();
            let answer = request.create_child(json!({ "total": quantity * 5 }));
            responder.publish_answer("pricing__answer", request.id, answer)?;
            manager.ack();
            Ok(())
        })
        .expect("add consumer");
    broker.start_consuming().expect("start consuming");
    assert_eq!(broker.state(), BrokerState::Consuming);

    let request = MessageMeta::new(json!({ "quantity": 4 }));
    broker
        .publish("pricing", [request.clone()])
        .expect("publish request");

    let answer = broker
        .get_answer("pricing__answer", request.id, Duration::from_millis(100))
        .expect("answer");
    assert_eq!(answer.parent_id, Some(request.id));
    assert_eq!(answer.payload["total"], 20);

    let missing = broker.get_answer("pricing__answer", "unknown", Duration::from_millis(5));
    assert!(matches!(missing, Err(BrokerError::AnswerTimeout { .. })));

    broker.stop_consuming().expect("stop consuming");
    broker.close().expect("close");
}
