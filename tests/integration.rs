//! Integration tests for the message bus.

use crossbeam_channel::{unbounded, Receiver};
use pushbus::{
    BusConfig, Continuation, LocalSubscriber, Message, MessageBus, MessageResult, Offset,
    StopReason, Subscriber,
};
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

/// Subscribe and forward every delivered `(key, value)` pair to a channel.
fn subscribe_collecting(
    bus: &MessageBus,
    subscriber: Arc<dyn Subscriber>,
    cursor: Option<&str>,
    max_messages: usize,
) -> (pushbus::SubscriptionHandle, Receiver<(String, String)>) {
    let (tx, rx) = unbounded();
    let handle = bus
        .subscribe(
            subscriber,
            cursor,
            move |result: MessageResult| {
                for m in result.messages() {
                    let _ = tx.send((m.key.clone(), m.value.clone()));
                }
                Continuation::from(!result.terminal)
            },
            max_messages,
        )
        .unwrap();
    (handle, rx)
}

fn take(rx: &Receiver<(String, String)>, n: usize) -> Vec<(String, String)> {
    (0..n)
        .map(|_| rx.recv_timeout(TIMEOUT).expect("timed out waiting for delivery"))
        .collect()
}

fn values(pairs: &[(String, String)]) -> Vec<&str> {
    pairs.iter().map(|(_, v)| v.as_str()).collect()
}

fn assert_quiet(rx: &Receiver<(String, String)>) {
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
}

// --- Cursor Semantics ---

#[test]
fn test_live_subscription_skips_history() {
    let bus = MessageBus::new();
    let subscriber = Arc::new(LocalSubscriber::with_keys(["key"]));

    bus.publish("test", "key", "1");

    let (handle, rx) = subscribe_collecting(&bus, subscriber, None, 10);
    bus.publish("test", "key", "value");

    let got = take(&rx, 1);
    assert_eq!(got, vec![("key".to_string(), "value".to_string())]);
    assert_quiet(&rx);

    handle.dispose();
}

#[test]
fn test_subscription_with_existing_cursor() {
    let bus = MessageBus::new();
    let subscriber = Arc::new(LocalSubscriber::with_keys(["key"]));

    for v in ["1", "2", "3", "4"] {
        bus.publish("test", "key", v);
    }

    let (_handle, rx) = subscribe_collecting(&bus, subscriber, Some("key,00000001"), 10);
    let replayed = take(&rx, 3);
    assert_eq!(values(&replayed), vec!["2", "3", "4"]);

    bus.publish("test", "key", "5");
    let live = take(&rx, 1);
    assert_eq!(values(&live), vec!["5"]);
    assert_quiet(&rx);
}

#[test]
fn test_subscription_with_multiple_existing_cursors() {
    let bus = MessageBus::new();
    let subscriber = Arc::new(LocalSubscriber::with_keys(["key", "key2"]));

    for v in ["1", "2", "3", "4"] {
        bus.publish("test", "key", v);
    }
    bus.publish("test", "key2", "1");
    bus.publish("test", "key2", "2");

    let (_handle, rx) =
        subscribe_collecting(&bus, subscriber, Some("key,00000001|key2,00000000"), 10);

    bus.publish("test", "key", "5");
    bus.publish("test", "key2", "10");

    let got = take(&rx, 7);
    let on = |key: &str| -> Vec<&str> {
        got.iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    };
    assert_eq!(on("key"), vec!["2", "3", "4", "5"]);
    assert_eq!(on("key2"), vec!["1", "2", "10"]);
    assert_quiet(&rx);
}

#[test]
fn test_cursor_keys_not_bound_are_ignored() {
    let bus = MessageBus::new();
    bus.publish("test", "other", "x");
    let subscriber = Arc::new(LocalSubscriber::with_keys(["key"]));

    let (handle, rx) =
        subscribe_collecting(&bus, subscriber, Some("other,00000000"), 10);
    assert_eq!(handle.keys(), vec!["key"]);

    bus.publish("test", "key", "1");
    assert_eq!(values(&take(&rx, 1)), vec!["1"]);
    assert_quiet(&rx);
}

#[test]
fn test_resume_after_reconnect_has_no_gaps_or_duplicates() {
    let bus = MessageBus::new();
    let subscriber: Arc<dyn Subscriber> = Arc::new(LocalSubscriber::with_keys(["key"]));

    let (handle, rx) = subscribe_collecting(&bus, Arc::clone(&subscriber), None, 10);
    for i in 0..5 {
        bus.publish("test", "key", i.to_string());
    }
    assert_eq!(values(&take(&rx, 5)), vec!["0", "1", "2", "3", "4"]);

    let cursor = handle.cursor();
    assert_eq!(cursor, "key,00000005");
    handle.dispose();

    // Published while disconnected
    for i in 5..8 {
        bus.publish("test", "key", i.to_string());
    }

    let (_handle, rx) = subscribe_collecting(&bus, subscriber, Some(&cursor), 10);
    bus.publish("test", "key", "8");
    assert_eq!(values(&take(&rx, 4)), vec!["5", "6", "7", "8"]);
    assert_quiet(&rx);
}

#[test]
fn test_evicted_cursor_resumes_from_oldest() {
    let bus = MessageBus::with_config(BusConfig {
        key_log_capacity: 3,
        ..Default::default()
    });
    for i in 0..10 {
        bus.publish("test", "key", i.to_string());
    }

    let subscriber = Arc::new(LocalSubscriber::with_keys(["key"]));
    let (handle, rx) = subscribe_collecting(&bus, subscriber, Some("key,00000000"), 10);

    assert_eq!(values(&take(&rx, 3)), vec!["7", "8", "9"]);
    assert_quiet(&rx);
    assert_eq!(handle.cursor(), "key,0000000a");
}

// --- Dynamic Keys ---

#[test]
fn test_adding_event_and_sending_messages() {
    let bus = MessageBus::new();
    let subscriber = Arc::new(LocalSubscriber::with_keys(["a"]));
    let (_handle, rx) = subscribe_collecting(&bus, subscriber.clone(), None, 10);

    let max = 100;
    for i in 0..max {
        subscriber.add_event("b");
        bus.publish("test", "b", i.to_string());
    }

    let got: Vec<i32> = take(&rx, max)
        .into_iter()
        .map(|(_, v)| v.parse().unwrap())
        .collect();
    assert_eq!(got, (0..max as i32).collect::<Vec<_>>());
    assert_quiet(&rx);
}

#[test]
fn test_added_key_with_offset_replays() {
    let bus = MessageBus::new();
    for v in ["x", "y", "z"] {
        bus.publish("test", "late", v);
    }

    let subscriber = Arc::new(LocalSubscriber::with_keys(["a"]));
    let (handle, rx) = subscribe_collecting(&bus, subscriber.clone(), None, 10);

    subscriber.add_event_at("late", Offset(1));
    assert_eq!(values(&take(&rx, 2)), vec!["y", "z"]);
    assert_eq!(handle.keys(), vec!["a", "late"]);
}

#[test]
fn test_removing_event_stops_delivery() {
    let bus = MessageBus::new();
    let subscriber = Arc::new(LocalSubscriber::with_keys(["a", "b"]));
    let (handle, rx) = subscribe_collecting(&bus, subscriber.clone(), None, 10);

    bus.publish("test", "b", "before");
    assert_eq!(values(&take(&rx, 1)), vec!["before"]);

    subscriber.remove_event("b");
    assert_eq!(handle.keys(), vec!["a"]);

    bus.publish("test", "b", "after");
    bus.publish("test", "a", "still");
    let got = take(&rx, 1);
    assert_eq!(got, vec![("a".to_string(), "still".to_string())]);
    assert_quiet(&rx);
}

#[test]
fn test_key_churn_leaves_readded_key_live() {
    let bus = MessageBus::new();
    let subscriber = Arc::new(LocalSubscriber::with_keys(["a"]));
    let (handle, rx) = subscribe_collecting(&bus, subscriber.clone(), None, 10);

    let churn: Vec<_> = (0..2)
        .map(|_| {
            let subscriber = Arc::clone(&subscriber);
            std::thread::spawn(move || {
                for _ in 0..1_000 {
                    subscriber.remove_event("b");
                    subscriber.add_event("b");
                }
            })
        })
        .collect();
    for t in churn {
        t.join().unwrap();
    }

    subscriber.add_event("b");
    assert_eq!(handle.keys(), vec!["a", "b"]);

    bus.publish("test", "b", "final");
    assert_eq!(values(&take(&rx, 1)), vec!["final"]);
    assert_quiet(&rx);
}

#[test]
fn test_key_removed_while_subscribing_is_not_bound() {
    let bus = MessageBus::new();

    for _ in 0..200 {
        let subscriber = Arc::new(LocalSubscriber::with_keys(["x", "y"]));
        let barrier = Arc::new(std::sync::Barrier::new(2));

        let remover = {
            let subscriber = Arc::clone(&subscriber);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                subscriber.remove_event("x");
            })
        };

        barrier.wait();
        let (handle, _rx) = subscribe_collecting(&bus, subscriber.clone(), None, 10);
        remover.join().unwrap();

        assert_eq!(subscriber.event_keys(), vec!["y"]);
        assert_eq!(handle.keys(), vec!["y"]);
    }
}

// --- Batching ---

#[test]
fn test_batches_respect_max_messages() {
    let bus = MessageBus::new();
    let subscriber = Arc::new(LocalSubscriber::with_keys(["key"]));
    for i in 0..25 {
        bus.publish("test", "key", i.to_string());
    }

    let (tx, rx) = unbounded();
    let _handle = bus
        .subscribe(
            subscriber,
            Some("key,00000000"),
            move |result: MessageResult| {
                let values: Vec<String> = result.messages().map(|m| m.value.clone()).collect();
                tx.send(values).unwrap();
                Continuation::proceed()
            },
            4,
        )
        .unwrap();

    let mut all = Vec::new();
    while all.len() < 25 {
        let batch = rx.recv_timeout(TIMEOUT).unwrap();
        assert!(!batch.is_empty());
        assert!(batch.len() <= 4);
        all.extend(batch);
    }
    let expected: Vec<String> = (0..25).map(|i| i.to_string()).collect();
    assert_eq!(all, expected);
}

#[test]
fn test_one_key_cannot_starve_another() {
    let bus = MessageBus::new();
    for i in 0..50 {
        bus.publish("test", "busy", i.to_string());
    }
    bus.publish("test", "quiet", "hello");

    let subscriber = Arc::new(LocalSubscriber::with_keys(["busy", "quiet"]));
    let (tx, rx) = unbounded();
    let _handle = bus
        .subscribe(
            subscriber,
            Some("busy,00000000|quiet,00000000"),
            move |result: MessageResult| {
                let keys: Vec<String> = result.messages().map(|m| m.key.clone()).collect();
                tx.send(keys).unwrap();
                Continuation::proceed()
            },
            5,
        )
        .unwrap();

    // "quiet" shows up within the first two batches
    let first = rx.recv_timeout(TIMEOUT).unwrap();
    let second = rx.recv_timeout(TIMEOUT).unwrap();
    assert!(first
        .iter()
        .chain(second.iter())
        .any(|k| k == "quiet"));
}

// --- Callback Control ---

#[test]
fn test_stop_delivers_terminal_result() {
    let bus = MessageBus::new();
    let subscriber = Arc::new(LocalSubscriber::with_keys(["key"]));
    let (tx, rx) = unbounded();

    let handle = bus
        .subscribe(
            subscriber,
            None,
            move |result: MessageResult| {
                tx.send(result).unwrap();
                Continuation::stop()
            },
            10,
        )
        .unwrap();

    bus.publish("test", "key", "1");
    let first = rx.recv_timeout(TIMEOUT).unwrap();
    assert!(!first.terminal);
    assert_eq!(first.len(), 1);

    let last = rx.recv_timeout(TIMEOUT).unwrap();
    assert!(last.terminal);
    assert!(last.is_empty());

    bus.publish("test", "key", "2");
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

    // The worker releases the subscription shortly after the terminal call
    let deadline = std::time::Instant::now() + TIMEOUT;
    while handle.is_active() && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(!handle.is_active());
    assert_eq!(handle.stop_reason(), Some(StopReason::Stopped));
    assert_eq!(bus.subscription_count(), 0);
}

#[test]
fn test_deferred_continuation_from_another_thread() {
    let bus = MessageBus::new();
    let subscriber = Arc::new(LocalSubscriber::with_keys(["key"]));
    let (tx, rx) = unbounded();

    let _handle = bus
        .subscribe(
            subscriber,
            None,
            move |result: MessageResult| {
                let (continuation, resume) = Continuation::deferred();
                let tx = tx.clone();
                std::thread::spawn(move || {
                    for m in result.messages() {
                        tx.send(m.value.clone()).unwrap();
                    }
                    resume.resume(true);
                });
                continuation
            },
            2,
        )
        .unwrap();

    for i in 0..10 {
        bus.publish("test", "key", i.to_string());
    }

    let got: Vec<String> = (0..10).map(|_| rx.recv_timeout(TIMEOUT).unwrap()).collect();
    let expected: Vec<String> = (0..10).map(|i| i.to_string()).collect();
    assert_eq!(got, expected);
}

// --- Messages ---

#[test]
fn test_commands_are_delivered_intact() {
    let bus = MessageBus::new();
    let subscriber = Arc::new(LocalSubscriber::with_keys(["ops"]));
    let (tx, rx) = unbounded();

    let _handle = bus
        .subscribe(
            subscriber,
            None,
            move |result: MessageResult| {
                for m in result.messages() {
                    tx.send(m.clone()).unwrap();
                }
                Continuation::proceed()
            },
            10,
        )
        .unwrap();

    bus.publish_message(Message::command("server", "ops", "disconnect", "cmd-7"));
    bus.publish_message(Message::ack("client", "ops", "cmd-7"));

    let command = rx.recv_timeout(TIMEOUT).unwrap();
    assert!(command.is_command());
    assert_eq!(command.command_id.as_deref(), Some("cmd-7"));
    assert_eq!(command.source, "server");

    let ack = rx.recv_timeout(TIMEOUT).unwrap();
    assert!(ack.is_ack);
}

#[test]
fn test_message_result_encodes_for_transport() {
    let bus = MessageBus::new();
    let subscriber = Arc::new(LocalSubscriber::with_keys(["key"]));
    let (tx, rx) = unbounded();

    let _handle = bus
        .subscribe(
            subscriber,
            None,
            move |result: MessageResult| {
                tx.send(serde_json::to_value(&result).unwrap()).unwrap();
                Continuation::proceed()
            },
            10,
        )
        .unwrap();

    bus.publish("test", "key", "hello");
    let json = rx.recv_timeout(TIMEOUT).unwrap();

    assert_eq!(json["terminal"], false);
    assert_eq!(json["cursor"], "key,00000001");
    assert_eq!(json["segments"][0]["key"], "key");
    assert_eq!(json["segments"][0]["offset"], 0);
    assert_eq!(json["segments"][0]["messages"][0]["value"], "hello");
}
