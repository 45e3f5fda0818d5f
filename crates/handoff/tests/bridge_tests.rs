//! Tests for the cross-isolate promise bridge: fast paths, waiter queues,
//! settlement delivery, and abandonment.

use handoff::{
    ABANDONED_MESSAGE, ErrorKind, HeapData, HeapId, Isolate, PromiseSettlement, TransferError, TransferMode,
    TransferOptions, Transferable, Value, transfer_out,
};

/// Helper: unwraps a heap reference, panicking on immediates.
fn expect_ref(value: Value) -> HeapId {
    match value {
        Value::Ref(id) => id,
        other => panic!("expected a heap reference, got {other:?}"),
    }
}

/// Helper: options that bridge the value as a pending result.
fn promise_options() -> TransferOptions {
    TransferOptions {
        promise: true,
        ..TransferOptions::default()
    }
}

/// Helper: reads the error object a rejected deferred settled with.
fn rejection_error(isolate: &Isolate, deferred: HeapId) -> (ErrorKind, String) {
    assert_eq!(isolate.promise_state(deferred), PromiseSettlement::Rejected);
    let id = expect_ref(isolate.promise_result(deferred).unwrap());
    match isolate.heap().get(id) {
        HeapData::Error(error) => (error.kind, error.message.clone()),
        other => panic!("expected an error object, got {other:?}"),
    }
}

#[test]
fn already_settled_promise_resolves_without_scheduling() {
    let mut origin = Isolate::new();
    let promise = origin.create_promise();
    origin.resolve_promise(promise, Value::Int(7));

    // Attaching to a settled promise registers no continuation.
    let bridged = transfer_out(&mut origin, &Value::Ref(promise), &promise_options()).unwrap();

    let mut destination = Isolate::new();
    let deferred = expect_ref(bridged.transfer_in(&mut destination).unwrap());
    assert_eq!(destination.promise_state(deferred), PromiseSettlement::Fulfilled);
    assert_eq!(destination.promise_result(deferred), Some(Value::Int(7)));
    assert_eq!(destination.queued_tasks(), 0);
}

#[test]
fn non_promise_value_bridges_as_an_immediately_settled_result() {
    let mut origin = Isolate::new();
    let bridged = transfer_out(&mut origin, &Value::Int(9), &promise_options()).unwrap();
    assert!(matches!(bridged, Transferable::PendingPromise(_)));

    let mut destination = Isolate::new();
    let deferred = expect_ref(bridged.transfer_in(&mut destination).unwrap());
    assert_eq!(destination.promise_state(deferred), PromiseSettlement::Fulfilled);
    assert_eq!(destination.promise_result(deferred), Some(Value::Int(9)));
    assert_eq!(destination.queued_tasks(), 0);
}

#[test]
fn settlement_schedules_exactly_one_task_per_waiter() {
    let mut origin = Isolate::new();
    let promise = origin.create_promise();
    let bridged = transfer_out(&mut origin, &Value::Ref(promise), &promise_options()).unwrap();

    let mut destinations: Vec<Isolate> = (0..3).map(|_| Isolate::new()).collect();
    let deferreds: Vec<HeapId> = destinations
        .iter_mut()
        .map(|destination| expect_ref(bridged.transfer_in(destination).unwrap()))
        .collect();

    // Registering waiters schedules nothing until settlement.
    for destination in &destinations {
        assert_eq!(destination.queued_tasks(), 0);
    }

    origin.resolve_promise(promise, Value::Int(5));
    for destination in &destinations {
        assert_eq!(destination.queued_tasks(), 1);
    }

    for (destination, deferred) in destinations.iter_mut().zip(&deferreds) {
        assert_eq!(destination.drain().unwrap(), 1);
        assert_eq!(destination.promise_state(*deferred), PromiseSettlement::Fulfilled);
        assert_eq!(destination.promise_result(*deferred), Some(Value::Int(5)));
    }
}

#[test]
fn late_joiner_bypasses_the_queue() {
    let mut origin = Isolate::new();
    let promise = origin.create_promise();
    let bridged = transfer_out(&mut origin, &Value::Ref(promise), &promise_options()).unwrap();
    origin.resolve_promise(promise, Value::str("done"));

    let mut late = Isolate::new();
    let deferred = expect_ref(bridged.transfer_in(&mut late).unwrap());
    assert_eq!(late.queued_tasks(), 0);
    assert_eq!(late.promise_state(deferred), PromiseSettlement::Fulfilled);
    assert_eq!(late.promise_result(deferred), Some(Value::str("done")));
}

#[test]
fn rejection_outcome_reaches_every_waiter() {
    let mut origin = Isolate::new();
    let promise = origin.create_promise();
    let bridged = transfer_out(&mut origin, &Value::Ref(promise), &promise_options()).unwrap();

    let mut destination = Isolate::new();
    let deferred = expect_ref(bridged.transfer_in(&mut destination).unwrap());

    let reason = origin.alloc(HeapData::Error(handoff::ErrorValue::new(ErrorKind::TypeError, "kaboom")));
    origin.reject_promise(promise, reason);

    destination.drain().unwrap();
    let (kind, message) = rejection_error(&destination, deferred);
    assert_eq!(kind, ErrorKind::TypeError);
    assert_eq!(message, "kaboom");
}

#[test]
fn first_settlement_wins_over_later_abandonment() {
    let mut origin = Isolate::new();
    let promise = origin.create_promise();
    let bridged = transfer_out(&mut origin, &Value::Ref(promise), &promise_options()).unwrap();

    let mut destination = Isolate::new();
    let deferred = expect_ref(bridged.transfer_in(&mut destination).unwrap());

    origin.resolve_promise(promise, Value::Int(3));
    drop(origin);

    // The real settlement already drained the queue; teardown adds nothing.
    assert_eq!(destination.queued_tasks(), 1);
    destination.drain().unwrap();
    assert_eq!(destination.promise_result(deferred), Some(Value::Int(3)));

    // A joiner arriving after teardown still observes the first outcome.
    let mut late = Isolate::new();
    let late_deferred = expect_ref(bridged.transfer_in(&mut late).unwrap());
    assert_eq!(late.promise_result(late_deferred), Some(Value::Int(3)));
}

#[test]
fn abandonment_rejects_all_waiters_with_the_exact_message() {
    let mut origin = Isolate::new();
    let promise = origin.create_promise();
    let bridged = transfer_out(&mut origin, &Value::Ref(promise), &promise_options()).unwrap();

    let mut first = Isolate::new();
    let mut second = Isolate::new();
    let first_deferred = expect_ref(bridged.transfer_in(&mut first).unwrap());
    let second_deferred = expect_ref(bridged.transfer_in(&mut second).unwrap());

    // Tearing down the origin drops the pending promise's reactions, and with them
    // the bridge holder; the holder's teardown is the abandonment path.
    drop(origin);

    for (destination, deferred) in [(&mut first, first_deferred), (&mut second, second_deferred)] {
        assert_eq!(destination.queued_tasks(), 1);
        destination.drain().unwrap();
        let (kind, message) = rejection_error(destination, deferred);
        assert_eq!(kind, ErrorKind::Error);
        assert_eq!(message, "Promise was abandoned");
        assert_eq!(message, ABANDONED_MESSAGE);
    }
}

#[test]
fn settled_payload_is_never_rebridged() {
    let mut origin = Isolate::new();
    let promise = origin.create_promise();
    let bridged = transfer_out(&mut origin, &Value::Ref(promise), &promise_options()).unwrap();

    let mut destination = Isolate::new();
    let deferred = expect_ref(bridged.transfer_in(&mut destination).unwrap());

    // Resolve with a payload that is itself a pending promise. The payload dispatch
    // runs with the promise flag forced off, so it is not wrapped in a second bridge;
    // with no fallback configured it cannot be classified and the settlement is
    // delivered as a rejection instead.
    let inner = origin.create_promise();
    origin.resolve_promise(promise, Value::Ref(inner));

    destination.drain().unwrap();
    let (kind, message) = rejection_error(&destination, deferred);
    assert_eq!(kind, ErrorKind::TypeError);
    assert_eq!(message, "A non-transferable value was passed (type promise)");
}

#[test]
fn bridge_options_apply_to_the_settled_payload() {
    let mut origin = Isolate::new();
    let promise = origin.create_promise();
    let options = TransferOptions {
        promise: true,
        fallback: TransferMode::Reference,
        ..TransferOptions::default()
    };
    let bridged = transfer_out(&mut origin, &Value::Ref(promise), &options).unwrap();

    let mut destination = Isolate::new();
    let deferred = expect_ref(bridged.transfer_in(&mut destination).unwrap());

    // A list payload is not copyable under auto mode, so the configured fallback
    // turns it into a back-reference by the time it reaches the waiter.
    let payload = origin.alloc(HeapData::List(vec![Value::Int(1)]));
    origin.resolve_promise(promise, payload);

    destination.drain().unwrap();
    assert_eq!(destination.promise_state(deferred), PromiseSettlement::Fulfilled);
    let proxy = expect_ref(destination.promise_result(deferred).unwrap());
    match destination.heap().get(proxy) {
        HeapData::ProxyHandle(reference) => assert_eq!(reference.origin_id(), origin.id()),
        other => panic!("expected a reference proxy, got {other:?}"),
    }
}

#[test]
fn materialization_failure_rejects_the_deferred_and_surfaces_from_pump() {
    let mut origin = Isolate::new();
    let promise = origin.create_promise();
    let options = TransferOptions {
        promise: true,
        fallback: TransferMode::Reference,
        ..TransferOptions::default()
    };
    let bridged = transfer_out(&mut origin, &Value::Ref(promise), &options).unwrap();

    let mut destination = Isolate::new();
    let deferred = expect_ref(bridged.transfer_in(&mut destination).unwrap());

    // The outcome is a back-reference into the origin; destroying the origin after
    // settlement (but before the waiter pumps) makes materialization fail.
    let payload = origin.alloc(HeapData::List(vec![Value::Int(1)]));
    origin.resolve_promise(promise, payload);
    drop(origin);

    let error = destination.pump().unwrap_err();
    assert!(matches!(error, TransferError::IsolateDestroyed { .. }));
    assert_eq!(destination.promise_state(deferred), PromiseSettlement::Rejected);
}

#[test]
fn bridge_settles_across_threads() {
    use std::sync::mpsc;
    use std::thread;
    use std::time::{Duration, Instant};

    let mut destination = Isolate::new();
    let (transfer_tx, transfer_rx) = mpsc::channel::<Transferable>();
    let (waiter_tx, waiter_rx) = mpsc::channel::<()>();

    let worker = thread::spawn(move || {
        let mut origin = Isolate::new();
        let promise = origin.create_promise();
        let bridged = transfer_out(&mut origin, &Value::Ref(promise), &promise_options()).unwrap();
        transfer_tx.send(bridged).unwrap();

        // Settle only after the destination registered as a waiter.
        waiter_rx.recv().unwrap();
        origin.resolve_promise(promise, Value::Int(42));
    });

    let bridged = transfer_rx.recv().unwrap();
    let deferred = expect_ref(bridged.transfer_in(&mut destination).unwrap());
    assert_eq!(destination.promise_state(deferred), PromiseSettlement::Pending);
    waiter_tx.send(()).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while destination.promise_state(deferred) == PromiseSettlement::Pending {
        destination.drain().unwrap();
        assert!(Instant::now() < deadline, "bridge settlement never arrived");
        thread::sleep(Duration::from_millis(1));
    }

    worker.join().unwrap();
    assert_eq!(destination.promise_result(deferred), Some(Value::Int(42)));
}
