//! Whole-crate scenarios driven over the loopback bus.

#![expect(
    clippy::expect_used,
    reason = "test code uses expect for clarity and assertions"
)]

pub(crate) mod support;

use std::sync::{Arc, Mutex};

use serde_json::json;

use crossbar_bus::loopback::{LoopbackBus, Reply};
use crossbar_bus::{BusError, BusName, BusTransport, ConnectionId, MessageToken, MethodCall};

use crate::lifecycle::{
    Connector, ConnectorEvents, ConnectorSchemas, LifecycleError, Phase, SchemaRole,
};
use crate::registry::MethodHandler;
use crate::settings::Settings;
use support::{connector_on_loopback, name, path, Event, ROOT_DOC, SERVER_DOC, SERVICE};

#[test]
fn full_service_lifecycle_roundtrip() {
    let (connector, bus, events) = connector_on_loopback();
    let connector = Arc::new(connector);
    let service = name(SERVICE);
    let caller = name("peer.client");

    // The whole error taxonomy was registered at initialise time.
    let error_names = bus.registered_error_names(SERVICE);
    assert_eq!(error_names.len(), 15);
    assert!(error_names.contains(&"com.example.svc.UnknownInterface".to_owned()));

    connector.connect(&service).expect("connect succeeds");
    assert!(bus.owns_name(&service));
    assert_eq!(connector.phase().expect("phase"), Phase::Connecting);

    assert!(bus.grant(&service));
    assert_eq!(connector.phase().expect("phase"), Phase::Connected);
    let connection = connector
        .connection()
        .expect("connection")
        .expect("connected");
    assert_eq!(events.snapshot(), [Event::Connected(connection)]);

    // Root object: one interface, always handler index 0.
    let replier = Arc::clone(&connector);
    let root_handler: MethodHandler = Arc::new(move |call: &MethodCall| {
        replier
            .return_response(call.message, json!(["/svc/server/0"]))
            .expect("root reply");
    });
    connector
        .publish_object(connection, &path("/svc"), SchemaRole::Root, 0, root_handler)
        .expect("root publish succeeds");

    // Server subtree: handler per interface, every interface visible.
    let manager_replier = Arc::clone(&connector);
    let manager: MethodHandler = Arc::new(move |call: &MethodCall| {
        manager_replier
            .return_response(call.message, json!("manager"))
            .expect("manager reply");
    });
    let search_replier = Arc::clone(&connector);
    let search: MethodHandler = Arc::new(move |call: &MethodCall| {
        search_replier
            .return_response(call.message, json!({ "results": [call.path.as_str()] }))
            .expect("search reply");
    });
    let subtree_id = connector
        .publish_subtree(
            connection,
            &path("/svc/server"),
            vec![manager, search],
            Arc::new(|_, _, _| true),
        )
        .expect("subtree publish succeeds");

    // A never-enumerated child still routes, to the handler at the Search
    // interface's catalog position.
    let token = bus
        .call(
            &caller,
            &path("/svc/server/3"),
            "com.example.Search",
            "SearchObjects",
            json!(["query"]),
        )
        .expect("subtree call routes");
    let last = bus.replies().pop().expect("one reply");
    assert_eq!(last.message, token);
    assert_eq!(last.reply, Reply::Value(json!({ "results": ["/svc/server/3"] })));
    assert!(!last.dropped);

    // Introspection offers both interfaces on a dynamic child.
    let offered: Vec<String> = bus
        .introspect(&path("/svc/server"), Some("3"))
        .expect("introspection routes")
        .iter()
        .map(|i| i.name.clone())
        .collect();
    assert_eq!(offered, ["com.example.Manager", "com.example.Search"]);
    assert!(bus
        .enumerate(&path("/svc/server"))
        .expect("enumeration routes")
        .is_empty());

    // An interface outside the catalog draws a named error, not a handler.
    bus.call(
        &caller,
        &path("/svc/server/3"),
        "com.example.Bogus",
        "Frobnicate",
        json!([]),
    )
    .expect("call routes to the subtree");
    let last = bus.replies().pop().expect("error reply");
    match last.reply {
        Reply::Error(error) => assert_eq!(error.name, "com.example.svc.UnknownInterface"),
        Reply::Value(value) => panic!("expected an error reply, got {value}"),
    }

    // Root object calls go through handler index 0 regardless of interface.
    bus.call(
        &caller,
        &path("/svc"),
        "com.example.Manager",
        "GetServers",
        json!([]),
    )
    .expect("root call routes");
    let last = bus.replies().pop().expect("root reply");
    assert_eq!(last.reply, Reply::Value(json!(["/svc/server/0"])));

    // Presence: one watch per client, torn down when the client vanishes.
    assert!(connector.watch_client(&caller).expect("watch succeeds"));
    assert!(!connector.watch_client(&caller).expect("re-watch is a no-op"));
    assert_eq!(bus.watch_count(&caller), 1);
    bus.vanish(&caller);
    assert_eq!(
        events.snapshot(),
        [Event::Connected(connection), Event::ClientLost(caller.clone())]
    );
    assert_eq!(bus.watch_count(&caller), 0);
    // The entry is gone, so a fresh watch counts as newly added again.
    assert!(connector.watch_client(&caller).expect("re-watch after loss"));
    connector
        .unwatch_client(&caller)
        .expect("explicit unwatch succeeds");

    // Withdrawn subtrees stop routing.
    connector
        .unpublish_subtree(connection, subtree_id)
        .expect("unpublish succeeds");
    let miss = bus
        .call(
            &name("peer.other"),
            &path("/svc/server/3"),
            "com.example.Search",
            "SearchObjects",
            json!([]),
        )
        .expect_err("no registration covers the path");
    assert!(matches!(miss, BusError::NoSuchObject { .. }));

    // Shutdown releases the name and retires the remaining registration.
    connector.shutdown().expect("shutdown succeeds");
    assert!(!bus.owns_name(&service));
    assert_eq!(bus.registration_count(), 0);
    assert_eq!(connector.phase().expect("phase"), Phase::Shutdown);
    assert!(matches!(
        connector.connect(&service),
        Err(LifecycleError::ShutDown)
    ));
}

#[test]
fn deferred_reply_to_a_vanished_client_is_dropped() {
    let (connector, bus, _events) = connector_on_loopback();
    let connector = Arc::new(connector);
    let service = name(SERVICE);
    let caller = name("peer.client");

    connector.connect(&service).expect("connect succeeds");
    assert!(bus.grant(&service));
    let connection = connector
        .connection()
        .expect("connection")
        .expect("connected");

    // The handler parks the invocation instead of answering inline.
    let parked: Arc<Mutex<Option<MessageToken>>> = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&parked);
    let handler: MethodHandler = Arc::new(move |call: &MethodCall| {
        *sink.lock().expect("parked token lock") = Some(call.message);
    });
    connector
        .publish_subtree(
            connection,
            &path("/svc/server"),
            vec![handler.clone(), handler],
            Arc::new(|_, _, _| true),
        )
        .expect("subtree publish succeeds");

    bus.call(
        &caller,
        &path("/svc/server/0"),
        "com.example.Search",
        "SearchObjects",
        json!([]),
    )
    .expect("call routes");
    let token = parked
        .lock()
        .expect("parked token lock")
        .take()
        .expect("handler saw the call");

    bus.vanish(&caller);
    connector
        .return_response(token, json!([]))
        .expect("late reply is accepted");

    let last = bus.replies().pop().expect("reply recorded");
    assert!(last.dropped);
}

/// Records, from inside the loss callback itself, how many watches the bus
/// still held for the lost name.
struct VanishOrderEvents {
    bus: Arc<LoopbackBus>,
    watches_at_loss: Mutex<Option<usize>>,
}

impl ConnectorEvents for VanishOrderEvents {
    fn connected(&self, _connection: ConnectionId) {}

    fn disconnected(&self, _connection: ConnectionId) {}

    fn client_lost(&self, lost: &BusName) {
        *self.watches_at_loss.lock().expect("order lock") = Some(self.bus.watch_count(lost));
    }
}

#[test]
fn client_loss_is_reported_before_the_watch_is_removed() {
    let bus = Arc::new(LoopbackBus::new());
    let events = Arc::new(VanishOrderEvents {
        bus: Arc::clone(&bus),
        watches_at_loss: Mutex::new(None),
    });
    let connector = Connector::initialize(
        Arc::clone(&bus) as Arc<dyn BusTransport>,
        ConnectorSchemas {
            root: ROOT_DOC,
            server: SERVER_DOC,
        },
        SERVICE,
        &Settings::default(),
        Arc::clone(&events) as Arc<dyn ConnectorEvents>,
    )
    .expect("connector initialises");

    let caller = name("peer.client");
    assert!(connector.watch_client(&caller).expect("watch succeeds"));
    bus.vanish(&caller);

    // The callback observed its own watch still live.
    assert_eq!(*events.watches_at_loss.lock().expect("order lock"), Some(1));
    // Cleanup ran only after the callback returned.
    assert_eq!(bus.watch_count(&caller), 0);
}
