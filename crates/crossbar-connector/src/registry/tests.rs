//! Registry behaviour against the in-memory loopback bus.

#![expect(
    clippy::expect_used,
    reason = "test code uses expect for clarity and assertions"
)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use rstest::{fixture, rstest};
use serde_json::json;

use crossbar_bus::loopback::LoopbackBus;
use crossbar_bus::{
    BusError, BusName, BusTransport, ConnectionId, MethodCall, MockBusTransport, ObjectPath,
    RegistrationId,
};
use crossbar_schema::{InterfaceCatalog, NodeDocument};

use super::{InterfaceFilter, MethodHandler, ObjectRegistry, RegistryError};
use crate::errors::ErrorDomain;

const SERVER_DOC: &str = r#"{
    "interfaces": [
        {"name": "com.example.Manager", "methods": [{"name": "ListServers"}]},
        {"name": "com.example.Search", "methods": [{"name": "SearchObjects"}]}
    ]
}"#;

#[fixture]
fn bus() -> Arc<LoopbackBus> {
    Arc::new(LoopbackBus::new())
}

#[fixture]
fn catalog() -> Arc<InterfaceCatalog> {
    let document = NodeDocument::parse(SERVER_DOC).expect("fixture document parses");
    Arc::new(InterfaceCatalog::from_document(document))
}

#[fixture]
fn domain() -> ErrorDomain {
    ErrorDomain::new("com.example.svc").expect("fixture domain is valid")
}

fn transport(bus: &Arc<LoopbackBus>) -> Arc<dyn BusTransport> {
    Arc::clone(bus) as Arc<dyn BusTransport>
}

fn recording() -> (MethodHandler, Arc<Mutex<Vec<String>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let handler: MethodHandler = Arc::new(move |call: &MethodCall| {
        sink.lock()
            .expect("call log lock")
            .push(format!("{}.{}", call.interface, call.method));
    });
    (handler, log)
}

fn admit_all() -> InterfaceFilter {
    Arc::new(|_path, _node, _interface| true)
}

fn path(raw: &str) -> ObjectPath {
    ObjectPath::new(raw).expect("test path is valid")
}

fn sender() -> BusName {
    BusName::new("peer.client").expect("test name is valid")
}

#[rstest]
fn publish_object_routes_calls_to_the_handler(bus: Arc<LoopbackBus>, catalog: Arc<InterfaceCatalog>) {
    let transport = transport(&bus);
    let mut registry = ObjectRegistry::new();
    let (handler, log) = recording();

    let id = registry
        .publish_object(&transport, bus.connection(), &path("/svc"), &catalog, 0, handler)
        .expect("publish succeeds");

    assert!(registry.contains(id));
    assert!(bus.has_registration(id));

    bus.call(&sender(), &path("/svc"), "com.example.Manager", "ListServers", json!([]))
        .expect("call routes");
    assert_eq!(
        log.lock().expect("call log lock").as_slice(),
        ["com.example.Manager.ListServers"]
    );
}

#[rstest]
fn publish_object_rejects_out_of_range_index(bus: Arc<LoopbackBus>, catalog: Arc<InterfaceCatalog>) {
    let transport = transport(&bus);
    let mut registry = ObjectRegistry::new();
    let (handler, _log) = recording();

    let error = registry
        .publish_object(&transport, bus.connection(), &path("/svc"), &catalog, 2, handler)
        .expect_err("index 2 is out of range");

    assert!(matches!(error, RegistryError::BadIndex { index: 2, len: 2 }));
    // The transport was never asked to register anything.
    assert_eq!(bus.registration_count(), 0);
    assert!(registry.is_empty());
}

#[rstest]
fn publish_object_surfaces_path_collisions(bus: Arc<LoopbackBus>, catalog: Arc<InterfaceCatalog>) {
    let transport = transport(&bus);
    let mut registry = ObjectRegistry::new();
    let (first, _log_a) = recording();
    let (second, _log_b) = recording();

    registry
        .publish_object(&transport, bus.connection(), &path("/svc"), &catalog, 0, first)
        .expect("first publish succeeds");
    let error = registry
        .publish_object(&transport, bus.connection(), &path("/svc"), &catalog, 0, second)
        .expect_err("second publish collides");

    assert!(matches!(
        error,
        RegistryError::Transport(BusError::PathInUse { .. })
    ));
    assert_eq!(registry.len(), 1);
}

#[rstest]
fn publish_subtree_rejects_an_empty_table(
    bus: Arc<LoopbackBus>,
    catalog: Arc<InterfaceCatalog>,
    domain: ErrorDomain,
) {
    let transport = transport(&bus);
    let mut registry = ObjectRegistry::new();

    let error = registry
        .publish_subtree(
            &transport,
            bus.connection(),
            &path("/svc"),
            &catalog,
            &domain,
            Vec::new(),
            admit_all(),
        )
        .expect_err("empty table is rejected");

    assert!(matches!(error, RegistryError::EmptyDispatchTable));
    assert_eq!(bus.registration_count(), 0);
}

#[rstest]
fn unpublish_object_requires_a_known_id(bus: Arc<LoopbackBus>) {
    let transport = transport(&bus);
    let mut registry = ObjectRegistry::new();
    let id = RegistrationId::from_raw(7).expect("nonzero id");

    let error = registry
        .unpublish_object(&transport, bus.connection(), id)
        .expect_err("unknown id is rejected");

    assert!(matches!(error, RegistryError::NotFound { .. }));
}

#[rstest]
fn unpublish_object_refuses_a_subtree_id(
    bus: Arc<LoopbackBus>,
    catalog: Arc<InterfaceCatalog>,
    domain: ErrorDomain,
) {
    let transport = transport(&bus);
    let mut registry = ObjectRegistry::new();
    let (handler, _log) = recording();

    let id = registry
        .publish_subtree(
            &transport,
            bus.connection(),
            &path("/svc"),
            &catalog,
            &domain,
            vec![handler],
            admit_all(),
        )
        .expect("subtree publish succeeds");

    let error = registry
        .unpublish_object(&transport, bus.connection(), id)
        .expect_err("kind mismatch is rejected");

    assert!(matches!(
        error,
        RegistryError::KindMismatch {
            expected: "object",
            ..
        }
    ));
    // The registration survives the failed withdrawal.
    assert!(registry.contains(id));
    assert!(bus.has_registration(id));
}

#[rstest]
fn unpublish_removes_exactly_once(bus: Arc<LoopbackBus>, catalog: Arc<InterfaceCatalog>) {
    let transport = transport(&bus);
    let mut registry = ObjectRegistry::new();
    let (handler, _log) = recording();

    let id = registry
        .publish_object(&transport, bus.connection(), &path("/svc"), &catalog, 0, handler)
        .expect("publish succeeds");
    registry
        .unpublish_object(&transport, bus.connection(), id)
        .expect("first withdrawal succeeds");

    assert!(!bus.has_registration(id));
    let error = registry
        .unpublish_object(&transport, bus.connection(), id)
        .expect_err("second withdrawal is rejected");
    assert!(matches!(error, RegistryError::NotFound { .. }));
}

#[rstest]
fn retire_all_empties_registry_and_bus(
    bus: Arc<LoopbackBus>,
    catalog: Arc<InterfaceCatalog>,
    domain: ErrorDomain,
) {
    let transport = transport(&bus);
    let mut registry = ObjectRegistry::new();
    let (object_handler, _log_a) = recording();
    let (subtree_handler, _log_b) = recording();

    registry
        .publish_object(
            &transport,
            bus.connection(),
            &path("/svc"),
            &catalog,
            0,
            object_handler,
        )
        .expect("object publish succeeds");
    registry
        .publish_subtree(
            &transport,
            bus.connection(),
            &path("/svc/server"),
            &catalog,
            &domain,
            vec![subtree_handler],
            admit_all(),
        )
        .expect("subtree publish succeeds");

    registry.retire_all(&transport);

    assert!(registry.is_empty());
    assert_eq!(bus.registration_count(), 0);
}

#[rstest]
fn every_publish_yields_a_distinct_id(
    bus: Arc<LoopbackBus>,
    catalog: Arc<InterfaceCatalog>,
    domain: ErrorDomain,
) {
    let transport = transport(&bus);
    let mut registry = ObjectRegistry::new();
    let mut ids: HashSet<RegistrationId> = HashSet::new();

    for object_path in ["/svc", "/svc/a", "/svc/b"] {
        let (handler, _log) = recording();
        let id = registry
            .publish_object(
                &transport,
                bus.connection(),
                &path(object_path),
                &catalog,
                0,
                handler,
            )
            .expect("object publish succeeds");
        assert!(ids.insert(id), "transport granted a duplicate id");
    }
    let (subtree_handler, _log_s) = recording();
    let subtree_id = registry
        .publish_subtree(
            &transport,
            bus.connection(),
            &path("/svc/server"),
            &catalog,
            &domain,
            vec![subtree_handler],
            admit_all(),
        )
        .expect("subtree publish succeeds");
    assert!(ids.insert(subtree_id), "transport granted a duplicate id");

    assert_eq!(ids.len(), 4);
    assert_eq!(registry.len(), 4);
}

#[rstest]
fn reused_object_id_is_undone_not_clobbered(catalog: Arc<InterfaceCatalog>) {
    let connection = ConnectionId::new(1);
    let reused = RegistrationId::from_raw(9).expect("nonzero id");

    let mut mock = MockBusTransport::new();
    mock.expect_register_object()
        .times(2)
        .returning(move |_, _, _, _| Ok(reused));
    mock.expect_unregister_object()
        .withf(move |_, id| *id == reused)
        .times(1)
        .returning(|_, _| true);
    let transport: Arc<dyn BusTransport> = Arc::new(mock);

    let mut registry = ObjectRegistry::new();
    let (first, _log_a) = recording();
    let (second, _log_b) = recording();

    registry
        .publish_object(&transport, connection, &path("/svc"), &catalog, 0, first)
        .expect("first publish succeeds");
    let error = registry
        .publish_object(&transport, connection, &path("/svc/b"), &catalog, 0, second)
        .expect_err("reused id is rejected");

    assert!(matches!(error, RegistryError::DuplicateId { id } if id == reused));
    // The fresh grant was unregistered; the live entry survived.
    assert_eq!(registry.len(), 1);
    assert!(registry.contains(reused));
}

#[rstest]
fn reused_subtree_id_is_undone_not_clobbered(
    catalog: Arc<InterfaceCatalog>,
    domain: ErrorDomain,
) {
    let connection = ConnectionId::new(1);
    let reused = RegistrationId::from_raw(4).expect("nonzero id");

    let mut mock = MockBusTransport::new();
    mock.expect_register_object()
        .times(1)
        .returning(move |_, _, _, _| Ok(reused));
    mock.expect_register_subtree()
        .times(1)
        .returning(move |_, _, _, _| Ok(reused));
    mock.expect_unregister_subtree()
        .withf(move |_, id| *id == reused)
        .times(1)
        .returning(|_, _| true);
    let transport: Arc<dyn BusTransport> = Arc::new(mock);

    let mut registry = ObjectRegistry::new();
    let (object_handler, _log_a) = recording();
    let (subtree_handler, _log_b) = recording();

    registry
        .publish_object(&transport, connection, &path("/svc"), &catalog, 0, object_handler)
        .expect("object publish succeeds");
    let error = registry
        .publish_subtree(
            &transport,
            connection,
            &path("/svc/server"),
            &catalog,
            &domain,
            vec![subtree_handler],
            admit_all(),
        )
        .expect_err("reused id is rejected");

    assert!(matches!(error, RegistryError::DuplicateId { id } if id == reused));
    assert_eq!(registry.len(), 1);
    assert!(registry.contains(reused));
}
