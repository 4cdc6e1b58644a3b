//! Shared fixtures for the crate's test modules.

#![expect(
    clippy::expect_used,
    reason = "test code uses expect for clarity and assertions"
)]

use std::sync::{Arc, Mutex};

use crossbar_bus::loopback::LoopbackBus;
use crossbar_bus::{BusName, BusTransport, ConnectionId, ObjectPath};

use crate::lifecycle::{Connector, ConnectorEvents, ConnectorSchemas};
use crate::settings::Settings;

pub(crate) const ROOT_DOC: &str = r#"{
    "interfaces": [
        {"name": "com.example.Manager", "methods": [
            {"name": "GetServers", "args": [{"name": "paths", "signature": "ao"}]},
            {"name": "Release"}
        ]}
    ]
}"#;

pub(crate) const SERVER_DOC: &str = r#"{
    "interfaces": [
        {"name": "com.example.Manager", "methods": [{"name": "GetServers"}]},
        {"name": "com.example.Search", "methods": [
            {"name": "SearchObjects", "args": [{"name": "query", "signature": "s"}]}
        ]}
    ]
}"#;

pub(crate) const SERVICE: &str = "com.example.svc";

/// One lifecycle or presence callback observed by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    Connected(ConnectionId),
    Disconnected(ConnectionId),
    ClientLost(BusName),
}

/// [`ConnectorEvents`] sink recording callbacks in arrival order.
#[derive(Default)]
pub(crate) struct RecordingEvents {
    events: Mutex<Vec<Event>>,
}

impl RecordingEvents {
    pub(crate) fn snapshot(&self) -> Vec<Event> {
        self.events.lock().expect("event log lock").clone()
    }
}

impl ConnectorEvents for RecordingEvents {
    fn connected(&self, connection: ConnectionId) {
        self.events
            .lock()
            .expect("event log lock")
            .push(Event::Connected(connection));
    }

    fn disconnected(&self, connection: ConnectionId) {
        self.events
            .lock()
            .expect("event log lock")
            .push(Event::Disconnected(connection));
    }

    fn client_lost(&self, name: &BusName) {
        self.events
            .lock()
            .expect("event log lock")
            .push(Event::ClientLost(name.clone()));
    }
}

/// A connector wired to a fresh loopback bus, not yet connected.
pub(crate) fn connector_on_loopback() -> (Connector, Arc<LoopbackBus>, Arc<RecordingEvents>) {
    let bus = Arc::new(LoopbackBus::new());
    let events = Arc::new(RecordingEvents::default());
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
    (connector, bus, events)
}

pub(crate) fn path(raw: &str) -> ObjectPath {
    ObjectPath::new(raw).expect("test path is valid")
}

pub(crate) fn name(raw: &str) -> BusName {
    BusName::new(raw).expect("test name is valid")
}
