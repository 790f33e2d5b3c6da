//! Integration tests for the hub's routing and registry
//!
//! Sessions are in-memory queues here; `ws_roundtrip.rs` covers real sockets.

use pinhub::registry::{ConnectionId, DeviceLink, DeviceRegistry, PinId, PinReport};
use pinhub::server::{Broadcaster, ConnectionDirectory, MessageRouter, OutboundMessage, Session};
use serde_json::{json, Value};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;

struct Hub {
    directory: Arc<ConnectionDirectory>,
    registry: Arc<DeviceRegistry>,
    router: MessageRouter,
}

impl Hub {
    fn new() -> Self {
        let directory = Arc::new(ConnectionDirectory::new());
        let registry = Arc::new(DeviceRegistry::new());
        let router = MessageRouter::new(registry.clone(), Broadcaster::new(directory.clone()));
        Self { directory, registry, router }
    }

    fn connect(&self) -> Peer {
        let (tx, rx) = mpsc::channel(256);
        let session = Arc::new(Session::new(tx));
        let id = session.id;
        self.directory.add(session);
        self.router.connection_opened(id);
        Peer { id, rx }
    }

    fn disconnect(&self, peer: Peer) -> Option<String> {
        self.close(peer.id)
    }

    fn close(&self, id: ConnectionId) -> Option<String> {
        self.directory.remove(id);
        self.router.connection_closed(id)
    }

    fn snapshot(&self) -> Value {
        serde_json::to_value(self.registry.snapshot()).unwrap()
    }
}

struct Peer {
    id: ConnectionId,
    rx: mpsc::Receiver<OutboundMessage>,
}

impl Peer {
    fn recv_all(&mut self) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            out.push(serde_json::from_str(&msg.payload).unwrap());
        }
        out
    }

    /// Device list from the most recent `devices_list` received
    fn last_devices(&mut self) -> Option<Value> {
        self.recv_all()
            .into_iter()
            .filter(|msg| msg["type"] == "devices_list")
            .last()
            .map(|msg| msg["devices"].clone())
    }
}

#[test]
fn test_observer_and_device_scenario() {
    let hub = Hub::new();

    // Observer connects to an empty hub
    let mut a = hub.connect();
    assert_eq!(a.recv_all(), vec![json!({"type": "devices_list", "devices": []})]);

    // Device identifies itself
    let mut d = hub.connect();
    d.recv_all();
    hub.router.handle_text(
        d.id,
        r#"{"type":"device_info","id":"D1","pins":[{"id":"P1","state":"LOW"}]}"#,
    );

    let to_device = d.recv_all();
    assert_eq!(to_device[0], json!({"type": "device_info_ack", "id": "D1"}));

    let to_observer = a.recv_all();
    assert_eq!(to_observer.len(), 1);
    assert_eq!(to_observer[0]["type"], "devices_list");
    let device = &to_observer[0]["devices"][0];
    assert_eq!(device["id"], "D1");
    assert_eq!(device["online"], true);
    assert_eq!(device["pins"], json!([{"id": "P1", "state": "LOW", "value": false}]));

    // Device reports a pin change: everyone but the device hears it
    hub.router.handle_text(d.id, r#"{"type":"pin_state_update","id":"D1","pinId":"P1","state":"HIGH"}"#);
    assert!(d.recv_all().is_empty());
    assert_eq!(
        a.recv_all(),
        vec![json!({"type": "pin_state_update", "deviceId": "D1", "pinId": "P1", "state": "HIGH", "value": true})]
    );

    // Device disconnects: state kept, marked offline, everyone left gets the list
    assert_eq!(hub.disconnect(d), Some("D1".to_string()));
    let to_observer = a.recv_all();
    assert_eq!(to_observer.len(), 1);
    let device = &to_observer[0]["devices"][0];
    assert_eq!(device["online"], false);
    assert_eq!(device["pins"][0]["state"], "HIGH");
    assert_eq!(hub.registry.link("D1"), DeviceLink::Offline);
}

#[test]
fn test_sensor_update_reaches_originator() {
    let hub = Hub::new();
    let mut a = hub.connect();
    let mut d = hub.connect();
    hub.router.handle_text(d.id, r#"{"type":"device_info","id":"D1","pins":[]}"#);
    a.recv_all();
    d.recv_all();

    hub.router.handle_text(d.id, r#"{"type":"sensor_data","id":"D1","sensor":"temperature","value":21.5}"#);

    let expected = json!({"type": "sensor_update", "deviceId": "D1", "sensor": "temperature", "value": 21.5});
    assert_eq!(a.recv_all(), vec![expected.clone()]);
    assert_eq!(d.recv_all(), vec![expected]);
    assert_eq!(hub.registry.status("D1").unwrap()["temperature"], json!(21.5));
}

#[test]
fn test_toggle_unknown_and_offline_device() {
    let hub = Hub::new();
    let mut a = hub.connect();
    a.recv_all();

    let toggle = r#"{"type":"command","command":"toggle_pin","deviceId":"D1","pinId":"P1","state":"HIGH"}"#;

    hub.router.handle_text(a.id, toggle);
    assert_eq!(
        a.recv_all(),
        vec![json!({
            "type": "error",
            "command": "toggle_pin",
            "deviceId": "D1",
            "pinId": "P1",
            "message": "Device not found"
        })]
    );

    let d = hub.connect();
    hub.router.handle_text(d.id, r#"{"type":"device_info","id":"D1","pins":[{"id":"P1","state":"LOW"}]}"#);
    hub.disconnect(d);
    a.recv_all();

    hub.router.handle_text(a.id, toggle);
    let reply = a.recv_all();
    assert_eq!(reply.len(), 1);
    assert_eq!(reply[0]["type"], "error");
    assert_eq!(reply[0]["message"], "Device not connected");
}

#[test]
fn test_device_reconnect_replaces_record() {
    let hub = Hub::new();
    let mut a = hub.connect();

    let d1 = hub.connect();
    hub.router.handle_text(
        d1.id,
        r#"{"type":"device_info","id":"D1","pins":[{"id":"P1","state":"HIGH"},{"id":"P2","state":"LOW"}],"capabilities":"gpio"}"#,
    );
    hub.disconnect(d1);

    let d2 = hub.connect();
    hub.router.handle_text(d2.id, r#"{"type":"device_info","id":"D1","pins":[{"id":"P3","state":"LOW"}]}"#);

    let last = a.recv_all().pop().unwrap();
    let devices = last["devices"].as_array().unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0]["online"], true);
    assert_eq!(devices[0]["capabilities"], "");
    assert_eq!(devices[0]["pins"], json!([{"id": "P3", "state": "LOW", "value": false}]));
}

#[test]
fn test_pin_value_always_tracks_state() {
    let hub = Hub::new();
    let d = hub.connect();
    hub.router.handle_text(
        d.id,
        r#"{"type":"device_info","id":"D1","pins":[{"id":1,"state":"HIGH","value":false},{"id":2,"state":"LOW","value":true}]}"#,
    );

    for state in ["LOW", "HIGH", "on", "1", "HIGH", ""] {
        for pin in [1, 2] {
            let text = json!({"type": "pin_state_update", "id": "D1", "pinId": pin, "state": state}).to_string();
            hub.router.handle_text(d.id, &text);
        }

        for pin in hub.registry.get("D1").unwrap().pins {
            assert_eq!(pin.value(), pin.state() == "HIGH");
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_registry_concurrent_access() {
    let registry = Arc::new(DeviceRegistry::new());

    // 50 devices, each registering, updating and dropping from its own task
    let mut handles = vec![];
    for i in 0..50 {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            let id = format!("device-{}", i);
            let conn = ConnectionId::new();
            registry.register(&id, vec![PinReport::new("P1", "LOW")], None, conn);

            for round in 0..100 {
                let state = if round % 2 == 0 { "HIGH" } else { "LOW" };
                assert!(registry.update_pin(&id, &PinId::from("P1"), state));
                registry.update_sensor(&id, "counter", json!(round));
                if round % 10 == 0 {
                    tokio::task::yield_now().await;
                }
            }

            assert_eq!(registry.mark_offline(conn), Some(id));
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(registry.len(), 50);
    assert_eq!(registry.online_count(), 0);
    for view in registry.snapshot() {
        assert!(!view.online);
        assert_eq!(view.pins[0].state(), "LOW");
        assert!(!view.pins[0].value());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_register_races_disconnect() {
    let registry = Arc::new(DeviceRegistry::new());

    // The same id is claimed by successive connections while earlier ones close
    let mut conns = vec![];
    for _ in 0..200 {
        let conn = ConnectionId::new();
        registry.register("D1", vec![], None, conn);
        conns.push(conn);
    }

    let mut handles = vec![];
    for conn in conns.iter().take(199).copied() {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move { registry.mark_offline(conn) }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), None);
    }

    // Only the latest owner counts
    let last = *conns.last().unwrap();
    assert_eq!(registry.link("D1"), DeviceLink::Online(last));
    assert_eq!(registry.online_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_router_concurrent_pin_updates() {
    let hub = Arc::new(Hub::new());
    let d = hub.connect();
    let pins: Vec<String> = (0..10).map(|i| format!(r#"{{"id":{},"state":"LOW"}}"#, i)).collect();
    hub.router.handle_text(
        d.id,
        &format!(r#"{{"type":"device_info","id":"D1","pins":[{}]}}"#, pins.join(",")),
    );

    let mut observers: Vec<Peer> = (0..5).map(|_| hub.connect()).collect();
    for o in observers.iter_mut() {
        o.recv_all();
    }

    let mut handles = vec![];
    for pin in 0..10 {
        let hub = hub.clone();
        let device = d.id;
        handles.push(tokio::spawn(async move {
            let text = json!({"type": "pin_state_update", "id": "D1", "pinId": pin, "state": "HIGH"}).to_string();
            hub.router.handle_text(device, &text);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for mut o in observers {
        let mut count = 0;
        while let Ok(Some(_)) = tokio::time::timeout(Duration::from_millis(50), o.rx.recv()).await {
            count += 1;
        }
        assert_eq!(count, 10);
    }
    assert!(hub.registry.get("D1").unwrap().pins.iter().all(|p| p.value()));
}

#[test]
fn test_concurrent_registrations_leave_observers_current() {
    let mut stale = 0;

    for _ in 0..500 {
        let hub = Hub::new();
        let mut observers: Vec<Peer> = (0..2).map(|_| hub.connect()).collect();
        let devices: Vec<Peer> = (0..4).map(|_| hub.connect()).collect();
        let barrier = Barrier::new(devices.len());

        thread::scope(|scope| {
            for (i, device) in devices.iter().enumerate() {
                let (hub, barrier, conn) = (&hub, &barrier, device.id);
                scope.spawn(move || {
                    let text = format!(r#"{{"type":"device_info","id":"D{}","pins":[]}}"#, i);
                    barrier.wait();
                    hub.router.handle_text(conn, &text);
                });
            }
        });

        let expected = hub.snapshot();
        assert_eq!(expected.as_array().unwrap().len(), 4);
        for observer in observers.iter_mut() {
            if observer.last_devices().as_ref() != Some(&expected) {
                stale += 1;
            }
        }
    }

    assert_eq!(stale, 0, "observers left with an outdated device list");
}

#[test]
fn test_registrations_racing_disconnects_leave_observers_current() {
    let mut stale = 0;

    for _ in 0..500 {
        let hub = Hub::new();
        let mut observer = hub.connect();

        // Two devices already online, two about to register
        let leaving: Vec<Peer> = (0..2).map(|_| hub.connect()).collect();
        for (i, peer) in leaving.iter().enumerate() {
            let text = format!(r#"{{"type":"device_info","id":"old-{}","pins":[]}}"#, i);
            hub.router.handle_text(peer.id, &text);
        }
        let joining: Vec<Peer> = (0..2).map(|_| hub.connect()).collect();
        let barrier = Barrier::new(leaving.len() + joining.len());

        thread::scope(|scope| {
            for peer in &leaving {
                let (hub, barrier, conn) = (&hub, &barrier, peer.id);
                scope.spawn(move || {
                    barrier.wait();
                    hub.close(conn);
                });
            }
            for (i, peer) in joining.iter().enumerate() {
                let (hub, barrier, conn) = (&hub, &barrier, peer.id);
                scope.spawn(move || {
                    let text = format!(r#"{{"type":"device_info","id":"new-{}","pins":[]}}"#, i);
                    barrier.wait();
                    hub.router.handle_text(conn, &text);
                });
            }
        });

        assert_eq!(hub.registry.online_count(), 2);
        if observer.last_devices() != Some(hub.snapshot()) {
            stale += 1;
        }
    }

    assert_eq!(stale, 0, "observer left with an outdated device list");
}

#[test]
fn test_concurrent_updates_to_one_pin_arrive_in_order() {
    let mut reordered = 0;

    for _ in 0..500 {
        let hub = Hub::new();
        let device = hub.connect();
        hub.router.handle_text(device.id, r#"{"type":"device_info","id":"D1","pins":[{"id":"P1","state":"LOW"}]}"#);
        let mut observer = hub.connect();
        observer.recv_all();

        let states = ["HIGH", "LOW", "BLINK", "PWM"];
        let barrier = Barrier::new(states.len());

        thread::scope(|scope| {
            for state in states {
                let (hub, barrier, conn) = (&hub, &barrier, device.id);
                scope.spawn(move || {
                    let text = format!(r#"{{"type":"pin_state_update","id":"D1","pinId":"P1","state":"{}"}}"#, state);
                    barrier.wait();
                    hub.router.handle_text(conn, &text);
                });
            }
        });

        let updates = observer.recv_all();
        assert_eq!(updates.len(), states.len());
        let last = &updates[updates.len() - 1];
        if last["state"] != hub.registry.get("D1").unwrap().pins[0].state() {
            reordered += 1;
        }
    }

    assert_eq!(reordered, 0, "observer's last pin update disagrees with the registry");
}
