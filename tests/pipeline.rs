// Integration tests for decode -> store -> reader flow and startup failure handling

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bambustatus::mqtt::{ConnectError, ConnectionState, MqttConfig, MqttHandler};
use bambustatus::printer::{decode, StatusStore};
use chrono::Utc;
use serde_json::json;

fn report(name: &str, minutes: i64, start: i64) -> Vec<u8> {
    json!({
        "print": {
            "subtask_name": name,
            "gcode_file": "/sdcard/fallback.gcode",
            "mc_percent": 50,
            "mc_remaining_time": minutes,
            "layer_num": 10,
            "total_layer_num": 20,
            "nozzle_temper": 215.0,
            "bed_temper": 60.0,
            "gcode_start_time": start.to_string()
        }
    })
    .to_string()
    .into_bytes()
}

#[test]
fn decoded_reports_flow_into_store() {
    let store = StatusStore::new();
    let start = Utc::now().timestamp() - 120;

    let status = decode(&report("Benchy", 15, start)).unwrap();
    store.write(status);

    let current = store.get();
    assert_eq!(current.print_name, "Benchy");
    assert_eq!(current.time_remaining, 900);
    assert!((119..=121).contains(&current.time_elapsed));
    assert_eq!(current.progress, 50.0);
}

#[test]
fn failed_decode_leaves_store_untouched() {
    let store = StatusStore::new();
    store.write(decode(&report("Gear", 5, Utc::now().timestamp())).unwrap());
    let before = store.get();

    let payloads: [&[u8]; 3] = [b"garbage", br#"{"print":{"mc_percent":"half"}}"#, b""];
    for payload in payloads {
        if let Ok(status) = decode(payload) {
            store.write(status);
        }
    }

    assert_eq!(store.get(), before);
}

#[test]
fn callback_fires_once_per_write() {
    let store = StatusStore::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    store.set_update_callback(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    store.write(decode(b"{}").unwrap());
    store.write(decode(&report("Clip", 1, 0)).unwrap());

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(store.get().print_name, "Clip");
}

#[tokio::test]
async fn unreachable_broker_fails_startup() {
    // Nothing listens on port 1
    let config = MqttConfig {
        host: "127.0.0.1".to_string(),
        port: 1,
        password: "unused".to_string(),
        use_tls: false,
        connect_timeout_secs: 5,
        ..MqttConfig::default()
    };
    let mut handler = MqttHandler::new(config);
    let state = handler.connection_state();

    let err = handler.connect().await.unwrap_err();

    assert!(matches!(
        err,
        ConnectError::Handshake { .. } | ConnectError::Timeout { .. }
    ));
    assert_eq!(*state.borrow(), ConnectionState::Failed);
    assert_eq!(handler.get_status().print_name, "Idle");

    // Disconnect after a failed connect is a no-op
    handler.disconnect().await;
    assert!(!handler.is_connected());
}
