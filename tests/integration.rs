use std::sync::{Arc, Mutex};
use std::time::Duration;

use lennox_s30::{Event, S30Client, TARGET_LCC};

/// Address of a controller (or simulator) speaking plain HTTP.
/// Run with: S30_HOST=127.0.0.1:8080 cargo test --test integration -- --ignored
fn host() -> String {
    std::env::var("S30_HOST").unwrap_or_else(|_| "127.0.0.1:8080".to_string())
}

#[tokio::test]
#[ignore]
async fn connect_poll_disconnect() {
    let events: Arc<Mutex<Vec<(String, Event)>>> = Arc::new(Mutex::new(vec![]));
    let events_clone = events.clone();

    let mut client = S30Client::builder(host())
        .protocol("http")
        .long_poll_timeout(Duration::from_secs(5))
        .on_event(move |system_id, event| {
            events_clone
                .lock()
                .unwrap()
                .push((system_id.to_string(), event.clone()));
        })
        .build()
        .unwrap();

    client.connect().await.expect("connect failed");

    // The initial configuration arrives over several polls.
    for i in 0..10 {
        client
            .poll()
            .await
            .unwrap_or_else(|e| panic!("poll {i} failed: {e}"));
        if client.system(TARGET_LCC).is_some_and(|s| !s.zones.is_empty()) {
            break;
        }
    }

    let system = client.system(TARGET_LCC).expect("LAN system should exist");
    assert!(!system.zones.is_empty(), "should have at least one zone");

    {
        let captured = events.lock().unwrap();
        assert!(!captured.is_empty(), "should have received events");
        assert!(captured.iter().all(|(id, _)| id == TARGET_LCC));
    }

    client.disconnect().await.expect("disconnect failed");
    assert!(!client.is_connected());
}

#[tokio::test]
#[ignore]
async fn away_round_trip() {
    let mut client = S30Client::builder(host())
        .protocol("http")
        .long_poll_timeout(Duration::from_secs(5))
        .build()
        .unwrap();

    client.connect().await.expect("connect failed");
    for _ in 0..10 {
        client.poll().await.expect("drain poll failed");
    }

    let was_away = client.system(TARGET_LCC).is_some_and(|s| s.is_away());
    client.set_away(TARGET_LCC, !was_away).await.expect("set_away failed");

    let mut flipped = false;
    for _ in 0..10 {
        client.poll().await.expect("poll failed");
        if client.system(TARGET_LCC).is_some_and(|s| s.is_away() != was_away) {
            flipped = true;
            break;
        }
    }
    assert!(flipped, "controller should report the new occupancy");

    client.set_away(TARGET_LCC, was_away).await.expect("restore failed");
    client.disconnect().await.expect("disconnect failed");
}
