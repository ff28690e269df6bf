// HttpTransport against file:// URLs: the spawn/complete path, the stats
// counters, and the failure branch. Needs a multi-threaded runtime because
// the test thread blocks on the completion channel.

use std::sync::mpsc;
use std::time::Duration;

use strata3d::{HttpTransport, SliceRequest, SliceTransport};

fn file_request(path: &std::path::Path) -> SliceRequest {
    SliceRequest {
        z: 0.0,
        url: format!("file://{}", path.display()),
        post_data: None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn file_url_fetch_resolves_with_bytes() {
    let dir = std::env::temp_dir().join("strata3d-transport-test");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("slice.bin");
    std::fs::write(&path, [1u8, 2, 3]).unwrap();

    let transport = HttpTransport::new().unwrap();
    let (tx, rx) = mpsc::channel();
    transport.fetch(
        file_request(&path),
        Box::new(move |result| {
            tx.send(result).unwrap();
        }),
    );

    let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(result.unwrap(), vec![1, 2, 3]);
    assert_eq!(transport.stats().requests(), 1);
    assert_eq!(transport.stats().bytes_fetched(), 3);
    assert_eq!(transport.stats().failures(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_file_reports_a_failure() {
    let path = std::env::temp_dir().join("strata3d-transport-test-missing.bin");
    let _ = std::fs::remove_file(&path);

    let transport = HttpTransport::new().unwrap();
    let (tx, rx) = mpsc::channel();
    transport.fetch(
        file_request(&path),
        Box::new(move |result| {
            tx.send(result).unwrap();
        }),
    );

    let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(result.is_err());
    assert_eq!(transport.stats().failures(), 1);
}

#[test]
fn construction_outside_a_runtime_fails() {
    assert!(HttpTransport::new().is_err());
}
