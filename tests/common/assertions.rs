//! Custom assertions for integration tests

use chunkd::STATUS_COMPLETE;

use super::TestClient;

/// Deterministic file contents that are unlikely to line up with chunk edges
pub fn patterned_bytes(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

/// Assert a download delivered exactly `expected` followed by a clean status
pub fn assert_download(data: &[u8], status: u8, expected: &[u8], context: &str) {
    assert_eq!(
        status, STATUS_COMPLETE,
        "Expected clean status byte ({})",
        context
    );
    assert_eq!(
        data.len(),
        expected.len(),
        "Downloaded length mismatch ({})",
        context
    );
    assert!(data == expected, "Downloaded bytes differ ({})", context);
}

/// Assert the server closed the connection without sending anything
pub fn assert_closed_silently(client: &mut TestClient, context: &str) {
    let received = client.read_to_close();
    assert!(
        received.is_empty(),
        "Expected no bytes before close ({}), got {}",
        context,
        received.len()
    );
}
