//! Fine-offload target selection.

use std::collections::HashMap;

use crate::peer::PeerState;

/// Picks the peer to offload a `fine` call to, or `None` if no peer is
/// currently eligible. Eligible peers are those with `ok == true`; among
/// them the lowest-scoring peer wins, where
/// `score = rtt + avg_ms["fine"] + 30 * in_flight + 10 * queue_len`.
///
/// Peers are walked in URL order so that a tie always resolves to the same
/// peer for a fixed snapshot, independent of hash-map iteration order.
pub fn pick_target_for_fine(peers: &HashMap<String, PeerState>) -> Option<String> {
    let mut urls: Vec<&String> = peers.keys().collect();
    urls.sort();

    let mut best: Option<(&str, f64)> = None;
    for url in urls {
        let ps = &peers[url];
        if !ps.ok {
            continue;
        }
        let avg_fine = *ps.avg_ms.get("fine").unwrap_or(&0.0);
        let score = ps.last_rtt_ms + avg_fine + 30.0 * ps.in_flight as f64 + 10.0 * ps.queue_len as f64;
        if best.map(|(_, b)| score < b).unwrap_or(true) {
            best = Some((url.as_str(), score));
        }
    }
    best.map(|(u, _)| u.to_string())
}
