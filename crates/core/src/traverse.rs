//! Traversal algorithms over a backend cursor.
//!
//! The store only gives us "seek to the first key >= probe, step
//! forward/backward". Everything hierarchical is built from that plus two
//! probe tricks:
//!
//! - an empty trailing subscript encodes as `0x00 0x00`, which sorts
//!   below every real subscript, so seeking there lands on the first
//!   child of the prefix;
//! - appending `0x00 0xFF` to a completed subscript slot sorts above
//!   every descendant of that exact node but below its next sibling, so
//!   one extra seek skips the current record and its whole subtree.
//!
//! Iteration stops as soon as the fixed prefix no longer matches, which
//! is checked at a slot boundary so `("ab")` never extends `("a")`.

use arbordb_store::BackendCursor;
use arbordb_types::codec::{decode_key, shares_prefix, KeyBuilder, SLOT_LEAD, SKIP_SUFFIX};
use arbordb_types::{Result, Subscript};

use crate::executor::store_err;

/// How many times a sibling scan will re-seek past colliding records.
const ORDER_SCAN_LIMIT: usize = 10;

/// How many consecutive skip-steps a subtree scan tolerates before it
/// declares end-of-data; a pathological chain of equal-prefix collisions
/// must not hang the iterator.
const QUERY_SKIP_LIMIT: usize = 5;

/// A sibling-scan hit.
#[derive(Debug, Clone)]
pub(crate) struct OrderHit {
    /// The subscript standing in the scanned position.
    pub value: Subscript,
    /// The record's value, present only when the hit sits exactly at the
    /// scanned level (a deeper record's data does not belong to it).
    pub data: Option<Vec<u8>>,
}

/// A subtree-scan hit: the full key plus its value.
#[derive(Debug, Clone)]
pub(crate) struct QueryHit {
    pub key: Vec<u8>,
    pub subs: Vec<Subscript>,
    pub data: Vec<u8>,
}

/// Finds the next value that could stand in the last position of `kb`
/// such that a record exists under the same parent prefix.
///
/// `kb` holds the full probe: name, fixed subscripts, and the seed as the
/// last slot (empty seed included). `seed` is the normalized last
/// subscript. Returns `None` at end-of-data.
pub(crate) fn order_next(
    cur: &mut dyn BackendCursor,
    kb: &KeyBuilder,
    seed: &Subscript,
) -> Result<Option<OrderHit>> {
    let argc = kb.slot_count();
    debug_assert!(argc >= 1);
    let parent_len = if argc >= 2 { kb.prefix_len(argc - 2) } else { 0 };
    let seed_end = kb.prefix_len(argc - 1);

    let mut probe = kb.bytes().to_vec();
    for _ in 0..ORDER_SCAN_LIMIT {
        let Some(hit) = cur.seek_ge(&probe).map_err(store_err)? else {
            return Ok(None);
        };
        if hit.key.first() != Some(&SLOT_LEAD) {
            return Ok(None);
        }
        if argc >= 2 && !shares_prefix(&hit.key, kb.bytes(), parent_len) {
            return Ok(None);
        }

        let slots = decode_key(&hit.key);
        if slots.len() < argc {
            return Ok(None);
        }
        if slots[argc - 1] == *seed {
            // The current record came back; skip it and its subtree.
            probe.truncate(0);
            probe.extend_from_slice(&kb.bytes()[..seed_end]);
            probe.extend_from_slice(&SKIP_SUFFIX);
            continue;
        }

        let data = (slots.len() == argc).then_some(hit.value);
        return Ok(Some(OrderHit { value: slots[argc - 1].clone(), data }));
    }
    Ok(None)
}

/// Mirror image of [`order_next`]: the previous value in the last
/// position of `kb`, or `None` at end-of-data.
pub(crate) fn order_prev(
    cur: &mut dyn BackendCursor,
    kb: &KeyBuilder,
    seed: &Subscript,
) -> Result<Option<OrderHit>> {
    let argc = kb.slot_count();
    debug_assert!(argc >= 1);
    let parent_len = if argc >= 2 { kb.prefix_len(argc - 2) } else { 0 };

    let hit = if argc == 1 && seed.is_empty() {
        cur.last().map_err(store_err)?
    } else {
        let mut probe = kb.bytes().to_vec();
        if seed.is_empty() {
            // Turn the empty-seed tail into the skip marker so the seek
            // overshoots every child, then step back to the last one.
            let n = probe.len();
            probe[n - 1] = SKIP_SUFFIX[1];
        }
        match cur.seek_ge(&probe).map_err(store_err)? {
            Some(_) => cur.prev().map_err(store_err)?,
            // Nothing at or past the probe: the prefix closes the key
            // space, so fall back to the very last record.
            None => cur.last().map_err(store_err)?,
        }
    };

    let Some(hit) = hit else {
        return Ok(None);
    };
    if hit.key.first() != Some(&SLOT_LEAD) {
        return Ok(None);
    }
    if argc >= 2 && !shares_prefix(&hit.key, kb.bytes(), parent_len) {
        return Ok(None);
    }

    let slots = decode_key(&hit.key);
    if slots.len() < argc {
        return Ok(None);
    }
    let data = (slots.len() == argc).then_some(hit.value);
    Ok(Some(OrderHit { value: slots[argc - 1].clone(), data }))
}

/// Next key anywhere in the subtree whose first `fixed_len` bytes match
/// `anchor`, starting after `prev_key`. `first_call` selects the initial
/// seek; later calls step the already-positioned cursor.
pub(crate) fn query_next(
    cur: &mut dyn BackendCursor,
    anchor: &[u8],
    fixed_len: usize,
    prev_key: &[u8],
    first_call: bool,
) -> Result<Option<QueryHit>> {
    let mut hit = if first_call {
        cur.seek_ge(prev_key).map_err(store_err)?
    } else {
        cur.next().map_err(store_err)?
    };

    for _ in 0..QUERY_SKIP_LIMIT {
        let Some(h) = hit else {
            return Ok(None);
        };
        if !shares_prefix(&h.key, anchor, fixed_len) {
            return Ok(None);
        }
        if h.key == prev_key {
            hit = cur.next().map_err(store_err)?;
            continue;
        }
        let subs = decode_key(&h.key);
        return Ok(Some(QueryHit { key: h.key, subs, data: h.value }));
    }
    Ok(None)
}

/// Mirror image of [`query_next`]. The first call overshoots the current
/// record's subtree with the skip marker and steps backwards from there;
/// keys outside the anchor prefix are stepped over (bounded by the skip
/// ceiling) rather than ending the scan, because the probe may land past
/// the subtree's end.
pub(crate) fn query_prev(
    cur: &mut dyn BackendCursor,
    anchor: &[u8],
    fixed_len: usize,
    prev_key: &[u8],
    first_call: bool,
) -> Result<Option<QueryHit>> {
    let mut hit = if first_call {
        let mut probe = prev_key.to_vec();
        probe.extend_from_slice(&SKIP_SUFFIX);
        match cur.seek_ge(&probe).map_err(store_err)? {
            Some(h) => Some(h),
            None => cur.last().map_err(store_err)?,
        }
    } else {
        cur.prev().map_err(store_err)?
    };

    for _ in 0..QUERY_SKIP_LIMIT {
        let Some(h) = hit else {
            return Ok(None);
        };
        if shares_prefix(&h.key, anchor, fixed_len) && h.key != prev_key {
            let subs = decode_key(&h.key);
            return Ok(Some(QueryHit { key: h.key, subs, data: h.value }));
        }
        hit = cur.prev().map_err(store_err)?;
    }
    Ok(None)
}
