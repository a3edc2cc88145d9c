//! Model-based check: a subtree scan must visit exactly the stored nodes,
//! in the order the codec's byte encoding defines, regardless of how the
//! subscripts mix integers, decimals, and strings.

use arbordb_core::{
    BackendKind, Connection, OpenConfig, QueryDescriptor, QueryOptions, QueryYield, Subscript,
};
use arbordb_types::codec::encode_key;
use serial_test::serial;

/// Small deterministic generator so the key mix is stable run to run.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn subscript(&mut self) -> Subscript {
        match self.next() % 4 {
            0 => Subscript::Int(self.next() as i32 % 1000 - 500),
            1 => Subscript::from(format!("{}.{}", self.next() % 100, self.next() % 1000 + 1)),
            2 => Subscript::from(format!("s{:03}", self.next() % 400)),
            _ => Subscript::from(format!("w{}", self.next() % 40)),
        }
    }
}

#[test]
#[serial]
fn test_scan_matches_encoded_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = OpenConfig::new(BackendKind::Btree);
    config.file = Some(dir.path().join("model.db"));
    let conn = Connection::open(config).unwrap();

    let mut lcg = Lcg(0x5eed);
    let mut model: Vec<(Vec<u8>, Vec<Subscript>)> = Vec::new();
    for n in 0..150 {
        let depth = 1 + (lcg.next() % 3) as usize;
        let subs: Vec<Subscript> = (0..depth).map(|_| lcg.subscript()).collect();
        let encoded = encode_key("MODEL", &subs).unwrap();
        if model.iter().any(|(k, _)| *k == encoded) {
            continue;
        }
        conn.set(
            &std::iter::once(Subscript::from("^MODEL"))
                .chain(subs.iter().cloned())
                .collect::<Vec<_>>(),
            format!("v{n}").as_bytes(),
        )
        .unwrap();
        model.push((encoded, subs));
    }
    assert!(model.len() > 100, "expected a non-trivial model");

    // The scan must yield every node exactly once, in byte order of the
    // encoded keys.
    model.sort_by(|a, b| a.0.cmp(&b.0));
    let expected: Vec<Vec<String>> = model
        .iter()
        .map(|(_, subs)| {
            subs.iter().map(|s| s.clone().normalized().to_text()).collect()
        })
        .collect();

    let mut q = conn
        .query(
            QueryDescriptor::new("^MODEL"),
            QueryOptions { multilevel: true, ..Default::default() },
        )
        .unwrap();
    let mut seen = Vec::new();
    while let Some(QueryYield::Row(row)) = q.next().unwrap() {
        seen.push(row.key.iter().map(Subscript::to_text).collect::<Vec<_>>());
    }
    assert_eq!(seen, expected);

    // And the reverse scan is the mirror image.
    let mut q = conn
        .query(
            QueryDescriptor::new("^MODEL"),
            QueryOptions { multilevel: true, ..Default::default() },
        )
        .unwrap();
    let mut reversed = Vec::new();
    while let Some(QueryYield::Row(row)) = q.previous().unwrap() {
        reversed.push(row.key.iter().map(Subscript::to_text).collect::<Vec<_>>());
    }
    reversed.reverse();
    assert_eq!(reversed, expected);

    conn.close();
}

#[test]
#[serial]
fn test_sibling_walk_matches_first_level() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = OpenConfig::new(BackendKind::Btree);
    config.file = Some(dir.path().join("model.db"));
    let conn = Connection::open(config).unwrap();

    let mut lcg = Lcg(0xfeed);
    let mut firsts: Vec<(Vec<u8>, Subscript)> = Vec::new();
    for _ in 0..80 {
        let sub = lcg.subscript().normalized();
        let encoded = encode_key("W", &[sub.clone()]).unwrap();
        if firsts.iter().any(|(k, _)| *k == encoded) {
            continue;
        }
        conn.set(&[Subscript::from("^W"), sub.clone()], b"v").unwrap();
        firsts.push((encoded, sub));
    }
    firsts.sort_by(|a, b| a.0.cmp(&b.0));

    let mut seed = Subscript::empty();
    let mut walked = Vec::new();
    while let Some(next) = conn.next(&[Subscript::from("^W"), seed.clone()]).unwrap() {
        walked.push(next.clone());
        seed = next;
    }
    let expected: Vec<Subscript> = firsts.into_iter().map(|(_, s)| s).collect();
    assert_eq!(walked, expected);

    conn.close();
}
