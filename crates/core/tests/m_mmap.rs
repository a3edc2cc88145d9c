//! End-to-end hierarchical operations over the mmap backend.
//!
//! Exercises the same surface as the B-tree suite plus the read-txn
//! behavior specific to this engine: a query holds exactly one read
//! transaction while its cursor is open, writers stay unblocked, and the
//! cursor observes the snapshot taken when it opened.

use arbordb_core::{
    BackendKind, Connection, OpenConfig, QueryDescriptor, QueryOptions, QueryYield, Subscript,
};
use serial_test::serial;

fn open_mmap(dir: &tempfile::TempDir) -> Connection {
    let mut config = OpenConfig::new(BackendKind::Mmap);
    config.env_dir = Some(dir.path().to_path_buf());
    config.map_size = 32 * 1024 * 1024;
    Connection::open(config).unwrap()
}

fn s(v: &str) -> Subscript {
    Subscript::from(v)
}

fn i(v: i32) -> Subscript {
    Subscript::Int(v)
}

fn keys(yielded: Option<QueryYield>) -> Option<Vec<String>> {
    match yielded {
        Some(QueryYield::Row(r)) => Some(r.key.iter().map(Subscript::to_text).collect()),
        Some(QueryYield::Url(_)) => panic!("expected structured yield"),
        None => None,
    }
}

#[test]
#[serial]
fn test_point_operations() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_mmap(&dir);

    conn.set(&[s("^X"), s("alpha"), i(1)], b"v1").unwrap();
    assert_eq!(conn.get(&[s("^X"), s("alpha"), i(1)]).unwrap(), b"v1");
    assert_eq!(conn.defined(&[s("^X"), s("alpha")]).unwrap(), 10);
    assert_eq!(conn.defined(&[s("^X"), s("alpha"), i(1)]).unwrap(), 1);

    conn.delete(&[s("^X"), s("alpha")]).unwrap();
    assert_eq!(conn.defined(&[s("^X"), s("alpha"), i(1)]).unwrap(), 0);

    conn.close();
}

#[test]
#[serial]
fn test_sibling_order() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_mmap(&dir);
    for name in ["a", "b", "c"] {
        conn.set(&[s("^X"), s(name)], name.as_bytes()).unwrap();
    }

    assert_eq!(conn.next(&[s("^X"), s("")]).unwrap(), Some(s("a")));
    assert_eq!(conn.next(&[s("^X"), s("a")]).unwrap(), Some(s("b")));
    assert_eq!(conn.next(&[s("^X"), s("z")]).unwrap(), None);
    assert_eq!(conn.previous(&[s("^X"), s("")]).unwrap(), Some(s("c")));
    assert_eq!(conn.previous(&[s("^X"), s("a")]).unwrap(), None);

    conn.close();
}

#[test]
#[serial]
fn test_query_forward_and_backward() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_mmap(&dir);
    conn.set(&[s("^X"), s("a"), i(1)], b"1").unwrap();
    conn.set(&[s("^X"), s("a"), i(2)], b"2").unwrap();
    conn.set(&[s("^X"), s("b"), i(1)], b"3").unwrap();

    let mut q = conn
        .query(
            QueryDescriptor::new("^X"),
            QueryOptions { multilevel: true, ..Default::default() },
        )
        .unwrap();
    assert_eq!(keys(q.next().unwrap()).unwrap(), vec!["a", "1"]);
    assert_eq!(keys(q.next().unwrap()).unwrap(), vec!["a", "2"]);
    assert_eq!(keys(q.next().unwrap()).unwrap(), vec!["b", "1"]);
    assert!(q.next().unwrap().is_none());

    let mut q = conn
        .query(
            QueryDescriptor::new("^X"),
            QueryOptions { multilevel: true, ..Default::default() },
        )
        .unwrap();
    assert_eq!(keys(q.previous().unwrap()).unwrap(), vec!["b", "1"]);
    assert_eq!(keys(q.previous().unwrap()).unwrap(), vec!["a", "2"]);
    assert_eq!(keys(q.previous().unwrap()).unwrap(), vec!["a", "1"]);
    assert!(q.previous().unwrap().is_none());

    conn.close();
}

#[test]
#[serial]
fn test_cursor_holds_one_read_txn() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_mmap(&dir);
    conn.set(&[s("^X"), i(1)], b"v1").unwrap();
    conn.set(&[s("^X"), i(2)], b"v2").unwrap();

    let mut q = conn
        .query(
            QueryDescriptor::new("^X"),
            QueryOptions { multilevel: true, ..Default::default() },
        )
        .unwrap();
    assert!(q.next().unwrap().is_some());
    assert!(q.has_open_cursor());

    // Writers are not blocked by the cursor's read txn, and the cursor
    // keeps seeing its own snapshot.
    conn.set(&[s("^X"), i(3)], b"v3").unwrap();
    assert_eq!(keys(q.next().unwrap()).unwrap(), vec!["2"]);
    assert!(q.next().unwrap().is_none());
    assert!(!q.has_open_cursor());

    // A fresh traversal sees the late write.
    let mut q2 = conn
        .query(
            QueryDescriptor::new("^X"),
            QueryOptions { multilevel: true, ..Default::default() },
        )
        .unwrap();
    let mut count = 0;
    while q2.next().unwrap().is_some() {
        count += 1;
    }
    assert_eq!(count, 3);

    // Double close of the released cursor is a no-op.
    q.close();
    q.close();

    conn.close();
}

#[test]
#[serial]
fn test_increment_and_persistence() {
    let dir = tempfile::tempdir().unwrap();
    {
        let conn = open_mmap(&dir);
        conn.set(&[s("counter")], b"0").unwrap();
        assert_eq!(conn.increment(&[s("counter")], 1.0).unwrap(), "1");
        assert_eq!(conn.increment(&[s("counter")], -0.5).unwrap(), "0.5");
        conn.close();
    }
    {
        let conn = open_mmap(&dir);
        assert_eq!(conn.get(&[s("counter")]).unwrap(), b"0.5");
        conn.close();
    }
}

#[test]
#[serial]
fn test_concurrent_increments_serialize() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_mmap(&dir);
    conn.set(&[s("^C"), s("k")], b"0").unwrap();

    std::thread::scope(|scope| {
        for _ in 0..2 {
            let conn = conn.clone();
            scope.spawn(move || {
                for _ in 0..100 {
                    conn.increment(&[s("^C"), s("k")], 1.0).unwrap();
                }
            });
        }
    });

    assert_eq!(conn.get(&[s("^C"), s("k")]).unwrap(), b"200");
    conn.close();
}

#[test]
#[serial]
fn test_version_names_the_engine() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_mmap(&dir);
    let version = conn.version().unwrap();
    assert!(version.contains("mmap"), "got: {version}");
    conn.close();
}
