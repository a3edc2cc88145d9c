//! Global handles: a bound name plus fixed leading subscripts.
//!
//! A handle pins the front of the argument list so call sites pass only
//! the trailing subscripts. `reset` replaces the binding atomically for
//! this handle; it never touches stored data.

use arbordb_types::{Result, Subscript};

use crate::connection::Connection;

/// A named global bound to a connection, with optional fixed subscripts.
pub struct Global {
    conn: Connection,
    name: String,
    fixed: Vec<Subscript>,
}

impl Connection {
    /// Binds a global handle on this connection.
    pub fn global(&self, name: impl Into<String>, fixed: &[Subscript]) -> Global {
        Global { conn: self.clone(), name: name.into(), fixed: fixed.to_vec() }
    }
}

impl Global {
    fn full_args(&self, extra: &[Subscript]) -> Vec<Subscript> {
        let mut args = Vec::with_capacity(1 + self.fixed.len() + extra.len());
        args.push(Subscript::Str(self.name.as_bytes().to_vec()));
        args.extend_from_slice(&self.fixed);
        args.extend_from_slice(extra);
        args
    }

    /// The bound global name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The fixed leading subscripts.
    pub fn fixed_subscripts(&self) -> &[Subscript] {
        &self.fixed
    }

    /// Reads the node at the fixed prefix plus `subs`.
    ///
    /// # Errors
    ///
    /// Propagates the connection-level taxonomy.
    pub fn get(&self, subs: &[Subscript]) -> Result<Vec<u8>> {
        self.conn.get(&self.full_args(subs))
    }

    /// Writes the node at the fixed prefix plus `subs`.
    ///
    /// # Errors
    ///
    /// Propagates the connection-level taxonomy.
    pub fn set(&self, subs: &[Subscript], value: &[u8]) -> Result<i32> {
        self.conn.set(&self.full_args(subs), value)
    }

    /// Classifies the node (0/1/10/11).
    ///
    /// # Errors
    ///
    /// Propagates the connection-level taxonomy.
    pub fn defined(&self, subs: &[Subscript]) -> Result<i32> {
        self.conn.defined(&self.full_args(subs))
    }

    /// Deletes the node and its subtree.
    ///
    /// # Errors
    ///
    /// Propagates the connection-level taxonomy.
    pub fn delete(&self, subs: &[Subscript]) -> Result<i32> {
        self.conn.delete(&self.full_args(subs))
    }

    /// Next sibling at the last position of `subs`.
    ///
    /// # Errors
    ///
    /// Propagates the connection-level taxonomy.
    pub fn next(&self, subs: &[Subscript]) -> Result<Option<Subscript>> {
        self.conn.next(&self.full_args(subs))
    }

    /// Previous sibling at the last position of `subs`.
    ///
    /// # Errors
    ///
    /// Propagates the connection-level taxonomy.
    pub fn previous(&self, subs: &[Subscript]) -> Result<Option<Subscript>> {
        self.conn.previous(&self.full_args(subs))
    }

    /// Adds `delta` to the node's numeric value, returning the new text.
    ///
    /// # Errors
    ///
    /// Propagates the connection-level taxonomy.
    pub fn increment(&self, subs: &[Subscript], delta: f64) -> Result<String> {
        self.conn.increment(&self.full_args(subs), delta)
    }

    /// Advisory lock (always succeeds immediately).
    ///
    /// # Errors
    ///
    /// Propagates the connection-level taxonomy.
    pub fn lock(&self, subs: &[Subscript], timeout_secs: f64) -> Result<i32> {
        self.conn.lock(&self.full_args(subs), timeout_secs)
    }

    /// Advisory unlock.
    ///
    /// # Errors
    ///
    /// Propagates the connection-level taxonomy.
    pub fn unlock(&self, subs: &[Subscript]) -> Result<i32> {
        self.conn.unlock(&self.full_args(subs))
    }

    /// Copies the source handle's subtree under this handle's prefix.
    ///
    /// # Errors
    ///
    /// Propagates the connection-level taxonomy.
    pub fn merge_from(&self, src: &Global) -> Result<i32> {
        self.conn.merge(&self.full_args(&[]), &src.full_args(&[]))
    }

    /// Replaces the bound name and fixed subscripts.
    pub fn reset(&mut self, name: impl Into<String>, fixed: &[Subscript]) {
        self.name = name.into();
        self.fixed = fixed.to_vec();
    }

    /// Releases the handle. Dropping has the same effect.
    pub fn close(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    // Connection-backed behavior is covered by the integration tests;
    // here only the argument plumbing is exercised.

    #[test]
    fn test_full_args_prepends_binding() {
        let g = Global {
            conn: unconnected(),
            name: "^X".into(),
            fixed: vec![Subscript::from("alpha")],
        };
        let args = g.full_args(&[Subscript::Int(1)]);
        assert_eq!(
            args,
            vec![Subscript::from("^X"), Subscript::from("alpha"), Subscript::Int(1)]
        );
    }

    #[test]
    fn test_reset_replaces_binding() {
        let mut g = Global { conn: unconnected(), name: "^X".into(), fixed: vec![] };
        g.reset("^Y", &[Subscript::Int(2)]);
        assert_eq!(g.name(), "^Y");
        assert_eq!(g.fixed_subscripts(), &[Subscript::Int(2)]);
    }

    /// A closed connection: good enough for tests that never call
    /// through to the backend.
    fn unconnected() -> Connection {
        use arbordb_types::{BackendKind, OpenConfig};
        let mut config = OpenConfig::new(BackendKind::Btree);
        config.file = Some(std::env::temp_dir().join("arbordb-global-unit.db"));
        let conn = Connection::open(config).expect("open for unit test");
        conn.close();
        conn
    }
}
