//! A small demo using 32-bit integer keys.
//!
//! Run with `cargo run --example integer_keys [data-dir] [mmap]`;
//! passing `mmap` as the second argument selects the memory-mapped
//! engine instead of the B-tree.

use arbordb_core::{
    BackendKind, Connection, KeyType, OpenConfig, QueryDescriptor, QueryOptions, QueryYield,
    Result, Subscript,
};

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let dir = args
        .next()
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("arbordb-int-demo"));
    let use_mmap = args.next().as_deref() == Some("mmap");

    let mut config = if use_mmap {
        let mut config = OpenConfig::new(BackendKind::Mmap);
        config.env_dir = Some(dir);
        config
    } else {
        let mut config = OpenConfig::new(BackendKind::Btree);
        config.file = Some(dir.join("integer.db"));
        config
    };
    config.key_type = KeyType::Int;
    let conn = Connection::open(config)?;
    println!("Version: {}", conn.version()?);

    println!("Setting up some records ...");
    for n in (0..20).step_by(2) {
        let value = format!("Record #{n}");
        conn.set(&[(n as i32).into()], value.as_bytes())?;
        println!("{n} = {value}");
    }

    println!("\nGet Record #2: {}", String::from_utf8_lossy(&conn.get(&[2.into()])?));
    println!("Is Record #2 Defined?: {}", conn.defined(&[2.into()])?);
    println!("Delete Record #2: {}", conn.delete(&[2.into()])?);
    println!("Is Record #2 Defined?: {}", conn.defined(&[2.into()])?);

    println!("\nParse the set of records ...");
    let mut key = Subscript::empty();
    while let Some(next) = conn.next(&[key.clone()])? {
        let value = conn.get(&[next.clone()])?;
        println!("Next Record: {}: {}", next, String::from_utf8_lossy(&value));
        key = next;
    }

    println!("\nParse the records with a cursor, starting after #7 ...");
    let mut query = conn.query(
        QueryDescriptor { global: String::new(), key: vec![7.into()] },
        QueryOptions { getdata: true, ..Default::default() },
    )?;
    while let Some(QueryYield::Row(row)) = query.next()? {
        let data = row.data.unwrap_or_default();
        println!("Record: {} = {}", row.key[0], String::from_utf8_lossy(&data));
    }

    println!("\nClosing the database");
    conn.close();
    Ok(())
}
