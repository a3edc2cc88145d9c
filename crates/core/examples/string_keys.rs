//! A small demo using opaque string keys.
//!
//! Run with `cargo run --example string_keys [data-dir]`.

use arbordb_core::{
    BackendKind, Connection, KeyType, OpenConfig, QueryDescriptor, QueryOptions, QueryYield,
    Result, Subscript,
};

fn main() -> Result<()> {
    let dir = std::env::args()
        .nth(1)
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("arbordb-str-demo"));

    let mut config = OpenConfig::new(BackendKind::Btree);
    config.file = Some(dir.join("string.db"));
    config.key_type = KeyType::Str;
    let conn = Connection::open(config)?;
    println!("Version: {}", conn.version()?);

    println!("Setting up some records ...");
    for n in (0..20).step_by(2) {
        let key = format!("key#{n}");
        let value = format!("Record #{n}");
        conn.set(&[key.as_str().into()], value.as_bytes())?;
        println!("{key} = {value}");
    }

    let key2: Subscript = "key#2".into();
    println!("\nGet Record 'key#2': {}", String::from_utf8_lossy(&conn.get(&[key2.clone()])?));
    println!("Is Record 'key#2' Defined?: {}", conn.defined(&[key2.clone()])?);
    println!("Delete Record 'key#2': {}", conn.delete(&[key2.clone()])?);
    println!("Is Record 'key#2' Defined?: {}", conn.defined(&[key2])?);

    println!("\nParse the set of records ...");
    let mut key = Subscript::empty();
    while let Some(next) = conn.next(&[key.clone()])? {
        let value = conn.get(&[next.clone()])?;
        println!("Next Record: {}: {}", next, String::from_utf8_lossy(&value));
        key = next;
    }

    println!("\nParse the records with a cursor, starting after 'key#7' ...");
    let mut query = conn.query(
        QueryDescriptor { global: String::new(), key: vec!["key#7".into()] },
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
