//! A small demo of hierarchical globals: patients and their admissions.
//!
//! Run with `cargo run --example m_globals [data-dir]`.

use arbordb_core::{
    BackendKind, Connection, OpenConfig, QueryDescriptor, QueryOptions, QueryYield, Result,
    Subscript,
};

fn main() -> Result<()> {
    let dir = std::env::args()
        .nth(1)
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("arbordb-m-demo"));

    let mut config = OpenConfig::new(BackendKind::Btree);
    config.file = Some(dir.join("m.db"));
    let conn = Connection::open(config)?;
    println!("Version: {}", conn.version()?);

    println!("Setting up some records ...");
    let patient = conn.global("patient", &[]);
    let admission = conn.global("admission", &[]);

    patient.set(&[1.into()], b"John Smith")?;
    patient.set(&[2.into()], b"Jane Jones")?;

    admission.set(&[1.into(), "2020-06-07".into()], b"Ward #1")?;
    admission.set(&[1.into(), "2020-11-12".into()], b"Ward #2")?;
    admission.set(&[1.into(), "2021-01-03".into()], b"Ward #1a")?;

    println!("\nList all registered patients ...");
    let mut id = Subscript::empty();
    while let Some(next) = patient.next(&[id.clone()])? {
        let name = patient.get(&[next.clone()])?;
        println!("Next Patient Record: {}: {}", next, String::from_utf8_lossy(&name));
        id = next;
    }

    println!("\nList all admission records for patient #1 in ascending order ...");
    let mut date = Subscript::empty();
    while let Some(next) = admission.next(&[1.into(), date.clone()])? {
        let ward = admission.get(&[1.into(), next.clone()])?;
        println!(
            "Next Admission Record: id=1; date={}; ward={}",
            next,
            String::from_utf8_lossy(&ward)
        );
        date = next;
    }

    println!("\nList all 2020 admission records for patient #1 in descending order ...");
    let mut date = Subscript::from("2021-01-01");
    while let Some(prev) = admission.previous(&[1.into(), date.clone()])? {
        let ward = admission.get(&[1.into(), prev.clone()])?;
        println!(
            "Previous Admission Record: id=1; date={}; ward={}",
            prev,
            String::from_utf8_lossy(&ward)
        );
        date = prev;
    }

    println!("\nList all admission records in ascending order ...");
    let mut query = conn.query(
        QueryDescriptor::new("admission"),
        QueryOptions { multilevel: true, getdata: true, ..Default::default() },
    )?;
    while let Some(QueryYield::Row(row)) = query.next()? {
        let path: Vec<String> = row.key.iter().map(Subscript::to_text).collect();
        let data = row.data.unwrap_or_default();
        println!("Record: ({}) = {}", path.join(","), String::from_utf8_lossy(&data));
    }

    println!("\nClosing the database");
    conn.close();
    Ok(())
}
