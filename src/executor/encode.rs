//! Encoders for the three wire formats the executor can produce, and the empty-table
//! boundary behaviors each one prescribes.

use super::spill::SpillWriter;
use super::{Error, Limits, Payload};
use crate::compiler::Format;
use crate::upstream::Table;
use serde_json::{Map, Value};

pub async fn encode(tables: &[Table], format: Format, limits: &Limits) -> Result<Payload, Error> {
    let mut writer = SpillWriter::new(limits.max_in_memory_bytes, limits.temp_dir.clone());
    match format {
        Format::Ndjson => encode_ndjson(tables, &mut writer).await,
        Format::Json => encode_json(tables, &mut writer).await,
        Format::Csv => encode_csv(tables, &mut writer).await,
    }
    writer.finish().await.map_err(|e| Error::Io(e.to_string()))
}

fn row_object(table: &Table, row: &[Value]) -> Map<String, Value> {
    table.fields.iter().zip(row.iter()).map(|(field, value)| (field.name.clone(), value.clone())).collect()
}

async fn encode_ndjson(tables: &[Table], writer: &mut SpillWriter) -> Result<(), Error> {
    for table in tables {
        for row in table.rows() {
            let obj = row_object(table, &row);
            let mut line = serde_json::to_vec(&Value::Object(obj)).map_err(|e| Error::Io(e.to_string()))?;
            line.push(b'\n');
            writer.write(&line).await.map_err(|e| Error::Io(e.to_string()))?;
        }
    }
    Ok(())
}

async fn encode_json(tables: &[Table], writer: &mut SpillWriter) -> Result<(), Error> {
    let mut objects = Vec::new();
    for table in tables {
        for row in table.rows() {
            objects.push(Value::Object(row_object(table, &row)));
        }
    }
    if objects.is_empty() {
        writer.write(b"[]\n").await.map_err(|e| Error::Io(e.to_string()))?;
        return Ok(());
    }
    let mut bytes = serde_json::to_vec_pretty(&objects).map_err(|e| Error::Io(e.to_string()))?;
    bytes.push(b'\n');
    writer.write(&bytes).await.map_err(|e| Error::Io(e.to_string()))
}

async fn encode_csv(tables: &[Table], writer: &mut SpillWriter) -> Result<(), Error> {
    let Some(table) = tables.first() else { return Ok(()) };
    if table.fields.is_empty() {
        return Ok(());
    }
    let header: Vec<String> = table.fields.iter().map(|f| csv_escape(&f.name)).collect();
    writer.write(format!("{}\n", header.join(",")).as_bytes()).await.map_err(|e| Error::Io(e.to_string()))?;

    for t in tables {
        for row in t.rows() {
            let values: Vec<String> = table.fields.iter().zip(row.iter()).map(|(_, v)| csv_escape(&stringify(v))).collect();
            writer.write(format!("{}\n", values.join(",")).as_bytes()).await.map_err(|e| Error::Io(e.to_string()))?;
        }
    }
    Ok(())
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn csv_escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::FieldDef;
    use std::path::PathBuf;

    fn limits() -> Limits {
        Limits { max_in_memory_bytes: 1 << 20, max_cache_bytes: None, temp_dir: PathBuf::from("/tmp"), default_row_cap: 0, default_range: "1h".into() }
    }

    fn sample_table() -> Table {
        Table {
            fields: vec![FieldDef { name: "a".into(), kind: None, agg: None }, FieldDef { name: "b".into(), kind: None, agg: None }],
            rows: Some(vec![vec![Value::from(1), Value::from("x")], vec![Value::from(2), Value::from("y,z")]]),
            columns: None,
            status: Value::Null,
        }
    }

    #[tokio::test]
    async fn ndjson_one_object_per_line() {
        let payload = encode(&[sample_table()], Format::Ndjson, &limits()).await.unwrap();
        let Payload::Bytes(bytes) = payload else { panic!("expected bytes") };
        let text = String::from_utf8((*bytes).clone()).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().next().unwrap().contains("\"a\":1"));
    }

    #[tokio::test]
    async fn csv_escapes_commas() {
        let payload = encode(&[sample_table()], Format::Csv, &limits()).await.unwrap();
        let Payload::Bytes(bytes) = payload else { panic!("expected bytes") };
        let text = String::from_utf8((*bytes).clone()).unwrap();
        assert_eq!(text, "a,b\n1,x\n2,\"y,z\"\n");
    }

    #[tokio::test]
    async fn empty_table_boundary_behaviors() {
        let empty: Vec<Table> = Vec::new();
        let ndjson = encode(&empty, Format::Ndjson, &limits()).await.unwrap();
        let Payload::Bytes(b) = ndjson else { panic!() };
        assert_eq!(b.as_slice(), b"");

        let csv = encode(&empty, Format::Csv, &limits()).await.unwrap();
        let Payload::Bytes(b) = csv else { panic!() };
        assert_eq!(b.as_slice(), b"");

        let json = encode(&empty, Format::Json, &limits()).await.unwrap();
        let Payload::Bytes(b) = json else { panic!() };
        assert_eq!(b.as_slice(), b"[]\n");
    }

    #[tokio::test]
    async fn large_result_spills_to_disk() {
        let mut rows = Vec::new();
        for i in 0..10_000 {
            rows.push(vec![Value::from(i), Value::from("x".repeat(50))]);
        }
        let table = Table {
            fields: vec![FieldDef { name: "a".into(), kind: None, agg: None }, FieldDef { name: "b".into(), kind: None, agg: None }],
            rows: Some(rows),
            columns: None,
            status: Value::Null,
        };
        let mut small_limits = limits();
        small_limits.max_in_memory_bytes = 1024;
        let payload = encode(&[table], Format::Ndjson, &small_limits).await.unwrap();
        match payload {
            Payload::File { size, .. } => assert!(size > 1024),
            Payload::Bytes(_) => panic!("expected spill to disk"),
        }
    }
}
