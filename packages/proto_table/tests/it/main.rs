use std::sync::Once;

use anyhow::Result;
use prost::Message;
use prost_reflect::{DescriptorPool, DynamicMessage, MessageDescriptor, Value};
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
    FileDescriptorProto, FileDescriptorSet,
};
use rusqlite::{params, Connection};

use proto_table::{
    paginate, populate, setup_proto_table, write_row, write_rows, ProtoColumn, ProtoDb,
    ProtoIndexSpec, ProtoTableSpec, ResultList, ResultRow, SetupScript, TableError,
};

static INIT: Once = Once::new();

fn field(name: &str, number: i32, r#type: Type, label: Label) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_owned()),
        number: Some(number),
        label: Some(label as i32),
        r#type: Some(r#type as i32),
        ..Default::default()
    }
}

fn file_descriptor_set() -> FileDescriptorSet {
    let person = DescriptorProto {
        name: Some("Person".to_owned()),
        field: vec![
            field("name", 1, Type::String, Label::Optional),
            FieldDescriptorProto {
                default_value: Some("42".to_owned()),
                ..field("age", 2, Type::Int32, Label::Optional)
            },
            FieldDescriptorProto {
                type_name: Some(".people.Phone".to_owned()),
                ..field("phones", 3, Type::Message, Label::Repeated)
            },
        ],
        ..Default::default()
    };

    let phone = DescriptorProto {
        name: Some("Phone".to_owned()),
        field: vec![
            field("number", 1, Type::String, Label::Optional),
            FieldDescriptorProto {
                type_name: Some(".people.PhoneType".to_owned()),
                ..field("type", 2, Type::Enum, Label::Optional)
            },
        ],
        ..Default::default()
    };

    let phone_type = EnumDescriptorProto {
        name: Some("PhoneType".to_owned()),
        value: vec![
            EnumValueDescriptorProto {
                name: Some("MOBILE".to_owned()),
                number: Some(0),
                ..Default::default()
            },
            EnumValueDescriptorProto {
                name: Some("HOME".to_owned()),
                number: Some(1),
                ..Default::default()
            },
        ],
        ..Default::default()
    };

    FileDescriptorSet {
        file: vec![FileDescriptorProto {
            name: Some("people.proto".to_owned()),
            package: Some("people".to_owned()),
            syntax: Some("proto2".to_owned()),
            message_type: vec![person, phone],
            enum_type: vec![phone_type],
            ..Default::default()
        }],
    }
}

fn setup() {
    INIT.call_once(|| {
        let bytes = file_descriptor_set().encode_to_vec();
        sqlite_protobuf::load_file_descriptor_set(&bytes)
            .expect("failed to register test descriptors");
    });
}

fn connection() -> Connection {
    setup();

    let conn = Connection::open_in_memory().expect("failed to open database");
    sqlite_protobuf::register_functions(&conn).expect("failed to register functions");
    conn
}

fn person_descriptor() -> MessageDescriptor {
    DescriptorPool::global()
        .get_message_by_name("people.Person")
        .expect("message type not registered")
}

fn person(name: &str, age: Option<i32>) -> DynamicMessage {
    let mut person = DynamicMessage::new(person_descriptor());
    person.set_field_by_name("name", Value::String(name.to_owned()));
    if let Some(age) = age {
        person.set_field_by_name("age", Value::I32(age));
    }
    person
}

fn people_spec() -> ProtoTableSpec {
    ProtoTableSpec {
        name: "people".to_owned(),
        message_name: "people.Person".to_owned(),
        columns: vec![
            ProtoColumn::new("name", "TEXT", "$.name"),
            ProtoColumn::new("age", "INTEGER", "$.age"),
            ProtoColumn::new("phone", "TEXT", "$.phones[0].number").weak(),
        ],
        indexes: vec![ProtoIndexSpec::new("name_age", &["name", "age"])],
        log_sql: false,
    }
}

fn install(conn: &Connection, spec: &ProtoTableSpec) -> Result<(), TableError> {
    let mut cache: Option<SetupScript> = None;
    setup_proto_table(&mut cache, conn, spec)
}

fn proto_index_names(conn: &Connection, table: &str) -> Vec<String> {
    let mut stmt = conn
        .prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'index' AND tbl_name = ?1 AND name LIKE 'proto_%'
             ORDER BY name",
        )
        .unwrap();
    let names = stmt
        .query_map([format!("{table}_raw")], |row| row.get(0))
        .unwrap()
        .collect::<rusqlite::Result<Vec<String>>>()
        .unwrap();
    names
}

#[test]
fn install_creates_a_queryable_view() -> Result<()> {
    let conn = connection();
    install(&conn, &people_spec())?;

    conn.execute(
        "INSERT INTO people(proto) VALUES (?1)",
        params![person("Ada", Some(30)).encode_to_vec()],
    )?;
    conn.execute(
        "INSERT INTO people(proto) VALUES (?1)",
        params![person("Grace", None).encode_to_vec()],
    )?;

    let (name, age): (String, i64) = conn.query_row(
        "SELECT name, age FROM people WHERE id = 1",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    assert_eq!(name, "Ada");
    assert_eq!(age, 30);

    // The view's NULL extraction default makes unset fields come out as
    // SQL NULL rather than the protobuf declared default.
    let age: Option<i64> =
        conn.query_row("SELECT age FROM people WHERE id = 2", [], |row| row.get(0))?;
    assert_eq!(age, None);

    // Selecting by an indexed column goes through the functional index.
    let id: i64 = conn.query_row(
        "SELECT id FROM people WHERE name = 'Grace'",
        [],
        |row| row.get(0),
    )?;
    assert_eq!(id, 2);

    // Updates and deletes route through the INSTEAD OF triggers.
    conn.execute(
        "UPDATE people SET proto = ?1 WHERE id = 1",
        params![person("Ada", Some(31)).encode_to_vec()],
    )?;
    let age: i64 = conn.query_row("SELECT age FROM people WHERE id = 1", [], |row| row.get(0))?;
    assert_eq!(age, 31);

    conn.execute("DELETE FROM people WHERE id = 2", [])?;
    let count: i64 = conn.query_row("SELECT count(*) FROM people", [], |row| row.get(0))?;
    assert_eq!(count, 1);

    Ok(())
}

#[test]
fn reinstall_is_idempotent() -> Result<()> {
    let conn = connection();
    let spec = people_spec();

    let mut cache: Option<SetupScript> = None;
    setup_proto_table(&mut cache, &conn, &spec)?;
    let before = proto_index_names(&conn, "people");

    // Re-running with the cached script (and with a fresh one) changes
    // nothing and drops nothing.
    setup_proto_table(&mut cache, &conn, &spec)?;
    install(&conn, &spec)?;

    let after = proto_index_names(&conn, "people");
    assert_eq!(before, after);
    // Two auto indexes (name, age — phone is weak) plus one explicit.
    assert_eq!(after.len(), 3);

    Ok(())
}

#[test]
fn changed_expression_rotates_the_index() -> Result<()> {
    let conn = connection();
    install(&conn, &people_spec())?;
    let before = proto_index_names(&conn, "people");

    let mut changed = people_spec();
    changed.columns[1].path = "$.phones[0].type".to_owned();
    install(&conn, &changed)?;
    let after = proto_index_names(&conn, "people");

    assert_eq!(before.len(), after.len());
    assert_ne!(before, after);

    // The stale age index is gone, not merely shadowed.
    let age_indexes: Vec<&String> = after
        .iter()
        .filter(|name| name.starts_with("proto_autoindex__people__age__"))
        .collect();
    assert_eq!(age_indexes.len(), 1);
    assert!(!before.contains(age_indexes[0]));

    Ok(())
}

#[test]
fn install_failure_names_the_table() {
    let conn = connection();

    // A space in the table name breaks the generated DDL mid-install.
    let broken = ProtoTableSpec {
        name: "broken table".to_owned(),
        message_name: "people.Person".to_owned(),
        columns: vec![ProtoColumn::new("name", "TEXT", "$.name")],
        ..Default::default()
    };

    let err = install(&conn, &broken).expect_err("expected install failure");
    assert!(matches!(&err, TableError::Install { table, .. } if table == "broken table"));
    // The failed exclusive transaction was rolled back.
    assert!(conn.is_autocommit());
}

#[test]
fn write_rows_moves_rows_and_assigns_ids() -> Result<()> {
    let conn = connection();
    install(&conn, &people_spec())?;

    let mut input = ResultList::new();
    let mut output = ResultList::new();
    input.push(0, Some(person("Ada", Some(30))), None)?;
    input.push(0, Some(person("Grace", None)), None)?;

    write_rows(&conn, &mut output, &mut input, "people")?;

    assert!(input.is_empty());
    assert_eq!(output.len(), 2);
    assert_eq!(output.rows()[0].id, 1);
    assert_eq!(output.rows()[1].id, 2);

    let name: String = conn.query_row("SELECT name FROM people WHERE id = 2", [], |row| {
        row.get(0)
    })?;
    assert_eq!(name, "Grace");

    // Updating through write_row goes through the view trigger.
    let mut row = ResultRow::new(1, Some(person("Ada", Some(31))), None);
    write_row(&conn, &mut row, "people")?;
    assert_eq!(row.id, 1);

    let age: i64 = conn.query_row("SELECT age FROM people WHERE id = 1", [], |row| row.get(0))?;
    assert_eq!(age, 31);

    Ok(())
}

#[test]
fn write_rows_stops_at_the_first_failure() -> Result<()> {
    let conn = connection();
    install(&conn, &people_spec())?;

    let mut input = ResultList::new();
    let mut output = ResultList::new();
    input.push(0, Some(person("Ada", None)), None)?;
    // No message and no bytes binds NULL, violating proto NOT NULL.
    input.push(0, None, None)?;
    input.push(0, Some(person("Grace", None)), None)?;

    let err = write_rows(&conn, &mut output, &mut input, "people");
    assert!(err.is_err());

    // The good row moved; the failed one and everything after stayed.
    assert_eq!(output.len(), 1);
    assert_eq!(output.rows()[0].id, 1);
    assert_eq!(input.len(), 2);

    Ok(())
}

#[test]
fn populate_reads_and_optionally_parses() -> Result<()> {
    let conn = connection();
    install(&conn, &people_spec())?;

    let mut input = ResultList::new();
    let mut output = ResultList::new();
    input.push(0, Some(person("Ada", Some(30))), None)?;
    input.push(0, Some(person("Grace", None)), None)?;
    write_rows(&conn, &mut output, &mut input, "people")?;

    let descriptor = person_descriptor();
    let name_field = descriptor.get_field_by_name("name").unwrap();

    let mut list = ResultList::new();
    {
        let mut stmt = conn.prepare("SELECT id, proto FROM people_raw ORDER BY id")?;
        let mut rows = stmt.query([])?;
        populate(&mut list, Some(&descriptor), &mut rows)?;
    }

    assert_eq!(list.len(), 2);
    let parsed = list.rows()[1].message.as_ref().expect("row should be parsed");
    assert_eq!(parsed.get_field(&name_field).as_str(), Some("Grace"));
    assert!(list.rows()[1].n_bytes() > 0);

    // Without a descriptor only the raw bytes are carried.
    let mut unparsed = ResultList::new();
    {
        let mut stmt = conn.prepare("SELECT id, proto FROM people_raw ORDER BY id")?;
        let mut rows = stmt.query([])?;
        populate(&mut unparsed, None, &mut rows)?;
    }
    assert_eq!(unparsed.len(), 2);
    assert!(unparsed.rows()[0].message.is_none());
    assert!(unparsed.rows()[0].n_bytes() > 0);

    Ok(())
}

#[test]
fn populate_flags_malformed_rows() -> Result<()> {
    let conn = connection();
    install(&conn, &people_spec())?;

    conn.execute(
        "INSERT INTO people(proto) VALUES (?1)",
        params![person("Ada", None).encode_to_vec()],
    )?;
    // Wire type 7 does not exist; this blob cannot parse.
    conn.execute(
        "INSERT INTO people_raw(proto) VALUES (x'ffffffff')",
        [],
    )?;

    let descriptor = person_descriptor();
    let mut list = ResultList::new();
    let mut stmt = conn.prepare("SELECT id, proto FROM people_raw ORDER BY id")?;
    let mut rows = stmt.query([])?;

    let err = populate(&mut list, Some(&descriptor), &mut rows);
    assert!(matches!(err, Err(TableError::MalformedRow { id: 2 })));
    // The row before the malformed one was already appended.
    assert_eq!(list.len(), 1);

    Ok(())
}

#[test]
fn batch_frames_cycle_on_the_write_threshold() -> Result<()> {
    setup();

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("batch.db");

    let writer = Connection::open(&path)?;
    writer.execute_batch("CREATE TABLE kv (v INTEGER NOT NULL);")?;
    let observer = Connection::open(&path)?;

    let mut db = ProtoDb::with_batch_size(writer, 2);

    db.batch_begin()?;
    for v in 0..5 {
        db.connection()
            .execute("INSERT INTO kv(v) VALUES (?1)", params![v])?;
        db.count_writes(1);
    }

    // Two full batches were flushed mid-frame; the fifth write is still
    // pending in the open transaction.
    let committed: i64 = observer.query_row("SELECT count(*) FROM kv", [], |row| row.get(0))?;
    assert_eq!(committed, 4);

    db.batch_end();
    let committed: i64 = observer.query_row("SELECT count(*) FROM kv", [], |row| row.get(0))?;
    assert_eq!(committed, 5);

    Ok(())
}

#[test]
fn pinned_transactions_suppress_cycling() -> Result<()> {
    setup();

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("pinned.db");

    let writer = Connection::open(&path)?;
    writer.execute_batch("CREATE TABLE kv (v INTEGER NOT NULL);")?;
    let observer = Connection::open(&path)?;

    let mut db = ProtoDb::with_batch_size(writer, 2);

    // A correctness transaction: nothing may be committed until it ends.
    db.transaction_begin()?;
    for v in 0..5 {
        db.connection()
            .execute("INSERT INTO kv(v) VALUES (?1)", params![v])?;
        db.count_writes(1);
    }

    let committed: i64 = observer.query_row("SELECT count(*) FROM kv", [], |row| row.get(0))?;
    assert_eq!(committed, 0);

    db.transaction_end();
    let committed: i64 = observer.query_row("SELECT count(*) FROM kv", [], |row| row.get(0))?;
    assert_eq!(committed, 5);

    Ok(())
}

#[test]
fn paginate_walks_id_ranges() -> Result<()> {
    let conn = connection();
    install(&conn, &people_spec())?;

    let mut input = ResultList::new();
    let mut output = ResultList::new();
    for i in 0..5 {
        input.push(0, Some(person(&format!("p{i}"), None)), None)?;
    }
    write_rows(&conn, &mut output, &mut input, "people")?;

    assert_eq!(paginate(&conn, "people", 0, 2)?, 2);
    assert_eq!(paginate(&conn, "people", 2, 2)?, 4);
    assert_eq!(paginate(&conn, "people", 4, 10)?, 5);
    assert_eq!(paginate(&conn, "people", 5, 10)?, 5);

    Ok(())
}
