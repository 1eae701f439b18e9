//! Benchmarks for the wire codec and the catalog fold.
//!
//! Run with: `cargo bench`

use bytes::{Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pgtyped::infer::catalog::reduce_type_rows;
use pgtyped::infer::TypeRow;
use pgtyped::wire::backend::{PARAMETER_DESCRIPTION, READY_FOR_QUERY, ROW_DESCRIPTION};
use pgtyped::wire::frontend::{Describe, Parse, DESCRIBE, PARSE, SYNC};
use pgtyped::wire::{decode, encode, scan, FieldValue, Record};

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

fn row_description(columns: usize) -> Bytes {
    let fields = (0..columns)
        .map(|i| {
            Record::new()
                .with("name", FieldValue::Str(format!("column_{}", i)))
                .with("tableOID", FieldValue::Int32(16384))
                .with("columnAttrNumber", FieldValue::Int16(i as i16 + 1))
                .with("typeOID", FieldValue::Int32(23))
                .with("typeSize", FieldValue::Int16(4))
                .with("typeModifier", FieldValue::Int32(-1))
                .with("formatCode", FieldValue::Int16(0))
        })
        .collect();
    ROW_DESCRIPTION
        .encode(&Record::new().with("fields", FieldValue::Array(fields)))
        .expect("valid RowDescription")
}

fn describe_reply(columns: usize) -> Bytes {
    let params = (0..4)
        .map(|_| Record::new().with("oid", FieldValue::Int32(23)))
        .collect();
    let mut reply = BytesMut::new();
    reply.extend_from_slice(
        &PARAMETER_DESCRIPTION
            .encode(&Record::new().with("dataTypes", FieldValue::Array(params)))
            .expect("valid ParameterDescription"),
    );
    reply.extend_from_slice(&row_description(columns));
    reply.extend_from_slice(
        &READY_FOR_QUERY
            .encode(&Record::new().with("status", FieldValue::Char(b'I')))
            .expect("valid ReadyForQuery"),
    );
    reply.freeze()
}

fn enum_rows(labels: usize) -> Vec<TypeRow> {
    let mut rows: Vec<TypeRow> = (0..labels)
        .map(|i| TypeRow {
            oid: 16000,
            type_name: "status".into(),
            type_kind: 'e',
            enum_label: Some(format!("label_{}", i)),
            type_category: Some('E'),
            element_type_oid: None,
        })
        .collect();
    rows.push(TypeRow {
        oid: 16001,
        type_name: "_status".into(),
        type_kind: 'b',
        enum_label: None,
        type_category: Some('A'),
        element_type_oid: Some(16000),
    });
    rows
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    for columns in [1usize, 10, 100] {
        let buf = row_description(columns);
        group.bench_with_input(
            BenchmarkId::new("row_description", columns),
            &buf,
            |b, buf| b.iter(|| decode(&ROW_DESCRIPTION, black_box(buf), 0)),
        );
        let reply = describe_reply(columns);
        group.bench_with_input(
            BenchmarkId::new("scan_describe_reply", columns),
            &reply,
            |b, reply| {
                b.iter(|| scan(&[&PARAMETER_DESCRIPTION, &ROW_DESCRIPTION], black_box(reply)))
            },
        );
    }
    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    let parse = Parse {
        query: "SELECT id, status FROM orders WHERE id = $1".into(),
        ..Parse::default()
    };
    let describe = Describe::statement("");
    group.bench_function("probe_request", |b| {
        b.iter(|| {
            let mut request = BytesMut::new();
            request.extend_from_slice(&encode(&PARSE, black_box(&parse)).expect("Parse"));
            request.extend_from_slice(&encode(&DESCRIBE, &describe).expect("Describe"));
            request.extend_from_slice(&encode(&SYNC, &()).expect("Sync"));
            request
        })
    });
    group.finish();
}

fn bench_catalog_fold(c: &mut Criterion) {
    let mut group = c.benchmark_group("catalog");
    for labels in [3usize, 50] {
        let rows = enum_rows(labels);
        group.bench_with_input(BenchmarkId::new("reduce_type_rows", labels), &rows, |b, rows| {
            b.iter(|| reduce_type_rows(black_box(rows)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_decode, bench_encode, bench_catalog_fold);
criterion_main!(benches);
