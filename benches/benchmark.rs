use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};

use ccdb::lexical::Tokenizer;
use ccdb::resolve::{NewAssignment, Query};
use ccdb::session::Session;
use ccdb::table::Table;

fn calibration_text(rows: usize) -> String {
    let mut text = String::from("# channel gain offset label\n");
    for row in 0..rows {
        text.push_str(&format!("{} {}.25 -{}.5 \"channel {}\" # row {}\n", row, row, row, row, row));
    }
    text
}

fn tokenizing(c: &mut Criterion) {
    let text = calibration_text(1000);
    let tokenizer = Tokenizer::new();
    c.bench_function("split 1000 rows", |b| b.iter(|| tokenizer.split(black_box(&text))));
    c.bench_function("parse 1000 rows into a table", |b| {
        b.iter(|| Table::parse(black_box(&text), 1000, 4))
    });
}

fn resolving(c: &mut Criterion) {
    let session = Session::in_memory().expect("session");
    session.make_directory("bench", "/", "").expect("directory");
    session
        .create_type_table(
            "gains",
            "/bench",
            100,
            &[("channel", "int"), ("gain", "double"), ("offset", "double"), ("label", "string")],
            "",
        )
        .expect("type table");
    for period in 0..50 {
        session
            .create_assignment(
                &NewAssignment::from_text("/bench/gains", &calibration_text(100)).runs(period * 100, period * 100 + 99),
            )
            .expect("assignment");
    }
    c.bench_function("resolve latest of 50 periods", |b| {
        b.iter(|| session.resolve(black_box(&Query::new("/bench/gains", 2550))))
    });
    c.bench_function("resolve version 1", |b| {
        b.iter(|| session.resolve(black_box(&Query::new("/bench/gains", 2550).version(1))))
    });
}

criterion_group!(benches, tokenizing, resolving);
criterion_main!(benches);
