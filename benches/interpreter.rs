//! Benchmark suite for the CSV interpreter
//!
//! Measures interpretation of both supported layouts at several input sizes
//! using the divan benchmarking framework.
//!
//! # Running Benchmarks
//!
//! ```bash
//! cargo bench
//! ```
//!
//! Inputs are generated in memory: every row is a distinct trade, with a mix
//! of stock, option and crypto descriptions, so deduplication keeps them all.

use rust_tax_import_engine::io::Interpreter;
use std::fmt::Write;

fn main() {
    divan::main();
}

const SIZES: &[usize] = &[100, 1_000, 10_000];

fn description(i: usize) -> String {
    match i % 3 {
        0 => format!("{} SH ACME{}", i % 500 + 1, i),
        1 => format!("ACME{} 06/21/2024 {}.00 CALL OPT", i, i % 90 + 10),
        _ => format!("BTC LOT {}", i),
    }
}

fn primary_input(rows: usize) -> String {
    let mut csv = String::from(
        "1099-B,ACCOUNT NUMBER,TAX YEAR,DESCRIPTION,DATE ACQUIRED,SALE DATE,SALES PRICE,COST BASIS,TERM\n",
    );
    for i in 0..rows {
        let _ = writeln!(
            csv,
            "1099-B,X1234,2024,{},2023{:02}{:02},2024{:02}{:02},\"${},{:03}.{:02}\",{}.50,{}",
            description(i),
            i % 12 + 1,
            i % 28 + 1,
            (i + 3) % 12 + 1,
            (i + 7) % 28 + 1,
            i % 9 + 1,
            i % 1000,
            i % 100,
            i,
            if i % 2 == 0 { "LONG" } else { "SHORT" }
        );
    }
    csv
}

fn generic_input(rows: usize) -> String {
    let mut csv = String::from("Symbol,Quantity,Date Acquired,Date Sold,Proceeds,Cost\n");
    for i in 0..rows {
        let _ = writeln!(
            csv,
            "{},{},{}/{}/2023,2024-{:02}-{:02},{}.25,({})",
            description(i),
            i % 50 + 1,
            i % 12 + 1,
            i % 28 + 1,
            (i + 5) % 12 + 1,
            (i + 2) % 28 + 1,
            i * 3,
            i
        );
    }
    csv
}

/// Interpret a 1099-B section export
#[divan::bench(args = SIZES)]
fn primary_layout(bencher: divan::Bencher, rows: usize) {
    let input = primary_input(rows);
    let interpreter = Interpreter::default();

    bencher.bench_local(|| interpreter.interpret(divan::black_box(&input)));
}

/// Interpret a generic header export
#[divan::bench(args = SIZES)]
fn generic_layout(bencher: divan::Bencher, rows: usize) {
    let input = generic_input(rows);
    let interpreter = Interpreter::default();

    bencher.bench_local(|| interpreter.interpret(divan::black_box(&input)));
}
