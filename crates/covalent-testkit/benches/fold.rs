//! Benchmark folding transactions into map and list views.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use covalent_crdt::{After, CoList, CoMap, DecodedTx, ListOp, MapOp};
use covalent_testkit::decoded_tx;
use serde_json::json;

/// `n` map sets over a handful of keys, alternating between two writers.
fn map_txs(n: u32) -> Vec<DecodedTx> {
    (0..n)
        .map(|i| {
            let change = MapOp::set(format!("key{}", i % 16), json!(i)).to_value();
            decoded_tx(1 + (i % 2) as u8, i / 2, u64::from(i), vec![change])
        })
        .collect()
}

/// `n` appends, each after the previous item.
fn list_txs(n: u32) -> Vec<DecodedTx> {
    let mut txs: Vec<DecodedTx> = Vec::with_capacity(n as usize);
    for i in 0..n {
        let after = match txs.last() {
            Some(prev) => After::Op(prev.op_id(0)),
            None => After::Start,
        };
        let op = ListOp::App {
            value: json!(i),
            after,
        };
        txs.push(decoded_tx(1, i, u64::from(i), vec![op.to_value()]));
    }
    txs
}

fn bench_fold(c: &mut Criterion) {
    let mut group = c.benchmark_group("fold");
    for n in [100u32, 1_000, 10_000] {
        group.throughput(Throughput::Elements(u64::from(n)));

        let txs = map_txs(n);
        group.bench_with_input(BenchmarkId::new("comap", n), &txs, |b, txs| {
            b.iter(|| black_box(CoMap::from_transactions(txs.iter())))
        });

        let txs = list_txs(n);
        group.bench_with_input(BenchmarkId::new("colist", n), &txs, |b, txs| {
            b.iter(|| black_box(CoList::from_transactions(txs.iter())))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_fold);
criterion_main!(benches);
