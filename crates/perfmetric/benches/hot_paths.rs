use criterion::{Criterion, black_box, criterion_group, criterion_main};
use perfmetric::{FormulaSet, canonicalize, parse, rewrite_in_terms_of_others, simplify};

const TOPDOWN_BACKEND: &str = "1 - (IDQ_UOPS_NOT_DELIVERED.CORE / (4 * CPU_CLK_UNHALTED.THREAD) \
    + (UOPS_ISSUED.ANY - UOPS_RETIRED.RETIRE_SLOTS + 4 * INT_MISC.RECOVERY_CYCLES) \
    / (4 * CPU_CLK_UNHALTED.THREAD) + UOPS_RETIRED.RETIRE_SLOTS / (4 * CPU_CLK_UNHALTED.THREAD))";

fn topdown_set() -> FormulaSet {
    let mut set = FormulaSet::new();
    let formulas = [
        ("slots", "4 * CPU_CLK_UNHALTED.THREAD"),
        ("frontend_bound", "IDQ_UOPS_NOT_DELIVERED.CORE / (4 * CPU_CLK_UNHALTED.THREAD)"),
        (
            "bad_speculation",
            "(UOPS_ISSUED.ANY - UOPS_RETIRED.RETIRE_SLOTS + 4 * INT_MISC.RECOVERY_CYCLES) / (4 * CPU_CLK_UNHALTED.THREAD)",
        ),
        ("retiring", "UOPS_RETIRED.RETIRE_SLOTS / (4 * CPU_CLK_UNHALTED.THREAD)"),
        ("backend_bound", TOPDOWN_BACKEND),
    ];
    for (name, text) in formulas {
        set.push_text(name, text).unwrap();
    }
    set
}

fn bench_parse(c: &mut Criterion) {
    c.bench_function("parse_topdown_formula", |b| {
        b.iter(|| parse(black_box(TOPDOWN_BACKEND)).unwrap())
    });
}

fn bench_canonicalize(c: &mut Criterion) {
    let query = "(2 * CYCLES) - (0.5 * CYCLES) + 0 if has_event(CYCLES) else 0";
    c.bench_function("canonicalize_formula", |b| {
        b.iter(|| canonicalize(black_box(query)).unwrap())
    });
}

fn bench_simplify(c: &mut Criterion) {
    let expr = parse(TOPDOWN_BACKEND).unwrap();
    c.bench_function("simplify_topdown_formula", |b| {
        b.iter(|| simplify(black_box(&expr)))
    });
}

fn bench_rewrite(c: &mut Criterion) {
    let set = topdown_set();
    c.bench_function("rewrite_topdown_set", |b| {
        b.iter(|| rewrite_in_terms_of_others(black_box(&set)))
    });
}

criterion_group!(
    hot_paths,
    bench_parse,
    bench_canonicalize,
    bench_simplify,
    bench_rewrite
);
criterion_main!(hot_paths);
