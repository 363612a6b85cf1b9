use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use membrane_core::{Membrane, PSystem};
use membrane_spec::{
    Boundary, Comparison, MembraneSelector, MembraneState, PSystemConfig, PSystemRule,
    RuleAction, RuleCondition, RuleKind,
};

fn seeded(membranes: usize) -> PSystem {
    let sys = PSystem::new(PSystemConfig {
        max_membranes: membranes * 4,
        max_depth: membranes,
        ..PSystemConfig::default()
    })
    .expect("default config is valid");
    let root = sys
        .add_root_membrane(Membrane::new(
            "root",
            "root",
            MembraneState::new(vec![0.0; 16], vec![4, 4], "k", "dense"),
            Boundary::default(),
        ))
        .expect("empty system admits a root");
    let mut parent = root;
    for n in 1..membranes {
        let child = sys
            .create_child_membrane(&parent, MembraneState::default(), None, None)
            .expect("capacity");
        if n % 4 == 0 {
            parent = child;
        }
    }
    sys.add_rule(
        PSystemRule::new("grow", RuleKind::Creation, 0)
            .when(RuleCondition::MembraneCount {
                comparison: Comparison::Lt((membranes * 2) as f64),
            })
            .then(RuleAction::CreateMembrane {
                parent: MembraneSelector::Strategy,
                name: None,
                boundary: None,
                state: None,
            }),
    )
    .expect("fresh rule id");
    sys.add_rule(PSystemRule::new("balance", RuleKind::Transformation, 1).then(RuleAction::BalanceLoad))
        .expect("fresh rule id");
    sys.start();
    sys
}

fn bench_evolution_cycle(c: &mut Criterion) {
    c.bench_function("evolution_cycle_64", |b| {
        b.iter_batched(
            || seeded(64),
            |sys| black_box(sys.execute_evolution_cycle()),
            BatchSize::SmallInput,
        );
    });
}

fn bench_topology(c: &mut Criterion) {
    c.bench_function("analyze_topology_256", |b| {
        let sys = seeded(256);
        b.iter(|| black_box(sys.analyze_topology()));
    });
}

criterion_group!(benches, bench_evolution_cycle, bench_topology);
criterion_main!(benches);
