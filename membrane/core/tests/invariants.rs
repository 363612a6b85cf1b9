use membrane_core::{Membrane, PSystem};
use membrane_spec::{
    Boundary, BoundaryPolicy, ConnectionType, MembraneState, PSystemConfig, PortId,
    TENSOR_INPUT, TENSOR_OUTPUT,
};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Create(usize),
    Dissolve(usize, bool),
    DissolveTree(usize),
    Replicate(usize, Option<usize>, bool),
    Connect(usize, usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => any::<usize>().prop_map(Op::Create),
        2 => (any::<usize>(), any::<bool>()).prop_map(|(m, r)| Op::Dissolve(m, r)),
        1 => any::<usize>().prop_map(Op::DissolveTree),
        2 => (any::<usize>(), proptest::option::of(any::<usize>()), any::<bool>())
            .prop_map(|(m, p, c)| Op::Replicate(m, p, c)),
        2 => (any::<usize>(), any::<usize>()).prop_map(|(a, b)| Op::Connect(a, b)),
    ]
}

fn pick(sys: &PSystem, n: usize) -> Option<membrane_spec::MembraneId> {
    let all = sys.membranes();
    if all.is_empty() {
        None
    } else {
        Some(all[n % all.len()].id().clone())
    }
}

proptest! {
    #[test]
    fn tree_invariants_hold_under_random_mutation(
        max_membranes in 1usize..24,
        max_depth in 1usize..5,
        ops in proptest::collection::vec(op(), 1..60),
    ) {
        let sys = PSystem::new(PSystemConfig {
            id: "p".into(),
            max_membranes,
            max_depth,
            ..PSystemConfig::default()
        })
        .unwrap();
        sys.add_root_membrane(Membrane::new("root", "root", MembraneState::default(), Boundary::default()))
            .unwrap();

        for op in ops {
            let before = sys.get_statistics();
            match op {
                Op::Create(n) => {
                    if let Some(parent) = pick(&sys, n) {
                        let depth = sys.membrane(&parent).unwrap().depth();
                        let result = sys.create_child_membrane(&parent, MembraneState::default(), None, None);
                        if depth + 1 >= max_depth || before.total_membranes >= max_membranes {
                            prop_assert!(result.is_err());
                            prop_assert_eq!(sys.get_statistics().total_ports, before.total_ports);
                        } else {
                            prop_assert!(result.is_ok());
                        }
                    }
                }
                Op::Dissolve(n, redistribute) => {
                    if let Some(id) = pick(&sys, n) {
                        let _ = sys.dissolve_membrane(&id, redistribute);
                    }
                }
                Op::DissolveTree(n) => {
                    if let Some(id) = pick(&sys, n) {
                        let removed = sys.dissolve_membrane_recursive(&id).unwrap();
                        prop_assert_eq!(sys.membrane_count(), before.total_membranes - removed);
                    }
                }
                Op::Replicate(n, parent, children) => {
                    if let Some(source) = pick(&sys, n) {
                        let parent = parent.and_then(|p| pick(&sys, p));
                        let _ = sys.replicate_membrane(&source, parent.as_ref(), children);
                    }
                }
                Op::Connect(a, b) => {
                    if let (Some(a), Some(b)) = (pick(&sys, a), pick(&sys, b)) {
                        let _ = sys.connect_ports(
                            &PortId::for_membrane(&a, TENSOR_OUTPUT),
                            &PortId::for_membrane(&b, TENSOR_INPUT),
                            ConnectionType::Direct,
                        );
                    }
                }
            }
            prop_assert!(sys.membrane_count() <= max_membranes);
            prop_assert_eq!(sys.verify_invariants(), Ok(()));
            for m in sys.membranes() {
                if let Some(parent) = m.parent() {
                    let parent = sys.membrane(parent).unwrap();
                    prop_assert!(parent.children().contains(m.id()));
                    prop_assert_eq!(m.depth(), parent.depth() + 1);
                }
                prop_assert_eq!(sys.ports_of(m.id()).len(), 3);
            }
        }
    }

    #[test]
    fn boundary_decisions(
        outbound in 0.0f64..=1.0,
        bidirectional in 0.0f64..=1.0,
        policy in prop_oneof![
            Just(BoundaryPolicy::Open),
            Just(BoundaryPolicy::Closed),
            Just(BoundaryPolicy::Selective),
            Just(BoundaryPolicy::SemiPermeable),
        ],
    ) {
        let boundary = Boundary::new(policy).with_permeability(0.5, outbound, bidirectional);
        let expected = match policy {
            BoundaryPolicy::Open => true,
            BoundaryPolicy::Closed => false,
            BoundaryPolicy::Selective => outbound > 0.5,
            BoundaryPolicy::SemiPermeable => bidirectional > 0.3,
        };
        prop_assert_eq!(boundary.allows_connection(), expected);

        let sys = PSystem::new(PSystemConfig::default()).unwrap();
        let a = sys.add_root_membrane(Membrane::new("a", "a", MembraneState::default(), boundary)).unwrap();
        let b = sys.add_root_membrane(Membrane::new("b", "b", MembraneState::default(), Boundary::default())).unwrap();
        let connected = sys.connect_ports(
            &PortId::for_membrane(&a, TENSOR_OUTPUT),
            &PortId::for_membrane(&b, TENSOR_INPUT),
            ConnectionType::Direct,
        );
        prop_assert_eq!(connected.is_ok(), expected);
    }
}
