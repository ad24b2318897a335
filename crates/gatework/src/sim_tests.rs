//! End-to-end hierarchy tests: a two-bit ripple-carry adder built from
//! full-adder instantiations, slices, and a concatenated sum.

use crate::behavior::{Behavior, SignalTerm};
use crate::dimension::Dimension;
use crate::logic_tree::LogicTree;
use crate::model::{Design, Direction, ModuleId, SignalId, SignalPath};
use crate::simulation::{Simulation, UniformStepPolicy};
use crate::stimulus::Stimulus;

fn leaf(design: &Design, m: ModuleId, s: SignalId, inverted: bool) -> LogicTree<SignalTerm> {
    let t = LogicTree::leaf(design.term(m, s).unwrap());
    if inverted { LogicTree::not(t) } else { t }
}

fn minterm(design: &Design, m: ModuleId, bits: [(SignalId, bool); 3]) -> LogicTree<SignalTerm> {
    LogicTree::and(
        bits.iter()
            .map(|(s, high)| leaf(design, m, *s, !high))
            .collect(),
    )
    .unwrap()
}

/// One-bit full adder from And/Or/Not primitives: sum as a sum-of-minterms
/// xor, carry as a two-of-three majority.
fn full_adder(design: &mut Design) -> ModuleId {
    let m = design.add_module("full_adder");
    let a = design.add_signal(m, "a", Dimension::exact(1).unwrap()).unwrap();
    let b = design.add_signal(m, "b", Dimension::exact(1).unwrap()).unwrap();
    let cin = design.add_signal(m, "cin", Dimension::exact(1).unwrap()).unwrap();
    let s = design.add_signal(m, "s", Dimension::exact(1).unwrap()).unwrap();
    let cout = design.add_signal(m, "cout", Dimension::exact(1).unwrap()).unwrap();
    design.add_port(m, a, Direction::Input).unwrap();
    design.add_port(m, b, Direction::Input).unwrap();
    design.add_port(m, cin, Direction::Input).unwrap();
    design.add_port(m, s, Direction::Output).unwrap();
    design.add_port(m, cout, Direction::Output).unwrap();

    let sum = LogicTree::or(vec![
        minterm(design, m, [(a, true), (b, false), (cin, false)]),
        minterm(design, m, [(a, false), (b, true), (cin, false)]),
        minterm(design, m, [(a, false), (b, false), (cin, true)]),
        minterm(design, m, [(a, true), (b, true), (cin, true)]),
    ])
    .unwrap();
    design.set_behavior(m, s, Behavior::Logic(sum)).unwrap();

    let majority = LogicTree::or(vec![
        LogicTree::and(vec![leaf(design, m, a, false), leaf(design, m, b, false)]).unwrap(),
        LogicTree::and(vec![leaf(design, m, a, false), leaf(design, m, cin, false)]).unwrap(),
        LogicTree::and(vec![leaf(design, m, b, false), leaf(design, m, cin, false)]).unwrap(),
    ])
    .unwrap();
    design
        .set_behavior(m, cout, Behavior::Logic(majority))
        .unwrap();
    m
}

/// Two-bit ripple-carry adder: a/b sliced per bit into two full-adder
/// instances, sum bits concatenated back into `y`.
fn ripple_adder(design: &mut Design) -> ModuleId {
    let fa = full_adder(design);
    let top = design.add_module("top");
    let a = design.add_signal(top, "a", Dimension::exact(2).unwrap()).unwrap();
    let b = design.add_signal(top, "b", Dimension::exact(2).unwrap()).unwrap();
    let cin = design.add_signal(top, "cin", Dimension::exact(1).unwrap()).unwrap();
    let s0 = design.add_signal(top, "s0", Dimension::exact(1).unwrap()).unwrap();
    let s1 = design.add_signal(top, "s1", Dimension::exact(1).unwrap()).unwrap();
    let c1 = design.add_signal(top, "c1", Dimension::exact(1).unwrap()).unwrap();
    let cout = design.add_signal(top, "cout", Dimension::exact(1).unwrap()).unwrap();
    design.add_port(top, a, Direction::Input).unwrap();
    design.add_port(top, b, Direction::Input).unwrap();
    design.add_port(top, cin, Direction::Input).unwrap();
    design.add_port(top, cout, Direction::Output).unwrap();

    let a0 = design.add_slice(top, "a0", a, 0, 0).unwrap();
    let a1 = design.add_slice(top, "a1", a, 1, 1).unwrap();
    let b0 = design.add_slice(top, "b0", b, 0, 0).unwrap();
    let b1 = design.add_slice(top, "b1", b, 1, 1).unwrap();
    design.add_concat(top, "y", vec![s0, s1]).unwrap();

    design.add_instance(top, "fa0", fa).unwrap();
    design.bind_port(top, "fa0", "a", a0).unwrap();
    design.bind_port(top, "fa0", "b", b0).unwrap();
    design.bind_port(top, "fa0", "cin", cin).unwrap();
    design.bind_port(top, "fa0", "s", s0).unwrap();
    design.bind_port(top, "fa0", "cout", c1).unwrap();

    design.add_instance(top, "fa1", fa).unwrap();
    design.bind_port(top, "fa1", "a", a1).unwrap();
    design.bind_port(top, "fa1", "b", b1).unwrap();
    design.bind_port(top, "fa1", "cin", c1).unwrap();
    design.bind_port(top, "fa1", "s", s1).unwrap();
    design.bind_port(top, "fa1", "cout", cout).unwrap();
    top
}

/// One (time, value) point per second enumerating every a/b/cin combination.
fn sweep(extract: impl Fn(u64) -> u64) -> Stimulus {
    Stimulus::time_defined((0u64..32).map(|i| (i as f64, extract(i))).collect()).unwrap()
}

#[test]
fn ripple_adder_matches_arithmetic_over_all_inputs() {
    let mut design = Design::new();
    let top = ripple_adder(&mut design);
    assert!(!design.has_circular_signals(top));

    let a_stim = sweep(|i| i & 3);
    let b_stim = sweep(|i| (i >> 2) & 3);
    let c_stim = sweep(|i| (i >> 4) & 1);

    let results = Simulation::new(&design, top)
        .stimulus("a", a_stim.clone())
        .stimulus("b", b_stim.clone())
        .stimulus("cin", c_stim.clone())
        .monitor(SignalPath::top("y"))
        .monitor(SignalPath::top("cout"))
        .monitor(SignalPath::new(["fa0"], "s"))
        .run(&UniformStepPolicy::new(0.5, 32.0).unwrap())
        .unwrap();

    let [y, cout, fa0_s] = &results[..] else {
        panic!("expected three monitored traces");
    };
    assert!(!y.is_empty());
    for (((t, vy), (_, vc)), (_, vs)) in y.samples().zip(cout.samples()).zip(fa0_s.samples()) {
        let a = a_stim.value_at(t);
        let b = b_stim.value_at(t);
        let cin = c_stim.value_at(t);
        let total = a + b + cin;
        assert_eq!(vy, total % 4, "sum at t={t}");
        assert_eq!(vc, total / 4, "carry at t={t}");
        assert_eq!(vs, (a ^ b ^ cin) & 1, "low sum bit at t={t}");
    }
}

#[test]
fn ripple_adder_emits_wirable_vhdl() {
    let mut design = Design::new();
    let top = ripple_adder(&mut design);

    let fa_text = crate::vhdl::generate(&design, design.find_module("full_adder").unwrap()).unwrap();
    assert!(fa_text.contains("entity full_adder is"));
    assert!(fa_text.contains("cout <="));

    let top_text = crate::vhdl::generate(&design, top).unwrap();
    assert!(top_text.contains("a : in std_logic_vector(1 downto 0)"));
    assert!(top_text.contains("fa0: entity work.full_adder"));
    assert!(top_text.contains("a => a(0)"));
    assert!(top_text.contains("cin => c1"));
}

#[test]
fn full_adder_lowers_to_a_netlist() {
    let mut design = Design::new();
    let fa = full_adder(&mut design);

    let netlist = crate::netlist::build(
        &design,
        fa,
        &[
            ("a".to_string(), Stimulus::constant(1)),
            ("b".to_string(), Stimulus::constant(1)),
            ("cin".to_string(), Stimulus::constant(0)),
        ],
    )
    .unwrap();

    // Three sources plus the sum and carry logic cards.
    assert_eq!(netlist.cards.len(), 5);
    assert_eq!(
        netlist.nodes(),
        vec!["a", "b", "cin", "cout", "s"]
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>()
    );
}
