use std::hash::Hash;

use crate::model::{Design, DerivedOp, Direction, ModuleId, SignalId, SignalKind};
use crate::{HashMap, HashSet};

/// Outcome of a circularity check: data, never an error, so callers can
/// inspect the reported paths before deciding whether to abort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircularityReport<N> {
    pub found: bool,
    /// Each entry is one cycle: the on-stack suffix from the repeated node
    /// back to itself. With `find_all_paths` the same cycle may appear
    /// rotated or duplicated from different start nodes; not deduplicated.
    pub paths: Vec<Vec<N>>,
}

impl<N> CircularityReport<N> {
    fn clean() -> Self {
        Self {
            found: false,
            paths: Vec::new(),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    Gray,
    Black,
}

/// Generic directed-graph cycle detection over a node-to-successors mapping.
///
/// Three-color depth-first search over the mapping's key set, sorted so the
/// verdict is a deterministic function of the keys. With `find_all_paths`
/// false the search short-circuits on the first back-edge; with it true a
/// fresh search runs from every start node and accumulates every cycle
/// encountered.
pub fn check_for_circularity<N>(
    graph: &HashMap<N, Vec<N>>,
    find_all_paths: bool,
) -> CircularityReport<N>
where
    N: Clone + Eq + Hash + Ord,
{
    let mut starts: Vec<&N> = graph.keys().collect();
    starts.sort();

    let mut report = CircularityReport::clean();
    if find_all_paths {
        for start in starts {
            let mut color = HashMap::default();
            let mut path = Vec::new();
            visit(start, graph, &mut color, &mut path, &mut report, false);
        }
    } else {
        let mut color = HashMap::default();
        let mut path = Vec::new();
        for start in starts {
            if color.contains_key(start) {
                continue;
            }
            if visit(start, graph, &mut color, &mut path, &mut report, true) {
                break;
            }
        }
    }
    report
}

/// Returns true when the caller should stop searching.
fn visit<'g, N>(
    node: &'g N,
    graph: &'g HashMap<N, Vec<N>>,
    color: &mut HashMap<&'g N, Color>,
    path: &mut Vec<&'g N>,
    report: &mut CircularityReport<N>,
    stop_on_first: bool,
) -> bool
where
    N: Clone + Eq + Hash,
{
    color.insert(node, Color::Gray);
    path.push(node);
    if let Some(successors) = graph.get(node) {
        for succ in successors {
            match color.get(succ) {
                Some(Color::Gray) => {
                    // Back edge: the cycle is the on-stack suffix from the
                    // repeated node to the current one.
                    let start = path
                        .iter()
                        .position(|n| *n == succ)
                        .unwrap_or(path.len() - 1);
                    report.found = true;
                    report
                        .paths
                        .push(path[start..].iter().map(|n| (*n).clone()).collect());
                    if stop_on_first {
                        path.pop();
                        color.insert(node, Color::Black);
                        return true;
                    }
                }
                Some(Color::Black) => {}
                None => {
                    if visit(succ, graph, color, path, report, stop_on_first) {
                        path.pop();
                        color.insert(node, Color::Black);
                        return true;
                    }
                }
            }
        }
    }
    path.pop();
    color.insert(node, Color::Black);
    false
}

/// The conservative signal-dependency mapping for one module.
///
/// Edges point from a signal to the signals its value depends on:
/// - behavior targets to every signal the behavior reads;
/// - every output-direction bound signal of an instantiation to every
///   input-direction bound signal of the same instance. This deliberately
///   does not look inside the child module: any input is assumed reachable
///   from any output of the instance;
/// - derived signals to the signals they are computed from.
pub fn signal_dependency_graph(
    design: &Design,
    module: ModuleId,
) -> HashMap<SignalId, Vec<SignalId>> {
    let m = design.module(module);
    let mut graph: HashMap<SignalId, Vec<SignalId>> = HashMap::default();
    let mut seen: HashSet<(SignalId, SignalId)> = HashSet::default();
    let mut add_edge = |graph: &mut HashMap<SignalId, Vec<SignalId>>, from: SignalId, to: SignalId| {
        if seen.insert((from, to)) {
            graph.entry(from).or_default().push(to);
        }
    };

    for (target, behavior) in m.behaviors() {
        for input in behavior.input_signals() {
            add_edge(&mut graph, *target, input);
        }
    }

    for instantiation in m.instances() {
        let child = design.module(instantiation.child);
        let mut outputs = Vec::new();
        let mut inputs = Vec::new();
        for (port_name, bound) in &instantiation.bindings {
            let Some(port) = child.find_port(port_name) else {
                continue;
            };
            match port.direction {
                Direction::Input => inputs.push(*bound),
                Direction::Output => outputs.push(*bound),
                Direction::Bidirectional => {
                    inputs.push(*bound);
                    outputs.push(*bound);
                }
            }
        }
        for output in &outputs {
            for input in &inputs {
                add_edge(&mut graph, *output, *input);
            }
        }
    }

    for (id, signal) in m.signals() {
        if let SignalKind::Derived(op) = &signal.kind {
            match op {
                DerivedOp::Slice { source, .. } => {
                    add_edge(&mut graph, id, *source);
                }
                DerivedOp::Concat(parts) => {
                    for part in parts {
                        add_edge(&mut graph, id, *part);
                    }
                }
            }
        }
    }

    graph
}

/// True in `found` iff the module's conservative dependency graph contains a
/// cycle, reported to callers as illegal combinational feedback.
pub fn check_for_circular_signals(design: &Design, module: ModuleId) -> CircularityReport<SignalId> {
    let graph = signal_dependency_graph(design, module);
    check_for_circularity(&graph, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::Behavior;
    use crate::dimension::Dimension;
    use crate::logic_tree::LogicTree;

    fn graph_of(edges: &[(&'static str, &[&'static str])]) -> HashMap<&'static str, Vec<&'static str>> {
        let mut graph = HashMap::default();
        for (from, tos) in edges {
            graph.insert(*from, tos.to_vec());
        }
        graph
    }

    #[test]
    fn acyclic_graph_reports_nothing() {
        let graph = graph_of(&[("a", &["b", "c"]), ("b", &["c"]), ("c", &[])]);
        let report = check_for_circularity(&graph, false);
        assert!(!report.found);
        assert!(report.paths.is_empty());
    }

    #[test]
    fn three_node_loop_is_reported_as_a_rotation() {
        let graph = graph_of(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"])]);
        let report = check_for_circularity(&graph, false);
        assert!(report.found);
        assert_eq!(report.paths.len(), 1);

        let path = &report.paths[0];
        assert_eq!(path.len(), 3);
        let mut sorted = path.clone();
        sorted.sort();
        assert_eq!(sorted, vec!["a", "b", "c"]);
        // A rotation keeps successor order intact.
        for (i, node) in path.iter().enumerate() {
            let next = path[(i + 1) % path.len()];
            assert!(graph[node].contains(&next));
        }
    }

    #[test]
    fn self_loop_is_a_cycle_of_one() {
        let graph = graph_of(&[("a", &["a"])]);
        let report = check_for_circularity(&graph, false);
        assert!(report.found);
        assert_eq!(report.paths, vec![vec!["a"]]);
    }

    #[test]
    fn find_all_accumulates_cycles_from_every_start() {
        let graph = graph_of(&[("a", &["b"]), ("b", &["a"]), ("c", &["c"])]);
        let report = check_for_circularity(&graph, true);
        assert!(report.found);
        // a-b found from both a and b, plus the c self-loop.
        assert!(report.paths.len() >= 3);
        assert!(report.paths.contains(&vec!["c"]));
    }

    #[test]
    fn successors_outside_the_key_set_are_leaves() {
        let graph = graph_of(&[("a", &["ghost"])]);
        let report = check_for_circularity(&graph, false);
        assert!(!report.found);
    }

    #[test]
    fn instance_edges_are_conservative() {
        // The child wires o = i straight through, but the detector must not
        // look inside: binding o and i to the same parent net is feedback.
        let mut design = Design::new();
        let child = design.add_module("buf");
        let ci = design.add_signal(child, "i", Dimension::exact(1).unwrap()).unwrap();
        let co = design.add_signal(child, "o", Dimension::exact(1).unwrap()).unwrap();
        design.add_port(child, ci, Direction::Input).unwrap();
        design.add_port(child, co, Direction::Output).unwrap();

        let top = design.add_module("top");
        let x = design.add_signal(top, "x", Dimension::exact(1).unwrap()).unwrap();
        let y = design.add_signal(top, "y", Dimension::exact(1).unwrap()).unwrap();
        design.add_instance(top, "u0", child).unwrap();
        design.bind_port(top, "u0", "i", x).unwrap();
        design.bind_port(top, "u0", "o", y).unwrap();

        // y -> x via the instance; close the loop with x = y.
        let term_y = design.term(top, y).unwrap();
        design
            .set_behavior(top, x, Behavior::Logic(LogicTree::leaf(term_y)))
            .unwrap();

        let report = check_for_circular_signals(&design, top);
        assert!(report.found);
    }

    #[test]
    fn derived_signals_depend_on_their_sources() {
        let mut design = Design::new();
        let m = design.add_module("top");
        let wide = design.add_signal(m, "wide", Dimension::exact(2).unwrap()).unwrap();
        let bit = design.add_slice(m, "bit", wide, 0, 0).unwrap();
        let pair = design.add_concat(m, "pair", vec![bit, bit]).unwrap();

        let graph = signal_dependency_graph(&design, m);
        assert!(graph[&bit].contains(&wide));
        assert!(graph[&pair].contains(&bit));
        // A slice on its own is not feedback.
        assert!(!check_for_circularity(&graph, false).found);
    }
}
