use itertools::Itertools as _;

use crate::HashMap;
use crate::behavior::{Behavior, SignalTerm};
use crate::error::ModelError;
use crate::logic_tree::LogicRenderer;
use crate::model::{DerivedOp, Design, Direction, ModuleId, SignalId, SignalKind};
use crate::stimulus::{SETTLE_TIME, Stimulus, Wave};

/// Logic-high rail; a node above half of it digitizes to 1.
pub const SUPPLY_VOLTAGE: f64 = 5.0;

/// Analog source shape for one node.
#[derive(Debug, Clone, PartialEq)]
pub enum Waveform {
    Dc(f64),
    Pulse {
        low: f64,
        high: f64,
        delay: f64,
        rise: f64,
        fall: f64,
        width: f64,
        period: f64,
    },
    /// Piecewise-linear (time, voltage) points; linear between, held after.
    Pwl(Vec<(f64, f64)>),
}

impl std::fmt::Display for Waveform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Waveform::Dc(v) => write!(f, "dc {v}"),
            Waveform::Pulse {
                low,
                high,
                delay,
                rise,
                fall,
                width,
                period,
            } => write!(f, "pulse({low} {high} {delay} {rise} {fall} {width} {period})"),
            Waveform::Pwl(points) => {
                write!(f, "pwl(")?;
                for (i, (t, v)) in points.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{t} {v}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// One netlist line: a uniquely identified element attached to named nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum Card {
    /// Drives `node` with a waveform against ground.
    VoltageSource {
        id: String,
        node: String,
        waveform: Waveform,
    },
    /// Behavioral logic element driving `node` from an expression over other
    /// node voltages.
    Logic {
        id: String,
        node: String,
        expression: String,
    },
}

impl Card {
    pub fn node(&self) -> &str {
        match self {
            Card::VoltageSource { node, .. } | Card::Logic { node, .. } => node,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Netlist {
    pub cards: Vec<Card>,
}

impl Netlist {
    /// Driven node names, sorted and deduplicated.
    pub fn nodes(&self) -> Vec<String> {
        self.cards
            .iter()
            .map(|c| c.node().to_string())
            .sorted()
            .dedup()
            .collect()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for card in &self.cards {
            match card {
                Card::VoltageSource { id, node, waveform } => {
                    out.push_str(&format!("{id} {node} 0 {waveform}\n"));
                }
                Card::Logic {
                    id,
                    node,
                    expression,
                } => {
                    out.push_str(&format!("{id} {node} 0 v = {expression}\n"));
                }
            }
        }
        out
    }
}

/// The external analog engine. Opaque here: it receives a netlist and the
/// instants to report, and returns a voltage trace per driven node.
pub trait TransientSolver {
    fn solve(&self, netlist: &Netlist, instants: &[f64]) -> HashMap<String, Vec<f64>>;
}

/// Threshold the bit-node traces of one signal (LSB-first) against half the
/// supply rail and compose them into an integer value per instant.
pub fn digitize(traces: &HashMap<String, Vec<f64>>, bit_nodes: &[String]) -> Vec<u64> {
    let samples = bit_nodes
        .iter()
        .filter_map(|node| traces.get(node))
        .map(Vec::len)
        .min()
        .unwrap_or(0);
    (0..samples)
        .map(|k| {
            bit_nodes.iter().enumerate().fold(0u64, |acc, (i, node)| {
                let high = traces
                    .get(node)
                    .is_some_and(|trace| trace[k] >= SUPPLY_VOLTAGE / 2.0);
                acc | (u64::from(high) << i)
            })
        })
        .collect()
}

/// LSB-first node names carrying `signal`'s bits, derived signals resolved to
/// the named signals they read.
pub fn bit_nodes(
    design: &Design,
    module: ModuleId,
    signal: SignalId,
) -> Result<Vec<String>, ModelError> {
    let s = design.module(module).signal(signal);
    let width = s.dim.exact_value().ok_or_else(|| {
        ModelError::InvalidParameter(format!(
            "signal '{}' needs an exact width for netlist output, has {}",
            s.name, s.dim
        ))
    })?;
    Ok((0..width)
        .map(|bit| resolve_bit(design, module, signal, bit))
        .collect())
}

/// Lower one module and its input stimuli to a netlist. Every behavior entry
/// becomes a logic card per bit; every stimulated port becomes a voltage
/// source per bit. Dynamic behaviors have no netlist form.
pub fn build(
    design: &Design,
    module: ModuleId,
    stimuli: &[(String, Stimulus)],
) -> Result<Netlist, ModelError> {
    let m = design.module(module);
    for (_, signal) in m.signals() {
        if signal.is_named() && signal.dim.exact_value().is_none() {
            return Err(ModelError::InvalidParameter(format!(
                "signal '{}' needs an exact width for netlist output, has {}",
                signal.name, signal.dim
            )));
        }
    }

    let mut netlist = Netlist::default();
    let mut next_id = 0usize;

    for (port_name, stimulus) in stimuli {
        let port = m
            .find_port(port_name)
            .ok_or_else(|| ModelError::UnknownPort(port_name.clone()))?;
        if port.direction == Direction::Output {
            return Err(ModelError::InvalidPort(format!(
                "stimulus target '{port_name}' is an output port"
            )));
        }
        let width = m.signal(port.signal).dim.exact_value().unwrap_or(1);
        for bit in 0..width {
            netlist.cards.push(Card::VoltageSource {
                id: format!("v{next_id}"),
                node: bit_node(&m.signal(port.signal).name, bit, width),
                waveform: bit_waveform(stimulus, bit),
            });
            next_id += 1;
        }
    }

    for (target, behavior) in m.behaviors() {
        let name = &m.signal(*target).name;
        let width = m.signal(*target).dim.exact_value().unwrap_or(1);
        match behavior {
            Behavior::Value(value) => {
                for bit in 0..width {
                    netlist.cards.push(Card::VoltageSource {
                        id: format!("v{next_id}"),
                        node: bit_node(name, bit, width),
                        waveform: Waveform::Dc(bit_volt(*value, bit)),
                    });
                    next_id += 1;
                }
            }
            Behavior::Logic(tree) => {
                for bit in 0..width {
                    let mut expr = BitExpr {
                        design,
                        module,
                        bit,
                    };
                    netlist.cards.push(Card::Logic {
                        id: format!("b{next_id}"),
                        node: bit_node(name, bit, width),
                        expression: tree.fold(&mut expr),
                    });
                    next_id += 1;
                }
            }
            Behavior::Dynamic(_) => {
                return Err(ModelError::InvalidParameter(format!(
                    "behavior of '{name}' is rule-based and has no netlist form"
                )));
            }
        }
    }

    log::debug!(
        "built netlist for module '{}': {} cards",
        m.name,
        netlist.cards.len()
    );
    Ok(netlist)
}

fn bit_node(name: &str, bit: u32, width: u32) -> String {
    if width == 1 {
        name.to_string()
    } else {
        format!("{name}[{bit}]")
    }
}

fn bit_volt(value: u64, bit: u32) -> f64 {
    if (value >> bit) & 1 == 1 {
        SUPPLY_VOLTAGE
    } else {
        0.0
    }
}

/// The named node carrying bit `bit` of `signal`.
fn resolve_bit(design: &Design, module: ModuleId, signal: SignalId, bit: u32) -> String {
    let m = design.module(module);
    let s = m.signal(signal);
    match &s.kind {
        SignalKind::Named => {
            let width = s.dim.exact_value().unwrap_or(1);
            bit_node(&s.name, bit, width)
        }
        SignalKind::Derived(DerivedOp::Slice { source, lsb, .. }) => {
            resolve_bit(design, module, *source, lsb + bit)
        }
        SignalKind::Derived(DerivedOp::Concat(parts)) => {
            let mut offset = 0;
            for part in parts {
                let part_width = m.signal(*part).dim.exact_value().unwrap_or(1);
                if bit < offset + part_width {
                    return resolve_bit(design, module, *part, bit - offset);
                }
                offset += part_width;
            }
            // Unreachable for in-range bits; fall back to the last part.
            resolve_bit(design, module, *parts.last().unwrap_or(&signal), 0)
        }
    }
}

fn bit_waveform(stimulus: &Stimulus, bit: u32) -> Waveform {
    match &stimulus.0 {
        Wave::Constant(v) => Waveform::Dc(bit_volt(*v, bit)),
        Wave::Pulse {
            delay,
            width,
            period,
        } => {
            if bit == 0 {
                Waveform::Pulse {
                    low: 0.0,
                    high: SUPPLY_VOLTAGE,
                    delay: *delay,
                    rise: SETTLE_TIME,
                    fall: SETTLE_TIME,
                    width: *width,
                    period: *period,
                }
            } else {
                Waveform::Dc(0.0)
            }
        }
        Wave::TimeDefined(points) => {
            let mut prev = bit_volt(stimulus.value_at(0.0), bit);
            let mut pwl = vec![(0.0, prev)];
            for (t, v) in points {
                if *t <= 0.0 {
                    continue;
                }
                let volt = bit_volt(*v, bit);
                pwl.push((t - SETTLE_TIME, prev));
                pwl.push((*t, volt));
                prev = volt;
            }
            Waveform::Pwl(pwl)
        }
        Wave::PerBit(bits) => bits
            .get(bit as usize)
            .map_or(Waveform::Dc(0.0), |b| bit_waveform(b, 0)),
    }
}

/// The per-bit netlist expression target: leaves become `v(node)` reads.
struct BitExpr<'a> {
    design: &'a Design,
    module: ModuleId,
    bit: u32,
}

impl LogicRenderer<SignalTerm> for BitExpr<'_> {
    type Output = String;

    fn and(&mut self, operands: Vec<String>) -> String {
        operands.iter().map(|o| format!("({o})")).join(" & ")
    }

    fn or(&mut self, operands: Vec<String>) -> String {
        operands.iter().map(|o| format!("({o})")).join(" | ")
    }

    fn not(&mut self, operand: String) -> String {
        format!("~({operand})")
    }

    fn leaf(&mut self, leaf: &SignalTerm) -> String {
        format!(
            "v({})",
            resolve_bit(self.design, self.module, leaf.signal, self.bit)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimension::Dimension;
    use crate::logic_tree::LogicTree;

    fn inverter() -> (Design, ModuleId) {
        let mut design = Design::new();
        let m = design.add_module("inv");
        let a = design.add_signal(m, "a", Dimension::exact(1).unwrap()).unwrap();
        let y = design.add_signal(m, "y", Dimension::exact(1).unwrap()).unwrap();
        design.add_port(m, a, Direction::Input).unwrap();
        design.add_port(m, y, Direction::Output).unwrap();
        let ta = design.term(m, a).unwrap();
        design
            .set_behavior(m, y, Behavior::Logic(LogicTree::not(LogicTree::leaf(ta))))
            .unwrap();
        (design, m)
    }

    #[test]
    fn inverter_lowers_to_source_and_logic_card() {
        let (design, m) = inverter();
        let netlist = build(
            &design,
            m,
            &[("a".to_string(), Stimulus::pulse(1.0, 2.0, 4.0).unwrap())],
        )
        .unwrap();

        assert_eq!(netlist.cards.len(), 2);
        assert!(matches!(
            &netlist.cards[0],
            Card::VoltageSource { node, waveform: Waveform::Pulse { .. }, .. } if node == "a"
        ));
        assert!(matches!(
            &netlist.cards[1],
            Card::Logic { node, expression, .. } if node == "y" && expression == "~(v(a))"
        ));
        assert_eq!(netlist.nodes(), vec!["a".to_string(), "y".to_string()]);

        let text = netlist.render();
        assert!(text.contains("v0 a 0 pulse(0 5 1 "));
        assert!(text.contains("b1 y 0 v = ~(v(a))"));
    }

    #[test]
    fn multi_bit_signals_get_one_card_per_bit() {
        let mut design = Design::new();
        let m = design.add_module("consts");
        let nib = design.add_signal(m, "nib", Dimension::exact(4).unwrap()).unwrap();
        design.set_behavior(m, nib, Behavior::Value(0b1010)).unwrap();

        let netlist = build(&design, m, &[]).unwrap();
        assert_eq!(netlist.cards.len(), 4);
        let volts: Vec<f64> = netlist
            .cards
            .iter()
            .map(|c| match c {
                Card::VoltageSource {
                    waveform: Waveform::Dc(v),
                    ..
                } => *v,
                _ => panic!("expected dc source"),
            })
            .collect();
        assert_eq!(volts, vec![0.0, SUPPLY_VOLTAGE, 0.0, SUPPLY_VOLTAGE]);
        assert_eq!(netlist.cards[0].node(), "nib[0]");
    }

    #[test]
    fn dynamic_behaviors_have_no_netlist_form() {
        let mut design = Design::new();
        let m = design.add_module("dff");
        let clk = design.add_signal(m, "clk", Dimension::exact(1).unwrap()).unwrap();
        let q = design.add_signal(m, "q", Dimension::exact(1).unwrap()).unwrap();
        design
            .set_behavior(
                m,
                q,
                Behavior::Dynamic(vec![(
                    crate::behavior::Condition::Rising(clk),
                    Behavior::Value(1),
                )]),
            )
            .unwrap();
        assert!(matches!(
            build(&design, m, &[]),
            Err(ModelError::InvalidParameter(_))
        ));
    }

    #[test]
    fn time_defined_stimulus_becomes_pwl_with_settle_ramps() {
        let stim = Stimulus::time_defined(vec![(1.0, 1), (2.0, 0)]).unwrap();
        let Waveform::Pwl(points) = bit_waveform(&stim, 0) else {
            panic!("expected pwl");
        };
        assert_eq!(points[0], (0.0, 0.0));
        assert_eq!(points[1].1, 0.0);
        assert!(points[1].0 < 1.0);
        assert_eq!(points[2], (1.0, SUPPLY_VOLTAGE));
        assert_eq!(points[4], (2.0, 0.0));
    }

    #[test]
    fn derived_leaves_resolve_to_source_bit_nodes() {
        let mut design = Design::new();
        let m = design.add_module("top");
        let wide = design.add_signal(m, "wide", Dimension::exact(4).unwrap()).unwrap();
        let hi = design.add_slice(m, "hi", wide, 2, 3).unwrap();
        assert_eq!(
            bit_nodes(&design, m, hi).unwrap(),
            vec!["wide[2]".to_string(), "wide[3]".to_string()]
        );
    }

    /// Ideal solver stub: voltage sources hold their dc level, logic cards
    /// are left at ground. Exercises the boundary without an analog engine.
    struct DcOnly;

    impl TransientSolver for DcOnly {
        fn solve(&self, netlist: &Netlist, instants: &[f64]) -> HashMap<String, Vec<f64>> {
            let mut traces = HashMap::default();
            for card in &netlist.cards {
                let level = match card {
                    Card::VoltageSource {
                        waveform: Waveform::Dc(v),
                        ..
                    } => *v,
                    _ => 0.0,
                };
                traces.insert(card.node().to_string(), vec![level; instants.len()]);
            }
            traces
        }
    }

    #[test]
    fn solver_traces_digitize_back_to_values() {
        let mut design = Design::new();
        let m = design.add_module("consts");
        let nib = design.add_signal(m, "nib", Dimension::exact(4).unwrap()).unwrap();
        design.set_behavior(m, nib, Behavior::Value(0b0110)).unwrap();

        let netlist = build(&design, m, &[]).unwrap();
        let traces = DcOnly.solve(&netlist, &[0.0, 1.0, 2.0]);
        let nodes = bit_nodes(&design, m, nib).unwrap();
        assert_eq!(digitize(&traces, &nodes), vec![0b0110; 3]);
    }

    #[test]
    fn digitize_thresholds_at_half_supply() {
        let mut traces = HashMap::default();
        traces.insert(
            "y".to_string(),
            vec![0.0, SUPPLY_VOLTAGE, 2.4, 2.6],
        );
        assert_eq!(digitize(&traces, &["y".to_string()]), vec![0, 1, 0, 1]);
    }
}
