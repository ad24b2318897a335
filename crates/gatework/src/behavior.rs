use crate::dimension::Dimension;
use crate::logic_tree::{Combinable, LogicTree};
use crate::model::SignalId;

/// A leaf of a behavior expression: one signal of the owning module, captured
/// with its name and dimension so trees validate without a module reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalTerm {
    pub signal: SignalId,
    pub name: String,
    pub dim: Dimension,
}

impl Combinable for SignalTerm {
    fn dimension(&self) -> Dimension {
        self.dim
    }

    fn label(&self) -> String {
        self.name.clone()
    }
}

/// The rule defining how a signal's value is derived.
#[derive(Debug, Clone, PartialEq)]
pub enum Behavior {
    /// Combinational expression over module signals.
    Logic(LogicTree<SignalTerm>),
    /// Ordered (condition, behavior) rules evaluated on signal events.
    /// The first matching condition wins; with no match the previous value
    /// holds.
    Dynamic(Vec<(Condition, Behavior)>),
    /// Fixed constant.
    Value(u64),
}

impl Behavior {
    /// The module signals this behavior reads, deduplicated and sorted.
    pub fn input_signals(&self) -> Vec<SignalId> {
        let mut inputs = Vec::new();
        self.collect_inputs(&mut inputs);
        inputs.sort_unstable();
        inputs.dedup();
        inputs
    }

    fn collect_inputs(&self, out: &mut Vec<SignalId>) {
        match self {
            Behavior::Logic(tree) => {
                let mut leaves = Vec::new();
                tree.collect_leaves(&mut leaves);
                out.extend(leaves.iter().map(|term| term.signal));
            }
            Behavior::Dynamic(entries) => {
                for (condition, behavior) in entries {
                    condition.collect_inputs(out);
                    behavior.collect_inputs(out);
                }
            }
            Behavior::Value(_) => {}
        }
    }

    /// The width this behavior naturally produces. Constants require at least
    /// enough bits to hold the value; dynamic rules inherit from the first
    /// entry whose width is known.
    pub fn natural_dimension(&self) -> Dimension {
        match self {
            Behavior::Logic(tree) => tree.dimension(),
            Behavior::Value(v) => {
                let needed = (64 - v.leading_zeros()).max(1);
                Dimension::at_least(needed)
            }
            Behavior::Dynamic(entries) => entries
                .iter()
                .map(|(_, behavior)| behavior.natural_dimension())
                .find(|d| d.exact_value().is_some())
                .unwrap_or_else(Dimension::unconstrained),
        }
    }

    /// True iff any rule list in this behavior, at any nesting depth, is
    /// empty. Such a behavior can never produce a value.
    pub(crate) fn has_empty_rules(&self) -> bool {
        match self {
            Behavior::Dynamic(entries) => {
                entries.is_empty()
                    || entries
                        .iter()
                        .any(|(_, behavior)| behavior.has_empty_rules())
            }
            Behavior::Logic(_) | Behavior::Value(_) => false,
        }
    }
}

/// A logically combinable predicate over signals, gating dynamic behaviors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// The signal currently holds exactly `value`.
    Level { signal: SignalId, value: u64 },
    /// 0 -> 1 transition of the signal's low bit since the previous instant.
    Rising(SignalId),
    /// 1 -> 0 transition of the signal's low bit since the previous instant.
    Falling(SignalId),
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    pub fn input_signals(&self) -> Vec<SignalId> {
        let mut inputs = Vec::new();
        self.collect_inputs(&mut inputs);
        inputs.sort_unstable();
        inputs.dedup();
        inputs
    }

    fn collect_inputs(&self, out: &mut Vec<SignalId>) {
        match self {
            Condition::Level { signal, .. }
            | Condition::Rising(signal)
            | Condition::Falling(signal) => out.push(*signal),
            Condition::All(conditions) | Condition::Any(conditions) => {
                for condition in conditions {
                    condition.collect_inputs(out);
                }
            }
            Condition::Not(inner) => inner.collect_inputs(out),
        }
    }
}
