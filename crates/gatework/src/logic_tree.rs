use itertools::Itertools as _;

use crate::dimension::Dimension;
use crate::error::ModelError;

/// A leaf that can participate in a logic expression: it carries a width
/// requirement and a default textual form.
pub trait Combinable {
    fn dimension(&self) -> Dimension;
    fn label(&self) -> String;

    /// Pairwise combination compatibility. Assumed transitive by the tree
    /// constructors.
    fn compatible(&self, other: &Self) -> bool {
        self.dimension().compatible(&other.dimension())
    }
}

/// Generic And/Or/Not/Leaf expression tree over leaf type `T`.
///
/// The tree itself is target-agnostic: lowering to text, to a netlist, or to
/// digital values is done by folding with a [`LogicRenderer`]. Shared
/// sub-trees are evaluated once per occurrence; there is no memoization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogicTree<T> {
    And(Vec<LogicTree<T>>),
    Or(Vec<LogicTree<T>>),
    Not(Box<LogicTree<T>>),
    Leaf(T),
}

/// One rendering strategy: exactly one method is invoked per node, bottom-up,
/// exactly once per node. The `&mut self` receiver is the "extra input/output"
/// channel for targets that accumulate state (gate counters, emitted cards).
pub trait LogicRenderer<T> {
    type Output;

    fn and(&mut self, operands: Vec<Self::Output>) -> Self::Output;
    fn or(&mut self, operands: Vec<Self::Output>) -> Self::Output;
    fn not(&mut self, operand: Self::Output) -> Self::Output;
    fn leaf(&mut self, leaf: &T) -> Self::Output;
}

impl<T: Combinable> LogicTree<T> {
    pub fn leaf(value: T) -> Self {
        LogicTree::Leaf(value)
    }

    /// Conjunction of two or more operands. Fails with `InvalidParameter` on
    /// fewer operands and `DimensionMismatch` if any two reachable leaves are
    /// dimension-incompatible.
    pub fn and(operands: Vec<LogicTree<T>>) -> Result<Self, ModelError> {
        Self::check_operands("and", &operands)?;
        Ok(LogicTree::And(operands))
    }

    /// Disjunction of two or more operands; same validation as [`LogicTree::and`].
    pub fn or(operands: Vec<LogicTree<T>>) -> Result<Self, ModelError> {
        Self::check_operands("or", &operands)?;
        Ok(LogicTree::Or(operands))
    }

    pub fn not(operand: LogicTree<T>) -> Self {
        LogicTree::Not(Box::new(operand))
    }

    fn check_operands(op: &str, operands: &[LogicTree<T>]) -> Result<(), ModelError> {
        if operands.len() < 2 {
            return Err(ModelError::InvalidParameter(format!(
                "'{op}' requires at least 2 operands, got {}",
                operands.len()
            )));
        }
        // Compatibility is assumed transitive, so checking consecutive leaves
        // covers every pair.
        let mut leaves = Vec::new();
        for operand in operands {
            operand.collect_leaves(&mut leaves);
        }
        for (a, b) in leaves.iter().tuple_windows() {
            if !a.compatible(b) {
                return Err(ModelError::DimensionMismatch(format!(
                    "'{op}' operands '{}' {} and '{}' {} cannot be combined",
                    a.label(),
                    a.dimension(),
                    b.label(),
                    b.dimension()
                )));
            }
        }
        Ok(())
    }

    /// All base leaves reachable from this tree, in operand order.
    pub fn collect_leaves<'t>(&'t self, out: &mut Vec<&'t T>) {
        match self {
            LogicTree::Leaf(t) => out.push(t),
            LogicTree::Not(inner) => inner.collect_leaves(out),
            LogicTree::And(ops) | LogicTree::Or(ops) => {
                for op in ops {
                    op.collect_leaves(out);
                }
            }
        }
    }

    /// The tree's dimension: inherited from the first operand whose dimension
    /// is exactly known, falling back to the first operand's dimension.
    pub fn dimension(&self) -> Dimension {
        match self {
            LogicTree::Leaf(t) => t.dimension(),
            LogicTree::Not(inner) => inner.dimension(),
            LogicTree::And(ops) | LogicTree::Or(ops) => ops
                .iter()
                .map(|op| op.dimension())
                .find(|d| d.exact_value().is_some())
                .unwrap_or_else(|| ops[0].dimension()),
        }
    }

    /// Bottom-up fold invoking exactly one renderer method per node.
    pub fn fold<R: LogicRenderer<T>>(&self, renderer: &mut R) -> R::Output {
        match self {
            LogicTree::Leaf(t) => renderer.leaf(t),
            LogicTree::Not(inner) => {
                let operand = inner.fold(renderer);
                renderer.not(operand)
            }
            LogicTree::And(ops) => {
                let operands = ops.iter().map(|op| op.fold(renderer)).collect();
                renderer.and(operands)
            }
            LogicTree::Or(ops) => {
                let operands = ops.iter().map(|op| op.fold(renderer)).collect();
                renderer.or(operands)
            }
        }
    }

    /// Fixed textual join: `(a) and (b)`, `(a) or (b)`, `not (a)`.
    pub fn render_default(&self) -> String {
        self.fold(&mut DefaultText)
    }
}

/// The default string target.
struct DefaultText;

impl<T: Combinable> LogicRenderer<T> for DefaultText {
    type Output = String;

    fn and(&mut self, operands: Vec<String>) -> String {
        operands.iter().map(|o| format!("({o})")).join(" and ")
    }

    fn or(&mut self, operands: Vec<String>) -> String {
        operands.iter().map(|o| format!("({o})")).join(" or ")
    }

    fn not(&mut self, operand: String) -> String {
        format!("not ({operand})")
    }

    fn leaf(&mut self, leaf: &T) -> String {
        leaf.label()
    }
}
