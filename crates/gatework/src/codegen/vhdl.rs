use itertools::Itertools as _;

use crate::behavior::{Behavior, Condition, SignalTerm};
use crate::error::ModelError;
use crate::logic_tree::LogicRenderer;
use crate::model::{DerivedOp, Design, ModuleId, SignalId, SignalKind};

/// Emit one VHDL design unit for `module`: an entity block listing its ports
/// and a behavioral architecture with one concurrent statement per behavior
/// entry and one instantiation per child instance. Every signal involved must
/// have an exact width.
pub fn generate(design: &Design, module: ModuleId) -> Result<String, ModelError> {
    let m = design.module(module);
    let mut out = String::new();

    out.push_str(&format!("entity {} is\n", m.name));
    if !m.ports().is_empty() {
        out.push_str("  port (\n");
        let lines = m
            .ports()
            .iter()
            .map(|port| {
                let signal = m.signal(port.signal);
                Ok(format!(
                    "    {} : {} {}",
                    signal.name,
                    port.direction.keyword(),
                    vhdl_type(design, module, port.signal)?
                ))
            })
            .collect::<Result<Vec<_>, ModelError>>()?;
        out.push_str(&lines.join(";\n"));
        out.push_str("\n  );\n");
    }
    out.push_str(&format!("end {};\n\n", m.name));

    out.push_str(&format!("architecture behavioral of {} is\n", m.name));
    for (id, signal) in m.signals() {
        if signal.is_named() && m.port_of(id).is_none() {
            out.push_str(&format!(
                "  signal {} : {};\n",
                signal.name,
                vhdl_type(design, module, id)?
            ));
        }
    }
    out.push_str("begin\n");

    for (target, behavior) in m.behaviors() {
        emit_behavior(&mut out, design, module, *target, behavior)?;
    }

    for instantiation in m.instances() {
        let child = design.module(instantiation.child);
        out.push_str(&format!(
            "  {}: entity work.{}\n    port map (\n",
            instantiation.name, child.name
        ));
        let maps = instantiation
            .bindings
            .iter()
            .map(|(port_name, bound)| {
                format!("      {} => {}", port_name, signal_expr(design, module, *bound))
            })
            .join(",\n");
        out.push_str(&maps);
        out.push_str("\n    );\n");
    }

    out.push_str("end behavioral;\n");
    log::debug!("generated vhdl for module '{}'", m.name);
    Ok(out)
}

fn vhdl_type(design: &Design, module: ModuleId, signal: SignalId) -> Result<String, ModelError> {
    let s = design.module(module).signal(signal);
    let width = s.dim.exact_value().ok_or_else(|| {
        ModelError::InvalidParameter(format!(
            "signal '{}' needs an exact width for vhdl output, has {}",
            s.name, s.dim
        ))
    })?;
    Ok(if width == 1 {
        "std_logic".to_string()
    } else {
        format!("std_logic_vector({} downto 0)", width - 1)
    })
}

/// Textual form of a (possibly derived) signal: slices index their source,
/// concatenations join MSB-first with `&`.
fn signal_expr(design: &Design, module: ModuleId, signal: SignalId) -> String {
    let m = design.module(module);
    let s = m.signal(signal);
    match &s.kind {
        SignalKind::Named => s.name.clone(),
        SignalKind::Derived(DerivedOp::Slice { source, lsb, msb }) => {
            let src = signal_expr(design, module, *source);
            if lsb == msb {
                format!("{src}({lsb})")
            } else {
                format!("{src}({msb} downto {lsb})")
            }
        }
        SignalKind::Derived(DerivedOp::Concat(parts)) => parts
            .iter()
            .rev()
            .map(|part| signal_expr(design, module, *part))
            .join(" & "),
    }
}

fn literal(value: u64, width: u32) -> String {
    if width == 1 {
        format!("'{value}'")
    } else {
        format!("\"{value:0width$b}\"", width = width as usize)
    }
}

fn emit_behavior(
    out: &mut String,
    design: &Design,
    module: ModuleId,
    target: SignalId,
    behavior: &Behavior,
) -> Result<(), ModelError> {
    let m = design.module(module);
    let name = &m.signal(target).name;
    match behavior {
        Behavior::Logic(tree) => {
            let mut expr = VhdlExpr { design, module };
            out.push_str(&format!("  {name} <= {};\n", tree.fold(&mut expr)));
        }
        Behavior::Value(value) => {
            let width = m.signal(target).dim.exact_value().unwrap_or(1);
            out.push_str(&format!("  {name} <= {};\n", literal(*value, width)));
        }
        Behavior::Dynamic(entries) => {
            let sensitivity = behavior
                .input_signals()
                .into_iter()
                .map(|s| m.signal(s).name.clone())
                .join(", ");
            out.push_str(&format!(
                "  {name}_proc: process ({sensitivity})\n  begin\n"
            ));
            emit_rules(out, design, module, name, entries, "    ")?;
            out.push_str("  end process;\n");
        }
    }
    Ok(())
}

/// A rule list becomes an if/elsif chain; a rule whose action is itself a
/// rule list nests one level deeper.
fn emit_rules(
    out: &mut String,
    design: &Design,
    module: ModuleId,
    target: &str,
    entries: &[(Condition, Behavior)],
    indent: &str,
) -> Result<(), ModelError> {
    for (i, (condition, action)) in entries.iter().enumerate() {
        let keyword = if i == 0 { "if" } else { "elsif" };
        out.push_str(&format!(
            "{indent}{keyword} {} then\n",
            condition_expr(design, module, condition)
        ));
        match action {
            Behavior::Dynamic(inner) => {
                emit_rules(out, design, module, target, inner, &format!("{indent}  "))?;
            }
            Behavior::Logic(tree) => {
                let mut expr = VhdlExpr { design, module };
                out.push_str(&format!("{indent}  {target} <= {};\n", tree.fold(&mut expr)));
            }
            Behavior::Value(value) => {
                let width = design
                    .module(module)
                    .find_signal(target)
                    .map(|s| design.module(module).signal(s).dim.exact_value().unwrap_or(1))
                    .unwrap_or(1);
                out.push_str(&format!(
                    "{indent}  {target} <= {};\n",
                    literal(*value, width)
                ));
            }
        }
    }
    out.push_str(&format!("{indent}end if;\n"));
    Ok(())
}

fn condition_expr(design: &Design, module: ModuleId, condition: &Condition) -> String {
    let m = design.module(module);
    match condition {
        Condition::Level { signal, value } => {
            let width = m.signal(*signal).dim.exact_value().unwrap_or(1);
            format!(
                "{} = {}",
                signal_expr(design, module, *signal),
                literal(*value, width)
            )
        }
        Condition::Rising(signal) => {
            format!("rising_edge({})", signal_expr(design, module, *signal))
        }
        Condition::Falling(signal) => {
            format!("falling_edge({})", signal_expr(design, module, *signal))
        }
        Condition::All(conditions) => conditions
            .iter()
            .map(|c| format!("({})", condition_expr(design, module, c)))
            .join(" and "),
        Condition::Any(conditions) => conditions
            .iter()
            .map(|c| format!("({})", condition_expr(design, module, c)))
            .join(" or "),
        Condition::Not(inner) => format!("not ({})", condition_expr(design, module, inner)),
    }
}

/// The VHDL expression target for logic trees.
struct VhdlExpr<'a> {
    design: &'a Design,
    module: ModuleId,
}

impl LogicRenderer<SignalTerm> for VhdlExpr<'_> {
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

    fn leaf(&mut self, leaf: &SignalTerm) -> String {
        signal_expr(self.design, self.module, leaf.signal)
    }
}
