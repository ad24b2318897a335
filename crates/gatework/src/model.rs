use std::fmt;

use crate::behavior::{Behavior, SignalTerm};
use crate::dimension::Dimension;
use crate::error::ModelError;
use crate::validity::{ValidityGraph, ValidityId};
use crate::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleId(pub usize);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mod{}", self.0)
    }
}

/// Index of a signal within its owning module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SignalId(pub usize);

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sig{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Input,
    Output,
    Bidirectional,
}

impl Direction {
    pub fn keyword(&self) -> &'static str {
        match self {
            Direction::Input => "in",
            Direction::Output => "out",
            Direction::Bidirectional => "inout",
        }
    }
}

/// How a derived signal computes its value from other signals of the module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DerivedOp {
    /// Contiguous bit sub-range `lsb..=msb` of `source`, which is also the
    /// derived signal's linked signal.
    Slice { source: SignalId, lsb: u32, msb: u32 },
    /// Concatenation of parts, listed LSB-first.
    Concat(Vec<SignalId>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalKind {
    Named,
    Derived(DerivedOp),
}

#[derive(Debug, Clone)]
pub struct Signal {
    pub name: String,
    pub dim: Dimension,
    pub kind: SignalKind,
}

impl Signal {
    pub fn is_named(&self) -> bool {
        matches!(self.kind, SignalKind::Named)
    }
}

/// A signal exposed at the module boundary. The port's name is its signal's
/// name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Port {
    pub signal: SignalId,
    pub direction: Direction,
}

/// Placement of a child module inside a parent, with child port names bound
/// to parent signals.
#[derive(Debug, Clone)]
pub struct Instantiation {
    pub name: String,
    pub child: ModuleId,
    pub bindings: Vec<(String, SignalId)>,
}

impl Instantiation {
    pub fn binding(&self, port_name: &str) -> Option<SignalId> {
        self.bindings
            .iter()
            .find(|(name, _)| name == port_name)
            .map(|(_, signal)| *signal)
    }
}

/// Addresses a signal nested arbitrarily deep inside instantiations: a path
/// of instance names terminating in a signal name, resolved against the
/// flattened hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SignalPath {
    pub instances: Vec<String>,
    pub signal: String,
}

impl SignalPath {
    pub fn new(instances: impl IntoIterator<Item = impl Into<String>>, signal: impl Into<String>) -> Self {
        Self {
            instances: instances.into_iter().map(Into::into).collect(),
            signal: signal.into(),
        }
    }

    /// A signal of the top module itself.
    pub fn top(signal: impl Into<String>) -> Self {
        Self {
            instances: Vec::new(),
            signal: signal.into(),
        }
    }
}

impl fmt::Display for SignalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for instance in &self.instances {
            write!(f, "{instance}.")?;
        }
        write!(f, "{}", self.signal)
    }
}

#[derive(Debug)]
pub struct Module {
    pub name: String,
    pub(crate) signals: Vec<Signal>,
    pub(crate) ports: Vec<Port>,
    pub(crate) instances: Vec<Instantiation>,
    /// Ordered signal-to-behavior mapping; at most one entry per signal,
    /// last writer wins by call order.
    pub(crate) behaviors: Vec<(SignalId, Behavior)>,
    pub(crate) validity: ValidityId,
}

impl Module {
    pub fn signal(&self, id: SignalId) -> &Signal {
        &self.signals[id.0]
    }

    pub fn signals(&self) -> impl Iterator<Item = (SignalId, &Signal)> {
        self.signals
            .iter()
            .enumerate()
            .map(|(i, s)| (SignalId(i), s))
    }

    pub fn find_signal(&self, name: &str) -> Option<SignalId> {
        self.signals
            .iter()
            .position(|s| s.name == name)
            .map(SignalId)
    }

    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    pub fn find_port(&self, name: &str) -> Option<&Port> {
        self.ports
            .iter()
            .find(|p| self.signals[p.signal.0].name == name)
    }

    pub fn port_of(&self, signal: SignalId) -> Option<&Port> {
        self.ports.iter().find(|p| p.signal == signal)
    }

    pub fn instances(&self) -> &[Instantiation] {
        &self.instances
    }

    pub fn find_instance(&self, name: &str) -> Option<&Instantiation> {
        self.instances.iter().find(|i| i.name == name)
    }

    pub fn behaviors(&self) -> &[(SignalId, Behavior)] {
        &self.behaviors
    }

    pub fn behavior_of(&self, signal: SignalId) -> Option<&Behavior> {
        self.behaviors
            .iter()
            .find(|(s, _)| *s == signal)
            .map(|(_, b)| b)
    }

    fn contains(&self, signal: SignalId) -> bool {
        signal.0 < self.signals.len()
    }
}

/// Arena of modules; the root of the circuit model.
///
/// All mutation goes through this type so every touched module notifies the
/// validity engine, which in turn evicts cached derived facts (currently the
/// per-module circularity verdict).
#[derive(Debug, Default)]
pub struct Design {
    modules: Vec<Module>,
    pub(crate) validity: ValidityGraph,
    /// module owning each validity node, indexed by node.
    node_owner: Vec<ModuleId>,
    circularity_cache: HashMap<ModuleId, bool>,
}

impl Design {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_module(&mut self, name: impl Into<String>) -> ModuleId {
        let id = ModuleId(self.modules.len());
        let validity = self.validity.add_node();
        self.node_owner.push(id);
        self.modules.push(Module {
            name: name.into(),
            signals: Vec::new(),
            ports: Vec::new(),
            instances: Vec::new(),
            behaviors: Vec::new(),
            validity,
        });
        id
    }

    pub fn module(&self, id: ModuleId) -> &Module {
        &self.modules[id.0]
    }

    pub fn modules(&self) -> impl Iterator<Item = (ModuleId, &Module)> {
        self.modules
            .iter()
            .enumerate()
            .map(|(i, m)| (ModuleId(i), m))
    }

    pub fn find_module(&self, name: &str) -> Option<ModuleId> {
        self.modules
            .iter()
            .position(|m| m.name == name)
            .map(ModuleId)
    }

    /// Add a named signal. Fails with `InvalidParameter` on a duplicate name.
    pub fn add_signal(
        &mut self,
        module: ModuleId,
        name: impl Into<String>,
        dim: Dimension,
    ) -> Result<SignalId, ModelError> {
        let name = name.into();
        self.check_fresh_name(module, &name)?;
        let id = self.push_signal(module, Signal {
            name,
            dim,
            kind: SignalKind::Named,
        });
        Ok(id)
    }

    /// Add a derived signal slicing `source` bits `lsb..=msb`. The source
    /// must have an exact width covering the range.
    pub fn add_slice(
        &mut self,
        module: ModuleId,
        name: impl Into<String>,
        source: SignalId,
        lsb: u32,
        msb: u32,
    ) -> Result<SignalId, ModelError> {
        let name = name.into();
        self.check_fresh_name(module, &name)?;
        let m = self.module(module);
        if !m.contains(source) {
            return Err(ModelError::InvalidParameter(format!(
                "slice source {source} does not belong to module '{}'",
                m.name
            )));
        }
        if lsb > msb {
            return Err(ModelError::InvalidParameter(format!(
                "slice range [{msb}:{lsb}] is inverted"
            )));
        }
        let source_width = m.signal(source).dim.exact_value().ok_or_else(|| {
            ModelError::InvalidParameter(format!(
                "slice source '{}' has no exact width",
                m.signal(source).name
            ))
        })?;
        if msb >= source_width {
            return Err(ModelError::InvalidParameter(format!(
                "slice range [{msb}:{lsb}] exceeds source width {source_width}"
            )));
        }
        let dim = Dimension::exact(msb - lsb + 1)?;
        let id = self.push_signal(module, Signal {
            name,
            dim,
            kind: SignalKind::Derived(DerivedOp::Slice { source, lsb, msb }),
        });
        Ok(id)
    }

    /// Add a derived signal concatenating `parts` (LSB-first). Every part
    /// must have an exact width; the combined width is their sum.
    pub fn add_concat(
        &mut self,
        module: ModuleId,
        name: impl Into<String>,
        parts: Vec<SignalId>,
    ) -> Result<SignalId, ModelError> {
        let name = name.into();
        self.check_fresh_name(module, &name)?;
        if parts.is_empty() {
            return Err(ModelError::InvalidParameter(
                "concatenation requires at least one part".into(),
            ));
        }
        let m = self.module(module);
        let mut width = 0u32;
        for part in &parts {
            if !m.contains(*part) {
                return Err(ModelError::InvalidParameter(format!(
                    "concatenation part {part} does not belong to module '{}'",
                    m.name
                )));
            }
            width += m.signal(*part).dim.exact_value().ok_or_else(|| {
                ModelError::InvalidParameter(format!(
                    "concatenation part '{}' has no exact width",
                    m.signal(*part).name
                ))
            })?;
        }
        let dim = Dimension::exact(width)?;
        let id = self.push_signal(module, Signal {
            name,
            dim,
            kind: SignalKind::Derived(DerivedOp::Concat(parts)),
        });
        Ok(id)
    }

    /// Expose a named signal at the module boundary. Fails with `InvalidPort`
    /// if the signal is not owned by the module, is derived, or already has a
    /// port.
    pub fn add_port(
        &mut self,
        module: ModuleId,
        signal: SignalId,
        direction: Direction,
    ) -> Result<(), ModelError> {
        let m = self.module(module);
        if !m.contains(signal) {
            return Err(ModelError::InvalidPort(format!(
                "signal {signal} does not belong to module '{}'",
                m.name
            )));
        }
        if !m.signal(signal).is_named() {
            return Err(ModelError::InvalidPort(format!(
                "derived signal '{}' cannot be a port",
                m.signal(signal).name
            )));
        }
        let port_name = &m.signal(signal).name;
        if m.find_port(port_name).is_some() {
            return Err(ModelError::InvalidPort(format!(
                "module '{}' already has a port named '{port_name}'",
                m.name
            )));
        }
        self.modules[module.0].ports.push(Port { signal, direction });
        self.touch(module);
        Ok(())
    }

    /// Place `child` inside `parent` under a unique instance name. The parent
    /// starts tracking the child, so child mutations invalidate facts cached
    /// about the parent. Fails with `InvalidParameter` on a duplicate
    /// instance name or when the instantiation would make the hierarchy
    /// recursive (the child already contains the parent, itself included).
    pub fn add_instance(
        &mut self,
        parent: ModuleId,
        name: impl Into<String>,
        child: ModuleId,
    ) -> Result<(), ModelError> {
        let name = name.into();
        if self.module(parent).find_instance(&name).is_some() {
            return Err(ModelError::InvalidParameter(format!(
                "module '{}' already has an instance named '{name}'",
                self.module(parent).name
            )));
        }
        if self.reaches(child, parent) {
            return Err(ModelError::InvalidParameter(format!(
                "instantiating '{}' inside '{}' would make the hierarchy recursive",
                self.module(child).name,
                self.module(parent).name
            )));
        }
        let child_node = self.module(child).validity;
        let parent_node = self.module(parent).validity;
        self.modules[parent.0].instances.push(Instantiation {
            name,
            child,
            bindings: Vec::new(),
        });
        self.validity.track(parent_node, child_node);
        self.touch(parent);
        Ok(())
    }

    /// Bind a child port to a parent signal. Fails with `UnknownPort` if the
    /// child has no such port, `DimensionMismatch` if the signal's dimension
    /// is incompatible with the port's, and `InvalidPort` when an output or
    /// bidirectional port is bound to a derived signal (write-through slices
    /// are not supported). Rebinding an already-bound port replaces the
    /// binding.
    pub fn bind_port(
        &mut self,
        parent: ModuleId,
        instance: &str,
        port_name: &str,
        signal: SignalId,
    ) -> Result<(), ModelError> {
        let p = self.module(parent);
        let inst_idx = p
            .instances
            .iter()
            .position(|i| i.name == instance)
            .ok_or_else(|| {
                ModelError::InvalidParameter(format!(
                    "module '{}' has no instance named '{instance}'",
                    p.name
                ))
            })?;
        if !p.contains(signal) {
            return Err(ModelError::InvalidPort(format!(
                "signal {signal} does not belong to module '{}'",
                p.name
            )));
        }
        let child = self.module(p.instances[inst_idx].child);
        let port = *child
            .find_port(port_name)
            .ok_or_else(|| ModelError::UnknownPort(port_name.to_string()))?;
        let port_dim = child.signal(port.signal).dim;
        let bound = p.signal(signal);
        if !port_dim.compatible(&bound.dim) {
            return Err(ModelError::DimensionMismatch(format!(
                "port '{port_name}' {} is incompatible with signal '{}' {}",
                port_dim, bound.name, bound.dim
            )));
        }
        if port.direction != Direction::Input && !bound.is_named() {
            return Err(ModelError::InvalidPort(format!(
                "{} port '{port_name}' must bind to a named signal, got derived '{}'",
                port.direction.keyword(),
                bound.name
            )));
        }
        let bindings = &mut self.modules[parent.0].instances[inst_idx].bindings;
        if let Some(entry) = bindings.iter_mut().find(|(name, _)| name == port_name) {
            entry.1 = signal;
        } else {
            bindings.push((port_name.to_string(), signal));
        }
        self.touch(parent);
        Ok(())
    }

    /// Assign the behavior defining `signal`'s value. Re-assignment replaces
    /// the prior entry. Fails with `DimensionMismatch` if the behavior's
    /// natural width disagrees with the signal's, and `InvalidPort` when the
    /// signal is an input-direction port (it is driven externally).
    pub fn set_behavior(
        &mut self,
        module: ModuleId,
        signal: SignalId,
        behavior: Behavior,
    ) -> Result<(), ModelError> {
        let m = self.module(module);
        if !m.contains(signal) {
            return Err(ModelError::InvalidPort(format!(
                "signal {signal} does not belong to module '{}'",
                m.name
            )));
        }
        if !m.signal(signal).is_named() {
            return Err(ModelError::InvalidPort(format!(
                "derived signal '{}' cannot be assigned a behavior",
                m.signal(signal).name
            )));
        }
        if let Some(port) = m.port_of(signal)
            && port.direction == Direction::Input
        {
            return Err(ModelError::InvalidPort(format!(
                "input port signal '{}' cannot be assigned a behavior",
                m.signal(signal).name
            )));
        }
        if behavior.has_empty_rules() {
            return Err(ModelError::InvalidParameter(format!(
                "behavior for '{}' contains an empty rule list",
                m.signal(signal).name
            )));
        }
        for input in behavior.input_signals() {
            if !m.contains(input) {
                return Err(ModelError::InvalidParameter(format!(
                    "behavior input {input} does not belong to module '{}'",
                    m.name
                )));
            }
        }
        let natural = behavior.natural_dimension();
        if !natural.compatible(&m.signal(signal).dim) {
            return Err(ModelError::DimensionMismatch(format!(
                "behavior width {} disagrees with signal '{}' {}",
                natural,
                m.signal(signal).name,
                m.signal(signal).dim
            )));
        }
        let behaviors = &mut self.modules[module.0].behaviors;
        if let Some(entry) = behaviors.iter_mut().find(|(s, _)| *s == signal) {
            entry.1 = behavior;
        } else {
            behaviors.push((signal, behavior));
        }
        self.touch(module);
        Ok(())
    }

    /// Build a logic-tree leaf for one of `module`'s signals.
    pub fn term(&self, module: ModuleId, signal: SignalId) -> Result<SignalTerm, ModelError> {
        let m = self.module(module);
        if !m.contains(signal) {
            return Err(ModelError::InvalidPort(format!(
                "signal {signal} does not belong to module '{}'",
                m.name
            )));
        }
        let s = m.signal(signal);
        Ok(SignalTerm {
            signal,
            name: s.name.clone(),
            dim: s.dim,
        })
    }

    /// True iff the module's conservative signal-dependency graph has a
    /// cycle. The verdict is cached; any mutation of the module or of a
    /// transitively instantiated child invalidates the cache through the
    /// validity engine.
    pub fn has_circular_signals(&mut self, module: ModuleId) -> bool {
        if let Some(cached) = self.circularity_cache.get(&module) {
            return *cached;
        }
        let report = crate::cycle::check_for_circular_signals(self, module);
        log::debug!(
            "circularity check for module '{}': found={}",
            self.module(module).name,
            report.found
        );
        self.circularity_cache.insert(module, report.found);
        report.found
    }

    /// True iff `target` is reachable from `from` through instantiation
    /// edges, `from == target` included. Keeps the hierarchy a DAG so
    /// flattening always terminates.
    fn reaches(&self, from: ModuleId, target: ModuleId) -> bool {
        let mut seen: HashSet<ModuleId> = HashSet::default();
        let mut stack = vec![from];
        while let Some(m) = stack.pop() {
            if m == target {
                return true;
            }
            if !seen.insert(m) {
                continue;
            }
            stack.extend(self.module(m).instances().iter().map(|i| i.child));
        }
        false
    }

    fn check_fresh_name(&self, module: ModuleId, name: &str) -> Result<(), ModelError> {
        let m = self.module(module);
        if m.find_signal(name).is_some() {
            return Err(ModelError::InvalidParameter(format!(
                "module '{}' already has a signal named '{name}'",
                m.name
            )));
        }
        Ok(())
    }

    fn push_signal(&mut self, module: ModuleId, signal: Signal) -> SignalId {
        let m = &mut self.modules[module.0];
        let id = SignalId(m.signals.len());
        m.signals.push(signal);
        self.touch(module);
        id
    }

    /// Notify the validity engine that `module` changed and evict every
    /// cached fact belonging to the invalidation wave.
    fn touch(&mut self, module: ModuleId) {
        let origin = self.modules[module.0].validity;
        let node_owner = &self.node_owner;
        let cache = &mut self.circularity_cache;
        self.validity.notify_updated(origin, |node| {
            cache.remove(&node_owner[node.0]);
        });
    }
}
