use itertools::Itertools as _;

use crate::HashMap;
use crate::behavior::{Behavior, Condition, SignalTerm};
use crate::cycle::check_for_circularity;
use crate::error::{ModelError, SimulationError};
use crate::logic_tree::LogicRenderer;
use crate::model::{DerivedOp, Design, Direction, ModuleId, SignalId, SignalKind, SignalPath};
use crate::stimulus::{Stimulus, TIME_EPSILON, Wave};

/// Yields the sequence of simulation instants, merging stimulus transition
/// instants into its regular grid.
pub trait StepPolicy {
    fn schedule(&self, transitions: &[f64]) -> Vec<f64>;
}

/// Default policy: evenly spaced steps bounded by `max_step` over `[0,
/// length]`, with transition edges injected and deduplicated within
/// [`TIME_EPSILON`].
#[derive(Debug, Clone, Copy)]
pub struct UniformStepPolicy {
    max_step: f64,
    length: f64,
}

impl UniformStepPolicy {
    /// Fails with `InvalidParameter` unless both `max_step` and `length` are
    /// positive.
    pub fn new(max_step: f64, length: f64) -> Result<Self, ModelError> {
        if max_step <= 0.0 || length <= 0.0 {
            return Err(ModelError::InvalidParameter(format!(
                "step policy requires positive max_step and length, got {max_step} and {length}"
            )));
        }
        Ok(Self { max_step, length })
    }
}

impl StepPolicy for UniformStepPolicy {
    fn schedule(&self, transitions: &[f64]) -> Vec<f64> {
        let steps = (self.length / self.max_step).ceil().max(1.0) as usize;
        let dt = self.length / steps as f64;
        let mut instants: Vec<f64> = (0..=steps).map(|i| i as f64 * dt).collect();
        instants.extend(
            transitions
                .iter()
                .copied()
                .filter(|t| *t >= 0.0 && *t <= self.length),
        );
        instants.sort_by(f64::total_cmp);
        let mut deduped: Vec<f64> = Vec::with_capacity(instants.len());
        for t in instants {
            if deduped.last().is_none_or(|last| t - last > TIME_EPSILON) {
                deduped.push(t);
            }
        }
        deduped
    }
}

/// Per-monitor trace: parallel time and value arrays, frozen once the run
/// returns.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationResult {
    path: SignalPath,
    times: Vec<f64>,
    values: Vec<u64>,
}

impl SimulationResult {
    pub fn path(&self) -> &SignalPath {
        &self.path
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn values(&self) -> &[u64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Lazy (time, value) pairs.
    pub fn samples(&self) -> impl Iterator<Item = (f64, u64)> + '_ {
        self.times
            .iter()
            .copied()
            .zip(self.values.iter().copied())
    }
}

/// Index of a flattened instance; 0 is the top module itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct InstKey(usize);

#[derive(Debug)]
struct FlatInstance {
    module: ModuleId,
    /// Flattened children, parallel to the module's instantiation list.
    children: Vec<InstKey>,
    /// Dotted instance path for diagnostics; empty for the top.
    path: String,
}

/// One behavior entry of the flattened hierarchy.
#[derive(Debug, Clone, Copy)]
struct Driver {
    inst: InstKey,
    signal: SignalId,
}

/// The flattened hierarchy: canonical nets for named signals, with child
/// port signals aliased to the parent signals they are bound to.
struct Flat {
    instances: Vec<FlatInstance>,
    aliases: HashMap<(InstKey, SignalId), (InstKey, SignalId)>,
    nets: HashMap<(InstKey, SignalId), usize>,
    num_nets: usize,
    drivers: Vec<Driver>,
    driver_of_net: HashMap<usize, usize>,
}

impl Flat {
    fn build(design: &Design, top: ModuleId) -> Result<Self, SimulationError> {
        let mut instances = vec![FlatInstance {
            module: top,
            children: Vec::new(),
            path: String::new(),
        }];
        let mut aliases = HashMap::default();

        let mut idx = 0;
        while idx < instances.len() {
            let parent_key = InstKey(idx);
            let module = instances[idx].module;
            let parent_path = instances[idx].path.clone();
            for instantiation in design.module(module).instances() {
                let child_key = InstKey(instances.len());
                let path = if parent_path.is_empty() {
                    instantiation.name.clone()
                } else {
                    format!("{parent_path}.{}", instantiation.name)
                };
                instances.push(FlatInstance {
                    module: instantiation.child,
                    children: Vec::new(),
                    path,
                });
                instances[idx].children.push(child_key);
                let child = design.module(instantiation.child);
                for (port_name, bound) in &instantiation.bindings {
                    if let Some(port) = child.find_port(port_name) {
                        aliases.insert((child_key, port.signal), (parent_key, *bound));
                    }
                }
            }
            idx += 1;
        }

        // Canonical nets: one per named signal that is not aliased away.
        let mut nets = HashMap::default();
        let mut num_nets = 0;
        for (i, flat_instance) in instances.iter().enumerate() {
            let key = InstKey(i);
            for (sig, signal) in design.module(flat_instance.module).signals() {
                if !signal.is_named() || aliases.contains_key(&(key, sig)) {
                    continue;
                }
                if signal.dim.exact_value().is_none() {
                    return Err(ModelError::InvalidParameter(format!(
                        "signal '{}' needs an exact width to simulate, has {}",
                        signal.name, signal.dim
                    ))
                    .into());
                }
                nets.insert((key, sig), num_nets);
                num_nets += 1;
            }
        }

        let mut flat = Self {
            instances,
            aliases,
            nets,
            num_nets,
            drivers: Vec::new(),
            driver_of_net: HashMap::default(),
        };

        for i in 0..flat.instances.len() {
            let key = InstKey(i);
            let module = flat.instances[i].module;
            for (signal, _) in design.module(module).behaviors() {
                let driver_idx = flat.drivers.len();
                let (net_inst, net_sig) = flat.canonical(key, *signal);
                let net = flat.nets[&(net_inst, net_sig)];
                if flat.driver_of_net.insert(net, driver_idx).is_some() {
                    return Err(ModelError::InvalidParameter(format!(
                        "'{}' is driven by more than one behavior",
                        flat.describe(key, *signal, design)
                    ))
                    .into());
                }
                flat.drivers.push(Driver {
                    inst: key,
                    signal: *signal,
                });
            }
        }

        Ok(flat)
    }

    /// Follow port-binding aliases up to the canonical owning instance.
    fn canonical(&self, mut inst: InstKey, mut sig: SignalId) -> (InstKey, SignalId) {
        while let Some((next_inst, next_sig)) = self.aliases.get(&(inst, sig)) {
            inst = *next_inst;
            sig = *next_sig;
        }
        (inst, sig)
    }

    /// Expand a (possibly derived) signal into the canonical named signals
    /// it reads.
    fn collect_named(
        &self,
        design: &Design,
        inst: InstKey,
        sig: SignalId,
        out: &mut Vec<(InstKey, SignalId)>,
    ) {
        let (inst, sig) = self.canonical(inst, sig);
        let module = self.instances[inst.0].module;
        match &design.module(module).signal(sig).kind {
            SignalKind::Named => out.push((inst, sig)),
            SignalKind::Derived(DerivedOp::Slice { source, .. }) => {
                self.collect_named(design, inst, *source, out);
            }
            SignalKind::Derived(DerivedOp::Concat(parts)) => {
                for part in parts {
                    self.collect_named(design, inst, *part, out);
                }
            }
        }
    }

    /// Driver dependency edges: driver index to the drivers of every net its
    /// behavior reads.
    fn driver_graph(&self, design: &Design) -> HashMap<usize, Vec<usize>> {
        let mut graph: HashMap<usize, Vec<usize>> = HashMap::default();
        for (d, driver) in self.drivers.iter().enumerate() {
            let module = self.instances[driver.inst.0].module;
            let Some(behavior) = design.module(module).behavior_of(driver.signal) else {
                graph.insert(d, Vec::new());
                continue;
            };
            let mut deps = Vec::new();
            for input in behavior.input_signals() {
                let mut named = Vec::new();
                self.collect_named(design, driver.inst, input, &mut named);
                for key in named {
                    if let Some(net) = self.nets.get(&key)
                        && let Some(dep) = self.driver_of_net.get(net)
                    {
                        deps.push(*dep);
                    }
                }
            }
            deps.sort_unstable();
            deps.dedup();
            graph.insert(d, deps);
        }
        graph
    }

    fn describe(&self, inst: InstKey, sig: SignalId, design: &Design) -> String {
        let module = self.instances[inst.0].module;
        let name = &design.module(module).signal(sig).name;
        if self.instances[inst.0].path.is_empty() {
            name.clone()
        } else {
            format!("{}.{name}", self.instances[inst.0].path)
        }
    }
}

fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Per-run evaluation state over the flattened nets.
struct Engine<'a> {
    design: &'a Design,
    flat: &'a Flat,
    values: Vec<u64>,
    prev: Vec<u64>,
}

impl<'a> Engine<'a> {
    fn new(design: &'a Design, flat: &'a Flat) -> Self {
        Self {
            design,
            flat,
            values: vec![0; flat.num_nets],
            prev: vec![0; flat.num_nets],
        }
    }

    fn read_buf(&self, buf: &[u64], inst: InstKey, sig: SignalId) -> u64 {
        let (inst, sig) = self.flat.canonical(inst, sig);
        let module = self.flat.instances[inst.0].module;
        let signal = self.design.module(module).signal(sig);
        match &signal.kind {
            SignalKind::Named => buf[self.flat.nets[&(inst, sig)]],
            SignalKind::Derived(DerivedOp::Slice { source, lsb, msb }) => {
                (self.read_buf(buf, inst, *source) >> lsb) & mask(msb - lsb + 1)
            }
            SignalKind::Derived(DerivedOp::Concat(parts)) => {
                let mut value = 0u64;
                let mut shift = 0u32;
                for part in parts {
                    let width = self
                        .design
                        .module(module)
                        .signal(*part)
                        .dim
                        .exact_value()
                        .unwrap_or(1);
                    value |= (self.read_buf(buf, inst, *part) & mask(width)) << shift;
                    shift += width;
                }
                value
            }
        }
    }

    fn read(&self, inst: InstKey, sig: SignalId) -> u64 {
        self.read_buf(&self.values, inst, sig)
    }

    fn write(&mut self, inst: InstKey, sig: SignalId, value: u64) -> u64 {
        let (inst, sig) = self.flat.canonical(inst, sig);
        let module = self.flat.instances[inst.0].module;
        let width = self
            .design
            .module(module)
            .signal(sig)
            .dim
            .exact_value()
            .unwrap_or(64);
        let masked = value & mask(width);
        let net = self.flat.nets[&(inst, sig)];
        self.values[net] = masked;
        masked
    }

    fn eval_behavior(&self, inst: InstKey, behavior: &Behavior, held: u64) -> u64 {
        match behavior {
            Behavior::Value(v) => *v,
            Behavior::Logic(tree) => {
                let mut fold = ValueFold { engine: self, inst };
                tree.fold(&mut fold)
            }
            Behavior::Dynamic(entries) => {
                for (condition, inner) in entries {
                    if self.eval_condition(inst, condition) {
                        return self.eval_behavior(inst, inner, held);
                    }
                }
                held
            }
        }
    }

    fn eval_condition(&self, inst: InstKey, condition: &Condition) -> bool {
        match condition {
            Condition::Level { signal, value } => self.read(inst, *signal) == *value,
            Condition::Rising(signal) => {
                self.read_buf(&self.prev, inst, *signal) & 1 == 0
                    && self.read(inst, *signal) & 1 == 1
            }
            Condition::Falling(signal) => {
                self.read_buf(&self.prev, inst, *signal) & 1 == 1
                    && self.read(inst, *signal) & 1 == 0
            }
            Condition::All(conditions) => conditions.iter().all(|c| self.eval_condition(inst, c)),
            Condition::Any(conditions) => conditions.iter().any(|c| self.eval_condition(inst, c)),
            Condition::Not(inner) => !self.eval_condition(inst, inner),
        }
    }
}

/// The digital-value lowering target: folds a logic tree over current net
/// values.
struct ValueFold<'e, 'a> {
    engine: &'e Engine<'a>,
    inst: InstKey,
}

impl LogicRenderer<SignalTerm> for ValueFold<'_, '_> {
    type Output = u64;

    fn and(&mut self, operands: Vec<u64>) -> u64 {
        operands.into_iter().reduce(|a, b| a & b).unwrap_or(0)
    }

    fn or(&mut self, operands: Vec<u64>) -> u64 {
        operands.into_iter().reduce(|a, b| a | b).unwrap_or(0)
    }

    fn not(&mut self, operand: u64) -> u64 {
        // Garbage above the tree width is stripped by the final write mask.
        !operand
    }

    fn leaf(&mut self, leaf: &SignalTerm) -> u64 {
        self.engine.read(self.inst, leaf.signal)
    }
}

/// Rule-based time-stepped simulation of a validated module hierarchy.
///
/// Consumes the design read-only; a run produces a fresh independent set of
/// results each time.
pub struct Simulation<'a> {
    design: &'a Design,
    top: ModuleId,
    stimuli: Vec<(String, Stimulus)>,
    monitors: Vec<SignalPath>,
}

impl<'a> Simulation<'a> {
    pub fn new(design: &'a Design, top: ModuleId) -> Self {
        Self {
            design,
            top,
            stimuli: Vec::new(),
            monitors: Vec::new(),
        }
    }

    /// Attach a stimulus to a top-level input port by name.
    pub fn stimulus(mut self, port: &str, stimulus: Stimulus) -> Self {
        self.stimuli.push((port.to_string(), stimulus));
        self
    }

    pub fn monitor(mut self, path: SignalPath) -> Self {
        self.monitors.push(path);
        self
    }

    pub fn run(&self, policy: &dyn StepPolicy) -> Result<Vec<SimulationResult>, SimulationError> {
        let top_module = self.design.module(self.top);

        // Stimuli must target input-capable ports of the top module, with
        // values that fit the port width.
        let mut stimulus_targets = Vec::new();
        for (port_name, stimulus) in &self.stimuli {
            let port = top_module
                .find_port(port_name)
                .ok_or_else(|| ModelError::UnknownPort(port_name.clone()))?;
            if port.direction == Direction::Output {
                return Err(ModelError::InvalidPort(format!(
                    "stimulus target '{port_name}' is an output port"
                ))
                .into());
            }
            let width = top_module
                .signal(port.signal)
                .dim
                .exact_value()
                .ok_or_else(|| {
                    ModelError::InvalidParameter(format!(
                        "stimulated port '{port_name}' has no exact width"
                    ))
                })?;
            check_stimulus_width(port_name, stimulus, width)?;
            stimulus_targets.push((port.signal, stimulus));
        }

        let flat = Flat::build(self.design, self.top)?;

        let graph = flat.driver_graph(self.design);
        let report = check_for_circularity(&graph, false);
        if report.found {
            let path = report.paths[0]
                .iter()
                .map(|d| {
                    let driver = flat.drivers[*d];
                    flat.describe(driver.inst, driver.signal, self.design)
                })
                .join(" -> ");
            return Err(SimulationError::CircularLogic(path));
        }

        let order = topological_order(&graph, flat.drivers.len());

        let monitor_targets = self
            .monitors
            .iter()
            .map(|path| self.resolve(&flat, path))
            .collect::<Result<Vec<_>, _>>()?;

        // A pulse is periodic, so its edge enumeration needs a horizon. The
        // policy owns the run length; its bare grid's last instant is it.
        let horizon = policy.schedule(&[]).last().copied().unwrap_or(0.0);
        let mut transitions = Vec::new();
        for (_, stimulus) in &self.stimuli {
            stimulus.transition_times(horizon, &mut transitions);
        }
        let schedule = policy.schedule(&transitions);
        log::debug!(
            "simulating '{}': {} nets, {} drivers, {} instants",
            top_module.name,
            flat.num_nets,
            flat.drivers.len(),
            schedule.len()
        );

        let mut engine = Engine::new(self.design, &flat);
        let mut held = vec![0u64; flat.drivers.len()];
        let mut results: Vec<SimulationResult> = self
            .monitors
            .iter()
            .map(|path| SimulationResult {
                path: path.clone(),
                times: Vec::with_capacity(schedule.len()),
                values: Vec::with_capacity(schedule.len()),
            })
            .collect();

        let top_key = InstKey(0);
        for &t in &schedule {
            for (signal, stimulus) in &stimulus_targets {
                engine.write(top_key, *signal, stimulus.value_at(t));
            }
            for &d in &order {
                let driver = flat.drivers[d];
                let module = flat.instances[driver.inst.0].module;
                let behavior = self
                    .design
                    .module(module)
                    .behavior_of(driver.signal)
                    .ok_or_else(|| {
                        SimulationError::UnknownSignal(flat.describe(
                            driver.inst,
                            driver.signal,
                            self.design,
                        ))
                    })?;
                let value = engine.eval_behavior(driver.inst, behavior, held[d]);
                held[d] = engine.write(driver.inst, driver.signal, value);
            }
            for (result, (inst, sig)) in results.iter_mut().zip(&monitor_targets) {
                result.times.push(t);
                result.values.push(engine.read(*inst, *sig));
            }
            engine.prev.copy_from_slice(&engine.values);
        }

        Ok(results)
    }

    /// Resolve an instance-name path to a flattened (instance, signal) pair.
    fn resolve(
        &self,
        flat: &Flat,
        path: &SignalPath,
    ) -> Result<(InstKey, SignalId), SimulationError> {
        let mut inst = InstKey(0);
        for name in &path.instances {
            let module = flat.instances[inst.0].module;
            let position = self
                .design
                .module(module)
                .instances()
                .iter()
                .position(|i| i.name == *name)
                .ok_or_else(|| SimulationError::UnknownSignal(path.to_string()))?;
            inst = flat.instances[inst.0].children[position];
        }
        let module = flat.instances[inst.0].module;
        let sig = self
            .design
            .module(module)
            .find_signal(&path.signal)
            .ok_or_else(|| SimulationError::UnknownSignal(path.to_string()))?;
        Ok((inst, sig))
    }
}

fn check_stimulus_width(
    port_name: &str,
    stimulus: &Stimulus,
    width: u32,
) -> Result<(), ModelError> {
    match &stimulus.0 {
        Wave::Constant(v) => {
            if *v & !mask(width) != 0 {
                return Err(ModelError::DimensionMismatch(format!(
                    "stimulus value {v} does not fit port '{port_name}' width {width}"
                )));
            }
        }
        Wave::Pulse { .. } => {}
        Wave::TimeDefined(points) => {
            for (_, v) in points {
                if *v & !mask(width) != 0 {
                    return Err(ModelError::DimensionMismatch(format!(
                        "stimulus value {v} does not fit port '{port_name}' width {width}"
                    )));
                }
            }
        }
        Wave::PerBit(bits) => {
            if bits.len() != width as usize {
                return Err(ModelError::DimensionMismatch(format!(
                    "per-bit stimulus has {} bits, port '{port_name}' is {width} wide",
                    bits.len()
                )));
            }
        }
    }
    Ok(())
}

/// Dependencies-first ordering of the driver graph. Assumes the graph has
/// been checked acyclic.
fn topological_order(graph: &HashMap<usize, Vec<usize>>, count: usize) -> Vec<usize> {
    let mut order = Vec::with_capacity(count);
    let mut visited = vec![false; count];
    let mut stack = Vec::new();
    for start in 0..count {
        if visited[start] {
            continue;
        }
        stack.push((start, 0));
        visited[start] = true;
        while let Some((node, child)) = stack.pop() {
            let deps = &graph[&node];
            if child < deps.len() {
                stack.push((node, child + 1));
                let dep = deps[child];
                if !visited[dep] {
                    visited[dep] = true;
                    stack.push((dep, 0));
                }
            } else {
                order.push(node);
            }
        }
    }
    order
}
