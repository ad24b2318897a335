mod behavior;
mod codegen;
mod cycle;
mod dimension;
mod error;
mod logic_tree;
mod model;
mod simulation;
mod stimulus;
mod validity;

pub use behavior::{Behavior, Condition, SignalTerm};
pub use codegen::{netlist, vhdl};
pub use cycle::{
    CircularityReport, check_for_circular_signals, check_for_circularity,
    signal_dependency_graph,
};
pub use dimension::{Dimension, MAX_WIDTH};
pub use error::{ModelError, SimulationError};
pub(crate) use fxhash::FxHashMap as HashMap;
pub(crate) use fxhash::FxHashSet as HashSet;
pub use logic_tree::{Combinable, LogicRenderer, LogicTree};
pub use model::{
    DerivedOp, Design, Direction, Instantiation, Module, ModuleId, Port, Signal, SignalId,
    SignalKind, SignalPath,
};
pub use simulation::{Simulation, SimulationResult, StepPolicy, UniformStepPolicy};
pub use stimulus::{SETTLE_TIME, Stimulus, TIME_EPSILON};
pub use validity::{ValidityGraph, ValidityId};

#[cfg(test)]
mod sim_tests;
