//! Hardware-description outputs: VHDL text and the analog netlist boundary.

pub mod netlist;
pub mod vhdl;
