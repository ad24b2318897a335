use thiserror::Error;

/// Structural errors raised while assembling a circuit model.
///
/// These abort the operation that triggered them; a failed operation leaves
/// the owning module in its prior state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),
    #[error("unknown port '{0}'")]
    UnknownPort(String),
    #[error("invalid port: {0}")]
    InvalidPort(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimulationError {
    /// The flattened circuit contains combinational feedback. Callers are
    /// expected to run the circularity check before simulating; the engine
    /// refuses to loop forever on an unvalidated cyclic module.
    #[error("combinational feedback through: {0}")]
    CircularLogic(String),
    #[error("unknown signal '{0}'")]
    UnknownSignal(String),
    #[error(transparent)]
    Model(#[from] ModelError),
}
