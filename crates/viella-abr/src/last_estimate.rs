use crate::types::{AbrAlgorithm, Representation};

/// The previous estimate produced by the orchestrator.
///
/// Kept as explicit state rather than captured in callbacks: the
/// guess-based chooser's protocol depends on which algorithm produced the
/// last choice, and the network analyzer's emergency path needs the last
/// bandwidth figure.
#[derive(Clone, Debug, Default)]
pub struct LastEstimate {
    /// Last bandwidth estimate, in bits per second. `None` when none was
    /// available yet.
    pub bandwidth: Option<f64>,
    /// Last chosen Representation. `None` before the first choice.
    pub representation: Option<Representation>,
    /// Which algorithm made the last choice. `None` before the first one.
    pub algorithm: Option<AbrAlgorithm>,
}

impl LastEstimate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(
        &mut self,
        representation: Representation,
        bandwidth: Option<f64>,
        algorithm: AbrAlgorithm,
    ) {
        self.bandwidth = bandwidth;
        self.representation = Some(representation);
        self.algorithm = Some(algorithm);
    }
}
