use serde::{Deserialize, Serialize};

use crate::E;

/// Strategy for lower-bounding the Gaussian kernel over a post-image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LowerBoundMethod {
    /// Minimum of the kernel over the vertex list of the image polytope.
    /// Exact for log-concave kernels.
    #[default]
    VertexEnumeration,
}

/// Strategy for upper-bounding the Gaussian kernel over a post-image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpperBoundMethod {
    /// Clamp the target center onto the bounding box of the image and
    /// evaluate there. Fast and loose.
    BoxApproximation,
    /// Projected gradient ascent over the image halfspaces. Tight, slow.
    GlobalSolver,
    /// Conditional-gradient iterations on the negative log-kernel. Moderate
    /// cost, tight for many instances.
    FrankWolfe {
        num_iterations: usize,
        termination_tol: E,
    },
}

impl Default for UpperBoundMethod {
    fn default() -> Self {
        UpperBoundMethod::GlobalSolver
    }
}

/// Barrier synthesis backend.
///
/// The gradient and Frank-Wolfe flavours share the iterative worst-case
/// alternation and are accepted as aliases of `Iterative`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarrierAlgorithm {
    /// Primal linear program over per-region barrier values.
    #[default]
    Constant,
    /// Dual linear program; must match the primal objective to tolerance.
    DualConstant,
    /// Alternating outer LP / inner worst-case-distribution loop.
    #[serde(alias = "frank_wolfe", alias = "gradient_descent")]
    Iterative,
    /// Sum-of-squares polynomial backend. Plug-in seam only; requesting it
    /// surfaces [`crate::Error::UnsupportedAlgorithm`].
    Sos,
}

/// Flat configuration record for probability bounding and barrier synthesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub lower_bound_method: LowerBoundMethod,
    pub upper_bound_method: UpperBoundMethod,
    /// Transition probabilities below this threshold are pruned to zero.
    pub sparsity_tol: E,
    /// Time horizon `N` of the certificate `eta + N * beta`.
    pub time_horizon: usize,
    pub barrier_algorithm: BarrierAlgorithm,
    /// Floor for the LP decision variables.
    pub decision_floor: E,
    /// Outer iteration cap for the iterative synthesis backend.
    pub max_outer_iterations: usize,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            lower_bound_method: LowerBoundMethod::default(),
            upper_bound_method: UpperBoundMethod::default(),
            sparsity_tol: 1e-12,
            time_horizon: 1,
            barrier_algorithm: BarrierAlgorithm::default(),
            decision_floor: 1e-6,
            max_outer_iterations: 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documentation() {
        let config = SynthesisConfig::default();
        assert_eq!(config.lower_bound_method, LowerBoundMethod::VertexEnumeration);
        assert_eq!(config.upper_bound_method, UpperBoundMethod::GlobalSolver);
        assert_eq!(config.sparsity_tol, 1e-12);
        assert_eq!(config.time_horizon, 1);
        assert_eq!(config.barrier_algorithm, BarrierAlgorithm::Constant);
        assert_eq!(config.decision_floor, 1e-6);
    }

    #[test]
    fn iterative_aliases_deserialize() {
        let parsed: BarrierAlgorithm = serde_json::from_str("\"frank_wolfe\"").unwrap();
        assert_eq!(parsed, BarrierAlgorithm::Iterative);
        let parsed: BarrierAlgorithm = serde_json::from_str("\"gradient_descent\"").unwrap();
        assert_eq!(parsed, BarrierAlgorithm::Iterative);
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = SynthesisConfig {
            upper_bound_method: UpperBoundMethod::FrankWolfe {
                num_iterations: 50,
                termination_tol: 1e-8,
            },
            ..SynthesisConfig::default()
        };
        let text = serde_json::to_string(&config).unwrap();
        let parsed: SynthesisConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
