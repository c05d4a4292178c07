use std::time::Duration;

// ANALYSIS OPTIONS
// ================================================================================================

/// Which project's function tables and idioms to load.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Project {
    #[default]
    None,
    Kernel,
    IllumosKernel,
}

/// Knobs for one analysis run. The defaults match the classic behavior;
/// embedders mostly only ever touch `project` and the debug flags.
#[derive(Clone, Debug)]
pub struct Options {
    pub project: Project,
    /// Emit info-severity rows as well.
    pub info: bool,
    /// Enable the noisier variants of checks.
    pub spammy: bool,
    /// Skip the summary database entirely (also the degraded mode entered
    /// when the database fails to open).
    pub no_db: bool,
    pub debug: bool,
    pub debug_implied: bool,
    /// Implied-value recursion gives up past this many reachable children.
    /// Refusing to refine is sound; it only costs precision.
    pub implied_children_cap: u32,
    /// Wall-clock budget for a single condition's implied-value filtering;
    /// tripping it abandons the rest of the function.
    pub condition_budget: Duration,
    /// Ceiling on loop body re-analysis while waiting for the state tree to
    /// stabilize.
    pub loop_iteration_cap: u32,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            project: Project::None,
            info: false,
            spammy: false,
            no_db: false,
            debug: false,
            debug_implied: false,
            implied_children_cap: 4000,
            condition_budget: Duration::from_secs(7),
            loop_iteration_cap: 10,
        }
    }
}
