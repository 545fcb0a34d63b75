use crate::core::models::member::MemberPlan;

/// Plans the per-member execution parameters for one backend's ensemble.
///
/// Seed 0 is always the vanilla deterministic baseline: dropout off, zero
/// noise, whatever was requested. Seeds 1..nstruct inherit the requested
/// stochastic options verbatim. For `nstruct == 1` only the baseline is
/// planned and the stochastic flags have no observable effect.
pub fn plan(nstruct: usize, mc_dropout: bool, noise_scale: f64) -> Vec<MemberPlan> {
    let mut plans = Vec::with_capacity(nstruct);
    for seed in 0..nstruct {
        if seed == 0 {
            plans.push(MemberPlan {
                seed,
                mc_dropout: false,
                noise_scale: 0.0,
            });
        } else {
            plans.push(MemberPlan {
                seed,
                mc_dropout,
                noise_scale,
            });
        }
    }
    plans
}
