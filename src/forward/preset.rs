//! Forward model presets.

use serde::{Deserialize, Serialize};

use crate::tissues::conductivity::{
    weighted_brain_conductivity, weighted_brain_scalp_conductivity, TissueClass,
};

/// Model family of a lead field computation. Each preset fixes the
/// layer count, the tissues involved and the default skull radius
/// handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwardPreset {
    Ary3ShellApprox,
    Exact3Shell,
    Exact4Shell,
    Exact6Shell,
}

/// Where the per-electrode skull radii come from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkullRadiusMode {
    /// Constant relative radii: the skull thickens with bigger scalps.
    FixedRatio { inner: f64, outer: f64 },
    /// Constant radii modulated by the head model: what lies beyond the
    /// model scalp is counted as more scalp, shrinking the skull.
    ModulatedRatio { inner: f64, outer: f64 },
    /// Radii estimated per electrode from the tissue radii.
    PerElectrode,
}

impl Default for SkullRadiusMode {
    fn default() -> Self {
        SkullRadiusMode::PerElectrode
    }
}

impl ForwardPreset {
    pub const DEFAULT_INNER_SKULL_RADIUS: f64 = 0.87;
    pub const DEFAULT_OUTER_SKULL_RADIUS: f64 = 0.92;

    pub fn num_layers(self) -> usize {
        match self {
            ForwardPreset::Ary3ShellApprox | ForwardPreset::Exact3Shell => 3,
            ForwardPreset::Exact4Shell => 4,
            ForwardPreset::Exact6Shell => 6,
        }
    }

    /// Tissues entering the model, innermost first. The 6-shell model
    /// uses the whole skull plus its spongy core, splitting the skull
    /// into three slabs.
    pub fn tissues(self) -> &'static [TissueClass] {
        match self {
            ForwardPreset::Ary3ShellApprox | ForwardPreset::Exact3Shell => {
                &[TissueClass::Brain, TissueClass::Skull, TissueClass::Scalp]
            }
            ForwardPreset::Exact4Shell => &[
                TissueClass::Brain,
                TissueClass::Csf,
                TissueClass::Skull,
                TissueClass::Scalp,
            ],
            ForwardPreset::Exact6Shell => &[
                TissueClass::Brain,
                TissueClass::Csf,
                TissueClass::Skull,
                TissueClass::SkullSpongy,
                TissueClass::Scalp,
            ],
        }
    }

    /// Per-layer conductivities, innermost first.
    pub fn layer_conductivities(
        self,
        skull_cond: f64,
        skull_compact_cond: f64,
        skull_spongy_cond: f64,
    ) -> Vec<f64> {
        match self {
            // Ary groups brain and scalp under one conductivity
            ForwardPreset::Ary3ShellApprox => {
                let bs = weighted_brain_scalp_conductivity();
                vec![bs, skull_cond, bs]
            }
            ForwardPreset::Exact3Shell => vec![
                weighted_brain_conductivity(),
                skull_cond,
                TissueClass::Scalp.conductivity(),
            ],
            ForwardPreset::Exact4Shell => vec![
                weighted_brain_conductivity(),
                TissueClass::Csf.conductivity(),
                skull_cond,
                TissueClass::Scalp.conductivity(),
            ],
            ForwardPreset::Exact6Shell => vec![
                weighted_brain_conductivity(),
                TissueClass::Csf.conductivity(),
                skull_compact_cond,
                skull_spongy_cond,
                skull_compact_cond,
                TissueClass::Scalp.conductivity(),
            ],
        }
    }

    pub fn is_ary(self) -> bool {
        matches!(self, ForwardPreset::Ary3ShellApprox)
    }

    pub fn name(self) -> &'static str {
        match self {
            ForwardPreset::Ary3ShellApprox => "Ary3ShellApprox",
            ForwardPreset::Exact3Shell => "Exact3Shell",
            ForwardPreset::Exact4Shell => "Exact4Shell",
            ForwardPreset::Exact6Shell => "Exact6Shell",
        }
    }
}

impl std::str::FromStr for ForwardPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ary3shellapprox" | "ary" | "3shellary" => Ok(ForwardPreset::Ary3ShellApprox),
            "exact3shell" | "3shell" => Ok(ForwardPreset::Exact3Shell),
            "exact4shell" | "4shell" => Ok(ForwardPreset::Exact4Shell),
            "exact6shell" | "6shell" => Ok(ForwardPreset::Exact6Shell),
            other => Err(format!("unknown forward preset: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_counts_match_conductivities() {
        for preset in [
            ForwardPreset::Ary3ShellApprox,
            ForwardPreset::Exact3Shell,
            ForwardPreset::Exact4Shell,
            ForwardPreset::Exact6Shell,
        ] {
            let sigma = preset.layer_conductivities(0.0105, 0.0046, 0.0166);
            assert_eq!(sigma.len(), preset.num_layers());
            assert!(sigma.iter().all(|&s| s > 0.0));
        }
    }

    #[test]
    fn ary_groups_brain_and_scalp() {
        let sigma = ForwardPreset::Ary3ShellApprox.layer_conductivities(0.0105, 0.0, 0.0);
        assert_eq!(sigma[0], sigma[2]);
    }

    #[test]
    fn preset_parses_from_cli_spellings() {
        assert_eq!(
            "ary".parse::<ForwardPreset>().unwrap(),
            ForwardPreset::Ary3ShellApprox
        );
        assert_eq!(
            "Exact6Shell".parse::<ForwardPreset>().unwrap(),
            ForwardPreset::Exact6Shell
        );
        assert!("5shell".parse::<ForwardPreset>().is_err());
    }
}
