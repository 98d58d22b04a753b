//! Target descriptor (C1): immutable per-generation parameter set.

use std::collections::{BTreeMap, BTreeSet};

use dpu_isa::Generation;

use crate::activation::ActivationKind;
use crate::error::SimError;
use dpu_isa::SimReason;

/// The semantic role a bank group plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BankGroupKind {
    /// Activations in and out of the compute engines.
    Ifm,
    /// Weights and bias tiles.
    Param,
    /// Generation-specific special-purpose banks (e.g. AIE remap scratch).
    Special,
    /// Aliased elementwise paths with no dedicated physical storage.
    Virtual,
}

/// One contiguous run of banks sharing geometry and a semantic role.
#[derive(Debug, Clone)]
pub struct BankGroup {
    /// Human-readable group name, e.g. `"IFM0"`, `"PARAM"`.
    pub name: String,
    /// The group's semantic role.
    pub kind: BankGroupKind,
    /// Global bank id of the first bank in the group.
    pub base_bank_id: u32,
    /// Number of banks in the group.
    pub bank_num: u32,
    /// Bytes per line.
    pub bank_width: usize,
    /// Lines per bank.
    pub bank_depth: usize,
}

impl BankGroup {
    /// The global bank ids this group covers.
    pub fn bank_ids(&self) -> impl Iterator<Item = u32> {
        self.base_bank_id..(self.base_bank_id + self.bank_num)
    }
}

/// Parses a range-string like `"1-16,32"` into the set of integers it denotes.
///
/// Split on `,`; each token is either a single integer or `lo-hi`.
pub fn parse_range_string(spec: &str) -> Result<BTreeSet<i64>, SimError> {
    let mut set = BTreeSet::new();
    for token in spec.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        if let Some((lo, hi)) = token.split_once('-') {
            let lo: i64 = lo.trim().parse().map_err(|_| {
                SimError::new(SimReason::KernelParamOutOfRange, 0, format!("bad range token `{token}`"))
            })?;
            let hi: i64 = hi.trim().parse().map_err(|_| {
                SimError::new(SimReason::KernelParamOutOfRange, 0, format!("bad range token `{token}`"))
            })?;
            for v in lo..=hi {
                set.insert(v);
            }
        } else {
            let v: i64 = token.parse().map_err(|_| {
                SimError::new(SimReason::KernelParamOutOfRange, 0, format!("bad range token `{token}`"))
            })?;
            set.insert(v);
        }
    }
    Ok(set)
}

/// Immutable per-generation parameter set, loaded once from an external
/// descriptor and never mutated for the lifetime of a program run.
#[derive(Debug, Clone)]
pub struct TargetParams {
    /// The generation this descriptor was built for.
    pub generation: Generation,
    /// Processor type tag (free-form, taken from the descriptor).
    pub processor_type: String,
    /// High-performance memory-bus width in bytes.
    pub hp_width: usize,
    /// Every bank group on this target.
    pub bank_groups: Vec<BankGroup>,
    /// Per-engine-direction bank-access whitelist source ranges, e.g.
    /// `"conv-in"`, `"conv-out"`, `"load-out"`, `"save-in"`.
    pub access_whitelist_sources: BTreeMap<String, Vec<u32>>,
    /// Per-engine-direction instruction-limit range strings, e.g. legal
    /// kernel heights/widths/strides.
    pub instr_limit_sources: BTreeMap<String, String>,
    /// Activations this target can execute.
    pub supported_activations: BTreeSet<ActivationKindKey>,
    /// Input-channel parallelism.
    pub icp: usize,
    /// Output-channel parallelism.
    pub ocp: usize,
    /// Output-height parallelism (pixels produced per issue, vertically).
    pub ohp: usize,
    /// Output-width parallelism (pixels produced per issue, horizontally).
    pub owp: usize,
}

/// `ActivationKind` has no natural total order; this newtype gives it
/// one so it can live in a `BTreeSet` without pulling in `strum`'s
/// discriminant machinery for a set this small.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ActivationKindKey(pub u8);

impl From<ActivationKind> for ActivationKindKey {
    fn from(kind: ActivationKind) -> Self {
        use ActivationKind::*;
        ActivationKindKey(match kind {
            None => 0,
            Relu => 1,
            Leaky => 2,
            Relu6 => 3,
            Prelu => 4,
            HSigmoid => 5,
            HSwish => 6,
            Bn => 7,
            BnRelu => 8,
        })
    }
}

impl TargetParams {
    /// Derives the set of whitelisted bank ids for `access_type` (e.g.
    /// `"conv-in"`) from the engine's configured bank-group membership.
    pub fn bank_access_whitelist(&self, access_type: &str) -> BTreeSet<u32> {
        self.access_whitelist_sources
            .get(access_type)
            .into_iter()
            .flatten()
            .copied()
            .collect()
    }

    /// Parses and returns the legal value set for `limit_type` (e.g.
    /// `"conv-kernel-h"`), per spec §4.1's range-string grammar.
    pub fn instr_limit_whitelist(&self, limit_type: &str) -> Result<BTreeSet<i64>, SimError> {
        match self.instr_limit_sources.get(limit_type) {
            Some(spec) => parse_range_string(spec),
            None => Ok(BTreeSet::new()),
        }
    }

    /// Whether `activation` is in this target's supported set.
    pub fn supports_activation(&self, activation: ActivationKind) -> bool {
        self.supported_activations.contains(&ActivationKindKey::from(activation))
    }

    /// Finds the bank group containing `bank_id`, if any.
    pub fn bank_group_for(&self, bank_id: u32) -> Option<&BankGroup> {
        self.bank_groups.iter().find(|group| group.bank_ids().contains(&bank_id))
    }
}
