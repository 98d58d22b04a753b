//! Runtime configuration: the `key : value`, `#`-comment file from
//! spec §6. Recognized keys get a typed home here rather than staying
//! bare strings.

use std::collections::BTreeMap;
use std::str::FromStr;

use dpu_isa::SimReason;

use crate::error::SimError;

/// `run_mode` config value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Extra per-instruction trace dumps are enabled.
    Debug,
    /// No trace dumps; DDR-image output only.
    Release,
}

impl FromStr for RunMode {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(RunMode::Debug),
            "release" => Ok(RunMode::Release),
            other => Err(SimError::new(SimReason::UnknownSimReason, 0, format!("unknown run_mode `{other}`"))),
        }
    }
}

/// `gen_aie_data_format` config value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AieDataFormat {
    /// `1`: text.
    Txt,
    /// `2`: hex.
    Hex,
    /// `3`: both.
    Both,
}

impl FromStr for AieDataFormat {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1" => Ok(AieDataFormat::Txt),
            "2" => Ok(AieDataFormat::Hex),
            "3" => Ok(AieDataFormat::Both),
            other => {
                Err(SimError::new(SimReason::UnknownSimReason, 0, format!("unknown gen_aie_data_format `{other}`")))
            }
        }
    }
}

/// Parsed runtime configuration.
///
/// Every field defaults to the value the simulator uses when the key
/// is absent from the config file, so a missing file is equivalent to
/// an empty one.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// High-performance memory-bus width in bytes.
    pub hp_width: usize,
    /// Debug vs. release run mode.
    pub run_mode: RunMode,
    /// ISA version name, resolved to a [`dpu_isa::Generation`] by the caller.
    pub isa_version: String,
    /// Whether per-instruction debug flags are honored.
    pub debug: bool,
    /// Directory trace dumps are written under.
    pub debug_path: Option<String>,
    /// Whether to dump at layer granularity.
    pub debug_layer: bool,
    /// Names of layers to restrict dumping to, if non-empty.
    pub debug_layer_name_list: Vec<String>,
    /// DDR-dump format.
    pub ddr_dump_format: Option<String>,
    /// Whether to dump DDR at net granularity.
    pub ddr_dump_net: bool,
    /// Whether to dump DDR at layer granularity.
    pub ddr_dump_layer: bool,
    /// Whether to dump DDR at init.
    pub ddr_dump_init: bool,
    /// Whether to dump DDR at end.
    pub ddr_dump_end: bool,
    /// Whether to split per-reg dumps into separate files.
    pub ddr_dump_split: bool,
    /// Whether to use the "only used lines" fast dump path at end.
    pub ddr_dump_end_fast: bool,
    /// Whether every instruction is individually logged.
    pub dump_inst: bool,
    /// Per-instruction debug toggles, indices `0..9`.
    pub debug_inst: [bool; 9],
    /// Whether AIE golden data generation is enabled (DPUV4E).
    pub gen_aie_data: bool,
    /// AIE golden data format, when enabled.
    pub gen_aie_data_format: Option<AieDataFormat>,
    /// Whether RTL co-simulation hooks are enabled.
    pub co_sim_on: bool,
    /// Whether the double-write memory-safety check is enabled.
    pub memory_double_write_check: bool,
    /// Whether `SAVE` uses the threaded worker-pool backend.
    pub save_parallel: bool,
    /// Whether `LOAD` (image path) uses the threaded worker-pool backend.
    pub load_img_parallel: bool,
    /// Whether `LOAD` (weight path) uses the threaded worker-pool backend.
    pub load_wgt_parallel: bool,
    /// Whether to dump the full DDR image unconditionally.
    pub dump_ddr_all: bool,
    /// Any recognized key not given a dedicated field above, verbatim.
    pub extra: BTreeMap<String, String>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            hp_width: crate::consts::DEFAULT_HP_WIDTH,
            run_mode: RunMode::Release,
            isa_version: "DPUV2".to_string(),
            debug: false,
            debug_path: None,
            debug_layer: false,
            debug_layer_name_list: Vec::new(),
            ddr_dump_format: None,
            ddr_dump_net: false,
            ddr_dump_layer: false,
            ddr_dump_init: false,
            ddr_dump_end: false,
            ddr_dump_split: false,
            ddr_dump_end_fast: false,
            dump_inst: false,
            debug_inst: [false; 9],
            gen_aie_data: false,
            gen_aie_data_format: None,
            co_sim_on: false,
            memory_double_write_check: false,
            save_parallel: false,
            load_img_parallel: false,
            load_wgt_parallel: false,
            dump_ddr_all: false,
            extra: BTreeMap::new(),
        }
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "yes" | "on")
}

impl SimConfig {
    /// Parses a `key : value` file with `#`-comments into a config,
    /// defaulting every key not present in `text`.
    pub fn parse(text: &str) -> Result<Self, SimError> {
        let mut config = Self::default();
        for raw_line in text.lines() {
            let line = match raw_line.split_once('#') {
                Some((before, _)) => before,
                None => raw_line,
            }
            .trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line.split_once(':').ok_or_else(|| {
                SimError::new(SimReason::UnknownSimReason, 0, format!("malformed config line `{raw_line}`"))
            })?;
            let key = key.trim();
            let value = value.trim();
            match key {
                "hp_width" => {
                    config.hp_width = value.parse().map_err(|_| {
                        SimError::new(SimReason::UnknownSimReason, 0, format!("bad hp_width `{value}`"))
                    })?
                }
                "run_mode" => config.run_mode = value.parse()?,
                "isa_version" => config.isa_version = value.to_string(),
                "debug" => config.debug = parse_bool(value),
                "debug_path" => config.debug_path = Some(value.to_string()),
                "debug_layer" => config.debug_layer = parse_bool(value),
                "debug_layer_name_list" => {
                    config.debug_layer_name_list = value.split(',').map(|s| s.trim().to_string()).collect()
                }
                "ddr_dump_format" => config.ddr_dump_format = Some(value.to_string()),
                "ddr_dump_net" => config.ddr_dump_net = parse_bool(value),
                "ddr_dump_layer" => config.ddr_dump_layer = parse_bool(value),
                "ddr_dump_init" => config.ddr_dump_init = parse_bool(value),
                "ddr_dump_end" => config.ddr_dump_end = parse_bool(value),
                "ddr_dump_split" => config.ddr_dump_split = parse_bool(value),
                "ddr_dump_end_fast" => config.ddr_dump_end_fast = parse_bool(value),
                "dump_inst" => config.dump_inst = parse_bool(value),
                "gen_aie_data" => config.gen_aie_data = parse_bool(value),
                "gen_aie_data_format" => config.gen_aie_data_format = Some(value.parse()?),
                "co_sim_on" => config.co_sim_on = parse_bool(value),
                "memory_doubleWrite_check" => config.memory_double_write_check = parse_bool(value),
                "save_parallel" => config.save_parallel = parse_bool(value),
                "load_img_parallel" => config.load_img_parallel = parse_bool(value),
                "load_wgt_parallel" => config.load_wgt_parallel = parse_bool(value),
                "dump_ddr_all" => config.dump_ddr_all = parse_bool(value),
                key if key.starts_with("debug_inst") => {
                    if let Some(idx) = key.strip_prefix("debug_inst").and_then(|s| s.parse::<usize>().ok()) {
                        if idx < config.debug_inst.len() {
                            config.debug_inst[idx] = parse_bool(value);
                        }
                    }
                }
                other => {
                    config.extra.insert(other.to_string(), value.to_string());
                }
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_keys_and_ignores_comments() {
        let text = "# a comment\nhp_width : 32\nrun_mode: debug\nunknown_key: 7\n";
        let config = SimConfig::parse(text).unwrap();
        assert_eq!(config.hp_width, 32);
        assert_eq!(config.run_mode, RunMode::Debug);
        assert_eq!(config.extra.get("unknown_key").unwrap(), "7");
    }

    #[test]
    fn missing_keys_default() {
        let config = SimConfig::parse("").unwrap();
        assert_eq!(config.hp_width, crate::consts::DEFAULT_HP_WIDTH);
        assert_eq!(config.run_mode, RunMode::Release);
    }
}
