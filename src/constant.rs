pub const DEFAULT_CONFIG_PATH: &str = "henzai/config.toml"; // relative to the user config dir
pub const DEFAULT_CONFIG_TOML: &str = include_str!("../templates/henzai.template.toml");

pub const ENV_PREFIX: &str = "HENZAI";

pub const GENERATION_ID_PREFIX: &str = "gen_";
