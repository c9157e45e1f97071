//! Compiler configuration.
//!
//! Settings are layered: built-in defaults, then TOML files, then
//! `KESTREL_*` environment variables, then explicit `key=value` overrides
//! (the driver's command-line flags).

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Output format produced by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// Register bytecode for the stack-frame VM.
    #[default]
    Bytecode,
    /// C-like source implementing each function as a native call.
    Native,
}

impl std::str::FromStr for Target {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bytecode" | "hbc" => Ok(Target::Bytecode),
            "native" | "c" | "c++" => Ok(Target::Native),
            other => Err(Error::Config(format!("unknown target '{}'", other))),
        }
    }
}

/// Configuration for one compilation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Run the optimizer pipeline (`-O`). When false only the mandatory
    /// lowering passes run.
    pub optimize: bool,

    /// Backend selection.
    pub target: Target,

    /// Treat every function as strict mode code.
    pub strict: bool,

    /// Parse with the typed-superset grammar.
    pub typescript: bool,

    /// Hard per-function register limit. Exceeding it is a fatal
    /// `ResourceLimit` error for that function.
    pub max_registers: u32,

    /// Registers at or above this index cannot be encoded as short operands
    /// and are routed through reserved low registers.
    pub short_register_limit: u32,

    /// Largest callee (in instructions) the inliner will copy.
    pub inline_max_instructions: usize,

    /// Run the IR verifier after every pass.
    pub verify_ir: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            optimize: true,
            target: Target::Bytecode,
            strict: false,
            typescript: false,
            max_registers: 65535,
            short_register_limit: 256,
            inline_max_instructions: 40,
            verify_ir: true,
        }
    }
}

/// Smallest register file the allocator can work with: call lowering and
/// spilling both need a few scratch registers.
const MIN_REGISTERS: u32 = 8;

impl CompilerConfig {
    /// Loads configuration from an optional user file, then the environment.
    pub fn load(user_file: Option<&Path>) -> Result<Self> {
        let mut config = CompilerConfig::default();

        if let Some(path) = user_file {
            if path.exists() {
                config.merge_from_file(path)?;
            }
        }

        config.merge_from_env()?;
        Ok(config)
    }

    /// Merges a TOML file on top of the current settings. Keys absent from
    /// the file keep their current value.
    pub fn merge_from_file(&mut self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        self.merge_from_str(&content)
    }

    /// Merges TOML text on top of the current settings.
    pub fn merge_from_str(&mut self, content: &str) -> Result<()> {
        let table: toml::Table = content.parse()?;
        for (key, value) in table {
            let text = match value {
                toml::Value::String(s) => s,
                other => other.to_string(),
            };
            self.set(&key, &text)?;
        }
        Ok(())
    }

    /// Applies `KESTREL_*` environment variables.
    pub fn merge_from_env(&mut self) -> Result<()> {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("KESTREL_") {
                if config_key == "LOG" {
                    continue;
                }
                let config_key = config_key.to_lowercase();
                self.set(&config_key, &value)?;
            }
        }
        Ok(())
    }

    /// Sets a single configuration value by key. Both `snake_case` and
    /// `kebab-case` keys are accepted.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let key = key.trim().replace('-', "_");
        let value = value.trim();
        match key.as_str() {
            "optimize" => self.optimize = parse_bool(&key, value)?,
            "target" => self.target = value.parse()?,
            "strict" => self.strict = parse_bool(&key, value)?,
            "typescript" => self.typescript = parse_bool(&key, value)?,
            "max_registers" => {
                let n: u32 = parse_number(&key, value)?;
                if n < MIN_REGISTERS {
                    tracing::warn!(requested = n, "max_registers clamped to {}", MIN_REGISTERS);
                }
                self.max_registers = n.max(MIN_REGISTERS);
            }
            "short_register_limit" => {
                let n: u32 = parse_number(&key, value)?;
                self.short_register_limit = n.max(MIN_REGISTERS);
            }
            "inline_max_instructions" => {
                self.inline_max_instructions = parse_number(&key, value)?;
            }
            "verify_ir" => self.verify_ir = parse_bool(&key, value)?,
            _ => return Err(Error::Config(format!("unknown configuration key '{}'", key))),
        }
        Ok(())
    }

    /// Parses a `key=value` pair as given on the command line.
    pub fn apply_override(&mut self, pair: &str) -> Result<()> {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| Error::Config(format!("expected key=value, got '{}'", pair)))?;
        self.set(key, value)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!("{} expects a boolean, got '{}'", key, value))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("{} expects a number, got '{}'", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = CompilerConfig::default();
        assert!(config.optimize);
        assert_eq!(config.target, Target::Bytecode);
        assert_eq!(config.short_register_limit, 256);
        assert!(config.verify_ir);
    }

    #[test]
    fn test_set_known_keys() {
        let mut config = CompilerConfig::default();
        config.set("optimize", "false").unwrap();
        config.set("target", "native").unwrap();
        config.set("max-registers", "300").unwrap();
        assert!(!config.optimize);
        assert_eq!(config.target, Target::Native);
        assert_eq!(config.max_registers, 300);
    }

    #[test]
    fn test_set_unknown_key_fails() {
        let mut config = CompilerConfig::default();
        assert!(matches!(config.set("colour", "red"), Err(Error::Config(_))));
    }

    #[test]
    fn test_register_limit_is_clamped() {
        let mut config = CompilerConfig::default();
        config.set("max_registers", "2").unwrap();
        assert_eq!(config.max_registers, MIN_REGISTERS);
    }

    #[test]
    fn test_merge_toml() {
        let mut config = CompilerConfig::default();
        config
            .merge_from_str("optimize = false\ntarget = \"native\"\ninline_max_instructions = 5\n")
            .unwrap();
        assert!(!config.optimize);
        assert_eq!(config.target, Target::Native);
        assert_eq!(config.inline_max_instructions, 5);
    }

    #[test]
    fn test_merge_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "strict = true").unwrap();
        let mut config = CompilerConfig::default();
        config.merge_from_file(file.path()).unwrap();
        assert!(config.strict);
    }

    #[test]
    fn test_apply_override() {
        let mut config = CompilerConfig::default();
        config.apply_override("verify_ir=false").unwrap();
        assert!(!config.verify_ir);
        assert!(config.apply_override("verify_ir").is_err());
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let config = CompilerConfig {
            strict: true,
            ..CompilerConfig::default()
        };
        let text = toml::to_string(&config).unwrap();
        let back: CompilerConfig = toml::from_str(&text).unwrap();
        assert_eq!(config, back);
    }
}
