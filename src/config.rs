//! Runtime configuration read from the environment or a TOML document.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::utils::errors::JitError;

/// When the runtime compiles specialized executables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Specialization {
    /// Only the default executable is ever used.
    Disabled,
    /// Specialize when the arguments allow it, falling back on the default
    /// executable while a specialization compiles.
    #[default]
    Enabled,
    /// Every call goes through a specialized executable.
    Always,
}

impl FromStr for Specialization {
    type Err = JitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disabled" | "off" => Ok(Self::Disabled),
            "enabled" | "on" => Ok(Self::Enabled),
            "always" => Ok(Self::Always),
            other => Err(JitError::Config(format!(
                "unknown specialization policy `{other}`"
            ))),
        }
    }
}

impl fmt::Display for Specialization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disabled => "disabled",
            Self::Enabled => "enabled",
            Self::Always => "always",
        })
    }
}

/// Optimization level of the generated native code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OptLevel {
    #[serde(rename = "O0")]
    None,
    #[serde(rename = "O1")]
    Less,
    #[default]
    #[serde(rename = "O2")]
    Default,
    #[serde(rename = "O3")]
    Aggressive,
}

impl FromStr for OptLevel {
    type Err = JitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches(['O', 'o']) {
            "0" => Ok(Self::None),
            "1" => Ok(Self::Less),
            "2" => Ok(Self::Default),
            "3" => Ok(Self::Aggressive),
            _ => Err(JitError::Config(format!("unknown optimization level `{s}`"))),
        }
    }
}

impl fmt::Display for OptLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "O0",
            Self::Less => "O1",
            Self::Default => "O2",
            Self::Aggressive => "O3",
        })
    }
}

/// Process level knobs that override compilation options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub specialization: Option<Specialization>,
    pub opt_level: Option<OptLevel>,
    /// Print the IR after every pass of the compilation pipelines.
    pub debug_compile: bool,
    /// Report the time spent in every pipeline.
    pub pass_timing: bool,
    /// Worker threads of the shared compile scheduler, defaults to the number
    /// of CPUs.
    pub compile_workers: Option<usize>,
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|value| matches!(value.trim(), "1" | "true" | "TRUE" | "yes" | "on"))
        .unwrap_or(false)
}

fn parse_var<T: FromStr<Err = JitError>>(name: &str) -> Result<Option<T>, JitError> {
    std::env::var(name).ok().map(|value| value.parse()).transpose()
}

impl RuntimeConfig {
    /// Reads `JITRT_SPECIALIZATION`, `JITRT_OPT_LEVEL`, `JITRT_DEBUG_COMPILE`,
    /// `JITRT_PASS_TIMING` and `JITRT_COMPILE_WORKERS`.
    pub fn from_env() -> Result<Self, JitError> {
        let compile_workers = std::env::var("JITRT_COMPILE_WORKERS")
            .ok()
            .map(|value| {
                value.trim().parse::<usize>().map_err(|err| {
                    JitError::Config(format!("invalid JITRT_COMPILE_WORKERS `{value}`: {err}"))
                })
            })
            .transpose()?;

        Ok(Self {
            specialization: parse_var("JITRT_SPECIALIZATION")?,
            opt_level: parse_var("JITRT_OPT_LEVEL")?,
            debug_compile: env_flag("JITRT_DEBUG_COMPILE"),
            pass_timing: env_flag("JITRT_PASS_TIMING"),
            compile_workers,
        })
    }

    #[cfg(feature = "toml-config")]
    pub fn from_toml_str(text: &str) -> Result<Self, JitError> {
        toml::from_str(text).map_err(|err| JitError::Config(format!("invalid runtime config: {err}")))
    }

    pub fn compile_workers(&self) -> usize {
        self.compile_workers
            .filter(|workers| *workers > 0)
            .unwrap_or_else(num_cpus)
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}
