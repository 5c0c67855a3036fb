use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use ypw_core::password_record::PASSWORD_SIZE;
use ypw_core::{APP_NAME, CharacterPools, RngEngine};

use crate::{CliError, CliExitCode, map_io_error};

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Longest password that still fits the record's password field.
pub(crate) const MAX_GENERATED_LEN: i32 = PASSWORD_SIZE as i32;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub(crate) struct AppConfig {
    pub default_container: Option<String>,
    pub security: SecurityConfig,
    pub generator: GeneratorConfig,
    pub logging: LoggingConfig,
    pub backup: BackupConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct SecurityConfig {
    pub check_permissions: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            check_permissions: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub(crate) enum EngineChoice {
    Os,
    Thread,
}

impl EngineChoice {
    pub fn engine(self) -> RngEngine {
        match self {
            Self::Os => RngEngine::Os,
            Self::Thread => RngEngine::Thread,
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Os => "os",
            Self::Thread => "thread",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct GeneratorConfig {
    pub length: i32,
    pub lowercase: bool,
    pub uppercase: bool,
    pub digits: bool,
    pub punctuation: bool,
    pub special: bool,
    pub engine: EngineChoice,
}

impl GeneratorConfig {
    pub fn pools(&self) -> CharacterPools {
        let mut pools = CharacterPools::NONE;
        pools.set(CharacterPools::LOWERCASE, self.lowercase);
        pools.set(CharacterPools::UPPERCASE, self.uppercase);
        pools.set(CharacterPools::DIGITS, self.digits);
        pools.set(CharacterPools::PUNCTUATION, self.punctuation);
        pools.set(CharacterPools::SPECIAL, self.special);
        pools
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            length: 15,
            lowercase: true,
            uppercase: true,
            digits: true,
            punctuation: true,
            special: false,
            engine: EngineChoice::Os,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct BackupConfig {
    /// Zero turns backups off.
    pub max_retained: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self { max_retained: 10 }
    }
}

pub(crate) fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", APP_NAME)
}

pub(crate) fn load_config(
    config_override: Option<PathBuf>,
) -> Result<(AppConfig, PathBuf), CliError> {
    let config_path = match config_override {
        Some(path) => path,
        None => project_dirs()
            .ok_or_else(|| CliError {
                code: CliExitCode::General,
                kind: "config_path_unavailable",
                message: "unable to resolve config path".to_owned(),
            })?
            .config_dir()
            .join("config.toml"),
    };

    if !config_path.exists() {
        return Ok((AppConfig::default(), config_path));
    }

    let raw = std::fs::read_to_string(&config_path).map_err(map_io_error)?;
    let config = parse_config(&raw).map_err(|error| CliError {
        code: CliExitCode::CorruptOrParse,
        kind: "config_parse_failed",
        message: format!("failed to parse {}: {error}", config_path.display()),
    })?;
    Ok((config, config_path))
}

fn parse_config(raw: &str) -> Result<AppConfig, toml::de::Error> {
    toml::from_str(raw)
}

pub(crate) fn save_config(config: &AppConfig, path: &Path) -> Result<(), CliError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(map_io_error)?;
    }
    let data = toml::to_string_pretty(config).map_err(|error| CliError {
        code: CliExitCode::General,
        kind: "config_serialize_failed",
        message: format!("failed to serialize config: {error}"),
    })?;
    std::fs::write(path, data).map_err(map_io_error)
}

pub(crate) fn config_get(config: &AppConfig, key: &str) -> Option<String> {
    let generator = &config.generator;
    match key {
        "default_container" => config.default_container.clone(),
        "security.check_permissions" => Some(config.security.check_permissions.to_string()),
        "generator.length" => Some(generator.length.to_string()),
        "generator.lowercase" => Some(generator.lowercase.to_string()),
        "generator.uppercase" => Some(generator.uppercase.to_string()),
        "generator.digits" => Some(generator.digits.to_string()),
        "generator.punctuation" => Some(generator.punctuation.to_string()),
        "generator.special" => Some(generator.special.to_string()),
        "generator.engine" => Some(generator.engine.as_str().to_owned()),
        "logging.level" => Some(config.logging.level.clone()),
        "backup.max_retained" => Some(config.backup.max_retained.to_string()),
        _ => None,
    }
}

pub(crate) fn config_set(config: &mut AppConfig, key: &str, value: &str) -> Result<(), CliError> {
    let generator = &mut config.generator;
    match key {
        "default_container" => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return Err(CliError::usage("default_container cannot be empty"));
            }
            config.default_container = Some(trimmed.to_owned());
        }
        "security.check_permissions" => {
            config.security.check_permissions = parse_bool(key, value)?;
        }
        "generator.length" => {
            let parsed = value
                .trim()
                .parse::<i32>()
                .map_err(|_| CliError::usage(format!("invalid integer value for {key}")))?;
            validate_range(key, parsed, 1..=MAX_GENERATED_LEN)?;
            generator.length = parsed;
        }
        "generator.lowercase" => generator.lowercase = parse_bool(key, value)?,
        "generator.uppercase" => generator.uppercase = parse_bool(key, value)?,
        "generator.digits" => generator.digits = parse_bool(key, value)?,
        "generator.punctuation" => generator.punctuation = parse_bool(key, value)?,
        "generator.special" => generator.special = parse_bool(key, value)?,
        "generator.engine" => {
            generator.engine = match value.trim() {
                "os" => EngineChoice::Os,
                "thread" => EngineChoice::Thread,
                _ => return Err(CliError::usage("generator.engine must be os or thread")),
            };
        }
        "logging.level" => {
            let level = value.trim().to_ascii_lowercase();
            if !LOG_LEVELS.contains(&level.as_str()) {
                return Err(CliError::usage(
                    "logging.level must be error|warn|info|debug|trace",
                ));
            }
            config.logging.level = level;
        }
        "backup.max_retained" => {
            let parsed = value
                .trim()
                .parse::<usize>()
                .map_err(|_| CliError::usage(format!("invalid count for {key}")))?;
            validate_range(key, parsed, 0..=1000)?;
            config.backup.max_retained = parsed;
        }
        _ => return Err(CliError::usage("unknown config key")),
    }

    if key.starts_with("generator.") && config.generator.pools().is_empty() {
        return Err(CliError::usage(
            "at least one generator character pool must stay enabled",
        ));
    }
    Ok(())
}

fn parse_bool(key: &str, value: &str) -> Result<bool, CliError> {
    value
        .trim()
        .parse::<bool>()
        .map_err(|_| CliError::usage(format!("invalid bool value for {key}")))
}

fn validate_range<T>(key: &str, value: T, allowed: RangeInclusive<T>) -> Result<(), CliError>
where
    T: PartialOrd + std::fmt::Display,
{
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(CliError::usage(format!(
            "{key} out of bounds: {value} (expected {}..={})",
            allowed.start(),
            allowed.end()
        )))
    }
}
