use clap::Parser;
use std::env;
use std::path::PathBuf;
use thiserror::Error;

pub const ENV_WORKSPACE: &str = "CLASSDESK_WORKSPACE";
pub const ENV_LOG_LEVEL: &str = "CLASSDESK_LOG_LEVEL";
pub const ENV_TEACHER_NAME: &str = "CLASSDESK_TEACHER_NAME";

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_TEACHER_NAME: &str = "Teacher";

/// Grade and attendance sidecar speaking JSON lines over stdin/stdout.
#[derive(Debug, Default, Parser)]
#[command(name = "classdeskd", version, about)]
pub struct Cli {
    /// Workspace directory to open at startup (holds the SQLite file).
    #[arg(long)]
    pub workspace: Option<PathBuf>,

    /// Log filter, e.g. `info` or `classdeskd=debug`.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Sender name used on teacher replies to parent messages.
    #[arg(long)]
    pub teacher_name: Option<String>,
}

/// Settings resolved from `.env`, the environment and the command line, in
/// increasing precedence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub workspace: Option<PathBuf>,
    pub log_level: String,
    pub teacher_name: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must not be blank")]
    Blank { key: &'static str },
}

impl AppConfig {
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::resolve(cli, |key| env::var(key).ok())
    }

    fn resolve<F>(cli: &Cli, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let workspace = cli
            .workspace
            .clone()
            .or_else(|| non_empty(ENV_WORKSPACE).map(PathBuf::from));

        let log_level = cli
            .log_level
            .clone()
            .or_else(|| non_empty(ENV_LOG_LEVEL))
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        let teacher_name = match &cli.teacher_name {
            Some(name) if name.trim().is_empty() => {
                return Err(ConfigError::Blank {
                    key: "--teacher-name",
                })
            }
            Some(name) => name.trim().to_string(),
            None => non_empty(ENV_TEACHER_NAME)
                .map(|v| v.trim().to_string())
                .unwrap_or_else(|| DEFAULT_TEACHER_NAME.to_string()),
        };

        Ok(Self {
            workspace,
            log_level,
            teacher_name,
        })
    }
}
