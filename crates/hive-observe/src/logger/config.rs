use std::io::IsTerminal;

use serde::Deserialize;

use crate::logger::format::LoggerFormat;

/// Logger settings; the `logging` section of the config file deserializes into this.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub format: LoggerFormat,
    /// `EnvFilter` directive, e.g. `"info"` or `"info,hive.core.pool=debug"`.
    pub level: String,
    pub with_targets: bool,
    #[serde(skip)]
    pub use_color: bool,
}

impl LoggerConfig {
    /// Apply command-line overrides on top of file settings.
    pub fn overridden(mut self, format: Option<LoggerFormat>, level: Option<&str>) -> Self {
        if let Some(format) = format {
            self.format = format;
        }
        if let Some(level) = level {
            self.level = level.to_string();
        }
        self
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        let use_color = cfg!(test) || std::io::stdout().is_terminal();
        Self {
            format: LoggerFormat::Text,
            level: "info".to_string(),
            with_targets: true,
            use_color,
        }
    }
}
