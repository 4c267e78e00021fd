use eyre::Result;
use serde::Deserialize;
use tracing_subscriber::{
    filter::{LevelFilter, Targets},
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    Layer, Registry,
};

/// Logging level. A "higher level" means more will be logged.
#[derive(Default, Debug, Clone, Copy, Deserialize, PartialOrd, Ord, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Off
    Off = 0,
    /// Error
    Error = 1,
    /// Warn
    Warn = 2,
    /// Debug
    Debug = 4,
    /// Trace
    Trace = 5,
    /// Info
    #[serde(other)]
    #[default]
    Info = 3,
}

impl From<Level> for LevelFilter {
    fn from(level: Level) -> LevelFilter {
        match level {
            Level::Off => LevelFilter::OFF,
            Level::Error => LevelFilter::ERROR,
            Level::Warn => LevelFilter::WARN,
            Level::Debug => LevelFilter::DEBUG,
            Level::Trace => LevelFilter::TRACE,
            Level::Info => LevelFilter::INFO,
        }
    }
}

/// Log output style
#[derive(Default, Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    /// Multi-line, human readable
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
    /// Single line, abbreviated
    Compact,
    /// Single line with all span fields
    #[serde(other)]
    Full,
}

/// Configuration for the tracing subscribers used by feedpush agents
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct TracingConfig {
    /// Output style
    #[serde(default)]
    pub fmt: Style,
    /// Most verbose level logged
    #[serde(default)]
    pub level: Level,
}

impl TracingConfig {
    /// Filter applied to every event. HTTP client internals only show up at
    /// trace level.
    pub fn targets(&self) -> Targets {
        let mut targets = Targets::new().with_default(self.level);
        if self.level < Level::Trace {
            targets = targets
                .with_target("hyper", Level::Info)
                .with_target("hyper_util", Level::Info)
                .with_target("reqwest", Level::Info)
                .with_target("rustls", Level::Info)
                .with_target("h2", Level::Info);
        }
        targets
    }

    /// Attempt to instantiate and register a tracing subscriber setup from
    /// settings.
    pub fn start_tracing(&self) -> Result<()> {
        let fmt_layer = match self.fmt {
            Style::Pretty => fmt::layer().pretty().boxed(),
            Style::Json => fmt::layer().json().boxed(),
            Style::Compact => fmt::layer().compact().boxed(),
            Style::Full => fmt::layer().boxed(),
        };

        Registry::default()
            .with(self.targets())
            .with(fmt_layer)
            .with(tracing_error::ErrorLayer::default())
            .try_init()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lowercase_names() {
        let config: TracingConfig =
            serde_json::from_str(r#"{ "fmt": "json", "level": "debug" }"#).unwrap();
        assert_eq!(config.fmt, Style::Json);
        assert_eq!(config.level, Level::Debug);
    }

    #[test]
    fn unknown_values_fall_back() {
        let config: TracingConfig =
            serde_json::from_str(r#"{ "fmt": "fancy", "level": "loud" }"#).unwrap();
        assert_eq!(config.fmt, Style::Full);
        assert_eq!(config.level, Level::Info);

        let config: TracingConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, TracingConfig::default());
    }

    #[test]
    fn http_internals_are_quiet_below_trace() {
        let config = TracingConfig {
            fmt: Style::Compact,
            level: Level::Debug,
        };
        let targets = config.targets();
        assert!(targets.would_enable("feedpush", &tracing::Level::DEBUG));
        assert!(!targets.would_enable("hyper::proto", &tracing::Level::DEBUG));

        let verbose = TracingConfig {
            fmt: Style::Compact,
            level: Level::Trace,
        };
        assert!(verbose.targets().would_enable("hyper::proto", &tracing::Level::TRACE));
    }
}
