//! Subscriber wiring shared by the server and the CLI.
//!
//! Console output honours `RUST_LOG` (default `info`). Setting
//! `TRIAGE_ACCESS_LOG_ROLL=1` adds a rolling file sink that only receives
//! events on the `http.access` target.

use once_cell::sync::OnceCell;
use std::path::PathBuf;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

pub const ACCESS_TARGET: &str = "http.access";

static ACCESS_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Minutely,
    Hourly,
    Daily,
}

impl Rotation {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "hourly" => Rotation::Hourly,
            "minutely" => Rotation::Minutely,
            _ => Rotation::Daily,
        }
    }
}

/// Rolling access-log sink settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessLogFile {
    pub dir: PathBuf,
    pub prefix: String,
    pub rotation: Rotation,
}

impl AccessLogFile {
    /// Settings from `TRIAGE_ACCESS_LOG_*` variables; `None` unless rolling is enabled.
    pub fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if lookup("TRIAGE_ACCESS_LOG_ROLL").as_deref() != Some("1") {
            return None;
        }
        let dir = lookup("TRIAGE_ACCESS_LOG_DIR")
            .or_else(|| lookup("TRIAGE_LOGS_DIR"))
            .unwrap_or_else(|| "logs".to_string());
        let prefix = lookup("TRIAGE_ACCESS_LOG_PREFIX").unwrap_or_else(|| "http-access".into());
        let rotation = lookup("TRIAGE_ACCESS_LOG_ROTATION")
            .map(|r| Rotation::parse(&r))
            .unwrap_or(Rotation::Daily);
        Some(Self {
            dir: PathBuf::from(dir),
            prefix,
            rotation,
        })
    }

    fn appender(&self) -> RollingFileAppender {
        match self.rotation {
            Rotation::Hourly => tracing_appender::rolling::hourly(&self.dir, &self.prefix),
            Rotation::Minutely => tracing_appender::rolling::minutely(&self.dir, &self.prefix),
            Rotation::Daily => tracing_appender::rolling::daily(&self.dir, &self.prefix),
        }
    }
}

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let access = AccessLogFile::from_lookup(|key| std::env::var(key).ok());
    install_console(filter, access);
}

/// Console-only subscriber at `warn` unless `RUST_LOG` says otherwise; used by the CLI.
pub fn init_quiet() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    install_console(filter, None);
}

fn install_console(filter: EnvFilter, access: Option<AccessLogFile>) {
    let fmt_layer = fmt::layer().with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(fmt_layer.with_filter(filter));
    let Some(access) = access else {
        let _ = registry.try_init();
        return;
    };
    if std::fs::create_dir_all(&access.dir).is_err() {
        tracing::warn!(directory = %access.dir.display(), "failed to create access log directory");
    }
    let (nb, guard) = tracing_appender::non_blocking(access.appender());
    let _ = ACCESS_GUARD.set(guard);
    let targets = Targets::new().with_target(ACCESS_TARGET, tracing::Level::INFO);
    let access_layer = fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(nb)
        .with_filter(targets);
    let _ = registry.with(access_layer).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn rolling_requires_explicit_opt_in() {
        assert_eq!(AccessLogFile::from_lookup(lookup(&[])), None);
        assert_eq!(
            AccessLogFile::from_lookup(lookup(&[("TRIAGE_ACCESS_LOG_ROLL", "true")])),
            None
        );
    }

    #[test]
    fn rolling_settings_fall_back_to_defaults() {
        let cfg = AccessLogFile::from_lookup(lookup(&[("TRIAGE_ACCESS_LOG_ROLL", "1")])).unwrap();
        assert_eq!(cfg.dir, PathBuf::from("logs"));
        assert_eq!(cfg.prefix, "http-access");
        assert_eq!(cfg.rotation, Rotation::Daily);

        let cfg = AccessLogFile::from_lookup(lookup(&[
            ("TRIAGE_ACCESS_LOG_ROLL", "1"),
            ("TRIAGE_LOGS_DIR", "/var/log/triage"),
            ("TRIAGE_ACCESS_LOG_ROTATION", "Hourly"),
        ]))
        .unwrap();
        assert_eq!(cfg.dir, PathBuf::from("/var/log/triage"));
        assert_eq!(cfg.rotation, Rotation::Hourly);
    }
}
