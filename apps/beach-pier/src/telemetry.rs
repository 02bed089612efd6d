//! Process-wide logging for the `beach-pier` binary.

pub mod logging {
    use std::fs::OpenOptions;
    use std::path::PathBuf;
    use std::sync::OnceLock;

    use clap::ValueEnum;
    use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
    use tracing_subscriber::EnvFilter;

    #[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
    pub enum LogLevel {
        Error,
        #[default]
        Warn,
        Info,
        Debug,
        Trace,
    }

    impl LogLevel {
        fn directives(self) -> &'static str {
            match self {
                LogLevel::Error => "error",
                LogLevel::Warn => "warn",
                LogLevel::Info => "info",
                LogLevel::Debug => "info,beach_pier=debug,pier=debug",
                LogLevel::Trace => "info,beach_pier=trace,pier=trace",
            }
        }
    }

    /// webrtc and websocket targets that drown the session log at trace.
    const NOISY_TARGETS: &[&str] = &[
        "webrtc",
        "webrtc_ice",
        "webrtc_sctp",
        "webrtc_dtls",
        "webrtc_srtp",
        "webrtc_mdns",
        "tokio_tungstenite",
        "tungstenite",
        "mio",
    ];

    /// Environment knobs that adjust the computed filter.
    #[derive(Clone, Debug, Default, PartialEq, Eq)]
    pub struct FilterOverrides {
        /// `PIER_LOG_FILTER`, used verbatim in place of the level's directives.
        pub filter: Option<String>,
        /// `PIER_TRACE_DEPS`
        pub trace_deps: bool,
    }

    impl FilterOverrides {
        pub fn from_env() -> Self {
            Self {
                filter: std::env::var("PIER_LOG_FILTER")
                    .ok()
                    .filter(|value| !value.trim().is_empty()),
                trace_deps: std::env::var("PIER_TRACE_DEPS")
                    .is_ok_and(|value| !value.is_empty() && value != "0"),
            }
        }
    }

    #[derive(Clone, Debug, Default)]
    pub struct LogConfig {
        pub level: LogLevel,
        /// Log to this file instead of stderr. The chat prompt owns stdout, so verbose levels
        /// are easier to follow from a file.
        pub file: Option<PathBuf>,
    }

    impl LogConfig {
        /// Filter directives for this config, plus whether the noisy targets were held back.
        pub fn directives(&self, overrides: &FilterOverrides) -> (String, bool) {
            if let Some(filter) = &overrides.filter {
                return (filter.clone(), false);
            }
            let mut directives = self.level.directives().to_owned();
            let throttle = self.level == LogLevel::Trace && !overrides.trace_deps;
            if throttle {
                for target in NOISY_TARGETS {
                    directives.push(',');
                    directives.push_str(target);
                    directives.push_str("=info");
                }
            }
            (directives, throttle)
        }

        fn writer(&self) -> Result<(NonBlocking, WorkerGuard), InitError> {
            let Some(path) = &self.file else {
                return Ok(tracing_appender::non_blocking(std::io::stderr()));
            };
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| InitError::Io {
                    path: path.clone(),
                    source,
                })?;
            Ok(tracing_appender::non_blocking(file))
        }
    }

    #[derive(thiserror::Error, Debug)]
    pub enum InitError {
        #[error("failed to open log file {path:?}: {source}")]
        Io {
            path: PathBuf,
            source: std::io::Error,
        },
        #[error("failed to configure logger: {0}")]
        Configure(String),
    }

    static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

    /// Installs the global subscriber. Once one is installed, later calls do nothing.
    pub fn init(config: &LogConfig) -> Result<(), InitError> {
        if GUARD.get().is_some() {
            return Ok(());
        }
        let (directives, throttled) = config.directives(&FilterOverrides::from_env());
        let filter = EnvFilter::try_new(&directives)
            .map_err(|err| InitError::Configure(format!("filter {directives:?}: {err}")))?;
        let (writer, guard) = config.writer()?;

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(config.level >= LogLevel::Debug)
            .with_thread_names(config.level == LogLevel::Trace)
            .with_ansi(config.file.is_none())
            .with_writer(writer)
            .try_init()
            .map_err(|err| InitError::Configure(err.to_string()))?;

        let _ = GUARD.set(guard);
        if throttled {
            tracing::info!(
                target: "pier::log",
                "webrtc/websocket traces held at info; set PIER_TRACE_DEPS=1 or PIER_LOG_FILTER to change"
            );
        }
        Ok(())
    }

}
