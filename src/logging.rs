use anyhow::anyhow;
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::env;
use std::fmt::Display;
use std::io::Write;
use std::sync::{Arc, Mutex};
use syslog::{Facility, Formatter3164, LogFormat, Logger, LoggerBackend, Severity};

const PREFIX: &str = "ssh-agent-download";

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum LogTarget {
    Stderr,
    /// The AUTHPRIV facility, so that captured keys leave a trace in the auth log.
    Syslog,
}

pub fn init_logging(target: LogTarget, debug: bool) -> anyhow::Result<()> {
    let level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    match target {
        LogTarget::Stderr => {
            env_logger::Builder::new()
                .filter_level(level)
                .parse_default_env()
                .format(|buf, record| match record.level() {
                    Level::Info => writeln!(buf, "{PREFIX}: {}", record.args()),
                    level => writeln!(
                        buf,
                        "{PREFIX}: {}: {}",
                        level.as_str().to_lowercase(),
                        record.args()
                    ),
                })
                .try_init()?;
        }
        LogTarget::Syslog => {
            let logger = syslog::unix(PrefixFormatter::new(Facility::LOG_AUTHPRIV))
                .map_err(|e| anyhow!("Failed to set up log: {e:?}"))?;
            log::set_boxed_logger(Box::new(SyslogBridge::new(logger)))?;
            log::set_max_level(level);
        }
    }
    Ok(())
}

#[derive(Clone)]
struct PrefixFormatter {
    inner: Formatter3164,
    prefix: String,
}

impl<T: Display> LogFormat<T> for PrefixFormatter {
    fn format<W: Write>(&self, w: &mut W, severity: Severity, message: T) -> syslog::Result<()> {
        self.inner
            .format(w, severity, format!("{}{}", self.prefix, message))
    }
}

impl PrefixFormatter {
    fn new(facility: Facility) -> Self {
        let inner = Formatter3164 {
            facility,
            hostname: None,
            process: process_name().unwrap_or(PREFIX.into()),
            pid: std::process::id(),
        };
        PrefixFormatter {
            inner,
            prefix: format!("{PREFIX}: "),
        }
    }
}

fn process_name() -> anyhow::Result<String> {
    Ok(env::current_exe()?
        .file_name()
        .ok_or(anyhow!("no filename"))?
        .to_string_lossy()
        .into())
}

// syslog::BasicLogger only works with Formatter3164, this does the same job for PrefixFormatter
struct SyslogBridge {
    logger: Arc<Mutex<Logger<LoggerBackend, PrefixFormatter>>>,
}

impl SyslogBridge {
    fn new(logger: Logger<LoggerBackend, PrefixFormatter>) -> Self {
        SyslogBridge {
            logger: Arc::new(Mutex::new(logger)),
        }
    }
}

impl Log for SyslogBridge {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level() && metadata.level() <= log::STATIC_MAX_LEVEL
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let message = format!("{}", record.args());
        let Ok(mut logger) = self.logger.lock() else {
            return;
        };
        // there is nowhere left to report a failure to log
        let _ = match record.level() {
            Level::Error => logger.err(message),
            Level::Warn => logger.warning(message),
            Level::Info => logger.info(message),
            Level::Debug | Level::Trace => logger.debug(message),
        };
    }

    fn flush(&self) {
        if let Ok(mut logger) = self.logger.lock() {
            let _ = logger.backend.flush();
        }
    }
}
