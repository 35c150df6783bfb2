/// Severity of an engine log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Receives `(severity, source, message, timestamp in nanoseconds)`.
pub type LogCallback = Box<dyn Fn(LogSeverity, &str, &str, i64) + Send>;

/// Log collaborator threaded through the long-running operations.
///
/// By default messages are forwarded into the `log` facade so whatever sink
/// the host application installed (the CLI uses fern) sees them; an
/// installer-level callback replaces that.
pub struct Log {
    callback: LogCallback,
}

impl Log {
    pub fn new(callback: LogCallback) -> Self {
        Self { callback }
    }

    /// A log forwarding into the `log` crate macros.
    pub fn to_facade() -> Self {
        Self::new(Box::new(|severity, source, message, _timestamp| {
            let level = match severity {
                LogSeverity::Debug => log::Level::Debug,
                LogSeverity::Info => log::Level::Info,
                LogSeverity::Warning => log::Level::Warn,
                LogSeverity::Error => log::Level::Error,
            };
            log::log!(target: "kylar", level, "({}) {}", source, message);
        }))
    }

    fn emit(&self, severity: LogSeverity, source: &str, message: &str) {
        let timestamp = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0);
        (self.callback)(severity, source, message, timestamp);
    }

    pub fn debug(&self, source: &str, message: &str) {
        self.emit(LogSeverity::Debug, source, message);
    }

    pub fn info(&self, source: &str, message: &str) {
        self.emit(LogSeverity::Info, source, message);
    }

    pub fn warning(&self, source: &str, message: &str) {
        self.emit(LogSeverity::Warning, source, message);
    }

    pub fn error(&self, source: &str, message: &str) {
        self.emit(LogSeverity::Error, source, message);
    }
}

impl Default for Log {
    fn default() -> Self {
        Self::to_facade()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn callback_receives_severity_and_source() {
        let (sender, receiver) = mpsc::channel();
        let log = Log::new(Box::new(move |severity, source, message, timestamp| {
            sender
                .send((severity, source.to_owned(), message.to_owned(), timestamp))
                .unwrap();
        }));
        log.warning("configure", "something looks off");
        let (severity, source, message, timestamp) = receiver.recv().unwrap();
        assert_eq!(severity, LogSeverity::Warning);
        assert_eq!(source, "configure");
        assert_eq!(message, "something looks off");
        assert!(timestamp > 0);
    }
}
