//! Console logging for the freedompp programs.
use log4rs::{
    append::console::{ConsoleAppender, Target},
    config::{runtime::ConfigErrors, Appender, Root},
    encode::pattern::PatternEncoder,
    Config,
};

const STDERR_APPENDER: &str = "stderr";

/// Logging configuration sending messages at `level` and above to stderr,
/// one line per message with time, level and module.
pub fn stderr_config(level: log::LevelFilter) -> Result<Config, ConfigErrors> {
    let stderr = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{h({d(%Y-%m-%d %H:%M:%S)} {l:<5} {M})} - {m}{n}",
        )))
        .target(Target::Stderr)
        .build();

    Config::builder()
        .appender(Appender::builder().build(STDERR_APPENDER, Box::new(stderr)))
        .build(Root::builder().appender(STDERR_APPENDER).build(level))
}

/// Install the stderr logger. If a logger is already installed, this
/// prints a warning and leaves it in place.
pub fn init_logging(level: log::LevelFilter) {
    let config = match stderr_config(level) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("WARNING: could not configure logging: {e}");
            return;
        }
    };

    if let Err(e) = log4rs::init_config(config) {
        eprintln!("WARNING: could not initialize logging: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stderr_config() {
        let config = stderr_config(log::LevelFilter::Debug).unwrap();
        assert_eq!(config.root().level(), log::LevelFilter::Debug);
        assert_eq!(config.appenders().len(), 1);
    }
}
