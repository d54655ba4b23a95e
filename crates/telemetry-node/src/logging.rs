//! Logging Setup
//!
//! Log lines go to stderr. Stdout is reserved for the CSV record sink.

use crate::settings::LogSettings;
use anyhow::{Context, Result};
use tracing::{Level, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::FmtSubscriber;

/// Install the global tracing subscriber writing to stderr
pub fn init_logging(settings: &LogSettings) -> Result<()> {
    let subscriber = build_subscriber(settings, std::io::stderr)?;
    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")
}

fn build_subscriber<W>(
    settings: &LogSettings,
    writer: W,
) -> Result<Box<dyn Subscriber + Send + Sync>>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let level: Level = settings
        .level
        .parse()
        .with_context(|| format!("Invalid log level {:?}", settings.level))?;

    let builder = FmtSubscriber::builder()
        .with_writer(writer)
        .with_max_level(level)
        .with_target(true);

    if settings.json {
        Ok(Box::new(builder.json().finish()))
    } else {
        Ok(Box::new(builder.finish()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};
    use tracing::{debug, info};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture(settings: &LogSettings) -> (Box<dyn Subscriber + Send + Sync>, Captured) {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = build_subscriber(settings, move || writer.clone()).unwrap();
        (subscriber, captured)
    }

    #[test]
    fn test_logs_go_to_configured_writer_only() {
        let (subscriber, captured) = capture(&LogSettings::default());

        tracing::subscriber::with_default(subscriber, || {
            info!("Cycle loop started");
            debug!("Filtered out at info");
        });

        let text = captured.text();
        assert!(text.contains("Cycle loop started"));
        assert!(!text.contains("Filtered out"));
    }

    #[test]
    fn test_json_lines() {
        let settings = LogSettings {
            level: "debug".to_string(),
            json: true,
        };
        let (subscriber, captured) = capture(&settings);

        tracing::subscriber::with_default(subscriber, || debug!("Reset requested"));

        let line = captured.text();
        let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["level"], "DEBUG");
        assert_eq!(value["fields"]["message"], "Reset requested");
    }

    #[test]
    fn test_invalid_level_is_rejected() {
        let settings = LogSettings {
            level: "loud".to_string(),
            json: false,
        };
        assert!(build_subscriber(&settings, io::sink).is_err());
    }
}
