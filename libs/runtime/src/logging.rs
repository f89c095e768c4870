use crate::config::{LoggingConfig, Section};
use rotating::SharedWriter;
use std::collections::HashMap;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_subscriber::filter::{FilterFn, Targets};
use tracing_subscriber::fmt;

use file_rotate::{
    compression::Compression,
    suffix::{AppendTimestamp, FileLimit},
    ContentLimit, FileRotate,
};

const DEFAULT_SECTION: &str = "default";

// -------- level helpers --------

fn parse_tracing_level(s: &str) -> Option<Level> {
    match s.to_ascii_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        "off" | "none" => None,
        _ => Some(Level::INFO),
    }
}

/// Returns true if target == subsystem or target starts with "subsystem::"
fn matches_prefix(target: &str, subsystem: &str) -> bool {
    target == subsystem
        || (target.starts_with(subsystem) && target[subsystem.len()..].starts_with("::"))
}

// -------- rotating writers --------

mod rotating {
    use file_rotate::{suffix::AppendTimestamp, FileRotate};
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    /// Cloneable handle to one rotating log file.
    #[derive(Clone)]
    pub struct SharedWriter(pub Arc<Mutex<FileRotate<AppendTimestamp>>>);

    impl Write for SharedWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            match self.0.lock() {
                Ok(mut w) => w.write(buf),
                Err(poisoned) => poisoned.into_inner().write(buf),
            }
        }

        fn flush(&mut self) -> std::io::Result<()> {
            match self.0.lock() {
                Ok(mut w) => w.flush(),
                Err(poisoned) => poisoned.into_inner().flush(),
            }
        }
    }
}

/// Writer that may drop output when no file is routed for a target.
struct MaybeWriter(Option<SharedWriter>);

impl std::io::Write for MaybeWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.0 {
            Some(w) => w.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.0 {
            Some(w) => w.flush(),
            None => Ok(()),
        }
    }
}

/// Routes records to per-subsystem files, falling back to the default file.
#[derive(Clone, Default)]
struct FileRouter {
    default: Option<SharedWriter>,
    by_prefix: HashMap<String, SharedWriter>,
}

impl FileRouter {
    fn resolve_for(&self, target: &str) -> Option<SharedWriter> {
        self.by_prefix
            .iter()
            .find(|(prefix, _)| matches_prefix(target, prefix))
            .map(|(_, w)| w.clone())
            .or_else(|| self.default.clone())
    }

    fn is_empty(&self) -> bool {
        self.default.is_none() && self.by_prefix.is_empty()
    }
}

impl<'a> fmt::MakeWriter<'a> for FileRouter {
    type Writer = MaybeWriter;

    fn make_writer(&'a self) -> Self::Writer {
        MaybeWriter(self.default.clone())
    }

    fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
        MaybeWriter(self.resolve_for(meta.target()))
    }
}

/// Resolve a log file path against `base_dir` (home_dir).
fn resolve_log_path(file: &str, base_dir: &Path) -> PathBuf {
    let p = Path::new(file);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}

fn create_rotating_writer(log_path: &Path, section: &Section) -> std::io::Result<SharedWriter> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let max_bytes = section.max_size_mb.unwrap_or(50) * 1024 * 1024;
    let keep = section.max_backups.unwrap_or(3);

    let rot = FileRotate::new(
        log_path,
        AppendTimestamp::default(FileLimit::MaxFiles(keep)),
        ContentLimit::BytesSurpassed(max_bytes as usize),
        Compression::None,
        #[cfg(unix)]
        None,
    );
    Ok(SharedWriter(std::sync::Arc::new(std::sync::Mutex::new(rot))))
}

fn writer_for_section(name: &str, section: &Section, base_dir: &Path) -> Option<SharedWriter> {
    if section.file.trim().is_empty() {
        return None;
    }
    let path = resolve_log_path(&section.file, base_dir);
    match create_rotating_writer(&path, section) {
        Ok(w) => Some(w),
        Err(e) => {
            eprintln!(
                "Failed to init log file for '{}': {} ({})",
                name,
                path.to_string_lossy(),
                e
            );
            None
        }
    }
}

// -------- filters --------

/// Per-subsystem targets for either console or file output.
fn explicit_targets(cfg: &LoggingConfig, file: bool) -> Targets {
    let mut targets = Targets::new().with_default(LevelFilter::OFF);
    for (name, section) in cfg.iter().filter(|(k, _)| k.as_str() != DEFAULT_SECTION) {
        if file && section.file.trim().is_empty() {
            continue;
        }
        let raw = if file {
            &section.file_level
        } else {
            &section.console_level
        };
        if let Some(level) = parse_tracing_level(raw) {
            targets = targets.with_target(name.clone(), LevelFilter::from_level(level));
        }
    }
    targets
}

type DefaultFilter = FilterFn<Box<dyn Fn(&tracing::Metadata<'_>) -> bool + Send + Sync>>;

/// Catch-all filter: records from subsystems without their own section.
fn default_filter(cfg: &LoggingConfig, max_level: Level) -> DefaultFilter {
    let explicit: Vec<String> = cfg
        .keys()
        .filter(|k| k.as_str() != DEFAULT_SECTION)
        .cloned()
        .collect();
    FilterFn::new(Box::new(move |meta: &tracing::Metadata<'_>| {
        let t = meta.target();
        if explicit.iter().any(|name| matches_prefix(t, name)) {
            return false;
        }
        meta.level() <= &max_level
    }))
}

// -------- public init --------

/// Initialize logging from a configuration.
/// Relative log file paths are resolved against `base_dir` (usually client.home_dir).
pub fn init_logging_from_config(cfg: &LoggingConfig, base_dir: &Path) {
    use tracing_subscriber::{layer::SubscriberExt, prelude::*, Layer, Registry};

    // Bridge `log` → `tracing` before installing the subscriber.
    let _ = tracing_log::LogTracer::init();

    if cfg.is_empty() {
        let _ = fmt()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .try_init();
        return;
    }

    let mut router = FileRouter::default();
    for (name, section) in cfg {
        let Some(writer) = writer_for_section(name, section, base_dir) else {
            continue;
        };
        if name == DEFAULT_SECTION {
            router.default = Some(writer);
        } else {
            router.by_prefix.insert(name.clone(), writer);
        }
    }

    let ansi = std::io::stdout().is_terminal();
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    layers.push(
        fmt::layer()
            .with_ansi(ansi)
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_filter(explicit_targets(cfg, false))
            .boxed(),
    );

    if !router.is_empty() {
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_target(true)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .with_writer(router.clone())
                .with_filter(explicit_targets(cfg, true))
                .boxed(),
        );
    }

    if let Some(default_section) = cfg.get(DEFAULT_SECTION) {
        if let Some(level) = parse_tracing_level(&default_section.console_level) {
            layers.push(
                fmt::layer()
                    .with_ansi(ansi)
                    .with_target(true)
                    .with_timer(fmt::time::UtcTime::rfc_3339())
                    .with_filter(default_filter(cfg, level))
                    .boxed(),
            );
        }
        if router.default.is_some() {
            if let Some(level) = parse_tracing_level(&default_section.file_level) {
                layers.push(
                    fmt::layer()
                        .json()
                        .with_ansi(false)
                        .with_target(true)
                        .with_timer(fmt::time::UtcTime::rfc_3339())
                        .with_writer(router)
                        .with_filter(default_filter(cfg, level))
                        .boxed(),
                );
            }
        }
    }

    let _ = Registry::default().with(layers).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_logging_config;
    use tempfile::tempdir;

    fn section(file: &str) -> Section {
        Section {
            console_level: "info".into(),
            file: file.into(),
            file_level: "debug".into(),
            max_backups: Some(2),
            max_size_mb: Some(1),
        }
    }

    #[test]
    fn test_logging_level_parsing() {
        assert_eq!(parse_tracing_level("trace"), Some(Level::TRACE));
        assert_eq!(parse_tracing_level("DEBUG"), Some(Level::DEBUG));
        assert_eq!(parse_tracing_level("Warn"), Some(Level::WARN));
        assert_eq!(parse_tracing_level("off"), None);
        assert_eq!(parse_tracing_level("none"), None);
        assert_eq!(parse_tracing_level("bogus"), Some(Level::INFO));
    }

    #[test]
    fn test_prefix_matching() {
        assert!(matches_prefix("friend_link", "friend_link"));
        assert!(matches_prefix("friend_link::domain::session", "friend_link"));
        assert!(!matches_prefix("friend_linker", "friend_link"));
    }

    #[test]
    fn test_file_paths_resolved_against_home_dir() {
        let tmp = tempdir().unwrap();
        let resolved = resolve_log_path("logs/test.log", tmp.path());
        assert!(resolved.starts_with(tmp.path()));
        assert!(resolved.ends_with("logs/test.log"));
    }

    #[test]
    fn test_rotating_writer_creates_parent() {
        let tmp = tempdir().unwrap();
        let p = tmp.path().join("nested/dir/app.log");
        assert!(create_rotating_writer(&p, &section("x")).is_ok());
        assert!(p.parent().unwrap().exists());
    }

    #[test]
    fn test_router_prefers_subsystem_file() {
        let tmp = tempdir().unwrap();
        let mut cfg = default_logging_config();
        cfg.insert("friend_link".into(), section("logs/friend_link.log"));

        let default_writer = writer_for_section("default", &section("logs/d.log"), tmp.path());
        let sub_writer =
            writer_for_section("friend_link", &cfg["friend_link"], tmp.path()).unwrap();
        let mut router = FileRouter {
            default: default_writer,
            by_prefix: HashMap::new(),
        };
        router.by_prefix.insert("friend_link".into(), sub_writer.clone());

        let routed = router.resolve_for("friend_link::domain").unwrap();
        assert!(std::sync::Arc::ptr_eq(&routed.0, &sub_writer.0));
        assert!(router.resolve_for("tabshare").is_some());
        assert!(writer_for_section("empty", &section(" "), tmp.path()).is_none());
    }
}
