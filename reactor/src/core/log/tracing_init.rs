// Copyright (c) 2024-2025 R3BL LLC. Licensed under Apache License, Version 2.0.

use super::{DisplayPreference, TracingConfig, WriterConfig, rolling_file_appender_impl};
use tracing_subscriber::{Layer, Registry,
                         fmt::{self,
                               format::{Compact, DefaultFields, Format}}};

/// A layer over the plain [`Registry`], with its writer type erased.
pub type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

type CompactFmtLayer = fmt::Layer<Registry, DefaultFields, Format<Compact>>;

/// Builds the level filter, plus one `fmt` layer per destination of
/// [`TracingConfig::writer_config`]. Installs nothing, see
/// [`TracingConfig::install_global()`] and [`TracingConfig::install_thread_local()`].
///
/// # Errors
///
/// Returns an error if the log file can't be created.
pub fn try_create_layers(config: &TracingConfig) -> miette::Result<Vec<BoxedLayer>> {
    let level_filter = config.get_level_filter();
    let mut acc: Vec<BoxedLayer> = vec![Box::new(level_filter)];

    let (display, file_path) = match config.get_writer_config() {
        WriterConfig::None => (None, None),
        WriterConfig::Display(display) => (Some(display), None),
        WriterConfig::File(file_path) => (None, Some(file_path)),
        WriterConfig::DisplayAndFile(display, file_path) => (Some(display), Some(file_path)),
    };

    if let Some(display) = display {
        let layer: BoxedLayer = match display {
            DisplayPreference::Stdout => Box::new(
                compact_fmt_layer()
                    .with_writer(std::io::stdout)
                    .with_filter(level_filter),
            ),
            DisplayPreference::Stderr => Box::new(
                compact_fmt_layer()
                    .with_writer(std::io::stderr)
                    .with_filter(level_filter),
            ),
        };
        acc.push(layer);
    }

    if let Some(file_path) = file_path {
        let file = rolling_file_appender_impl::try_create(&file_path)?;
        // No color codes in files.
        acc.push(Box::new(
            compact_fmt_layer()
                .with_ansi(false)
                .with_writer(file)
                .with_filter(level_filter),
        ));
    }

    Ok(acc)
}

/// One line per event. Thread names tell the dispatch thread and the
/// `reactor-worker-N` threads apart.
fn compact_fmt_layer() -> CompactFmtLayer {
    fmt::layer()
        .compact()
        .with_thread_names(true)
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tracing_core::LevelFilter;

    #[test]
    fn test_display_and_file_adds_two_layers_after_the_filter() {
        let dir = std::env::temp_dir()
            .join(format!("r3bl_reactor_tracing_init_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let file_path = dir.join("both_layers.log").to_str().unwrap().to_string();

        let config = TracingConfig {
            writer_config: WriterConfig::DisplayAndFile(
                DisplayPreference::Stderr,
                file_path.clone(),
            ),
            level_filter: LevelFilter::DEBUG,
        };

        assert_eq!(try_create_layers(&config).unwrap().len(), 3);
        assert!(std::path::Path::new(&file_path).exists());
    }

    #[test]
    fn test_writer_none_only_has_level_filter() {
        let config = TracingConfig {
            writer_config: WriterConfig::None,
            level_filter: LevelFilter::INFO,
        };
        assert_eq!(try_create_layers(&config).unwrap().len(), 1);
    }
}
