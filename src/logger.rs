use std::path::Path;
use tracing_core::{Level, LevelFilter};
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{registry, Layer};

/// Install the global logger unless one is already configured.
///
/// Progress lines go to stdout when `stdout` is set, and a plain-text copy is
/// appended to `file` when provided. Returns `false` if another subscriber was
/// installed first, in which case nothing changes.
pub fn install_logger(stdout: bool, file: Option<&Path>) -> bool {
    let stdout_layer = stdout.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_filter(LevelFilter::INFO)
            .with_filter(filter_fn(skip_noisy))
    });

    let file_layer = file.map(|file_path| {
        let writer = tracing_appender::rolling::never(
            file_path.parent().unwrap_or_else(|| Path::new(".")),
            file_path
                .file_name()
                .unwrap_or_else(|| file_path.as_os_str()),
        );
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(writer)
            .with_filter(LevelFilter::INFO)
            .with_filter(filter_fn(skip_noisy))
    });

    let installed = registry()
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .is_ok();

    if installed {
        update_panic_hook();
    }

    installed
}

fn skip_noisy(meta: &tracing_core::Metadata<'_>) -> bool {
    if let Some(path) = meta.module_path() {
        // The wgpu crate is logging too much, so we skip `info` level.
        if path.starts_with("wgpu") && *meta.level() >= Level::INFO {
            return false;
        }
    }
    true
}

fn update_panic_hook() {
    let hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |info| {
        log::error!("PANIC => {info}");
        hook(info);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let log_file = dir.path().join("experiment.log");

        let first = install_logger(false, Some(&log_file));
        let second = install_logger(true, None);

        // Another test may have installed the subscriber already; either way
        // only one install can ever succeed.
        assert!(!(first && second));
        assert!(!second);
    }
}
