//! Feature-gated profiling support via `tracing-chrome`.
//!
//! With the `profiling` feature, [`init`] installs a Chrome trace subscriber
//! and the decode loop, sampler and codec emit `info_span!`s into it. Open
//! the trace in `chrome://tracing` or [Perfetto](https://ui.perfetto.dev).
//!
//! Without the feature, [`init`] returns `None`.

use std::path::Path;

/// Trace file written when no path is given.
pub const DEFAULT_TRACE_FILE: &str = "trace.json";

/// Guard that flushes the trace file on drop.
///
/// Hold this in `main()`; the trace is written when the guard is dropped.
#[cfg(feature = "profiling")]
pub struct ProfilingGuard {
    _guard: tracing_chrome::FlushGuard,
}

/// Zero-size stand-in when profiling is disabled.
#[cfg(not(feature = "profiling"))]
pub struct ProfilingGuard;

/// Initialize the Chrome tracing layer, writing to `path`
/// (or [`DEFAULT_TRACE_FILE`]).
///
/// Returns `Some(guard)` when the `profiling` feature is active. In that
/// case this installs the global subscriber, so the caller must not install
/// another one.
pub fn init(path: Option<&Path>) -> Option<ProfilingGuard> {
    #[cfg(feature = "profiling")]
    {
        use tracing_chrome::ChromeLayerBuilder;
        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;

        let path = path.unwrap_or_else(|| Path::new(DEFAULT_TRACE_FILE));
        let (chrome_layer, guard) = ChromeLayerBuilder::new()
            .file(path)
            .include_args(true)
            .build();

        tracing_subscriber::registry().with(chrome_layer).init();

        tracing::info!(path = %path.display(), "profiling enabled");
        Some(ProfilingGuard { _guard: guard })
    }

    #[cfg(not(feature = "profiling"))]
    {
        let _ = path;
        None
    }
}
