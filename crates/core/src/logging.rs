//! Tracing subscriber bootstrap shared by every entry point.

use tracing_subscriber::EnvFilter;

/// Install the global `fmt` subscriber.
///
/// The filter is read from `RUST_LOG`; when unset or unparsable the given
/// directive is used instead (interactive sessions pass `"warn"` so log lines
/// don't interleave with streamed model output). Returns `false` if a
/// subscriber was already installed.
pub fn init_tracing(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_harmless() {
        init_tracing("warn");
        assert!(!init_tracing("debug"));
    }
}
