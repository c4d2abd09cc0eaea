//! Prometheus recorder and `/metrics` rendering.
//!
//! Metric names live in [`wproxy::metrics`]; this module only owns the
//! exporter.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus recorder as the global `metrics` recorder.
///
/// Call once at startup, before any session runs. A second call fails
/// because a global recorder is already set.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_recorder_renders_recorded_counter() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        ::metrics::with_local_recorder(&recorder, || {
            ::metrics::counter!(wproxy::metrics::SESSIONS_TOTAL).increment(2);
        });
        let text = render(&handle);
        assert!(text.contains(wproxy::metrics::SESSIONS_TOTAL));
    }
}
