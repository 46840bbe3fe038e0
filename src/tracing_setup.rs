//! Structured logging initialization and request-scoped spans.
use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging from configuration: JSON for production, pretty
/// console for development. `level` accepts a plain level or a full
/// EnvFilter directive; `RUST_LOG` wins when set.
pub fn init_tracing(level: &str, json_format: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .wrap_err_with(|| format!("invalid log level: {level}"))?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    if json_format {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.json().with_current_span(false).with_span_list(true))
            .init();
    } else {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.pretty())
            .init();
    }

    Ok(())
}

/// Span wrapping one inbound request; fields filled in as the request
/// progresses.
pub fn request_span(method: &str, path: &str, request_id: &str) -> tracing::Span {
    tracing::info_span!(
        "request",
        http.method = method,
        http.path = path,
        request.id = request_id,
        http.status_code = tracing::field::Empty,
        route.id = tracing::field::Empty,
        service.id = tracing::field::Empty,
        duration_ms = tracing::field::Empty,
    )
}
