//! KDL configuration parser

use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::model::*;

/// Load the configuration at `path`.
///
/// When `required` is false a missing file yields the defaults, which is how
/// the daemon treats its default location. An explicitly requested file must
/// exist.
pub fn load_config(path: &Path, required: bool) -> Result<Config, ConfigError> {
    if !required && !path.exists() {
        tracing::info!(
            "No configuration at {}, using defaults",
            path.display()
        );
        return Ok(Config::default());
    }
    parse_config(path)
}

/// Parse a configuration file from the given path
pub fn parse_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config_str(&content)
}

/// Parse configuration from a string
pub fn parse_config_str(content: &str) -> Result<Config, ConfigError> {
    let doc: kdl::KdlDocument = content.parse().map_err(|e: kdl::KdlError| {
        // kdl is built against an older miette, so rebuild the span by hand
        let offset = e.span.offset();
        let len = e.span.len();
        let span = miette::SourceSpan::from((offset, len));
        ConfigError::ParseError {
            src: content.to_string(),
            span,
            source: e,
        }
    })?;

    let mut config = Config::default();

    for node in doc.nodes() {
        match node.name().value() {
            "global" => config.global = parse_global(node)?,
            "curve" => config.curve = parse_curve(node)?,
            "smoothing" => config.smoothing = parse_smoothing(node)?,
            "timing" => config.timing = parse_timing(node)?,
            "worker" => config.worker = parse_worker(node)?,
            "sampler" => config.sampler = parse_sampler(node)?,
            "monitors" => config.monitors = parse_monitors(node)?,
            "dim-strength" => config.dim_strength = first_f64(node, "dim-strength")?,
            "calibration" => config.calibration = first_bool(node, "calibration")?,
            name => {
                tracing::warn!("Unknown top-level node: {}", name);
            }
        }
    }

    validate(&config)?;

    Ok(config)
}

fn parse_global(node: &kdl::KdlNode) -> Result<GlobalConfig, ConfigError> {
    let mut global = GlobalConfig::default();

    for child in children(node) {
        match child.name().value() {
            "log-level" => {
                let val = first_string(child, "log-level")?;
                global.log_level = val
                    .parse()
                    .map_err(|e| ConfigError::Invalid { message: e })?;
            }
            "socket-path" => {
                global.socket_path = Some(first_path(child, "socket-path")?);
            }
            "brightness-log" => {
                global.brightness_log = Some(first_path(child, "brightness-log")?);
            }
            name => {
                tracing::warn!("Unknown global config option: {}", name);
            }
        }
    }

    Ok(global)
}

fn parse_curve(node: &kdl::KdlNode) -> Result<CurveConfig, ConfigError> {
    let mut curve = CurveConfig::default();

    for child in children(node) {
        match child.name().value() {
            "threshold-start" => curve.threshold_start = first_f64(child, "threshold-start")?,
            "threshold-max" => curve.threshold_max = first_f64(child, "threshold-max")?,
            "max-opacity" => curve.max_opacity = first_f64(child, "max-opacity")?,
            "cap-fraction" => curve.cap_fraction = first_f64(child, "cap-fraction")?,
            name => {
                tracing::warn!("Unknown curve option: {}", name);
            }
        }
    }

    Ok(curve)
}

fn parse_smoothing(node: &kdl::KdlNode) -> Result<SmoothingConfig, ConfigError> {
    let mut smoothing = SmoothingConfig::default();

    for child in children(node) {
        match child.name().value() {
            "supervisor" => smoothing.supervisor = first_f64(child, "smoothing.supervisor")?,
            "worker" => smoothing.worker = first_f64(child, "smoothing.worker")?,
            name => {
                tracing::warn!("Unknown smoothing option: {}", name);
            }
        }
    }

    Ok(smoothing)
}

fn parse_timing(node: &kdl::KdlNode) -> Result<TimingConfig, ConfigError> {
    let mut timing = TimingConfig::default();

    for child in children(node) {
        let name = child.name().value();
        let slot = match name {
            "tick-ms" => &mut timing.tick,
            "settle-ms" => &mut timing.settle,
            "spawn-grace-ms" => &mut timing.spawn_grace,
            "terminate-timeout-ms" => &mut timing.terminate_timeout,
            "record-interval-ms" => &mut timing.record_interval,
            "console-interval-ms" => &mut timing.console_interval,
            "worker-poll-ms" => &mut timing.worker_poll,
            _ => {
                tracing::warn!("Unknown timing option: {}", name);
                continue;
            }
        };
        *slot = Duration::from_millis(first_u64(child, name)?);
    }

    Ok(timing)
}

fn parse_worker(node: &kdl::KdlNode) -> Result<WorkerConfig, ConfigError> {
    let mut worker = WorkerConfig::default();

    for child in children(node) {
        match child.name().value() {
            "program" => worker.program = Some(first_path(child, "worker.program")?),
            "args" => {
                worker.args = child
                    .entries()
                    .iter()
                    .map(|entry| {
                        entry.value().as_string().map(str::to_string).ok_or_else(|| {
                            ConfigError::InvalidValue {
                                field: "worker.args".to_string(),
                                expected: "string arguments".to_string(),
                            }
                        })
                    })
                    .collect::<Result<_, _>>()?;
            }
            "channel-dir" => worker.channel_dir = Some(first_path(child, "worker.channel-dir")?),
            name => {
                tracing::warn!("Unknown worker option: {}", name);
            }
        }
    }

    Ok(worker)
}

fn parse_sampler(node: &kdl::KdlNode) -> Result<SamplerConfig, ConfigError> {
    let mut sampler = SamplerConfig::default();

    for child in children(node) {
        match child.name().value() {
            "rows" => {
                let rows = first_u64(child, "sampler.rows")?;
                sampler.rows = u16::try_from(rows).map_err(|_| ConfigError::OutOfRange {
                    field: "sampler.rows".to_string(),
                    value: rows as f64,
                    range: "1..=65535".to_string(),
                })?;
            }
            name => {
                tracing::warn!("Unknown sampler option: {}", name);
            }
        }
    }

    Ok(sampler)
}

fn parse_monitors(node: &kdl::KdlNode) -> Result<Vec<u32>, ConfigError> {
    node.entries()
        .iter()
        .map(|entry| {
            entry
                .value()
                .as_i64()
                .and_then(|id| u32::try_from(id).ok())
                .ok_or_else(|| ConfigError::InvalidValue {
                    field: "monitors".to_string(),
                    expected: "positive integer monitor ids".to_string(),
                })
        })
        .collect()
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    let curve = &config.curve;

    check_range("curve.threshold-start", curve.threshold_start, 0.0, 255.0)?;
    check_range("curve.threshold-max", curve.threshold_max, 0.0, 255.0)?;
    if curve.threshold_start >= curve.threshold_max {
        return Err(ConfigError::Invalid {
            message: format!(
                "threshold-start ({}) must be below threshold-max ({})",
                curve.threshold_start, curve.threshold_max
            ),
        });
    }
    check_range("curve.max-opacity", curve.max_opacity, 0.0, 255.0)?;
    check_range("curve.cap-fraction", curve.cap_fraction, 0.0, 1.0)?;

    for (field, factor) in [
        ("smoothing.supervisor", config.smoothing.supervisor),
        ("smoothing.worker", config.smoothing.worker),
    ] {
        if !(factor > 0.0 && factor <= 1.0) {
            return Err(ConfigError::OutOfRange {
                field: field.to_string(),
                value: factor,
                range: "0 < factor <= 1".to_string(),
            });
        }
    }

    let timing = &config.timing;
    for (field, period) in [
        ("timing.tick-ms", timing.tick),
        ("timing.record-interval-ms", timing.record_interval),
        ("timing.console-interval-ms", timing.console_interval),
        ("timing.worker-poll-ms", timing.worker_poll),
    ] {
        if period.is_zero() {
            return Err(ConfigError::OutOfRange {
                field: field.to_string(),
                value: 0.0,
                range: "at least 1 ms".to_string(),
            });
        }
    }

    if config.sampler.rows == 0 {
        return Err(ConfigError::OutOfRange {
            field: "sampler.rows".to_string(),
            value: 0.0,
            range: "1..=65535".to_string(),
        });
    }

    if config.monitors.contains(&0) {
        return Err(ConfigError::Invalid {
            message: "monitor ids start at 1".to_string(),
        });
    }

    check_range("dim-strength", config.dim_strength, 0.0, 100.0)?;

    Ok(())
}

fn check_range(field: &str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= min && value <= max {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field: field.to_string(),
            value,
            range: format!("{}..={}", min, max),
        })
    }
}

fn children(node: &kdl::KdlNode) -> impl Iterator<Item = &kdl::KdlNode> {
    node.children().into_iter().flat_map(|doc| doc.nodes())
}

fn first_value<'a>(node: &'a kdl::KdlNode, field: &str) -> Result<&'a kdl::KdlValue, ConfigError> {
    node.entries()
        .first()
        .map(|entry| entry.value())
        .ok_or_else(|| ConfigError::InvalidValue {
            field: field.to_string(),
            expected: "a value".to_string(),
        })
}

fn first_f64(node: &kdl::KdlNode, field: &str) -> Result<f64, ConfigError> {
    let value = first_value(node, field)?;
    value
        .as_f64()
        .or_else(|| value.as_i64().map(|v| v as f64))
        .ok_or_else(|| ConfigError::InvalidValue {
            field: field.to_string(),
            expected: "a number".to_string(),
        })
}

fn first_u64(node: &kdl::KdlNode, field: &str) -> Result<u64, ConfigError> {
    first_value(node, field)?
        .as_i64()
        .and_then(|v| u64::try_from(v).ok())
        .ok_or_else(|| ConfigError::InvalidValue {
            field: field.to_string(),
            expected: "a non-negative integer".to_string(),
        })
}

fn first_bool(node: &kdl::KdlNode, field: &str) -> Result<bool, ConfigError> {
    first_value(node, field)?
        .as_bool()
        .ok_or_else(|| ConfigError::InvalidValue {
            field: field.to_string(),
            expected: "true or false".to_string(),
        })
}

fn first_string<'a>(node: &'a kdl::KdlNode, field: &str) -> Result<&'a str, ConfigError> {
    first_value(node, field)?
        .as_string()
        .ok_or_else(|| ConfigError::InvalidValue {
            field: field.to_string(),
            expected: "a string".to_string(),
        })
}

fn first_path(node: &kdl::KdlNode, field: &str) -> Result<std::path::PathBuf, ConfigError> {
    let val = first_string(node, field)?;
    Ok(shellexpand::tilde(val).into_owned().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config_str("").unwrap();
        assert_eq!(config.monitors, vec![1]);
        assert_eq!(config.curve, CurveConfig::default());
        assert!((config.curve.cap() - 180.0).abs() < 1e-9);
        assert_eq!(config.smoothing.supervisor, 0.15);
        assert_eq!(config.smoothing.worker, 0.8);
        assert_eq!(config.timing.tick, Duration::from_millis(50));
        assert!(config.calibration);
    }

    #[test]
    fn test_parse_full_config() {
        let config = r#"
            global {
                log-level "debug"
                socket-path "/run/user/1000/dimmer.sock"
                brightness-log "/tmp/brightness.csv"
            }
            curve {
                threshold-start 25
                threshold-max 100
                max-opacity 240
                cap-fraction 0.5
            }
            smoothing {
                supervisor 0.3
                worker 0.7
            }
            timing {
                tick-ms 40
                settle-ms 0
                spawn-grace-ms 150
                terminate-timeout-ms 1000
                record-interval-ms 500
                console-interval-ms 4000
                worker-poll-ms 20
            }
            worker {
                program "/usr/lib/adaptive-dimmer/dimmer-overlay"
                args "--display" ":1"
                channel-dir "/run/user/1000/adaptive-dimmer"
            }
            sampler {
                rows 16
            }
            monitors 1 2 3
            dim-strength 60
            calibration false
        "#;

        let config = parse_config_str(config).unwrap();
        assert_eq!(config.global.log_level, LogLevel::Debug);
        assert_eq!(
            config.global.socket_path.as_deref(),
            Some(Path::new("/run/user/1000/dimmer.sock"))
        );
        assert_eq!(config.curve.threshold_start, 25.0);
        assert_eq!(config.curve.threshold_max, 100.0);
        assert!((config.curve.cap() - 120.0).abs() < 1e-9);
        assert_eq!(config.smoothing.supervisor, 0.3);
        assert_eq!(config.smoothing.worker, 0.7);
        assert_eq!(config.timing.tick, Duration::from_millis(40));
        assert_eq!(config.timing.settle, Duration::ZERO);
        assert_eq!(config.timing.terminate_timeout, Duration::from_secs(1));
        assert_eq!(config.timing.worker_poll, Duration::from_millis(20));
        assert_eq!(
            config.worker.program.as_deref(),
            Some(Path::new("/usr/lib/adaptive-dimmer/dimmer-overlay"))
        );
        assert_eq!(config.worker.args, vec!["--display", ":1"]);
        assert_eq!(config.sampler.rows, 16);
        assert_eq!(config.monitors, vec![1, 2, 3]);
        assert_eq!(config.dim_strength, 60.0);
        assert!(!config.calibration);
    }

    #[test]
    fn test_integer_and_float_values_are_interchangeable() {
        let config = parse_config_str("curve { threshold-start 80.5\nmax-opacity 200 }").unwrap();
        assert_eq!(config.curve.threshold_start, 80.5);
        assert_eq!(config.curve.max_opacity, 200.0);
    }

    #[test]
    fn test_threshold_order_is_validated() {
        let result = parse_config_str("curve { threshold-start 200\nthreshold-max 80 }");
        match result {
            Err(ConfigError::Invalid { message }) => {
                assert!(message.contains("threshold-start"));
            }
            other => panic!("Expected Invalid error, got: {:?}", other),
        }
    }

    #[test]
    fn test_max_opacity_above_255_is_rejected() {
        let result = parse_config_str("curve { max-opacity 300 }");
        match result {
            Err(ConfigError::OutOfRange { field, .. }) => assert_eq!(field, "curve.max-opacity"),
            other => panic!("Expected OutOfRange error, got: {:?}", other),
        }
    }

    #[test]
    fn test_cap_fraction_out_of_range_is_rejected() {
        assert!(matches!(
            parse_config_str("curve { cap-fraction 1.5 }"),
            Err(ConfigError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_smoothing_factor_must_be_positive() {
        assert!(matches!(
            parse_config_str("smoothing { supervisor 0 }"),
            Err(ConfigError::OutOfRange { .. })
        ));
        assert!(matches!(
            parse_config_str("smoothing { worker 1.2 }"),
            Err(ConfigError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_zero_tick_is_rejected() {
        assert!(matches!(
            parse_config_str("timing { tick-ms 0 }"),
            Err(ConfigError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_monitor_zero_is_rejected() {
        assert!(matches!(
            parse_config_str("monitors 0 1"),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            parse_config_str("monitors -1"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_wrong_value_type_is_reported_with_field() {
        match parse_config_str("dim-strength \"high\"") {
            Err(ConfigError::InvalidValue { field, .. }) => assert_eq!(field, "dim-strength"),
            other => panic!("Expected InvalidValue error, got: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_nodes_are_ignored() {
        let config = parse_config_str("frobnicate 1\ncurve { wobble 3 }").unwrap();
        assert_eq!(config.curve, CurveConfig::default());
    }

    #[test]
    fn test_kdl_syntax_error_is_parse_error() {
        assert!(matches!(
            parse_config_str("curve { threshold-start 80"),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn test_load_config_missing_optional_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.kdl");
        let config = load_config(&path, false).unwrap();
        assert_eq!(config.monitors, vec![1]);
        assert!(matches!(load_config(&path, true), Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_reads_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.kdl");
        std::fs::write(&path, "monitors 2\ndim-strength 40").unwrap();
        let config = load_config(&path, true).unwrap();
        assert_eq!(config.monitors, vec![2]);
        assert_eq!(config.dim_strength, 40.0);
    }
}
