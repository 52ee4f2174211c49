//! Hub-script: the line-oriented admin command language the CLI tools use
//! to populate an embedded hub.
//!
//! ```text
//! # sensors
//! input /app/s/counter/value num count
//! output /obs/sink num count
//! observation /obs/t min-period=1.0 change-by=0.5
//! source /obs/sink /app/s/counter/value
//! override /x/y num 42
//! default /x/y num 1
//! extraction /temp env.temperature
//! push /app/s/counter/value num 1.0 ts=10.0
//! delete /app/s/counter/value
//! track-deletions on
//! ```

use anyhow::{Context, Result, bail};
use datahub_core::hub::DataHub;
use datahub_core::resource::ObservationConfig;
use datahub_core::sample::{NOW, Sample, SampleType, Value};

/// Apply a whole script, one directive per line. `#` comments and blank
/// lines are ignored; errors name the offending line.
pub fn apply_script(hub: &mut DataHub, text: &str) -> Result<()> {
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        apply_line(hub, line).with_context(|| format!("script line {}: {line:?}", lineno + 1))?;
    }
    Ok(())
}

/// Apply a single directive.
pub fn apply_line(hub: &mut DataHub, line: &str) -> Result<()> {
    let mut parts = line.split_whitespace();
    let Some(cmd) = parts.next() else {
        return Ok(());
    };
    let rest: Vec<&str> = parts.collect();

    match cmd {
        "input" | "output" => {
            let [path, ty] = take_at_least::<2>(cmd, &rest)?;
            let ty = SampleType::from_name(ty)?;
            let units = rest.get(2).copied().unwrap_or("");
            if cmd == "input" {
                hub.create_input(path, ty, units)?;
            } else {
                hub.create_output(path, ty, units)?;
            }
        }
        "observation" => {
            let [path] = take_at_least::<1>(cmd, &rest)?;
            let cfg = parse_observation_opts(&rest[1..])?;
            hub.create_observation(path, cfg)?;
        }
        "source" => {
            let [dst, src] = take_at_least::<2>(cmd, &rest)?;
            hub.set_source(dst, Some(src))?;
        }
        "unsource" => {
            let [dst] = take_at_least::<1>(cmd, &rest)?;
            hub.set_source(dst, None)?;
        }
        "override" => {
            let [path, ty] = take_at_least::<2>(cmd, &rest)?;
            let value = parse_value(SampleType::from_name(ty)?, &rest[2..])?;
            hub.set_override(path, value)?;
        }
        "default" => {
            let [path, ty] = take_at_least::<2>(cmd, &rest)?;
            let value = parse_value(SampleType::from_name(ty)?, &rest[2..])?;
            hub.set_default(path, value)?;
        }
        "extraction" => {
            let [path, spec] = take_at_least::<2>(cmd, &rest)?;
            hub.set_json_extraction(path, spec)?;
        }
        "push" => {
            let [path, ty] = take_at_least::<2>(cmd, &rest)?;
            let ty = SampleType::from_name(ty)?;
            let mut tail = &rest[2..];
            let mut ts = NOW;
            if let Some(last) = tail.last()
                && let Some(raw) = last.strip_prefix("ts=")
            {
                ts = raw.parse().context("bad ts= value")?;
                tail = &tail[..tail.len() - 1];
            }
            let value = parse_value(ty, tail)?;
            hub.push(path, "", Sample::new(ts, value))?;
        }
        "delete" => {
            let [path] = take_at_least::<1>(cmd, &rest)?;
            hub.delete_resource(path)?;
        }
        "track-deletions" => {
            let [state] = take_at_least::<1>(cmd, &rest)?;
            match state {
                "on" => hub.set_deletion_tracking(true),
                "off" => hub.set_deletion_tracking(false),
                other => bail!("expected on|off, got {other:?}"),
            }
        }
        other => bail!("unknown directive {other:?}"),
    }
    Ok(())
}

/// Parse a value of the given type from the remaining tokens. String and
/// JSON payloads may span tokens; they are re-joined with single spaces.
pub fn parse_value(ty: SampleType, tokens: &[&str]) -> Result<Value> {
    let raw = tokens.join(" ");
    match ty {
        SampleType::Trigger => {
            if !raw.is_empty() {
                bail!("trigger takes no value");
            }
            Ok(Value::Trigger)
        }
        SampleType::Boolean => match raw.as_str() {
            "true" => Ok(Value::Boolean(true)),
            "false" => Ok(Value::Boolean(false)),
            other => bail!("expected true|false, got {other:?}"),
        },
        SampleType::Numeric => Ok(Value::Numeric(
            raw.parse().with_context(|| format!("bad number {raw:?}"))?,
        )),
        SampleType::String => Ok(Value::String(raw)),
        SampleType::Json => {
            // Validated at ingress; the hub stores the raw text.
            serde_json::from_str::<serde_json::Value>(&raw)
                .with_context(|| format!("bad json {raw:?}"))?;
            Ok(Value::Json(raw))
        }
    }
}

fn parse_observation_opts(opts: &[&str]) -> Result<ObservationConfig> {
    let mut cfg = ObservationConfig::default();
    for opt in opts {
        let Some((key, raw)) = opt.split_once('=') else {
            bail!("expected key=value, got {opt:?}");
        };
        match key {
            "min-period" => cfg.min_period = parse_num(key, raw)?,
            "low" => cfg.low_limit = parse_num(key, raw)?,
            "high" => cfg.high_limit = parse_num(key, raw)?,
            "change-by" => cfg.change_by = parse_num(key, raw)?,
            "buffer" => {
                cfg.buffer_max_count =
                    raw.parse().with_context(|| format!("bad buffer= {raw:?}"))?;
            }
            "backup-period" => cfg.buffer_backup_period = parse_num(key, raw)?,
            other => bail!("unknown observation option {other:?}"),
        }
    }
    Ok(cfg)
}

fn parse_num(key: &str, raw: &str) -> Result<f64> {
    raw.parse().with_context(|| format!("bad {key}= {raw:?}"))
}

/// First N tokens of a directive, by reference.
fn take_at_least<'a, const N: usize>(cmd: &str, rest: &[&'a str]) -> Result<[&'a str; N]> {
    if rest.len() < N {
        bail!("{cmd} needs at least {N} argument(s)");
    }
    let mut out = [""; N];
    out.copy_from_slice(&rest[..N]);
    Ok(out)
}
