use std::fs;
use std::path::{Path, PathBuf};

use toml::Value;
use tracing::debug;

use super::core::ProbeConfig;
use crate::error::{ProbeError, ProbeResult};

/// Layer `paths` in order, later files overriding earlier ones, then validate.
///
/// Tables merge key by key; scalars and arrays are replaced wholesale. An empty
/// list yields the defaults.
pub fn load_probe_config(paths: &[PathBuf]) -> ProbeResult<ProbeConfig> {
    let mut merged = Value::Table(Default::default());
    for path in paths {
        let layer = read_layer(path)?;
        debug!("applying configuration layer {}", path.display());
        merge(&mut merged, layer);
    }

    let config: ProbeConfig = merged
        .try_into()
        .map_err(|err| ProbeError::Config(format!("invalid configuration: {err}")))?;
    config.validate()?;
    Ok(config)
}

fn read_layer(path: &Path) -> ProbeResult<Value> {
    let text = fs::read_to_string(path).map_err(|source| ProbeError::io(path, source))?;
    toml::from_str(&text)
        .map_err(|err| ProbeError::Config(format!("failed to parse {}: {err}", path.display())))
}

fn merge(dest: &mut Value, src: Value) {
    match (dest, src) {
        (Value::Table(dest_map), Value::Table(src_map)) => {
            for (key, value) in src_map {
                match dest_map.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        dest_map.insert(key, value);
                    }
                }
            }
        }
        (dest_slot, src_value) => {
            *dest_slot = src_value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_tables_merge_and_scalars_replace() {
        let mut base: Value = toml::from_str(
            r#"
            [trigger]
            min_confidence = 0.7
            salient_terms = ["a", "b"]
            [trigger.refinement]
            type = "jitter"
            steps = 50
            "#,
        )
        .expect("base");
        let layer: Value = toml::from_str(
            r#"
            [trigger]
            salient_terms = ["c"]
            [trigger.refinement]
            steps = 5
            "#,
        )
        .expect("layer");

        merge(&mut base, layer);
        let trigger = &base["trigger"];
        assert_eq!(trigger["min_confidence"].as_float(), Some(0.7));
        assert_eq!(trigger["salient_terms"].as_array().map(Vec::len), Some(1));
        assert_eq!(trigger["refinement"]["type"].as_str(), Some("jitter"));
        assert_eq!(trigger["refinement"]["steps"].as_integer(), Some(5));
    }

    #[test]
    fn no_layers_yields_defaults() {
        let config = load_probe_config(&[]).expect("defaults");
        assert_eq!(config, ProbeConfig::default());
    }
}
