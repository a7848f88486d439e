//! Loading training spec files

use super::schema::TrainSpec;
use super::validate::validate_spec;
use crate::error::{Error, Result};
use crate::peft::PresetTable;
use std::fs;
use std::path::Path;
use tracing::info;

fn parse(path: &Path, content: &str) -> Result<TrainSpec> {
    let ext = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("json") => serde_json::from_str(content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse JSON config: {e}"))),
        Some("yaml" | "yml") | None => serde_yaml::from_str(content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse YAML config: {e}"))),
        Some(other) => Err(Error::ConfigError(format!(
            "Unsupported config extension '.{other}' (expected .yaml, .yml or .json)"
        ))),
    }
}

impl TrainSpec {
    /// Built-in presets, overlaid with `preset_file` when set.
    pub fn preset_table(&self) -> Result<PresetTable> {
        let mut table = PresetTable::builtin();
        if let Some(path) = &self.preset_file {
            let extra = PresetTable::load(path)?;
            let names: Vec<String> = extra.names().map(str::to_string).collect();
            for name in names {
                let preset = extra.get(&name).cloned().flatten();
                table.insert(name, preset);
            }
        }
        Ok(table)
    }
}

/// Read, parse and validate a training spec file.
///
/// YAML (`.yaml`, `.yml`, no extension) or JSON (`.json`). A relative
/// `preset_file` is resolved against the spec file's directory.
pub fn load_spec(path: impl AsRef<Path>) -> Result<TrainSpec> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .map_err(|e| Error::ConfigError(format!("Failed to read config file {}: {e}", path.display())))?;
    let mut spec = parse(path, &content)?;

    if let (Some(preset_file), Some(dir)) = (&spec.preset_file, path.parent()) {
        if preset_file.is_relative() {
            spec.preset_file = Some(dir.join(preset_file));
        }
    }

    let presets = spec.preset_table()?;
    validate_spec(&spec, &presets).map_err(|e| Error::ConfigError(format!("Invalid config: {e}")))?;
    info!(
        path = %path.display(),
        peft_type = %spec.peft.peft_type,
        rank = spec.peft.rank,
        dynamic_loss = spec.dynamic_loss.is_some(),
        delta_pattern = spec.delta_pattern.is_some(),
        "loaded training spec"
    );
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peft::PeftType;
    use crate::train::delta::DeltaMetric;
    use crate::train::loss::StatsMode;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_yaml() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "spec.yaml",
            r#"
peft:
  peft_type: LOHA
  rank: 8
  alpha: 4.0
  layer_preset: attn-only
dynamic_loss:
  stats_mode: median_mad
  window_size: 50
delta_pattern:
  metric: cosine
  lambda: 0.05
"#,
        );
        let spec = load_spec(&path).unwrap();
        assert_eq!(spec.peft.peft_type, PeftType::Loha);
        assert_eq!(spec.peft.rank, 8);
        let loss = spec.dynamic_loss.unwrap();
        assert_eq!(loss.stats_mode, StatsMode::MedianMad);
        assert_eq!(loss.window_size, 50);
        let delta = spec.delta_pattern.unwrap();
        assert_eq!(delta.metric, DeltaMetric::Cosine);
        assert!((delta.lambda - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_load_json_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "spec.json", r#"{"peft": {"rank": 4}}"#);
        let spec = load_spec(&path).unwrap();
        assert_eq!(spec.peft.rank, 4);
        assert!(spec.dynamic_loss.is_none());
        assert!(spec.delta_pattern.is_none());
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "spec.toml", "peft = {}");
        let err = load_spec(&path).unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
        assert!(err.to_string().contains(".toml"));
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(load_spec(dir.path().join("absent.yaml")), Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "spec.yaml", "peft: {}\noptimizer: adam\n");
        assert!(matches!(load_spec(&path), Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "spec.yaml", "dynamic_loss:\n  window_size: 1\n");
        let err = load_spec(&path).unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
        assert!(err.to_string().contains("window"));
    }

    #[test]
    fn test_relative_preset_file() {
        let dir = TempDir::new().unwrap();
        write(&dir, "presets.yaml", "mine:\n  \"*to_q\": { rank: 2 }\n");
        let path = write(&dir, "spec.yml", "preset_file: presets.yaml\npeft:\n  layer_preset: mine\n");

        let spec = load_spec(&path).unwrap();
        assert_eq!(spec.preset_file.as_deref(), Some(dir.path().join("presets.yaml").as_path()));

        let table = spec.preset_table().unwrap();
        let resolved = table.resolve(Some("mine")).unwrap();
        assert_eq!(resolved.filters, vec!["*to_q".to_string()]);
        assert!(table.get("attn-mlp").is_some());
    }

    #[test]
    fn test_preset_missing_from_table() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "spec.yaml", "peft:\n  layer_preset: mine\n");
        let err = load_spec(&path).unwrap_err();
        assert!(err.to_string().contains("mine"));
    }
}
