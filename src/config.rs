use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Where the managed runtime and its assemblies live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub runtime_directory: PathBuf,
    #[serde(default)]
    pub user_assembly_path: PathBuf,
    /// Empty resolves to `<project_path>/Bin/Scripts/<expected_core_assembly_name><ext>`.
    #[serde(default)]
    pub core_assembly_path: PathBuf,
    #[serde(default = "HostConfig::default_enable_hot_reload")]
    pub enable_hot_reload: bool,
    #[serde(default)]
    pub project_path: PathBuf,
    #[serde(default = "HostConfig::default_expected_core_assembly_name")]
    pub expected_core_assembly_name: String,
}

impl HostConfig {
    const fn default_enable_hot_reload() -> bool {
        cfg!(debug_assertions)
    }

    fn default_expected_core_assembly_name() -> String {
        "Kestrel.Core".to_string()
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            runtime_directory: PathBuf::new(),
            user_assembly_path: PathBuf::new(),
            core_assembly_path: PathBuf::new(),
            enable_hot_reload: Self::default_enable_hot_reload(),
            project_path: PathBuf::new(),
            expected_core_assembly_name: Self::default_expected_core_assembly_name(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Empty keeps the export in memory.
    #[serde(default)]
    pub output_path: PathBuf,
    #[serde(default = "ExportConfig::default_true")]
    pub pretty_print: bool,
    #[serde(default = "ExportConfig::default_indent_size")]
    pub indent_size: usize,
    #[serde(default = "ExportConfig::default_true")]
    pub include_deprecated: bool,
    #[serde(default = "ExportConfig::default_true")]
    pub include_type_ids: bool,
    #[serde(default = "ExportConfig::default_true")]
    pub include_marshal_types: bool,
    #[serde(default)]
    pub include_categories: Vec<String>,
    #[serde(default)]
    pub exclude_categories: Vec<String>,
    #[serde(default)]
    pub exclude_classes: Vec<String>,
}

impl ExportConfig {
    const fn default_true() -> bool {
        true
    }

    const fn default_indent_size() -> usize {
        2
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_path: PathBuf::new(),
            pretty_print: Self::default_true(),
            indent_size: Self::default_indent_size(),
            include_deprecated: Self::default_true(),
            include_type_ids: Self::default_true(),
            include_marshal_types: Self::default_true(),
            include_categories: Vec::new(),
            exclude_categories: Vec::new(),
            exclude_classes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InteropConfig {
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub watch_assemblies: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportOverrides {
    pub output_path: Option<PathBuf>,
    pub pretty_print: Option<bool>,
    pub include_deprecated: Option<bool>,
    pub include_categories: Vec<String>,
    pub exclude_categories: Vec<String>,
    pub exclude_classes: Vec<String>,
}

impl InteropConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                log::warn!("Config load error: {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    /// List overrides extend the configured lists; scalar overrides replace.
    pub fn apply_export_overrides(&mut self, overrides: &ExportOverrides) {
        let export = &mut self.export;
        if let Some(path) = &overrides.output_path {
            export.output_path = path.clone();
        }
        if let Some(pretty) = overrides.pretty_print {
            export.pretty_print = pretty;
        }
        if let Some(deprecated) = overrides.include_deprecated {
            export.include_deprecated = deprecated;
        }
        export.include_categories.extend(overrides.include_categories.iter().cloned());
        export.exclude_categories.extend(overrides.exclude_categories.iter().cloned());
        export.exclude_classes.extend(overrides.exclude_classes.iter().cloned());
    }
}

impl ExportOverrides {
    pub fn is_empty(&self) -> bool {
        self.output_path.is_none()
            && self.pretty_print.is_none()
            && self.include_deprecated.is_none()
            && self.include_categories.is_empty()
            && self.exclude_categories.is_empty()
            && self.exclude_classes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_object_uses_defaults() {
        let cfg: InteropConfig = serde_json::from_str("{}").expect("parse empty config");
        assert_eq!(cfg, InteropConfig::default());
        assert!(cfg.export.pretty_print);
        assert_eq!(cfg.export.indent_size, 2);
        assert_eq!(cfg.host.expected_core_assembly_name, "Kestrel.Core");
        assert_eq!(cfg.host.enable_hot_reload, cfg!(debug_assertions));
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let cfg: InteropConfig = serde_json::from_str(
            r#"{"host": {"runtime_directory": "rt", "enable_hot_reload": true}, "export": {"indent_size": 4}}"#,
        )
        .expect("parse config");
        assert_eq!(cfg.host.runtime_directory, PathBuf::from("rt"));
        assert!(cfg.host.enable_hot_reload);
        assert_eq!(cfg.export.indent_size, 4);
        assert!(cfg.export.include_type_ids);
        assert!(!cfg.watch_assemblies);
    }

    #[test]
    fn load_or_default_falls_back_on_bad_json() {
        let mut file = tempfile::NamedTempFile::new().expect("temp config");
        file.write_all(b"{ not json").expect("write config");
        assert!(InteropConfig::load(file.path()).is_err());
        assert_eq!(InteropConfig::load_or_default(file.path()), InteropConfig::default());
    }

    #[test]
    fn overrides_extend_lists_and_replace_scalars() {
        let mut cfg = InteropConfig::default();
        cfg.export.exclude_classes.push("Legacy".into());
        let overrides = ExportOverrides {
            pretty_print: Some(false),
            exclude_classes: vec!["Debug".into()],
            ..ExportOverrides::default()
        };
        assert!(!overrides.is_empty());
        cfg.apply_export_overrides(&overrides);
        assert!(!cfg.export.pretty_print);
        assert_eq!(cfg.export.exclude_classes, vec!["Legacy".to_string(), "Debug".to_string()]);
    }
}
