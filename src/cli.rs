use crate::config::ExportOverrides;
use anyhow::{anyhow, bail, Result};
use std::env;
use std::path::PathBuf;

/// Options accepted by the `reflection_export` tool.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExportCliOptions {
    pub config: Option<PathBuf>,
    pub overrides: ExportOverrides,
    pub show_help: bool,
}

impl ExportCliOptions {
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(env::args())
    }

    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut options = ExportCliOptions::default();
        let mut iter = args.into_iter();
        let _ = iter.next(); // skip program name if present
        while let Some(raw_flag) = iter.next() {
            let flag = raw_flag.as_ref();
            match flag {
                "--compact" => options.overrides.pretty_print = Some(false),
                "--no-deprecated" => options.overrides.include_deprecated = Some(false),
                "--help" | "-h" => options.show_help = true,
                "--config" | "-c" | "--output" | "-o" | "--include-category" | "--exclude-category"
                | "--exclude-class" => {
                    let value =
                        iter.next().ok_or_else(|| anyhow!("Expected a value after '{flag}'"))?.as_ref().to_string();
                    if value.is_empty() {
                        bail!("Empty value for '{flag}'");
                    }
                    match flag {
                        "--config" | "-c" => options.config = Some(PathBuf::from(value)),
                        "--output" | "-o" => options.overrides.output_path = Some(PathBuf::from(value)),
                        "--include-category" => options.overrides.include_categories.push(value),
                        "--exclude-category" => options.overrides.exclude_categories.push(value),
                        _ => options.overrides.exclude_classes.push(value),
                    }
                }
                _ if flag.starts_with('-') => bail!(
                    "Unknown flag '{flag}'. Supported flags: --config, --output, --compact, --no-deprecated, \
                     --include-category, --exclude-category, --exclude-class."
                ),
                _ => bail!("Unexpected argument '{flag}'."),
            }
        }
        Ok(options)
    }
}

/// Options accepted by the `interop_host` tool.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HostCliOptions {
    pub config: Option<PathBuf>,
    /// `(type, method)` pairs from `--call Type::method`, in order.
    pub calls: Vec<(String, String)>,
    pub show_help: bool,
}

impl HostCliOptions {
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(env::args())
    }

    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut options = HostCliOptions::default();
        let mut iter = args.into_iter();
        let _ = iter.next();
        while let Some(raw_flag) = iter.next() {
            let flag = raw_flag.as_ref();
            match flag {
                "--help" | "-h" => options.show_help = true,
                "--config" | "-c" => {
                    let value = iter.next().ok_or_else(|| anyhow!("Expected a value after '{flag}'"))?;
                    options.config = Some(PathBuf::from(value.as_ref()));
                }
                "--call" => {
                    let value = iter.next().ok_or_else(|| anyhow!("Expected a value after '{flag}'"))?;
                    options.calls.push(parse_call(value.as_ref())?);
                }
                other => bail!("Unknown flag '{other}'. Supported flags: --config, --call."),
            }
        }
        Ok(options)
    }
}

fn parse_call(value: &str) -> Result<(String, String)> {
    let Some((type_name, method)) = value.rsplit_once("::") else {
        bail!("Invalid call '{value}'. Use <Type>::<method>.");
    };
    if type_name.is_empty() || method.is_empty() {
        bail!("Invalid call '{value}'. Use <Type>::<method>.");
    }
    Ok((type_name.to_string(), method.to_string()))
}
