use anyhow::{bail, Context, Result};
use kestrel_interop::cli::ExportCliOptions;
use kestrel_interop::config::InteropConfig;
use kestrel_interop::export::export_from_context;
use kestrel_interop::{math_api, NativeRegistry, Reflector};
use simple_logger::SimpleLogger;
use std::process;

fn main() {
    if let Err(err) = run() {
        eprintln!("[reflection-export] error: {err:?}");
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = ExportCliOptions::parse_from_env()?;
    if options.show_help {
        print_help();
        return Ok(());
    }
    SimpleLogger::new().with_level(log::LevelFilter::Info).init().context("install logger")?;

    let mut config = match &options.config {
        Some(path) => InteropConfig::load(path)?,
        None => InteropConfig::default(),
    };
    config.apply_export_overrides(&options.overrides);

    let mut registry = NativeRegistry::new();
    math_api::register(&mut registry);
    let mut reflector = Reflector::new();
    reflector.reflect_from_context(Some(&registry));

    let result = export_from_context(Some(&reflector), &config.export);
    if !result.success {
        bail!("export failed: {}", result.error_message);
    }
    match &result.output_path {
        Some(path) => println!(
            "[reflection-export] wrote {} classes, {} buses, {} global methods, {} global properties to {}",
            result.classes_exported,
            result.ebuses_exported,
            result.global_methods_exported,
            result.global_properties_exported,
            path.display()
        ),
        None => println!("{}", result.json_data),
    }
    Ok(())
}

fn print_help() {
    eprintln!(
        "Reflection Export
Writes the reflected engine API as JSON for binding generators.

Usage: reflection_export [options]

Options:
  -c, --config <path>          Interop config (JSON); defaults apply when omitted
  -o, --output <path>          Output file; without one the JSON goes to stdout
      --compact                Single-line output
      --no-deprecated          Skip deprecated classes
      --include-category <p>   Keep only classes whose category starts with <p> (repeatable)
      --exclude-category <p>   Drop classes whose category starts with <p> (repeatable)
      --exclude-class <name>   Drop a class by name (repeatable)
  -h, --help                   Show this help"
    );
}
