use anyhow::{anyhow, bail, Context, Result};
use kestrel_interop::cli::HostCliOptions;
use kestrel_interop::config::InteropConfig;
use kestrel_interop::{math_api, NativeRegistry, ScriptingSystem};
use simple_logger::SimpleLogger;
use std::process;

fn main() {
    if let Err(err) = run() {
        eprintln!("[interop-host] error: {err:?}");
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = HostCliOptions::parse_from_env()?;
    if options.show_help {
        print_help();
        return Ok(());
    }
    SimpleLogger::new().with_level(log::LevelFilter::Info).init().context("install logger")?;

    let config = match &options.config {
        Some(path) => InteropConfig::load(path)?,
        None => InteropConfig::load_or_default("config/interop.json"),
    };
    let mut registry = NativeRegistry::new();
    math_api::register(&mut registry);

    let mut system = ScriptingSystem::with_rhai();
    let status = system.initialize(&registry, &config);
    if !status.is_success() {
        bail!("host failed to start: {status}");
    }

    for (type_name, method) in &options.calls {
        let host = system.host_mut();
        let type_handle = host
            .user_type(type_name)
            .or_else(|| host.core_type(type_name))
            .ok_or_else(|| anyhow!("type '{type_name}' not found in the user or core assembly"))?;
        let object = host.create_instance(type_handle);
        if object.is_empty() {
            bail!("could not create an instance of '{type_name}'");
        }
        let result = host.invoke_method(&object, method, &[]);
        host.destroy_instance(object);
        match result {
            Some(value) => println!("[interop-host] {type_name}::{method} -> {}", value.to_json()),
            None => bail!("{type_name}::{method} failed; see the log for the script error"),
        }
    }
    system.shutdown();
    Ok(())
}

fn print_help() {
    eprintln!(
        "Interop Host
Boots the rhai scripting host with the engine math API bound and calls script methods.

Usage: interop_host [--config <path>] [--call <Type>::<method>]...

Options:
  -c, --config <path>          Interop config (JSON); defaults to config/interop.json
      --call <Type>::<method>  Create <Type> and invoke <method> with no arguments (repeatable)
  -h, --help                   Show this help"
    );
}
