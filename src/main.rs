use std::{env, process::ExitCode};

use polycall::{
    api::{self, Status},
    loader::ScriptLoader,
    value::Value,
};
use serde_json::Value as Json;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let mut args: Vec<String> = env::args().collect();
    let verbose = args.iter().any(|arg| arg == "--verbose");
    let inspect = args.iter().any(|arg| arg == "--inspect");
    if verbose {
        args.retain(|arg| arg != "--verbose");
    }
    if inspect {
        args.retain(|arg| arg != "--inspect");
    }
    init_tracing(verbose);

    if args.len() < 2 || matches!(args[1].as_str(), "-h" | "--help" | "help") {
        print_help();
        return ExitCode::SUCCESS;
    }
    if args.len() < 4 {
        eprintln!("Usage: polycall <tag> <file> <function> [json-arg ...]");
        return exit(Status::InvalidTarget);
    }

    let tag = args[1].as_str();
    let file = args[2].as_str();
    let function = args[3].as_str();
    let mut call_args = Vec::with_capacity(args.len() - 4);
    for raw in &args[4..] {
        match serde_json::from_str::<Json>(raw) {
            Ok(json) => call_args.push(Value::from_json(&json)),
            Err(err) => {
                eprintln!("Error: argument `{raw}` is not valid JSON: {err}");
                return exit(Status::Conversion);
            }
        }
    }

    let status = api::initialize();
    if !status.is_ok() {
        eprintln!("Error: bridge failed to initialize");
        return exit(status);
    }
    let status = run(tag, file, function, call_args, inspect);
    let teardown = api::destroy();
    if status.is_ok() { exit(teardown) } else { exit(status) }
}

fn run(tag: &str, file: &str, function: &str, args: Vec<Value>, inspect: bool) -> Status {
    // Unknown tags stand in for a guest language and get a script runtime.
    if let Ok(bridge) = api::bridge() {
        if !bridge.registry().has_factory(tag) {
            let status = api::register_loader(tag, ScriptLoader::new);
            if !status.is_ok() {
                return status;
            }
        }
    }

    let status = api::load_from_file(tag, &[file]);
    if !status.is_ok() {
        eprintln!("Error: could not load `{file}` into `{tag}`");
        return status;
    }

    let target = format!("{tag}:{function}");
    let status = match api::call(target.as_str(), args) {
        Ok(value) => {
            println!("{}", value.to_json());
            Status::Ok
        }
        Err(err) => {
            eprintln!("Error: {err}");
            Status::from(&err)
        }
    };
    if inspect {
        match serde_json::to_string_pretty(&api::inspect()) {
            Ok(text) => println!("{text}"),
            Err(err) => eprintln!("Error: {err}"),
        }
    }
    status
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "polycall=debug" } else { "polycall=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn exit(status: Status) -> ExitCode {
    ExitCode::from(status.code() as u8)
}

fn print_help() {
    println!(
        "\
polycall CLI

Usage:
  polycall <tag> <file> <function> [json-arg ...]

Loads <file> into the runtime registered under <tag>, calls <function> with
the JSON arguments and prints the result as JSON. Tags other than the built-in
`host`, `mock` and `script` get a script runtime.

Flags:
  --verbose          Log loader and dispatch activity to stderr
  --inspect          Print loaded runtimes and their functions after the call
  -h, --help         Show this help message

Environment:
  POLYCALL_CONFIG            JSON configuration file
  POLYCALL_MAX_CALL_DEPTH    Override the nested call limit
  RUST_LOG                   Log filter (overrides --verbose)
"
    );
}
