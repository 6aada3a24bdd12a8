//! Purpose: `ipcsocket-native` CLI for inspecting and exercising the native loader.
//! Role: Binary crate root; parses args, runs one command, emits JSON on stdout.
//! Invariants: Errors are emitted on stderr (JSON when not a terminal).
//! Invariants: Process exit code is derived from `to_exit_code`.
//! Invariants: The CLI resolves the staging directory exactly as the library does.
use std::error::Error as StdError;
use std::io::{self, IsTerminal};
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueHint};
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

use ipcsocket_native::core::loader::DynamicLibraryLoader;
use ipcsocket_native::core::platform::PlatformKey;
use ipcsocket_native::core::resources::{DirectoryResources, StaticResources};
use ipcsocket_native::core::runtime_dir::{RuntimeEnv, resolve_staging_dir};
use ipcsocket_native::core::sweep::Sweeper;
use ipcsocket_native::{Error, NativeLoader, to_exit_code};

#[derive(Parser)]
#[command(
    name = "ipcsocket-native",
    version,
    about = "Extract, load, and reclaim the embedded ipcsocket native library",
    long_about = None,
    after_help = r#"EXAMPLES
  $ ipcsocket-native platform
  $ ipcsocket-native dir
  $ ipcsocket-native sweep
  $ ipcsocket-native --tmpdir /tmp/natives load --resource-dir ./native"#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        help = "Staging directory (default: $SBT_IPCSOCKET_TMPDIR, else a per-user runtime dir)",
        value_hint = ValueHint::DirPath
    )]
    tmpdir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Print the identified platform and its resource key")]
    Platform,
    #[command(about = "Print the resolved staging directory")]
    Dir,
    #[command(about = "Reclaim artifacts whose owning process is gone")]
    Sweep,
    #[command(about = "Extract and load the native library, then wait for the post-load sweep")]
    Load {
        #[arg(
            long,
            help = "Read libraries from <DIR>/<os>/<arch>/<file> instead of the embedded table",
            value_hint = ValueHint::DirPath
        )]
        resource_dir: Option<PathBuf>,
    },
}

fn main() {
    init_tracing();
    let exit_code = match run() {
        Ok(()) => 0,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<(), Error> {
    let cli = Cli::parse();
    let mut env = RuntimeEnv::from_process();
    if let Some(dir) = cli.tmpdir {
        env = env.with_override_dir(dir);
    }
    let staging_dir = resolve_staging_dir(&env);
    let platform = PlatformKey::identify();

    match cli.command {
        Command::Platform => {
            emit_json(json!({
                "platform": platform,
                "supported": platform.is_supported(),
                "resource": platform.resource_key(),
            }));
        }
        Command::Dir => {
            emit_json(json!({ "staging_dir": staging_dir.display().to_string() }));
        }
        Command::Sweep => {
            let stats = Sweeper::new(&staging_dir, platform.os_family).run();
            emit_json(json!({
                "staging_dir": staging_dir.display().to_string(),
                "sweep": stats,
            }));
        }
        Command::Load { resource_dir } => {
            let loader = match resource_dir {
                Some(dir) => NativeLoader::new(
                    platform,
                    &staging_dir,
                    DirectoryResources::new(dir),
                    DynamicLibraryLoader,
                ),
                None => NativeLoader::new(
                    platform,
                    &staging_dir,
                    StaticResources::embedded(),
                    DynamicLibraryLoader,
                ),
            };
            loader.ensure_loaded()?;
            let sweep = loader.wait_for_cleanup();
            let artifact = loader.artifact();
            emit_json(json!({
                "loaded": loader.is_loaded(),
                "artifact": artifact.map(|a| a.path.display().to_string()),
                "tag": artifact
                    .and_then(|a| a.tag_path.as_ref())
                    .map(|p| p.display().to_string()),
                "sweep": sweep,
            }));
        }
    }
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn emit_json(value: Value) {
    let json = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("error: {err}");
        return;
    }
    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    if let Some(message) = err.message() {
        inner.insert("message".to_string(), json!(message));
    }
    if let Some(resource) = err.resource() {
        inner.insert("resource".to_string(), json!(resource));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut current = StdError::source(err);
    while let Some(cause) = current {
        causes.push(cause.to_string());
        current = cause.source();
    }
    causes
}
