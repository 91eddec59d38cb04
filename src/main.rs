use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::{Config, Editor};

use permitscript::config::{CommandConfig, FsConfig, NetConfig, SandboxConfig, VERSION};
use permitscript::context::Context;
use permitscript::eval::Evaluator;
use permitscript::globals::GlobalScope;
use permitscript::highlighter::ReplHelper;
use permitscript::host_fns;
use permitscript::sandbox::Sandbox;
use permitscript::value::Value;

/// An embeddable scripting runtime for permissioned automation.
#[derive(Parser, Debug)]
#[command(name = "permitscript")]
#[command(version = VERSION)]
#[command(about = "Run or explore permissioned automation scripts")]
struct CliArgs {
    /// Script file to execute (omit to start a REPL).
    #[arg(value_name = "FILE")]
    script: Option<PathBuf>,

    /// Filesystem root the sandbox may resolve paths under (repeatable).
    #[arg(long = "fs-root", value_name = "PATH", action = clap::ArgAction::Append)]
    fs_roots: Vec<PathBuf>,

    /// Maximum file size in bytes a single `fs.read`/`fs.write` may touch.
    #[arg(long = "max-file-size", value_name = "BYTES", default_value = "10485760")]
    max_file_size: u64,

    /// Allow scripts to be granted HTTP permissions at all.
    #[arg(long = "allow-network")]
    allow_network: bool,

    /// Allow scripts to be granted subprocess permissions at all.
    #[arg(long = "allow-commands")]
    allow_commands: bool,

    /// Print the registered host functions as Markdown and exit.
    #[arg(long = "describe-host-fns")]
    describe_host_fns: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    permitscript::init_tracing();

    let args = CliArgs::parse();

    let sandbox_config = SandboxConfig {
        fs: build_fs_config(&args),
        net: NetConfig { enabled: args.allow_network, ..NetConfig::default() },
        command: CommandConfig { enabled: args.allow_commands },
    };
    let sandbox = Arc::new(Sandbox::new(sandbox_config)?);
    let registry = Arc::new(host_fns::default_registry(sandbox));

    if args.describe_host_fns {
        termimad::print_text(&registry.render_markdown());
        return Ok(());
    }

    let evaluator = Evaluator::new(registry);

    if let Some(path) = args.script {
        run_script(&path, &evaluator)?;
        return Ok(());
    }

    run_repl(&evaluator)
}

fn build_fs_config(args: &CliArgs) -> FsConfig {
    let roots = if args.fs_roots.is_empty() { FsConfig::default().roots } else { args.fs_roots.clone() };
    FsConfig { roots, max_file_size: args.max_file_size }
}

/// Parses, checks, and evaluates one script file under an empty root
/// context — the script's own `require` block is the only source of
/// permissions, since a file passed on the command line is trusted to
/// declare honestly, not trusted to act without declaring at all.
fn run_script(path: &PathBuf, evaluator: &Arc<Evaluator>) -> Result<(), Box<dyn std::error::Error>> {
    let source = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read script file {}: {}", path.display(), e))?;
    let module = permitscript::parse_and_check(&source)?;
    let ctx = Context::new(vec![], vec![], vec![]);
    let globals = GlobalScope::new();
    match evaluator.eval_module(&module, ctx, globals) {
        Ok(_) => Ok(()),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}

/// Interactive REPL: each line is parsed, checked, and evaluated as its
/// own module sharing one root context and one `GlobalScope`, so a
/// `require` or `const` declared on one line is still in force on the
/// next.
fn run_repl(evaluator: &Arc<Evaluator>) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = Context::new(vec![], vec![], vec![]);
    let globals = GlobalScope::new();

    let config = Config::builder().auto_add_history(true).build();
    let mut rl = Editor::with_config(config).map_err(|e| format!("failed to initialize REPL: {e}"))?;
    rl.set_helper(Some(ReplHelper::new()));

    let history_file = ".permitscript_history";
    let _ = rl.load_history(history_file);

    println!("permitscript {VERSION}");
    println!("declare capabilities with `require`, then script; Ctrl-D to exit");

    loop {
        match rl.readline("permitscript> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if trimmed == "exit" || trimmed == "quit" {
                    break;
                }
                match permitscript::parse_and_check(&line) {
                    Ok(module) => match evaluator.eval_module(&module, ctx.clone(), globals.clone()) {
                        Ok(Value::Nil) => {}
                        Ok(v) => println!("=> {v}"),
                        Err(e) => eprintln!("error: {e}"),
                    },
                    Err(e) => eprintln!("error: {e}"),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("\ngoodbye");
                break;
            }
            Err(err) => {
                eprintln!("error: {err}");
                break;
            }
        }
    }

    let _ = rl.save_history(history_file);
    Ok(())
}
