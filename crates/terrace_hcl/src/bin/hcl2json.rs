//! terrace-hcl2json - HCL to JSON helper for the external parsing engine.
//!
//! Exit codes:
//! - 0: Success (in `--multi` mode even when some files fail)
//! - 1: The input could not be read, parsed or written
//! - 2: Invalid arguments

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use serde_json::{json, Value};

use terrace_hcl::EmbeddedParser;

const EXIT_FAILED: u8 = 1;
const EXIT_USAGE: u8 = 2;

/// Convert terraform sources to the JSON tree terrace reads
#[derive(Parser, Debug)]
#[command(name = "terrace-hcl2json", version)]
struct Args {
    /// Read one source from stdin
    #[arg(long)]
    stdin: bool,

    /// Parse every path and print {"ok": {...}, "errors": {...}}
    #[arg(long)]
    multi: bool,

    /// Files to convert
    paths: Vec<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let result = if args.multi {
        multi(&args)
    } else {
        single(&args)
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err((code, message)) => {
            eprintln!("{}", message);
            ExitCode::from(code)
        }
    }
}

type HelperResult = Result<(), (u8, String)>;

fn multi(args: &Args) -> HelperResult {
    if args.stdin {
        return Err((EXIT_USAGE, "--multi does not support --stdin; pass file paths".to_string()));
    }
    if args.paths.is_empty() {
        return Err((EXIT_USAGE, "--multi requires at least one file path".to_string()));
    }

    let mut ok: BTreeMap<String, Value> = BTreeMap::new();
    let mut errors: BTreeMap<String, String> = BTreeMap::new();
    for path in &args.paths {
        let key = path.to_string_lossy().into_owned();
        let parsed = fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|source| EmbeddedParser::parse_source(&source).map_err(|e| e.to_string()));
        match parsed {
            Ok(tree) => {
                ok.insert(key, tree);
            }
            Err(message) => {
                errors.insert(key, message);
            }
        }
    }

    emit(&json!({"ok": ok, "errors": errors}))
}

fn single(args: &Args) -> HelperResult {
    let source = if args.stdin {
        if !args.paths.is_empty() {
            return Err((EXIT_USAGE, "--stdin takes no file paths".to_string()));
        }
        let mut source = String::new();
        io::stdin()
            .read_to_string(&mut source)
            .map_err(|e| (EXIT_FAILED, e.to_string()))?;
        source
    } else {
        let [path] = args.paths.as_slice() else {
            return Err((EXIT_USAGE, "expected a single HCL file path or --stdin".to_string()));
        };
        fs::read_to_string(path).map_err(|e| (EXIT_FAILED, format!("{}: {}", path.display(), e)))?
    };

    let tree = EmbeddedParser::parse_source(&source).map_err(|e| (EXIT_FAILED, e.to_string()))?;
    emit(&tree)
}

fn emit(value: &Value) -> HelperResult {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, value).map_err(|e| (EXIT_FAILED, e.to_string()))?;
    writeln!(stdout).map_err(|e| (EXIT_FAILED, e.to_string()))
}
