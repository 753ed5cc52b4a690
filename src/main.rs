use clap::Parser;
use std::path::{Path, PathBuf};

use symtensor::arena::ExprArena;
use symtensor::cli::{check_placements_declared, pretty_expr, GraphDocument};
use symtensor::pass::{required_passes, PassId};

const EXIT_OK: i32 = 0;
const EXIT_COMPILE_ERROR: i32 = 1;
const EXIT_USAGE_ERROR: i32 = 2;
const EXIT_SYSTEM_ERROR: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum DiagnosticFormat {
    Human,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum EmitStage {
    CheckedExpr,
    Unified,
    Plan,
    Schedule,
    Calls,
    RecipeJson,
    KernelSource,
    HostSource,
    Manifest,
}

#[derive(Parser, Debug)]
#[command(
    name = "symtc",
    version,
    about = "symtensor compiler driver — lowers a JSON graph document into a scheduled device recipe"
)]
struct Cli {
    /// Input graph document (JSON, spec §6.1). Omit to read from stdin.
    source: Option<PathBuf>,

    /// Output file path (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::RecipeJson)]
    emit: EmitStage,

    /// Print compiler phases and timing to stderr
    #[arg(long)]
    verbose: bool,

    /// Diagnostic output format
    #[arg(long, value_enum, default_value_t = DiagnosticFormat::Human)]
    diagnostic_format: DiagnosticFormat,

    /// Include one-shot host->device warmup uploads in the recipe's init calls
    #[arg(long)]
    warmup: bool,
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "symtensor=debug".into()))
            .with_target(false)
            .without_time()
            .init();
        match &cli.source {
            Some(src) => eprintln!("symtc: source = {}", src.display()),
            None => eprintln!("symtc: source = <stdin>"),
        }
        eprintln!("symtc: emit   = {:?}", cli.emit);
    }

    let text = match read_input(&cli.source) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(EXIT_SYSTEM_ERROR);
        }
    };

    let document: GraphDocument = match serde_json::from_str(&text) {
        Ok(doc) => doc,
        Err(e) => {
            eprintln!("error: malformed graph document: {e}");
            std::process::exit(EXIT_USAGE_ERROR);
        }
    };

    let mut arena = ExprArena::new();
    let root = match document.build(&mut arena) {
        Ok(root) => root,
        Err(e) => {
            print_compile_error(&e, cli.diagnostic_format);
            std::process::exit(EXIT_COMPILE_ERROR);
        }
    };

    if let Err(e) = check_placements_declared(&root, &document.env) {
        print_compile_error(&e, cli.diagnostic_format);
        std::process::exit(EXIT_COMPILE_ERROR);
    }

    if matches!(cli.emit, EmitStage::Manifest) {
        let sym_env = document.sym_env();
        let provenance = symtensor::pipeline::compute_provenance(&[root], &sym_env);
        emit_output(&cli.output, &provenance.to_json());
        std::process::exit(EXIT_OK);
    }

    if matches!(cli.emit, EmitStage::CheckedExpr) {
        emit_output(&cli.output, &pretty_expr(&root));
        std::process::exit(EXIT_OK);
    }

    let terminal = match cli.emit {
        EmitStage::CheckedExpr | EmitStage::Manifest => unreachable!(),
        EmitStage::Unified => PassId::Lower,
        EmitStage::Plan => PassId::Plan,
        EmitStage::Schedule => PassId::Schedule,
        EmitStage::Calls => PassId::Sequence,
        EmitStage::RecipeJson | EmitStage::KernelSource | EmitStage::HostSource => PassId::Assemble,
    };

    if cli.verbose {
        eprintln!("symtc: passes = {:?}", required_passes(terminal));
    }

    let sym_env = document.sym_env();
    let session =
        match symtensor::pipeline::compile(&[root], &document.env, &sym_env, terminal, cli.warmup) {
            Ok(session) => session,
            Err(e) => {
                print_compile_error(&e, cli.diagnostic_format);
                std::process::exit(EXIT_COMPILE_ERROR);
            }
        };

    let rendered = match cli.emit {
        EmitStage::CheckedExpr | EmitStage::Manifest => unreachable!(),
        EmitStage::Unified => format!("{:#?}", session.unified.expect("Lower produced UnifiedExpr")),
        EmitStage::Plan => format!(
            "{:#?}",
            session.planner_output.expect("Plan produced PlannerOutput")
        ),
        EmitStage::Schedule => format!(
            "{:#?}",
            session.schedule_output.expect("Schedule produced ScheduleOutput")
        ),
        EmitStage::Calls => format!(
            "{:#?}",
            session.sequenced_calls.expect("Sequence produced SequencedCalls")
        ),
        EmitStage::RecipeJson => {
            let recipe = session.recipe.expect("Assemble produced a Recipe");
            serde_json::to_string_pretty(&recipe).expect("Recipe is serde-serializable")
        }
        EmitStage::KernelSource => session.recipe.expect("Assemble produced a Recipe").kernel_code,
        EmitStage::HostSource => session.recipe.expect("Assemble produced a Recipe").host_code,
    };

    emit_output(&cli.output, &rendered);
    std::process::exit(EXIT_OK);
}

fn read_input(source: &Option<PathBuf>) -> std::io::Result<String> {
    match source {
        Some(path) => std::fs::read_to_string(path),
        None => {
            use std::io::Read;
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
    }
}

/// Write content to the specified output path, or stdout if `None`/`-`.
fn emit_output(output: &Option<PathBuf>, content: &str) {
    match output {
        Some(path) if path != Path::new("-") => {
            if let Err(e) = std::fs::write(path, content) {
                eprintln!("error: failed to write {}: {}", path.display(), e);
                std::process::exit(EXIT_SYSTEM_ERROR);
            }
        }
        _ => println!("{content}"),
    }
}

fn print_compile_error(err: &symtensor::error::CompileError, format: DiagnosticFormat) {
    let diag = err.diagnostic();
    if format == DiagnosticFormat::Json {
        eprintln!("{}", diag.to_json());
    } else {
        eprintln!("{diag}");
    }
}
