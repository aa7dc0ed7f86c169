use clap::Parser;
use std::io::Write;
use std::path::PathBuf;

use stagec::pass::PassId;
use stagec::pipeline::{self, CompilationState, PipelineOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum EmitStage {
    Ast,
    Stages,
    Order,
    Pairs,
    Ir,
    Elided,
    Json,
}

impl EmitStage {
    /// Last pass needed for this output (`None` for the raw AST).
    fn terminal(self) -> Option<PassId> {
        match self {
            EmitStage::Ast => None,
            EmitStage::Stages | EmitStage::Order => Some(PassId::Resolve),
            EmitStage::Pairs => Some(PassId::FindCopies),
            EmitStage::Ir => Some(PassId::Lower),
            EmitStage::Elided | EmitStage::Json => Some(PassId::Verify),
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "stagec",
    version,
    about = "Stage compiler: lowers .stg pipeline definitions and elides pointwise copy stages"
)]
struct Cli {
    /// Input .stg source file
    #[arg(required_unless_present = "self_test")]
    source: Option<PathBuf>,

    /// Output file path (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Elided)]
    emit: EmitStage,

    /// Treat a stage as externally required (repeatable)
    #[arg(long)]
    keep: Vec<String>,

    /// Detect copies but leave the lowered tree untouched
    #[arg(long)]
    no_elide: bool,

    /// Print compiler phases, timing and the copy-elision trace
    #[arg(long)]
    verbose: bool,

    /// Run the built-in copy detection self-test and exit
    #[arg(long)]
    self_test: bool,
}

fn main() {
    let cli = Cli::parse();

    if cli.self_test {
        match stagec::copy_elision::self_test() {
            Ok(scan) => {
                if cli.verbose {
                    for event in &scan.trace {
                        eprintln!("stagec: [copy-elision] {}", event);
                    }
                }
                println!("stagec: self-test passed ({} copy pairs)", scan.pairs.len());
                return;
            }
            Err(e) => {
                eprintln!("stagec: error: {}", e);
                std::process::exit(1);
            }
        }
    }

    let Some(source_path) = cli.source.as_ref() else {
        eprintln!("stagec: error: no input file");
        std::process::exit(2);
    };

    if cli.verbose {
        eprintln!("stagec: source = {}", source_path.display());
        eprintln!("stagec: emit   = {:?}", cli.emit);
    }

    // ── Read and parse source ──
    let source = match std::fs::read_to_string(source_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("stagec: error: {}: {}", source_path.display(), e);
            std::process::exit(2);
        }
    };

    let parse_result = stagec::parser::parse(&source);
    if !parse_result.errors.is_empty() {
        for err in &parse_result.errors {
            eprintln!("stagec: parse error: {}", err);
        }
        std::process::exit(1);
    }
    let program = match parse_result.program {
        Some(p) => p,
        None => {
            eprintln!("stagec: parse failed with no output");
            std::process::exit(1);
        }
    };

    if cli.verbose {
        eprintln!("stagec: parsed {} statements", program.statements.len());
    }

    let Some(terminal) = cli.emit.terminal() else {
        emit(&cli, &format!("{:#?}\n", program));
        return;
    };

    // ── Run passes ──
    let mut state = CompilationState::new(program);
    state.provenance = Some(pipeline::compute_provenance(&source));
    let options = PipelineOptions {
        keep: cli.keep.clone(),
        elide: !cli.no_elide,
        verbose: cli.verbose,
    };

    let result = pipeline::run_pipeline(&mut state, terminal, &options, |_, diags| {
        for diag in diags {
            eprintln!("stagec: {}", diag);
        }
    });
    if let Err(e) = result {
        if cli.verbose {
            eprintln!("stagec: {}", e);
        }
        std::process::exit(1);
    }

    if let Some(resolved) = &state.artifacts.resolved {
        for name in &cli.keep {
            if !resolved.env.contains_key(name) {
                eprintln!("stagec: warning: --keep `{}` does not name a stage", name);
            }
        }
    }

    // ── Emit ──
    let text = match render(cli.emit, &state) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("stagec: error: {}", e);
            std::process::exit(1);
        }
    };
    emit(&cli, &text);
}

fn render(stage: EmitStage, state: &CompilationState) -> Result<String, String> {
    let a = &state.artifacts;
    let missing = || format!("no {:?} output was produced", stage);
    let text = match stage {
        EmitStage::Ast => format!("{:#?}\n", a.program),
        EmitStage::Stages => {
            let resolved = a.resolved.as_ref().ok_or_else(missing)?;
            let mut out = String::new();
            for name in &resolved.order {
                if let Some(s) = resolved.env.get(name) {
                    out.push_str(&format!("{}\n", s));
                }
            }
            out
        }
        EmitStage::Order => {
            let resolved = a.resolved.as_ref().ok_or_else(missing)?;
            resolved.order.iter().map(|n| format!("{}\n", n)).collect()
        }
        EmitStage::Pairs => {
            let scan = a.scan.as_ref().ok_or_else(missing)?;
            scan.pairs.iter().map(|p| format!("{}\n", p)).collect()
        }
        EmitStage::Ir => a.lowered.as_ref().ok_or_else(missing)?.to_string(),
        EmitStage::Elided => a.elided.as_ref().ok_or_else(missing)?.stmt.to_string(),
        EmitStage::Json => {
            let report = pipeline::build_report(state).ok_or_else(missing)?;
            let mut json = serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?;
            json.push('\n');
            json
        }
    };
    Ok(text)
}

fn emit(cli: &Cli, text: &str) {
    let written = match &cli.output {
        Some(path) => std::fs::write(path, text).map_err(|e| format!("{}: {}", path.display(), e)),
        None => std::io::stdout()
            .write_all(text.as_bytes())
            .map_err(|e| e.to_string()),
    };
    if let Err(e) = written {
        eprintln!("stagec: error: {}", e);
        std::process::exit(2);
    }
}
