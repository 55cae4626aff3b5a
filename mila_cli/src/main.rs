use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::Context;
use clap::{Parser, Subcommand};
use codesnake::{Block, CodeWidth, Label, LineIndex};
use mila::{
    parser::ParseError,
    pipeline::{self, Error},
    PrintedValue, Span, StderrHost,
};
use rustyline::error::ReadlineError;
use yansi::Paint;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Log pipeline milestones unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile source into assembly text
    Compile {
        source: PathBuf,
        /// Defaults to the source path with an `.mla` extension
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Print the syntax tree
        #[arg(long)]
        ast: bool,
        /// Print the assembly instead of writing it
        #[arg(long)]
        stdout: bool,
    },
    /// Assemble assembly text into bytecode
    Assemble {
        assembly: PathBuf,
        /// Defaults to the assembly path with an `.mlb` extension
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Execute a bytecode file
    Run { bytecode: PathBuf },
    /// List the instructions of a bytecode file
    Disasm { bytecode: PathBuf },
    /// Compile, assemble and run a source file in memory
    Exec {
        source: PathBuf,
        /// Evaluate the syntax tree directly instead
        #[arg(long)]
        treewalk: bool,
    },
    /// Read programs line by line
    Repl,
}

fn read_text(path: &Path) -> anyhow::Result<String> {
    fs::read_to_string(path).with_context(|| format!("could not read {}", path.display()))
}

fn write_output(path: &Path, contents: impl AsRef<[u8]>) -> anyhow::Result<()> {
    fs::write(path, contents).with_context(|| format!("could not write {}", path.display()))?;
    log::info!("wrote {}", path.display());
    Ok(())
}

fn snippet(name: &str, text: &str, span: Span, message: &str) -> Option<String> {
    // an empty span (end of input) has nothing to underline
    if span.is_empty() || span.end > text.len() {
        return None;
    }
    let idx = LineIndex::new(text);
    let label = Label::new(span)
        .with_text(message.red().to_string())
        .with_style(|s| s.red().to_string());
    let block = Block::new(&idx, [label])?.map_code(|c| CodeWidth::new(c, c.len()));
    Some(format!("{}[{name}]\n{block}{}", block.prologue(), block.epilogue()))
}

/// Prints a stage error against the text it was raised in.
fn report(name: &str, text: &str, err: &Error) {
    let rendered = err.render(text);
    let mut lines = rendered.lines();
    if let Some(header) = lines.next() {
        eprintln!("{}", header.red().bold());
    }
    match err.span().and_then(|span| snippet(name, text, span, &err.to_string())) {
        Some(block) => eprint!("{block}"),
        None => lines.for_each(|line| eprintln!("{line}")),
    }
}

fn compile(source: &Path, output: Option<PathBuf>, ast: bool, stdout: bool) -> anyhow::Result<ExitCode> {
    let text = read_text(source)?;
    let name = source.display().to_string();

    if ast {
        match pipeline::parse(&text) {
            Ok(program) => print!("{}", program.dump()),
            Err(err) => {
                report(&name, &text, &err);
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    let assembly = match pipeline::compile(&text) {
        Ok(assembly) => assembly,
        Err(err) => {
            report(&name, &text, &err);
            return Ok(ExitCode::FAILURE);
        }
    };

    if stdout {
        print!("{assembly}");
    } else {
        let output = output.unwrap_or_else(|| source.with_extension("mla"));
        write_output(&output, assembly)?;
    }
    Ok(ExitCode::SUCCESS)
}

fn assemble(assembly: &Path, output: Option<PathBuf>) -> anyhow::Result<ExitCode> {
    let text = read_text(assembly)?;
    match pipeline::assemble(&text) {
        Ok(assembled) => {
            let output = output.unwrap_or_else(|| assembly.with_extension("mlb"));
            write_output(&output, &assembled.bytecode)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            report(&assembly.display().to_string(), &text, &err);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn read_bytecode(path: &Path) -> anyhow::Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("could not read {}", path.display()))
}

fn run(bytecode: &Path) -> anyhow::Result<ExitCode> {
    let bytes = read_bytecode(bytecode)?;
    match pipeline::run(&bytes, StderrHost) {
        Ok(_) => Ok(ExitCode::SUCCESS),
        Err(err) => {
            report(&bytecode.display().to_string(), "", &err);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn disasm(bytecode: &Path) -> anyhow::Result<ExitCode> {
    let bytes = read_bytecode(bytecode)?;
    let listing = mila::disassemble(&bytes, None)
        .with_context(|| format!("could not decode {}", bytecode.display()))?;
    print!("{listing}");
    Ok(ExitCode::SUCCESS)
}

fn exec(source: &Path, treewalk: bool) -> anyhow::Result<ExitCode> {
    let text = read_text(source)?;
    let name = source.display().to_string();

    if treewalk {
        return match pipeline::interpret(&text, StderrHost) {
            Ok(_) => Ok(ExitCode::SUCCESS),
            Err(err) => {
                report(&name, &text, &err);
                Ok(ExitCode::FAILURE)
            }
        };
    }

    let (artifacts, result) = pipeline::execute(&text, StderrHost);
    match result {
        Ok(_) => Ok(ExitCode::SUCCESS),
        Err(err @ Error::Assemble(_)) => {
            report(&format!("{name} (assembly)"), &artifacts.assembly, &err);
            Ok(ExitCode::FAILURE)
        }
        Err(err) => {
            report(&name, &text, &err);
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Accepted lines form one growing program. Each new line reruns the
/// whole program and only the values printed past the previous run are
/// shown, so definitions and bindings carry over between lines.
fn repl() -> anyhow::Result<ExitCode> {
    let mut readline = rustyline::DefaultEditor::new()?;
    let mut session = String::new();
    let mut shown = 0;
    let mut pending = String::new();

    loop {
        let prompt = if pending.is_empty() { ">> " } else { ".. " };
        let input = match readline.readline(prompt) {
            Ok(input) => input,
            Err(ReadlineError::Interrupted) => {
                pending.clear();
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        };
        if pending.is_empty() && input.trim().is_empty() {
            continue;
        }
        let _ = readline.add_history_entry(input.as_str());
        pending.push_str(&input);
        pending.push('\n');

        let candidate = format!("{session}{pending}");
        let mut printed: Vec<f64> = vec![];
        let (artifacts, result) = pipeline::execute(&candidate, &mut printed);
        let result = result.map(drop);

        if let Err(Error::Parse(ParseError::UnexpectedEnd { .. })) = result {
            // keep reading until the statement is complete
            continue;
        }

        for value in printed.iter().skip(shown) {
            println!("{}", PrintedValue(*value).green());
        }
        match result {
            Ok(_) => {
                shown = printed.len();
                session = candidate;
            }
            Err(err @ Error::Assemble(_)) => report("<repl> (assembly)", &artifacts.assembly, &err),
            Err(err) => report("<repl>", &candidate, &err),
        }
        pending.clear();
    }

    Ok(ExitCode::SUCCESS)
}

fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    match args.command {
        Command::Compile {
            source,
            output,
            ast,
            stdout,
        } => compile(&source, output, ast, stdout),
        Command::Assemble { assembly, output } => assemble(&assembly, output),
        Command::Run { bytecode } => run(&bytecode),
        Command::Disasm { bytecode } => disasm(&bytecode),
        Command::Exec { source, treewalk } => exec(&source, treewalk),
        Command::Repl => repl(),
    }
}
