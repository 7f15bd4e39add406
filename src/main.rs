use std::path::PathBuf;
use std::process::ExitCode;
use clap::Parser;
use pyracket::{parse_module, Builder, Report, Source};

/// Transpile a typed Python subset to Racket.
#[derive(Parser)]
#[command(name = "pyracket", version)]
struct Args {
    /// path to the file that should be transpiled
    #[arg(short, long)]
    input: PathBuf,

    /// path to the file the transpiled code should be saved in
    #[arg(short, long)]
    output: PathBuf,

    /// don't wrap the user code in a main function, to allow easier exports
    #[arg(long)]
    exportable: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let source = match Source::from_file(&args.input) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Error accessing the input file: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let stmts = match parse_module(&source) {
        Ok(stmts) => stmts,
        Err(err) => {
            eprint!("{}", err.render(&source));
            return ExitCode::FAILURE;
        }
    };

    let mut builder = Builder::new();
    let result = builder.compile(&stmts, !args.exportable);
    for warning in builder.warnings() {
        eprint!("{}", warning.render(&source));
    }
    let code = match result {
        Ok(code) => code,
        Err(err) => {
            eprint!("{}", err.render(&source));
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = std::fs::write(&args.output, code) {
        eprintln!("Error accessing the output file: {}", err);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
