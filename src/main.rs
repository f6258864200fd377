//! queuetx command-line entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use tracing::Level;

use queuetx::app::{AppConfig, QueueApp, Repl};

const USAGE: &str = "\
queuetx - transactional writes to durable queues

Usage: queuetx [OPTIONS] [PATH]

Options:
  -d, --database PATH    Queue store directory (default: .queuetx)
  -q, --queue NAME       Queue to write to (default: EXAMPLE)
  -e, --execute CMD      Run one REPL command and exit
  -v, --verbose          Debug logging on stderr
  -h, --help             Show this help
      --version          Show version

Examples:
  queuetx                                   Start the REPL
  queuetx -e 'explicit hello'               Commit one item and exit
  queuetx -e 'batch goodbye,error,fred'     Watch a batch roll back";

#[derive(Debug, Default)]
struct Cli {
    path: Option<PathBuf>,
    queue: Option<String>,
    execute: Option<String>,
    verbose: bool,
}

enum Parsed {
    Run(Cli),
    Exit(&'static str),
}

impl Cli {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Parsed, String> {
        let mut cli = Cli::default();
        while let Some(arg) = args.next() {
            let mut value = |flag: &str| args.next().ok_or_else(|| format!("{} needs a value", flag));
            match arg.as_str() {
                "-d" | "--database" => cli.path = Some(value(&arg)?.into()),
                "-q" | "--queue" => cli.queue = Some(value(&arg)?),
                "-e" | "--execute" => cli.execute = Some(value(&arg)?),
                "-v" | "--verbose" => cli.verbose = true,
                "-h" | "--help" => return Ok(Parsed::Exit(USAGE)),
                "--version" => return Ok(Parsed::Exit(concat!("queuetx v", env!("CARGO_PKG_VERSION")))),
                s if s.starts_with('-') => return Err(format!("unknown option: {}", s)),
                _ => cli.path = Some(PathBuf::from(&arg)),
            }
        }
        Ok(Parsed::Run(cli))
    }

    fn config(&self) -> AppConfig {
        let path = self.path.clone().unwrap_or_else(|| PathBuf::from(".queuetx"));
        let config = AppConfig::new(path).create_if_missing(true).verbose(self.verbose);
        match &self.queue {
            Some(queue) => config.queue(queue.clone()),
            None => config,
        }
    }
}

fn main() -> ExitCode {
    let cli = match Cli::parse(std::env::args().skip(1)) {
        Ok(Parsed::Run(cli)) => cli,
        Ok(Parsed::Exit(text)) => {
            println!("{}", text);
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("{}\n\n{}", e, USAGE);
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::WARN })
        .with_writer(std::io::stderr)
        .init();

    let app = match QueueApp::open_with_config(cli.config()) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("cannot open queue store: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut repl = Repl::new(app);
    let result = match &cli.execute {
        Some(line) => repl.evaluate(line).map(|out| out.into_iter().for_each(|o| println!("{}", o))),
        None => repl.run(),
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
