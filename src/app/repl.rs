//! Interactive REPL (Read-Eval-Print Loop) for queuetx.

use std::io::{self, BufRead, Write};

use super::api::{AppResult, QueueApp};
use crate::demarcation::Outcome;

/// REPL configuration.
#[derive(Debug, Clone)]
pub struct ReplConfig {
    /// Prompt string.
    pub prompt: String,
    /// Show timing information.
    pub timing: bool,
    /// Default number of commits `history` shows.
    pub history_limit: usize,
}

impl Default for ReplConfig {
    fn default() -> Self {
        Self {
            prompt: "queuetx> ".into(),
            timing: false,
            history_limit: 10,
        }
    }
}

/// A parsed REPL command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Explicit(String),
    Template(String),
    Declarative(String),
    Batch(Vec<String>),
    Read(Option<String>),
    Queues,
    History(Option<usize>),
    Stats,
    Timing,
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Command, String> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        let word = word.trim_start_matches(&['.', '\\'][..]).to_lowercase();

        let text = |name: &str| {
            if rest.is_empty() {
                Err(format!("Usage: {} <text>", name))
            } else {
                Ok(rest.to_string())
            }
        };

        match word.as_str() {
            "explicit" | "x" => text("explicit").map(Command::Explicit),
            "template" | "t" => text("template").map(Command::Template),
            "declarative" | "d" => text("declarative").map(Command::Declarative),
            "batch" | "b" => {
                let items: Vec<String> = rest
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect();
                if items.is_empty() {
                    Err("Usage: batch <item>,<item>,...".to_string())
                } else {
                    Ok(Command::Batch(items))
                }
            }
            "read" | "r" => Ok(Command::Read((!rest.is_empty()).then(|| rest.to_string()))),
            "queues" => Ok(Command::Queues),
            "history" => {
                if rest.is_empty() {
                    Ok(Command::History(None))
                } else {
                    rest.parse()
                        .map(|n| Command::History(Some(n)))
                        .map_err(|_| format!("Invalid history count: {}", rest))
                }
            }
            "stats" => Ok(Command::Stats),
            "timing" => Ok(Command::Timing),
            "help" | "h" | "?" => Ok(Command::Help),
            "quit" | "exit" | "q" => Ok(Command::Quit),
            "" => Err("Empty command".to_string()),
            other => Err(format!(
                "Unknown command: {}\nType .help for available commands",
                other
            )),
        }
    }
}

/// The interactive REPL.
pub struct Repl {
    app: QueueApp,
    config: ReplConfig,
}

impl Repl {
    /// Create a new REPL over the given application.
    pub fn new(app: QueueApp) -> Self {
        Self::with_config(app, ReplConfig::default())
    }

    /// Create a REPL with custom configuration.
    pub fn with_config(app: QueueApp, config: ReplConfig) -> Self {
        Self { app, config }
    }

    pub fn app(&self) -> &QueueApp {
        &self.app
    }

    /// Run the REPL interactively.
    pub fn run(&mut self) -> AppResult<()> {
        self.print_banner();

        let stdin = io::stdin();
        let mut stdout = io::stdout();

        loop {
            print!("{}", self.config.prompt);
            stdout.flush()?;

            let mut line = String::new();
            if stdin.lock().read_line(&mut line)? == 0 {
                // EOF.
                println!("\nGoodbye!");
                break;
            }
            if line.trim().is_empty() {
                continue;
            }

            let start = std::time::Instant::now();
            match self.evaluate(&line) {
                Ok(Some(output)) => println!("{}", output),
                Ok(None) => break,
                Err(e) => eprintln!("Error: {}", e),
            }
            if self.config.timing {
                println!("Time: {:.3}ms", start.elapsed().as_secs_f64() * 1000.0);
            }
        }

        Ok(())
    }

    /// Evaluate one line. Returns `None` when the REPL should exit.
    pub fn evaluate(&mut self, line: &str) -> AppResult<Option<String>> {
        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(message) => return Ok(Some(message)),
        };

        let output = match command {
            Command::Explicit(text) => describe(&self.app.explicit(&text)?),
            Command::Template(text) => describe(&self.app.template(&text)?),
            Command::Declarative(text) => describe(&self.app.declarative(&text)?),
            Command::Batch(items) => match self.app.batch(&items)? {
                Outcome::RolledBack(reason) => format!("ROLLED BACK: {}", reason),
                outcome => {
                    let count = outcome.value().copied().unwrap_or(0);
                    format!("COMMITTED: {} item(s)", count)
                }
            },
            Command::Read(queue) => {
                let items = self.app.read(queue.as_deref())?;
                if items.is_empty() {
                    "(empty)".to_string()
                } else {
                    items
                        .iter()
                        .enumerate()
                        .map(|(i, item)| format!("{:>4}  {}", i + 1, item))
                        .collect::<Vec<_>>()
                        .join("\n")
                }
            }
            Command::Queues => {
                let queues = self.app.queues()?;
                if queues.is_empty() {
                    "No queues found.".to_string()
                } else {
                    let mut out = String::from("Queues:");
                    for queue in queues {
                        out.push_str(&format!("\n  {}", queue));
                    }
                    out
                }
            }
            Command::History(limit) => {
                let limit = limit.unwrap_or(self.config.history_limit);
                self.app
                    .history(Some(limit))?
                    .iter()
                    .map(|c| format!("{}  {}  {}", c.id.short(), c.timestamp.format("%Y-%m-%d %H:%M:%S"), c.summary()))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            Command::Stats => self.app.stats()?.to_string(),
            Command::Timing => {
                self.config.timing = !self.config.timing;
                format!("Timing: {}", if self.config.timing { "on" } else { "off" })
            }
            Command::Help => help_text(),
            Command::Quit => return Ok(None),
        };
        Ok(Some(output))
    }

    fn print_banner(&self) {
        println!("╔═══════════════════════════════════════════════════╗");
        println!("║                   queuetx v0.1.0                  ║");
        println!("║        Transactional writes to durable queues     ║");
        println!("╠═══════════════════════════════════════════════════╣");
        println!("║           Type .help for available commands       ║");
        println!("╚═══════════════════════════════════════════════════╝");
        println!("queue: {}", self.app.queue());
        println!();
    }
}

fn describe(outcome: &Outcome<String>) -> String {
    match outcome {
        Outcome::Committed(text) => format!("COMMITTED: wrote '{}'", text),
        Outcome::Participated(text) => format!("JOINED: wrote '{}'", text),
        Outcome::RolledBack(reason) => format!("ROLLED BACK: {}", reason),
    }
}

fn help_text() -> String {
    [
        "Commands:",
        "  explicit <text>         Write with explicit begin/commit",
        "  template <text>         Write inside a transaction template",
        "  declarative <text>      Write inside a declarative boundary",
        "  batch <a,b,c>           Write all items in one transaction",
        "  read [queue]            Show committed items",
        "  queues                  List queues",
        "  history [n]             Show recent commits",
        "  stats                   Show statistics",
        "  .timing                 Toggle timing display",
        "  .help, .h, .?           Show this help message",
        "  .quit, .exit, .q        Exit the REPL",
        "",
        "Payloads containing the rollback keyword are rolled back;",
        "batch items containing the error marker abort the batch.",
    ]
    .join("\n")
}
