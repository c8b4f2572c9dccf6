//! Interactive session over stdin.
//!
//! Every line is either a `:`-prefixed directive or code for the current mode.

use std::path::Path;

use tandem_core::{EngineKind, SandboxConfig, Session};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::colors;
use crate::run::{load_dataset, print_output, print_schema};

const HELP: &str = "\
:mode script|sql   switch engine
:schema            show columns and types
:load <path>       replace the dataset
:history           list finished runs
:status            show engine state
:quit              leave
Anything else runs in the current mode.";

#[derive(Debug, PartialEq)]
enum Directive<'a> {
    Mode(EngineKind),
    Schema,
    Load(&'a str),
    History,
    Status,
    Help,
    Quit,
    Run(&'a str),
}

fn parse(line: &str) -> Result<Directive<'_>, String> {
    let Some(directive) = line.strip_prefix(':') else {
        return Ok(Directive::Run(line));
    };
    let (name, arg) = match directive.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (directive, ""),
    };

    match name {
        "mode" | "m" => arg.parse().map(Directive::Mode),
        "schema" | "s" => Ok(Directive::Schema),
        "load" | "l" if !arg.is_empty() => Ok(Directive::Load(arg)),
        "load" | "l" => Err("usage: :load <path>".to_string()),
        "history" | "h" => Ok(Directive::History),
        "status" => Ok(Directive::Status),
        "help" | "?" => Ok(Directive::Help),
        "quit" | "q" | "exit" => Ok(Directive::Quit),
        other => Err(format!("unknown command ':{other}' (try :help)")),
    }
}

pub async fn execute(data: &Path, config: SandboxConfig) -> anyhow::Result<()> {
    let mut session = Session::new(load_dataset(data)?, config);
    println!(
        "{}tandem{} {} rows loaded. Type :help for commands.",
        colors::BOLD,
        colors::RESET,
        session.dataset().len()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{}{}>{} ", colors::CYAN, session.mode(), colors::RESET);
        colors::flush_stdout();

        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse(line) {
            Ok(Directive::Quit) => break,
            Ok(directive) => handle(&mut session, directive).await,
            Err(msg) => eprintln!("{}{msg}{}", colors::YELLOW, colors::RESET),
        }
    }

    tracing::debug!(session = %session.id(), runs = session.history().len(), "Session ended");
    Ok(())
}

async fn handle(session: &mut Session, directive: Directive<'_>) {
    match directive {
        Directive::Mode(kind) => {
            session.select_mode(kind);
            println!("mode: {kind}");
        }
        Directive::Schema => print_schema(&session.dataset()),
        Directive::Load(path) => match load_dataset(Path::new(path)) {
            Ok(dataset) => {
                let rows = dataset.len();
                session.load_dataset(dataset);
                println!("{}loaded {rows} rows{}", colors::GREEN, colors::RESET);
            }
            Err(e) => eprintln!("{}{e:#}{}", colors::RED, colors::RESET),
        },
        Directive::History => {
            for (i, record) in session.history().enumerate() {
                let (mark, color) = match record.result {
                    Ok(_) => ("ok ", colors::GREEN),
                    Err(_) => ("err", colors::RED),
                };
                println!(
                    "{:>3}. {color}{mark}{} [{}] {:>8.1?}  {}",
                    i + 1,
                    colors::RESET,
                    record.kind,
                    record.elapsed,
                    record.code.lines().next().unwrap_or_default()
                );
            }
        }
        Directive::Status => {
            let sandbox = session.sandbox();
            println!("state: {}", sandbox.state());
            for kind in sandbox.kinds() {
                if let Some(status) = sandbox.status(kind) {
                    let bound = status
                        .bound_version
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!("  {kind}: {} (dataset {bound})", status.state);
                    if let Some(err) = status.last_error {
                        println!("    {}{err}{}", colors::RED, colors::RESET);
                    }
                }
            }
        }
        Directive::Help => println!("{HELP}"),
        Directive::Quit => {}
        Directive::Run(code) => {
            let kind = session.mode();
            session.set_code(kind, code);
            match session.run().await {
                Ok(output) => print_output(&output),
                Err(e) => eprintln!("{}error:{} {e}", colors::RED, colors::RESET),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_directives() {
        assert_eq!(parse(":mode sql"), Ok(Directive::Mode(EngineKind::Relational)));
        assert_eq!(parse(":m script"), Ok(Directive::Mode(EngineKind::Scripting)));
        assert_eq!(parse(":load data/x.json"), Ok(Directive::Load("data/x.json")));
        assert_eq!(parse(":q"), Ok(Directive::Quit));
        assert_eq!(parse("SELECT 1"), Ok(Directive::Run("SELECT 1")));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse(":mode python").is_err());
        assert!(parse(":load").is_err());
        assert!(parse(":bogus").unwrap_err().contains(":bogus"));
    }
}
