//! opsprobe: ask operational questions, let a model gather evidence.
//!
//! The model proposes read-only shell commands; opsprobe validates them
//! against an allow-list, asks for approval, runs each one once, and feeds
//! the output back until the model can answer.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use opsprobe::app::{App, LiveSession, describe_event};
use opsprobe::core::validator::validate;
use opsprobe::exit_codes;
use opsprobe::io::config::{Config, default_config_path, ensure_config, load_config};
use opsprobe::logging;
use opsprobe::session::SessionEvent;

#[derive(Parser)]
#[command(
    name = "opsprobe",
    version,
    about = "LLM-driven diagnostics with read-only, allow-listed shell commands"
)]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/opsprobe/config.toml).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log debug diagnostics to stderr (overridden by RUST_LOG).
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one diagnostic session and print the answer.
    Ask {
        /// The question, e.g. `why is the api deployment not ready`.
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
        /// Run validated commands without asking.
        #[arg(short, long)]
        yes: bool,
        /// Print token usage and cost when done.
        #[arg(long)]
        usage: bool,
    },
    /// Ask follow-up questions in one conversation (`/reset`, `/quit`).
    Chat {
        /// Run validated commands without asking.
        #[arg(short, long)]
        yes: bool,
        /// Print token usage and cost on exit.
        #[arg(long)]
        usage: bool,
    },
    /// Check a command against the configured allow-list without running it.
    Check {
        /// The command line, quoted as one argument.
        command: String,
    },
    /// Manage the config file.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write the default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Print the config file location.
    Path,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.debug);
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let config_path = match cli.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    match cli.command {
        Command::Ask { query, yes, usage } => cmd_ask(&config_path, &query.join(" "), yes, usage),
        Command::Chat { yes, usage } => cmd_chat(&config_path, yes, usage),
        Command::Check { command } => cmd_check(&config_path, &command),
        Command::Config { action } => cmd_config(&config_path, action),
    }
}

/// Load the config, creating the default file on first use.
fn load_or_create(path: &Path) -> Result<Config> {
    if ensure_config(path, false)? {
        eprintln!("Created default config file at {}", path.display());
    }
    load_config(path)
}

fn cmd_ask(config_path: &Path, query: &str, yes: bool, usage: bool) -> Result<i32> {
    let mut app = App::new(load_or_create(config_path)?, yes)?;
    let mut session = app.session()?;
    let outcome = app.ask(&mut session, query, print_event)?;
    println!("{}", outcome.message());
    if usage {
        print_usage(&app, &session);
    }
    Ok(if outcome.is_complete() {
        exit_codes::OK
    } else {
        exit_codes::INCOMPLETE
    })
}

fn cmd_chat(config_path: &Path, yes: bool, usage: bool) -> Result<i32> {
    let mut app = App::new(load_or_create(config_path)?, yes)?;
    let mut session = app.session()?;
    eprintln!("Ask a question. `/reset` starts over, `/quit` exits.");

    loop {
        eprint!("> ");
        io::stderr().flush().context("flush prompt")?;
        let mut line = String::new();
        if io::stdin().read_line(&mut line).context("read question")? == 0 {
            break;
        }
        match line.trim() {
            "" => continue,
            "/quit" => break,
            "/reset" => {
                session = app.session()?;
                eprintln!("Conversation reset.");
            }
            query => match app.ask(&mut session, query, print_event) {
                Ok(outcome) => println!("{}", outcome.message()),
                Err(err) => eprintln!("{:#}", err),
            },
        }
    }

    if usage {
        print_usage(&app, &session);
    }
    Ok(exit_codes::OK)
}

fn cmd_check(config_path: &Path, command: &str) -> Result<i32> {
    let policy = load_config(config_path)?.policy();
    match validate(command, &policy) {
        Ok(stages) => {
            println!("accepted ({} stage(s))", stages.len());
            Ok(exit_codes::OK)
        }
        Err(kind) => {
            println!("rejected: {kind}");
            Ok(exit_codes::REJECTED)
        }
    }
}

fn cmd_config(config_path: &Path, action: ConfigAction) -> Result<i32> {
    match action {
        ConfigAction::Init { force } => {
            if ensure_config(config_path, force)? {
                println!("wrote {}", config_path.display());
            } else {
                println!("{} already exists (use --force to overwrite)", config_path.display());
            }
        }
        ConfigAction::Path => println!("{}", config_path.display()),
    }
    Ok(exit_codes::OK)
}

fn print_event(event: &SessionEvent<'_>) {
    if let Some(line) = describe_event(event) {
        eprintln!("{line}");
    }
}

fn print_usage(app: &App, session: &LiveSession) {
    for line in app.usage_lines(session) {
        eprintln!("{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ask_joins_words() {
        let cli = Cli::parse_from(["opsprobe", "ask", "why", "is", "it", "down", "--yes"]);
        match cli.command {
            Command::Ask { query, yes, usage } => {
                assert_eq!(query.join(" "), "why is it down");
                assert!(yes);
                assert!(!usage);
            }
            _ => panic!("expected ask"),
        }
    }

    #[test]
    fn parse_ask_requires_query() {
        assert!(Cli::try_parse_from(["opsprobe", "ask"]).is_err());
    }

    #[test]
    fn parse_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["opsprobe", "check", "kubectl get pods", "--config", "x.toml", "--debug"]);
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
        assert!(cli.debug);
        assert!(matches!(cli.command, Command::Check { ref command } if command == "kubectl get pods"));
    }

    #[test]
    fn parse_config_init_force() {
        let cli = Cli::parse_from(["opsprobe", "config", "init", "--force"]);
        assert!(matches!(
            cli.command,
            Command::Config {
                action: ConfigAction::Init { force: true }
            }
        ));
    }

    #[test]
    fn check_reports_rejection_code() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        assert_eq!(
            cmd_check(&path, "kubectl get pods -A | grep Pending").expect("check"),
            exit_codes::OK
        );
        assert_eq!(
            cmd_check(&path, "kubectl delete pod web-0").expect("check"),
            exit_codes::REJECTED
        );
        assert!(!path.exists());
    }

    #[test]
    fn config_init_writes_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("opsprobe").join("config.toml");
        cmd_config(&path, ConfigAction::Init { force: false }).expect("init");
        let written = std::fs::read_to_string(&path).expect("read");
        assert!(written.contains("max_iterations = 7"));
        assert!(written.contains("[agent]"));
    }
}
