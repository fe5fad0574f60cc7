//! Interactive relay shell
//!
//! One-shot commands release the adapter when the process exits, which
//! switches every relay back off. The shell keeps a single bank open across
//! commands instead, so a relay switched on stays on until it is switched
//! off or the shell ends (`quit`, Ctrl-D or Ctrl-C).
//!
//! ```text
//! relay> on pump
//! pump (line 0) is on
//! relay> press 1 5 -d 300
//! relay> status
//! relay> quit
//! ```

use std::error::Error;
use std::path::{Path, PathBuf};

use colored::Colorize;
use directories::ProjectDirs;
use relayctl_bank::RelayBank;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use super::{cmd_off, cmd_press, cmd_pulse, cmd_run, cmd_set, cmd_status, cmd_test};

/// One parsed line of shell input
#[derive(Debug, Clone, PartialEq, Eq)]
enum ShellCommand {
    Set { relay: String, state: String },
    Pulse { relay: String, duration_ms: Option<u64> },
    Press { relays: Vec<String>, duration_ms: Option<u64> },
    Off,
    Test { duration_ms: Option<u64> },
    Status,
    Run { file: PathBuf },
    Connect,
    Help,
    Quit,
}

const COMMANDS: &[&str] = &[
    "set", "on", "off", "pulse", "press", "test", "status", "run", "connect", "help", "quit",
];

fn parse_ms(value: &str) -> Result<u64, String> {
    value
        .parse()
        .map_err(|_| format!("'{}' is not a duration in milliseconds", value))
}

/// Split `press` arguments into relays and an optional `-d <ms>`
fn press_args(args: &[&str]) -> Result<(Vec<String>, Option<u64>), String> {
    let mut relays = Vec::new();
    let mut duration_ms = None;
    let mut args = args.iter();
    while let Some(&arg) = args.next() {
        if arg == "-d" || arg == "--duration-ms" {
            let value = args.next().ok_or("missing duration after -d")?;
            duration_ms = Some(parse_ms(value)?);
        } else {
            relays.push(arg.to_string());
        }
    }
    if relays.is_empty() {
        return Err("press needs at least one relay".into());
    }
    Ok((relays, duration_ms))
}

/// Parse one line; blank lines and `#` comments give `Ok(None)`
fn parse_line(line: &str) -> Result<Option<ShellCommand>, String> {
    let line = line.split('#').next().unwrap_or_default();
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((&first, args)) = words.split_first() else {
        return Ok(None);
    };

    let name = first.to_ascii_lowercase();
    let command = match (name.as_str(), args) {
        ("set", [relay, state]) => ShellCommand::Set {
            relay: relay.to_string(),
            state: state.to_string(),
        },
        ("on", [relay]) => ShellCommand::Set {
            relay: relay.to_string(),
            state: "on".into(),
        },
        ("off", []) => ShellCommand::Off,
        ("off", [relay]) => ShellCommand::Set {
            relay: relay.to_string(),
            state: "off".into(),
        },
        ("pulse", [relay]) => ShellCommand::Pulse {
            relay: relay.to_string(),
            duration_ms: None,
        },
        ("pulse", [relay, ms]) => ShellCommand::Pulse {
            relay: relay.to_string(),
            duration_ms: Some(parse_ms(ms)?),
        },
        ("press", args) if !args.is_empty() => {
            let (relays, duration_ms) = press_args(args)?;
            ShellCommand::Press {
                relays,
                duration_ms,
            }
        }
        ("test", []) => ShellCommand::Test { duration_ms: None },
        ("test", [ms]) => ShellCommand::Test {
            duration_ms: Some(parse_ms(ms)?),
        },
        ("status", []) => ShellCommand::Status,
        ("run", [file]) => ShellCommand::Run {
            file: PathBuf::from(file),
        },
        ("connect", []) => ShellCommand::Connect,
        ("help" | "?", []) => ShellCommand::Help,
        ("quit" | "exit" | "q", []) => ShellCommand::Quit,
        (name, _) if COMMANDS.contains(&name) => {
            return Err(format!("wrong arguments for '{}' (try 'help')", name))
        }
        (name, _) => return Err(format!("unknown command '{}' (try 'help')", name)),
    };
    Ok(Some(command))
}

fn execute(bank: &RelayBank, command: ShellCommand) -> Result<(), Box<dyn Error>> {
    match command {
        ShellCommand::Set { relay, state } => cmd_set(bank, &relay, &state),
        ShellCommand::Pulse { relay, duration_ms } => cmd_pulse(bank, &relay, duration_ms),
        ShellCommand::Press {
            relays,
            duration_ms,
        } => cmd_press(bank, &relays, duration_ms),
        ShellCommand::Off => cmd_off(bank),
        ShellCommand::Test { duration_ms } => cmd_test(bank, duration_ms),
        ShellCommand::Status => cmd_status(bank),
        ShellCommand::Run { file } => cmd_run(bank, &file, false),
        ShellCommand::Connect => {
            bank.connect()?;
            println!("Adapter {} connected", bank.identity());
            Ok(())
        }
        ShellCommand::Help => {
            print_help();
            Ok(())
        }
        ShellCommand::Quit => Ok(()),
    }
}

fn print_help() {
    println!(
        r#"
    {} <relay> <on|off>   switch one relay (also: on <relay>, off <relay>)
    {} <relay> [ms]           press a relay
    {} <relay>... [-d ms]     press relays together in one write
    {}                          switch every relay off
    {} [ms]                    pulse every relay in turn
    {}                       show commanded and confirmed state
    {} <file>                  run a sequence file
    {}                      retry acquiring the adapter
    {}                         leave the shell and release the relays
"#,
        "set".bright_cyan(),
        "pulse".bright_cyan(),
        "press".bright_cyan(),
        "off".bright_cyan(),
        "test".bright_cyan(),
        "status".bright_cyan(),
        "run".bright_cyan(),
        "connect".bright_cyan(),
        "quit".bright_cyan(),
    );
}

/// Get the history file path
fn history_path() -> PathBuf {
    if let Some(proj_dirs) = ProjectDirs::from("", "", "relayctl") {
        let mut path = proj_dirs.data_dir().to_path_buf();
        std::fs::create_dir_all(&path).ok();
        path.push("shell_history");
        path
    } else {
        PathBuf::from(".relayctl_history")
    }
}

/// Run the shell interactively, or the commands in `script`
pub fn cmd_shell(bank: &RelayBank, script: Option<&Path>) -> Result<(), Box<dyn Error>> {
    match script {
        Some(path) => run_script(bank, path),
        None => run_interactive(bank),
    }
}

/// Execute a command file, stopping at the first failure
fn run_script(bank: &RelayBank, path: &Path) -> Result<(), Box<dyn Error>> {
    let content = std::fs::read_to_string(path)?;
    for (index, line) in content.lines().enumerate() {
        let command = match parse_line(line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => return Err(format!("{}:{}: {}", path.display(), index + 1, e).into()),
        };
        if command == ShellCommand::Quit {
            break;
        }
        execute(bank, command)
            .map_err(|e| format!("{}:{}: {}", path.display(), index + 1, e))?;
    }
    Ok(())
}

fn run_interactive(bank: &RelayBank) -> Result<(), Box<dyn Error>> {
    let mut rl = DefaultEditor::new()?;
    let history = history_path();
    if rl.load_history(&history).is_err() {
        log::debug!("No shell history at {}", history.display());
    }

    println!(
        "{} relay(s) on {} via {}. Relays stay as set until you leave the shell.",
        bank.map().len(),
        bank.identity(),
        bank.backend()
    );
    println!("Type 'help' for commands, 'quit' or Ctrl-D to leave.");

    let prompt = format!("{} ", "relay>".bright_green().bold());
    loop {
        match rl.readline(&prompt) {
            Ok(line) => {
                let command = match parse_line(&line) {
                    Ok(Some(command)) => command,
                    Ok(None) => continue,
                    Err(e) => {
                        eprintln!("{}: {}", "Error".bright_red().bold(), e);
                        continue;
                    }
                };
                let _ = rl.add_history_entry(line.as_str());
                if command == ShellCommand::Quit {
                    break;
                }
                if let Err(e) = execute(bank, command) {
                    eprintln!("{}: {}", "Error".bright_red().bold(), e);
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                break;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }

    if let Err(e) = rl.save_history(&history) {
        log::warn!("Failed to save shell history to {}: {}", history.display(), e);
    }
    println!("Releasing relays");
    Ok(())
}
