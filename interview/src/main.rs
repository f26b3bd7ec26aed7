//! Interview flow engine CLI.
//!
//! Runs data-driven interviews interactively or from scripted answers, and
//! validates flow definitions.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use interview::exit_codes;
use interview::interview::{
    InterviewOutcome, InterviewStop, LineResponder, Responder, ScriptedResponder, run_interview,
};
use interview::io::config::{DEFAULT_CONFIG_FILE, EngineConfig, load_config};
use interview::io::flow_store::FlowStore;
use interview::io::session_store::{load_session, write_session};
use interview::logging;
use interview::session::{Role, SessionState};
use interview::turn::{Engine, TurnOutcome};

#[derive(Parser)]
#[command(
    name = "interview",
    version,
    about = "Data-driven interview flow engine"
)]
struct Cli {
    /// Engine config file. Missing files fall back to defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Raise diagnostic logging (`-v` info, `-vv` debug) when `RUST_LOG` is unset.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug, Clone)]
struct SessionArgs {
    /// Flow to run. Defaults to `default_flow_id` from the config.
    #[arg(long)]
    flow_id: Option<String>,

    /// Resume from and save to this session file.
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Print session events to stderr as they are recorded.
    #[arg(long)]
    watch: bool,

    /// Stop after this many turns.
    #[arg(long, default_value_t = 200)]
    max_turns: u32,
}

#[derive(Subcommand)]
enum Command {
    /// Run an interview on stdin/stdout. Type `/quit` or `/exit` to stop.
    Run {
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Feed scripted answers (one per line) and print the transcript.
    Replay {
        /// Answers file; blank lines and `#` comments are skipped.
        #[arg(long)]
        answers: PathBuf,

        #[command(flatten)]
        session: SessionArgs,
    },
    /// Load and validate flows (all configured flows when none is named).
    Validate {
        flow_id: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let config = load_engine_config(&cli.config)?;
    match cli.command {
        Command::Run { session } => {
            let stdin = io::stdin();
            let mut responder = LineResponder::new(stdin.lock(), io::stdout());
            cmd_session(config, &session, &mut responder, false)
        }
        Command::Replay { answers, session } => {
            let text = fs::read_to_string(&answers)
                .with_context(|| format!("read answers {}", answers.display()))?;
            let mut responder = ScriptedResponder::from_text(&text);
            cmd_session(config, &session, &mut responder, true)
        }
        Command::Validate { flow_id } => cmd_validate(&config, flow_id.as_deref()),
    }
}

/// Load config and resolve its relative paths against the config file's directory.
fn load_engine_config(path: &Path) -> Result<EngineConfig> {
    let config = load_config(path)?;
    let base = path.parent().unwrap_or_else(|| Path::new(""));
    Ok(config.rebase(base))
}

fn cmd_session<R: Responder>(
    config: EngineConfig,
    args: &SessionArgs,
    responder: &mut R,
    echo_user: bool,
) -> Result<i32> {
    let flow_id = args
        .flow_id
        .clone()
        .unwrap_or_else(|| config.default_flow_id.clone());
    let engine = Engine::from_config(config);
    let state = open_session(&engine, &flow_id, args.state_file.as_deref())?;

    let outcome = run_interview(&engine, state, responder, args.max_turns, |turn| {
        print_turn(turn, echo_user)?;
        if args.watch {
            print_events(turn)?;
        }
        if let Some(path) = &args.state_file {
            write_session(path, &turn.state)?;
        }
        Ok(())
    })?;
    Ok(report(&outcome))
}

fn open_session(engine: &Engine, flow_id: &str, state_file: Option<&Path>) -> Result<SessionState> {
    if let Some(path) = state_file
        && path.exists()
    {
        let state = load_session(path)?;
        if state.flow_id != flow_id {
            bail!(
                "session {} belongs to flow '{}', not '{flow_id}'",
                path.display(),
                state.flow_id
            );
        }
        return Ok(state);
    }
    Ok(engine.start_session(flow_id)?)
}

fn print_turn(turn: &TurnOutcome, echo_user: bool) -> Result<()> {
    let mut stdout = io::stdout().lock();
    for message in turn.new_messages() {
        match message.role {
            Role::Assistant => writeln!(stdout, "{}", message.content)?,
            Role::User if echo_user => writeln!(stdout, "> {}", message.content)?,
            Role::User => {}
        }
    }
    Ok(())
}

fn print_events(turn: &TurnOutcome) -> Result<()> {
    let mut stderr = io::stderr().lock();
    for event in turn.new_events() {
        writeln!(stderr, "{}", serde_json::to_string(event)?)?;
    }
    Ok(())
}

fn report(outcome: &InterviewOutcome) -> i32 {
    match &outcome.stop {
        InterviewStop::Complete => exit_codes::OK,
        InterviewStop::Error(error) => {
            eprintln!("session error: {error}");
            exit_codes::SESSION_ERROR
        }
        InterviewStop::Quit => {
            eprintln!(
                "stopped at stage '{}' after {} turn(s)",
                outcome.state.active_stage_id, outcome.turns
            );
            exit_codes::INCOMPLETE
        }
        InterviewStop::MaxTurns { turns } => {
            eprintln!(
                "turn limit reached at stage '{}' after {turns} turn(s)",
                outcome.state.active_stage_id
            );
            exit_codes::INCOMPLETE
        }
    }
}

fn cmd_validate(config: &EngineConfig, flow_id: Option<&str>) -> Result<i32> {
    let store = FlowStore::from_config(config);
    let flow_ids = match flow_id {
        Some(flow_id) => vec![flow_id.to_string()],
        None => store.flow_ids(),
    };

    let mut code = exit_codes::OK;
    for flow_id in &flow_ids {
        match store.load(flow_id) {
            Ok(flow) => println!("ok {flow_id} ({} stages)", flow.stages.len()),
            Err(err) => {
                eprintln!("invalid {flow_id}: {err}");
                code = exit_codes::INVALID;
            }
        }
    }
    Ok(code)
}
