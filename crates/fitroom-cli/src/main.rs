use std::io::{self, BufRead, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use fitroom_contracts::chat::{parse_intent, CHAT_HELP_COMMANDS};
use fitroom_contracts::events::EventWriter;
use fitroom_contracts::policy::FallbackPolicy;
use fitroom_contracts::slots::SlotKind;
use fitroom_engine::{
    default_gateway_registry, new_session_id, FitroomConfig, IngestOutcome, IngestionController,
    Notice, NoticeLevel, SlotStatus, Studio,
};

#[derive(Debug, Parser)]
#[command(name = "fitroom", version, about = "Virtual fitting room")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Dress the subject in the garment once and save the result.
    TryOn(TryOnArgs),
    /// Interactive session.
    Chat(ChatArgs),
}

#[derive(Debug, Args)]
struct SessionArgs {
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, default_value = "gemini")]
    gateway: String,
    #[arg(long)]
    timeout_secs: Option<u64>,
    #[arg(long, default_value = "original")]
    on_compress_failure: FallbackPolicy,
}

#[derive(Debug, Parser)]
struct TryOnArgs {
    #[arg(long)]
    subject: PathBuf,
    #[arg(long)]
    garment: PathBuf,
    #[arg(long)]
    out: PathBuf,
    #[command(flatten)]
    session: SessionArgs,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long)]
    out: PathBuf,
    #[command(flatten)]
    session: SessionArgs,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("fitroom error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::TryOn(args) => run_try_on(args),
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
    }
}

fn open_studio(args: &SessionArgs, events_path: Option<PathBuf>) -> Result<Studio> {
    let mut config = FitroomConfig::from_env()?;
    if let Some(secs) = args.timeout_secs {
        config.set_request_timeout_secs(secs);
    }
    config.fallback = args.on_compress_failure;

    let registry = default_gateway_registry(&config);
    let Some(gateway) = registry.get(&args.gateway) else {
        bail!(
            "unknown gateway '{}' (available: {})",
            args.gateway,
            registry.names().join(", ")
        );
    };
    let events = events_path.map(|path| event_writer(path, &config));
    let ingest = IngestionController::from_config(&config);
    Ok(Studio::new(gateway, ingest, events))
}

fn event_writer(path: PathBuf, config: &FitroomConfig) -> EventWriter {
    let writer = EventWriter::new(path, new_session_id());
    match config.api_key.as_deref() {
        Some(key) => writer.with_secret(key),
        None => writer,
    }
}

fn run_try_on(args: TryOnArgs) -> Result<i32> {
    let studio = open_studio(&args.session, args.session.events.clone())?;
    let mut stdout = io::stdout();

    let (subject, garment) = studio.select_both(&args.subject, &args.garment);
    print_notices(&studio, &mut stdout)?;
    let ready = [subject, garment]
        .iter()
        .all(|outcome| matches!(outcome, IngestOutcome::Filled { .. }));

    let code = if !ready {
        1
    } else if studio.generate().is_err() {
        print_notices(&studio, &mut stdout)?;
        1
    } else {
        let saved = studio.save_result(&args.out)?;
        writeln!(stdout, "Saved fitting to {}", saved.display())?;
        0
    };

    if let Some(events) = args.session.events.as_ref() {
        studio.finish(&events.with_file_name("summary.json"))?;
    }
    Ok(code)
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let events_path = args
        .session
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let studio = open_studio(&args.session, Some(events_path))?;

    println!(
        "Fitting room ready (gateway: {}). Type /help for commands.",
        studio.gateway_name()
    );
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    chat_loop(&studio, &args.out, stdin.lock(), &mut stdout)?;

    let summary = studio.finish(&args.out.join("summary.json"))?;
    println!(
        "Session {} finished: {} generation(s), {} failure(s).",
        summary.session_id, summary.generations, summary.failures
    );
    Ok(())
}

fn chat_loop(
    studio: &Studio,
    out_dir: &Path,
    mut input: impl BufRead,
    out: &mut impl Write,
) -> Result<()> {
    let mut line = String::new();
    loop {
        write!(out, "> ")?;
        out.flush()?;

        line.clear();
        let read = match input.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let intent = parse_intent(line.trim_end_matches(['\n', '\r']));
        match intent.action.as_str() {
            "noop" => continue,
            "help" => {
                writeln!(out, "Commands: {}", CHAT_HELP_COMMANDS.join(" "))?;
            }
            "quit" => break,
            "select_subject" | "select_garment" => {
                let kind = if intent.action == "select_subject" {
                    SlotKind::Subject
                } else {
                    SlotKind::Garment
                };
                let Some(path) = intent.arg_str("path") else {
                    writeln!(out, "/{kind} requires a path")?;
                    continue;
                };
                let outcome = studio.select_path(kind, Path::new(path));
                if let Some(message) = describe_outcome(kind, &outcome) {
                    writeln!(out, "{message}")?;
                }
            }
            "clear_slot" => match intent.arg_str("slot").map(str::parse::<SlotKind>) {
                Some(Ok(kind)) => {
                    studio.clear(kind);
                    writeln!(out, "Cleared {}.", kind.label())?;
                }
                Some(Err(err)) => writeln!(out, "{err}")?,
                None => writeln!(out, "/clear requires subject or garment")?,
            },
            "generate" | "try_again" => {
                let result = if intent.action == "generate" {
                    studio.generate()
                } else {
                    studio.try_again()
                };
                if let Ok(image) = result {
                    writeln!(
                        out,
                        "Fitting ready ({}, {} bytes). Use /save to keep it.",
                        image.media_type(),
                        image.decoded_len()
                    )?;
                }
            }
            "start_over" => {
                studio.start_over();
                writeln!(out, "Started over.")?;
            }
            "save_result" => {
                let target = intent
                    .arg_str("path")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| out_dir.to_path_buf());
                if let Ok(saved) = studio.save_result(&target) {
                    writeln!(out, "Saved fitting to {}", saved.display())?;
                }
            }
            "status" => {
                let status = studio.status();
                writeln!(out, "{}", format_slot(&status.subject))?;
                writeln!(out, "{}", format_slot(&status.garment))?;
                writeln!(
                    out,
                    "result: {}{}",
                    if status.has_result { "ready" } else { "none" },
                    if status.busy { " (generating)" } else { "" }
                )?;
            }
            _ => {
                let shown = intent
                    .arg_str("command")
                    .map(|command| format!("/{command}"))
                    .or_else(|| intent.arg_str("arg").map(str::to_string))
                    .unwrap_or_default();
                if let Some(message) = unknown_input_message(&shown) {
                    writeln!(out, "{message}")?;
                }
            }
        }
        print_notices(studio, out)?;
    }
    Ok(())
}

fn unknown_input_message(shown: &str) -> Option<String> {
    if shown.is_empty() {
        return None;
    }
    Some(format!("Unknown input: {shown} (type /help for commands)"))
}

fn describe_outcome(kind: SlotKind, outcome: &IngestOutcome) -> Option<String> {
    let message = match outcome {
        IngestOutcome::Filled { used_fallback } => {
            let source = if *used_fallback {
                " from the original file"
            } else {
                ""
            };
            format!("{kind} loaded{source}.")
        }
        IngestOutcome::NoChange => {
            let hint = format!("/clear {kind} to pick it again");
            format!("{kind} already uses that file; {hint}.")
        }
        IngestOutcome::Superseded => format!("{kind} changed while loading; kept the newer pick."),
        IngestOutcome::Ignored | IngestOutcome::Failed(_) => return None,
    };
    Some(message)
}

fn format_slot(slot: &SlotStatus) -> String {
    let mut text = format!("{}: {}", slot.kind, slot.state);
    if let Some(file) = slot.file.as_ref() {
        text.push_str(&format!(" ({})", file.display()));
    }
    if let Some(error) = slot.last_error.as_deref() {
        text.push_str(&format!(" [last error: {error}]"));
    }
    text
}

fn format_notice(notice: &Notice) -> String {
    let marker = match notice.level {
        NoticeLevel::Blocking => "!",
        NoticeLevel::Info => "-",
    };
    format!("{marker} {}", notice.message)
}

fn print_notices(studio: &Studio, out: &mut impl Write) -> Result<()> {
    for notice in studio.drain_notices() {
        writeln!(out, "{}", format_notice(&notice))?;
    }
    Ok(())
}
