use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use stylefusion_contracts::chat::{parse_intent, CHAT_HELP_COMMANDS};
use stylefusion_contracts::session::ImageRole;
use stylefusion_engine::config::EngineConfig;
use stylefusion_engine::TryOnEngine;
use tracing::debug;

#[derive(Debug, Parser)]
#[command(name = "stylefusion", version, about = "Virtual try-on from a person photo and a garment photo")]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive session driven by slash commands
    Chat(ChatArgs),
    /// One-shot try-on
    Run(RunArgs),
}

#[derive(Debug, Args)]
struct EngineArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    timeout_secs: Option<f64>,
}

#[derive(Debug, Args)]
struct ChatArgs {
    #[command(flatten)]
    engine: EngineArgs,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long)]
    person: PathBuf,
    #[arg(long)]
    clothing: PathBuf,
    #[command(flatten)]
    engine: EngineArgs,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("stylefusion error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Run(args) => run_once(args),
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(io::stderr)
        .try_init();
}

fn open_engine(args: &EngineArgs) -> Result<TryOnEngine> {
    let config = EngineConfig::from_env()
        .with_model(args.model.clone())
        .with_timeout_secs(args.timeout_secs);
    debug!(?config, "engine configuration");
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    TryOnEngine::new(&args.out, &events_path, &config)
}

fn run_once(args: RunArgs) -> Result<i32> {
    let mut engine = open_engine(&args.engine)?;
    let outcome = load_and_generate(&mut engine, &args.person, &args.clothing);
    let code = match outcome {
        Ok(()) => {
            let saved = engine.save_result(None)?;
            println!("Saved {}", saved.image_path.display());
            0
        }
        Err(message) => {
            eprintln!("Try-on failed: {message}");
            1
        }
    };
    engine.finish()?;
    Ok(code)
}

fn load_and_generate(
    engine: &mut TryOnEngine,
    person: &Path,
    clothing: &Path,
) -> std::result::Result<(), String> {
    engine
        .load_image(ImageRole::Person, person)
        .map_err(|err| format!("person image: {err}"))?;
    engine
        .load_image(ImageRole::Clothing, clothing)
        .map_err(|err| format!("clothing image: {err}"))?;
    engine.generate().map(|_| ()).map_err(|err| err.to_string())
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let mut engine = open_engine(&args.engine)?;
    let stdin = io::stdin();
    let mut line = String::new();

    println!("StyleFusion chat started. Type /help for commands.");

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
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
            "quit" => break,
            "help" => println!("Commands: {}", CHAT_HELP_COMMANDS.join(" ")),
            "load_person" | "load_clothing" => {
                let role = if intent.action == "load_person" {
                    ImageRole::Person
                } else {
                    ImageRole::Clothing
                };
                let Some(path) = intent.arg_str("path") else {
                    println!("/{role} requires a path");
                    continue;
                };
                match engine.load_image(role, Path::new(path)) {
                    Ok(()) => println!("{} image loaded: {path}", capitalize(role.as_str())),
                    Err(err) => println!("{err}"),
                }
            }
            "remove" => match intent.arg_str("role").and_then(ImageRole::parse) {
                Some(role) => {
                    engine.remove_image(role);
                    println!("{} image removed", capitalize(role.as_str()));
                }
                None => println!("/remove requires person or clothing"),
            },
            "generate" => {
                println!("Generating try-on...");
                match engine.generate() {
                    Ok(image) => println!(
                        "Try-on ready ({}). Use /download to save it.",
                        describe_data_url(&image)
                    ),
                    Err(err) => println!("Error: {err}"),
                }
            }
            "download" => {
                let dir = intent.arg_str("path").map(PathBuf::from);
                match engine.save_result(dir.as_deref()) {
                    Ok(saved) => println!("Saved {}", saved.image_path.display()),
                    Err(err) => println!("Download failed: {err:#}"),
                }
            }
            "reset" => {
                engine.reset();
                println!("Session reset.");
            }
            "status" => {
                for line in format_status(&engine.status_report()) {
                    println!("{line}");
                }
            }
            "set_model" => {
                engine.set_model(intent.arg_str("model").map(str::to_string));
                println!(
                    "Model set to {}",
                    engine.model().unwrap_or("default")
                );
            }
            "list_models" => {
                let current = engine.model();
                for model in engine.list_models() {
                    let marker = if Some(model.name.as_str()) == current { "*" } else { " " };
                    println!("{marker} {} ({}) - {}", model.name, model.provider, model.label);
                }
            }
            _ => {
                println!("Unknown command. Type /help for commands.");
            }
        }
    }

    engine.finish()?;
    Ok(())
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn describe_data_url(data_url: &str) -> String {
    let mime = data_url
        .strip_prefix("data:")
        .and_then(|rest| rest.split(';').next())
        .unwrap_or("image");
    let kib = data_url.len() * 3 / 4 / 1024;
    format!("{mime}, ~{kib} KiB")
}

fn format_status(report: &serde_json::Map<String, Value>) -> Vec<String> {
    let text = |value: Option<&Value>| value.and_then(Value::as_str).unwrap_or("-").to_string();
    let slot = |role: &str| {
        let entry = report.get(role);
        let loaded = entry
            .and_then(|value| value.get("loaded"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if !loaded {
            return format!("{role}: empty");
        }
        format!(
            "{role}: {} ({})",
            text(entry.and_then(|value| value.get("file_name"))),
            text(entry.and_then(|value| value.get("mime_type"))),
        )
    };
    let mut lines = vec![
        format!("status: {}", text(report.get("status"))),
        format!("model: {}", text(report.get("model"))),
        slot("person"),
        slot("clothing"),
    ];
    if report.get("has_result").and_then(Value::as_bool).unwrap_or(false) {
        lines.push("result: ready".to_string());
    }
    if let Some(error) = report.get("error").and_then(Value::as_str) {
        lines.push(format!("error: {error}"));
    }
    lines
}
