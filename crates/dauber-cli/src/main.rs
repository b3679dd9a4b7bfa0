use std::env;
use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use dauber_contracts::chat::{parse_intent, Intent, STUDIO_HELP_COMMANDS};
use dauber_contracts::events::{new_session_id, EventWriter};
use dauber_contracts::frames::{Frame, FrameStore};
use dauber_contracts::prefs::Preferences;
use dauber_contracts::prompts::{TouchLevel, CONTEXT_PLACEHOLDER};
use dauber_engine::anthropic::{
    is_valid_key_format, AnthropicClient, FeedbackProvider, FeedbackRequest, KeyValidation,
};
use dauber_engine::camera::{CameraBackend, CameraSession, CameraState};
use dauber_engine::capture::{encode_frame, StillFrame};
use dauber_engine::folder_camera::FolderCamera;
use dauber_engine::{FeedbackTurn, Studio, StudioError};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "dauber",
    version,
    about = "Painting feedback from a camera pointed at your easel"
)]
struct Cli {
    /// Preference and session directory. Defaults to $DAUBER_HOME, then ~/.dauber.
    #[arg(long, global = true)]
    home: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive session: press enter for feedback on the current canvas.
    Studio(StudioArgs),
    /// One-shot feedback on image files.
    Feedback(FeedbackArgs),
    #[command(subcommand)]
    Key(KeyCommand),
    /// Show or set how much the companion steers.
    Tone(ToneArgs),
    /// Show, set, or clear what you're working on.
    Context(ContextArgs),
    /// List cameras.
    Devices(DevicesArgs),
}

#[derive(Debug, Parser)]
struct StudioArgs {
    /// Folder holding one subfolder per camera. Defaults to $DAUBER_CAMERA_ROOT, then <home>/camera.
    #[arg(long)]
    camera_root: Option<PathBuf>,
    #[arg(long)]
    device: Option<String>,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct FeedbackArgs {
    #[arg(long)]
    image: PathBuf,
    /// Earlier photo of the same painting. Its modification time dates it.
    #[arg(long)]
    compare: Option<PathBuf>,
    #[arg(long)]
    tone: Option<TouchLevel>,
    #[arg(long)]
    context: Option<String>,
    /// Ask a question about the image instead of requesting a critique.
    #[arg(long, conflicts_with = "compare")]
    question: Option<String>,
}

#[derive(Debug, Subcommand)]
enum KeyCommand {
    /// Check and store an API key.
    Set {
        key: String,
        #[arg(long)]
        skip_validation: bool,
    },
    Clear,
    /// Validate a key (the stored one when omitted).
    Validate { key: Option<String> },
    Show,
}

#[derive(Debug, Parser)]
struct ToneArgs {
    level: Option<TouchLevel>,
}

#[derive(Debug, Parser)]
struct ContextArgs {
    #[arg(trailing_var_arg = true)]
    text: Vec<String>,
    #[arg(long, conflicts_with = "text")]
    clear: bool,
}

#[derive(Debug, Parser)]
struct DevicesArgs {
    #[arg(long)]
    camera_root: Option<PathBuf>,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("dauber error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let home = resolve_home(
        cli.home,
        non_empty_env("DAUBER_HOME"),
        non_empty_env("HOME"),
    )?;
    match cli.command {
        Command::Studio(args) => {
            run_studio(&home, args)?;
            Ok(0)
        }
        Command::Feedback(args) => {
            run_feedback(&home, args)?;
            Ok(0)
        }
        Command::Key(command) => run_key(&home, command),
        Command::Tone(args) => {
            run_tone(&home, args);
            Ok(0)
        }
        Command::Context(args) => {
            run_context(&home, args);
            Ok(0)
        }
        Command::Devices(args) => {
            run_devices(&home, args)?;
            Ok(0)
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn resolve_home(
    flag: Option<PathBuf>,
    dauber_home: Option<String>,
    user_home: Option<String>,
) -> Result<PathBuf> {
    if let Some(path) = flag {
        return Ok(path);
    }
    if let Some(path) = dauber_home {
        return Ok(PathBuf::from(path));
    }
    let user_home = user_home.context("cannot locate a home directory; set DAUBER_HOME")?;
    Ok(PathBuf::from(user_home).join(".dauber"))
}

fn camera_root(flag: Option<PathBuf>, home: &Path) -> PathBuf {
    flag.or_else(|| non_empty_env("DAUBER_CAMERA_ROOT").map(PathBuf::from))
        .unwrap_or_else(|| home.join("camera"))
}

fn open_preferences(home: &Path) -> Preferences {
    Preferences::open(home.join("prefs.json"))
}

fn stored_or_env_key(prefs: &Preferences) -> Option<String> {
    prefs
        .api_key()
        .or_else(|| non_empty_env("ANTHROPIC_API_KEY"))
}

fn feedback_client() -> Result<AnthropicClient> {
    let client = AnthropicClient::new();
    match non_empty_env("DAUBER_REQUEST_TIMEOUT_SECS") {
        Some(raw) => {
            let secs: u64 = raw.parse().with_context(|| {
                format!("DAUBER_REQUEST_TIMEOUT_SECS must be whole seconds, got {raw:?}")
            })?;
            client.with_timeout(Duration::from_secs(secs))
        }
        None => Ok(client),
    }
}

fn run_studio(home: &Path, args: StudioArgs) -> Result<()> {
    let prefs = open_preferences(home);
    let root = camera_root(args.camera_root, home);
    let session_id = new_session_id();
    let events_path = args.events.unwrap_or_else(|| {
        home.join("sessions")
            .join(&session_id)
            .join("events.jsonl")
    });
    let events = EventWriter::new(events_path, session_id);
    let camera = CameraSession::new(Box::new(FolderCamera::new(&root)), prefs.clone());
    let mut studio = Studio::new(camera, prefs, Box::new(feedback_client()?), events)
        .with_fallback_credential(non_empty_env("ANTHROPIC_API_KEY"));

    let started = match args.device.as_deref() {
        Some(device_id) => studio.switch_camera(device_id),
        None => studio.start_camera(),
    };
    if let Err(err) = started {
        println!("{err}");
        println!(
            "Cameras are folders under {}; add one and use /camera <id>.",
            root.display()
        );
    }

    println!("Dauber studio started. Press enter for feedback, /help for commands.");
    if studio.credential().is_none() {
        println!("No API key yet. Add one with /key sk-ant-...");
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut line = String::new();
    loop {
        print!("> ");
        stdout.flush()?;

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
        if let Flow::Quit = handle_intent(&mut studio, &intent, &mut stdout)? {
            break;
        }
    }

    studio.events().emit_lossy(
        "session_ended",
        serde_json::Map::from_iter([(
            "turns".to_string(),
            Value::from(studio.conversation().len() / 2),
        )]),
    );
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

fn handle_intent(studio: &mut Studio, intent: &Intent, out: &mut dyn Write) -> Result<Flow> {
    match intent.action.as_str() {
        "capture" => {
            if !studio.can_trigger() {
                if studio.credential().is_none() {
                    writeln!(out, "Please enter your API key first (/key sk-ant-...)")?;
                } else {
                    writeln!(out, "Still waiting on the last response.")?;
                }
                return Ok(Flow::Continue);
            }
            writeln!(out, "Looking...")?;
            let result = studio.get_feedback();
            write_turn(out, result)?;
        }
        "follow_up" => {
            let text = intent.prompt.as_deref().unwrap_or_default();
            writeln!(out, "Thinking...")?;
            let result = studio.follow_up(text);
            write_turn(out, result)?;
        }
        "select_compare" => {
            let target = intent.arg("frame").unwrap_or_default();
            if target.is_empty() {
                writeln!(out, "Usage: /compare <frame number or id> (see /frames)")?;
                return Ok(Flow::Continue);
            }
            let Some(frame_id) = resolve_frame_ref(studio.frames(), target) else {
                writeln!(out, "No frame {target}. See /frames.")?;
                return Ok(Flow::Continue);
            };
            match studio.select_compare(&frame_id) {
                Some(frame) => writeln!(
                    out,
                    "Comparing against {} ({})",
                    frame.id,
                    age_text(frame.timestamp, Utc::now())
                )?,
                None => writeln!(out, "Comparison cleared.")?,
            }
        }
        "clear_compare" => {
            studio.clear_compare();
            writeln!(out, "Comparison cleared.")?;
        }
        "list_frames" => write_frames(out, studio.frames(), Utc::now())?,
        "clear_frames" => {
            studio.clear_frames();
            writeln!(out, "Frames cleared.")?;
        }
        "set_tone" => {
            let raw = intent.arg("level").unwrap_or_default();
            if raw.is_empty() {
                write_tones(out, studio.prefs().touch_level())?;
                return Ok(Flow::Continue);
            }
            match raw.parse::<TouchLevel>() {
                Ok(level) => {
                    studio.set_touch_level(level);
                    writeln!(out, "Tone set to {}.", level.label())?;
                }
                Err(message) => writeln!(out, "{message}")?,
            }
        }
        "set_context" => {
            let text = intent.arg("text").unwrap_or_default();
            studio.set_session_context(text);
            if text.trim().is_empty() {
                writeln!(out, "Session context cleared.")?;
            } else {
                writeln!(out, "Session context saved.")?;
            }
        }
        "list_devices" => {
            let active = studio.camera().active_device_id().map(str::to_string);
            let devices = studio.list_devices();
            if devices.is_empty() {
                writeln!(out, "No cameras found.")?;
            }
            for device in devices {
                let marker = if active.as_deref() == Some(device.device_id.as_str()) {
                    "*"
                } else {
                    " "
                };
                writeln!(out, "{marker} {}  {}", device.device_id, device.label)?;
            }
        }
        "switch_camera" => {
            let device_id = intent.arg("device").unwrap_or_default();
            if device_id.is_empty() {
                writeln!(out, "Usage: /camera <device id> (see /devices)")?;
                return Ok(Flow::Continue);
            }
            match studio.switch_camera(device_id) {
                Ok(()) => writeln!(
                    out,
                    "Camera: {}",
                    studio.camera().active_device_id().unwrap_or(device_id)
                )?,
                Err(err) => writeln!(out, "{err}")?,
            }
        }
        "set_key" => {
            let key = intent.arg("key").unwrap_or_default();
            match studio.submit_api_key(key) {
                Ok(KeyValidation::RateLimited) => {
                    writeln!(out, "API key saved (validation was rate limited).")?
                }
                Ok(_) => writeln!(out, "API key saved.")?,
                Err(err) => writeln!(out, "{err}")?,
            }
        }
        "clear_key" => {
            studio.clear_api_key();
            writeln!(out, "API key cleared.")?;
        }
        "status" => write_status(out, studio)?,
        "help" => writeln!(out, "Commands: {}", STUDIO_HELP_COMMANDS.join(" "))?,
        "quit" => return Ok(Flow::Quit),
        "unknown" => writeln!(
            out,
            "Unknown command /{}. Type /help for commands.",
            intent.arg("command").unwrap_or_default()
        )?,
        other => tracing::debug!(action = other, "ignoring intent"),
    }
    Ok(Flow::Continue)
}

fn write_turn(out: &mut dyn Write, result: Result<FeedbackTurn, StudioError>) -> Result<()> {
    match result {
        Ok(turn) => {
            writeln!(out)?;
            writeln!(out, "{}", turn.content)?;
            if let Some(usage) = usage_text(&turn.usage) {
                writeln!(out, "({usage})")?;
            }
            writeln!(out)?;
        }
        Err(err) => writeln!(out, "{err}")?,
    }
    Ok(())
}

fn usage_text(usage: &Value) -> Option<String> {
    let input = usage.get("input_tokens").and_then(Value::as_u64)?;
    let output = usage.get("output_tokens").and_then(Value::as_u64)?;
    Some(format!("{input} tokens in, {output} out"))
}

/// `/compare` accepts a 1-based position in `/frames` (newest first) or a
/// frame id.
fn resolve_frame_ref(frames: &FrameStore, target: &str) -> Option<String> {
    if let Ok(position) = target.parse::<usize>() {
        return position
            .checked_sub(1)
            .and_then(|idx| frames.frames().get(idx))
            .map(|frame| frame.id.clone());
    }
    frames.get(target).map(|frame| frame.id.clone())
}

fn age_text(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let minutes = (now - timestamp).num_minutes().max(0);
    match minutes {
        0 => "just now".to_string(),
        1 => "1 minute ago".to_string(),
        n => format!("{n} minutes ago"),
    }
}

fn write_frames(out: &mut dyn Write, frames: &FrameStore, now: DateTime<Utc>) -> Result<()> {
    if frames.is_empty() {
        writeln!(out, "No frames yet. Press enter to capture one.")?;
        return Ok(());
    }
    for (idx, frame) in frames.frames().iter().enumerate() {
        let marker = if frames.compare_frame_id() == Some(frame.id.as_str()) {
            " [compare]"
        } else {
            ""
        };
        writeln!(
            out,
            "{:>2}. {}  {}x{}  {}{marker}",
            idx + 1,
            frame.id,
            frame.width,
            frame.height,
            age_text(frame.timestamp, now)
        )?;
    }
    Ok(())
}

fn write_tones(out: &mut dyn Write, current: TouchLevel) -> Result<()> {
    for level in TouchLevel::ALL {
        let marker = if level == current { "*" } else { " " };
        writeln!(
            out,
            "{marker} {:<9} {}: {}",
            level.id(),
            level.label(),
            level.description()
        )?;
    }
    Ok(())
}

fn write_status(out: &mut dyn Write, studio: &Studio) -> Result<()> {
    let camera = match studio.camera().state() {
        CameraState::Active => format!(
            "active ({})",
            studio.camera().active_device_id().unwrap_or("unknown")
        ),
        CameraState::Failed(err) => format!("failed: {err}"),
        CameraState::Starting => "starting".to_string(),
        CameraState::Uninitialized => "off".to_string(),
    };
    writeln!(out, "Camera:   {camera}")?;
    writeln!(
        out,
        "Frames:   {} (comparing: {})",
        studio.frames().len(),
        studio
            .frames()
            .resolve_comparison_frame()
            .map(|frame| frame.id.as_str())
            .unwrap_or("none")
    )?;
    writeln!(out, "Tone:     {}", studio.prefs().touch_level().label())?;
    let context = studio.prefs().session_context();
    writeln!(
        out,
        "Context:  {}",
        if context.trim().is_empty() {
            "(none)"
        } else {
            context.trim()
        }
    )?;
    writeln!(
        out,
        "API key:  {}",
        studio
            .credential()
            .map(|key| mask_key(&key))
            .unwrap_or_else(|| "(none)".to_string())
    )?;
    writeln!(out, "Turns:    {}", studio.conversation().len() / 2)?;
    if let Some(usage) = studio.last_usage().and_then(usage_text) {
        writeln!(out, "Last:     {usage}")?;
    }
    Ok(())
}

fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 11 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..7].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

/// Encodes an image file as a frame dated by the file's modification time.
fn load_frame(path: &Path) -> Result<Frame> {
    let still = StillFrame::open(path)?;
    let taken_at = fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    encode_frame(&still, taken_at).with_context(|| format!("failed to encode {}", path.display()))
}

fn run_feedback(home: &Path, args: FeedbackArgs) -> Result<()> {
    let prefs = open_preferences(home);
    let credential = stored_or_env_key(&prefs)
        .context("no API key; run `dauber key set <key>` or set ANTHROPIC_API_KEY")?;

    let compare = match args.compare.as_deref() {
        Some(path) => Some(load_frame(path)?),
        None => None,
    };
    let current = load_frame(&args.image)?;
    let context = args.context.unwrap_or_else(|| prefs.session_context());

    let request = FeedbackRequest {
        credential: &credential,
        current_frame: &current,
        compare_frame: compare.as_ref(),
        touch_level: args.tone.unwrap_or_else(|| prefs.touch_level()),
        session_context: &context,
        history: &[],
        follow_up: args.question.as_deref(),
    };
    let response = feedback_client()?.request_feedback(&request)?;
    println!("{}", response.content);
    if let Some(usage) = usage_text(&response.usage) {
        eprintln!("({usage})");
    }
    Ok(())
}

fn run_key(home: &Path, command: KeyCommand) -> Result<i32> {
    let prefs = open_preferences(home);
    match command {
        KeyCommand::Set {
            key,
            skip_validation,
        } => {
            let key = key.trim();
            if !is_valid_key_format(key) {
                bail!("Invalid key format. Should start with sk-ant-");
            }
            if !skip_validation {
                match feedback_client()?.validate_key(key) {
                    KeyValidation::Invalid(message) => bail!("{message}"),
                    KeyValidation::RateLimited => {
                        println!("Validation was rate limited; saving anyway.")
                    }
                    KeyValidation::Valid => {}
                }
            }
            prefs.set_api_key(Some(key));
            println!("API key saved to {}", prefs.store().path().display());
            Ok(0)
        }
        KeyCommand::Clear => {
            prefs.set_api_key(None);
            println!("API key cleared.");
            Ok(0)
        }
        KeyCommand::Validate { key } => {
            let key = key
                .map(|key| key.trim().to_string())
                .or_else(|| stored_or_env_key(&prefs))
                .context("no API key to validate")?;
            if !is_valid_key_format(&key) {
                println!("Invalid key format. Should start with sk-ant-");
                return Ok(1);
            }
            match feedback_client()?.validate_key(&key) {
                KeyValidation::Valid => {
                    println!("Valid.");
                    Ok(0)
                }
                KeyValidation::RateLimited => {
                    println!("Valid (rate limited).");
                    Ok(0)
                }
                KeyValidation::Invalid(message) => {
                    println!("{message}");
                    Ok(1)
                }
            }
        }
        KeyCommand::Show => {
            match prefs.api_key() {
                Some(key) => println!("{}", mask_key(&key)),
                None => println!("No API key stored."),
            }
            Ok(0)
        }
    }
}

fn run_tone(home: &Path, args: ToneArgs) {
    let prefs = open_preferences(home);
    match args.level {
        Some(level) => {
            prefs.set_touch_level(level);
            println!("Tone set to {}.", level.label());
        }
        None => {
            let mut stdout = io::stdout();
            if let Err(err) = write_tones(&mut stdout, prefs.touch_level()) {
                tracing::warn!("failed to print tones: {err:#}");
            }
        }
    }
}

fn run_context(home: &Path, args: ContextArgs) {
    let prefs = open_preferences(home);
    if args.clear {
        prefs.set_session_context("");
        println!("Session context cleared.");
        return;
    }
    if args.text.is_empty() {
        let context = prefs.session_context();
        if context.trim().is_empty() {
            println!("No session context. Consider:\n{CONTEXT_PLACEHOLDER}");
        } else {
            println!("{}", context.trim());
        }
        return;
    }
    prefs.set_session_context(&args.text.join(" "));
    println!("Session context saved.");
}

fn run_devices(home: &Path, args: DevicesArgs) -> Result<()> {
    let prefs = open_preferences(home);
    let root = camera_root(args.camera_root, home);
    let devices = FolderCamera::new(&root).enumerate_devices()?;
    if devices.is_empty() {
        println!(
            "No cameras under {}. Add one folder per camera and write frames into it.",
            root.display()
        );
        return Ok(());
    }
    let remembered = prefs.camera_device_id();
    for device in devices {
        let marker = if remembered.as_deref() == Some(device.device_id.as_str()) {
            "*"
        } else {
            " "
        };
        println!("{marker} {}  {}", device.device_id, device.label);
    }
    Ok(())
}
