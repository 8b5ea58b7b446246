//! CLI binary for img2latex.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `RecognitionConfig`, mirrors the status channel on a spinner and prints
//! the recognised LaTeX.

use anyhow::{Context, Result};
use clap::Parser;
use img2latex::pipeline::input::resolve_image;
use img2latex::{
    LatexOcr, ModelSources, OcrError, PipelinePhase, RecognitionConfig, RecognitionOutput, RenderMode,
    StatusReceiver,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

/// Exit status after Ctrl-C, as a shell reports SIGINT.
const EXIT_CANCELLED: i32 = 130;

// ── Spinner mirroring the status channel ─────────────────────────────────────

fn spinner(prefix: &'static str, msg: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS),
    );
    bar.set_prefix(prefix);
    bar.set_message(msg.to_string());
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

/// Follow `status` until the channel closes, updating `bar`.
async fn follow_status(mut status: StatusReceiver, bar: ProgressBar) {
    while status.changed().await.is_ok() {
        let current = status.borrow_and_update().clone();
        let prefix = match current.phase {
            PipelinePhase::Resizing => "Resizing",
            PipelinePhase::Encoding => "Encoding",
            PipelinePhase::Decoding => "Decoding",
            PipelinePhase::Idle | PipelinePhase::Error => "Recognising",
        };
        bar.set_prefix(prefix);
        bar.set_message(current.to_string());
    }
}

// ── Ctrl-C handling ──────────────────────────────────────────────────────────

/// What a Ctrl-C press does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    /// Set the cancel flag and let the pipeline stop at its next checkpoint.
    Cancel,
    /// Leave immediately.
    Exit,
}

/// Only the first press during a running prediction cancels cooperatively.
/// A press outside a prediction, or any repeat, exits.
fn interrupt_action(presses: usize, running: bool) -> Interrupt {
    if presses == 1 && running {
        Interrupt::Cancel
    } else {
        Interrupt::Exit
    }
}

/// Installed once the input is in memory; keeps listening so a second press
/// still reaches the process.
async fn handle_interrupts(ocr: Arc<LatexOcr>, quiet: bool) {
    let mut presses = 0;
    while tokio::signal::ctrl_c().await.is_ok() {
        presses += 1;
        match interrupt_action(presses, ocr.is_running()) {
            Interrupt::Cancel => ocr.cancel_handle().cancel(),
            Interrupt::Exit => {
                if !quiet {
                    eprintln!("{} {}", cyan("⚠"), bold("Interrupted"));
                }
                std::process::exit(EXIT_CANCELLED);
            }
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Recognise an image (LaTeX on stdout)
  img2latex equation.png

  # Write to a file
  img2latex equation.png -o equation.tex

  # Read from stdin, inline preview markup in JSON output
  cat equation.png | img2latex - --inline --json

  # Models from another directory
  img2latex --models-dir ~/models/latex-ocr equation.png

  # Models from a server (downloaded once, cached)
  img2latex --models-url https://example.com/latex-ocr/v1 equation.png

MODEL FILES (in --models-dir or under --models-url):
  image_resizer.onnx   width predictor
  encoder.onnx         image encoder
  decoder.onnx         token decoder
  tokenizer.json       vocabulary

ENVIRONMENT VARIABLES:
  IMG2LATEX_MODELS_DIR   Default model directory
  IMG2LATEX_MODELS_URL   Base URL for model downloads
  IMG2LATEX_CACHE_DIR    Download cache root
  RUST_LOG               Log filter (overrides -v / -q)

Press Ctrl-C once to cancel a running recognition, twice to exit at once.
"#;

/// Convert images of mathematical expressions to LaTeX.
#[derive(Parser, Debug)]
#[command(
    name = "img2latex",
    version,
    about = "Convert images of mathematical expressions to LaTeX",
    long_about = "Recognise an image of a mathematical expression (local file, URL or stdin) and \
print LaTeX. Runs a resizer, an encoder and an autoregressive decoder exported as ONNX models.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Image file path, HTTP/HTTPS URL, or `-` for stdin.
    input: String,

    /// Write LaTeX to this file instead of stdout.
    #[arg(short, long, env = "IMG2LATEX_OUTPUT")]
    output: Option<PathBuf>,

    /// Directory holding the four model files.
    #[arg(long, env = "IMG2LATEX_MODELS_DIR", default_value = "models")]
    models_dir: PathBuf,

    /// Base URL holding the four model files (overrides --models-dir).
    #[arg(long, env = "IMG2LATEX_MODELS_URL")]
    models_url: Option<String>,

    /// Resizer model path or URL.
    #[arg(long, env = "IMG2LATEX_RESIZER")]
    resizer: Option<String>,

    /// Encoder model path or URL.
    #[arg(long, env = "IMG2LATEX_ENCODER")]
    encoder: Option<String>,

    /// Decoder model path or URL.
    #[arg(long, env = "IMG2LATEX_DECODER")]
    decoder: Option<String>,

    /// Tokenizer JSON path or URL.
    #[arg(long, env = "IMG2LATEX_TOKENIZER")]
    tokenizer: Option<String>,

    /// Cache root for downloaded models.
    #[arg(long, env = "IMG2LATEX_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Maximum image width in pixels (multiple of 32).
    #[arg(long, env = "IMG2LATEX_MAX_WIDTH", default_value_t = 672)]
    max_width: u32,

    /// Maximum image height in pixels (multiple of 32).
    #[arg(long, env = "IMG2LATEX_MAX_HEIGHT", default_value_t = 192)]
    max_height: u32,

    /// Maximum number of generated tokens.
    #[arg(long, env = "IMG2LATEX_MAX_SEQ_LEN", default_value_t = 512)]
    max_seq_len: usize,

    /// Intra-op threads per model session.
    #[arg(long, env = "IMG2LATEX_THREADS")]
    threads: Option<usize>,

    /// Render the preview as inline math instead of display math.
    #[arg(long, env = "IMG2LATEX_INLINE")]
    inline: bool,

    /// Output structured JSON (RecognitionOutput) instead of LaTeX.
    #[arg(long, env = "IMG2LATEX_JSON")]
    json: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "IMG2LATEX_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "IMG2LATEX_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "IMG2LATEX_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "IMG2LATEX_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner provides the feedback that matters; keep INFO logs from
    // tearing through it.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = build_config(&cli)?;

    // ── Load models ──────────────────────────────────────────────────────
    let bar = show_progress.then(|| spinner("Loading", "models…"));
    let ocr = Arc::new(LatexOcr::load(config).await.context("Failed to load models")?);

    // ── Read input ───────────────────────────────────────────────────────
    // Before the signal handler exists, so Ctrl-C still kills a stalled
    // download or a terminal stdin.
    if let Some(ref bar) = bar {
        bar.set_prefix("Reading");
        bar.set_message(cli.input.clone());
    }
    let bytes = match resolve_image(&cli.input, cli.download_timeout).await {
        Ok(bytes) => bytes,
        Err(e) => {
            if let Some(ref bar) = bar {
                bar.finish_and_clear();
            }
            eprintln!("{} {}", red("✘"), e);
            return Err(e).context("Failed to read input");
        }
    };

    // ── Status and Ctrl-C ────────────────────────────────────────────────
    let watcher = bar
        .clone()
        .map(|bar| tokio::spawn(follow_status(ocr.status(), bar)));
    let ctrl_c = tokio::spawn(handle_interrupts(Arc::clone(&ocr), cli.quiet));

    // ── Run recognition ──────────────────────────────────────────────────
    let result = match cli.output {
        Some(ref path) => ocr.predict_to_file(bytes, path).await,
        None => ocr.predict(bytes).await,
    };

    ctrl_c.abort();
    if let Some(w) = watcher {
        w.abort();
    }
    if let Some(ref bar) = bar {
        bar.finish_and_clear();
    }

    let output = match result {
        Ok(output) => output,
        Err(OcrError::Cancelled) => {
            if !cli.quiet {
                eprintln!("{} {}", cyan("⚠"), bold("Cancelled"));
            }
            std::process::exit(EXIT_CANCELLED);
        }
        Err(e) => {
            eprintln!("{} {}", red("✘"), e.status_message());
            return Err(e).context("Recognition failed");
        }
    };

    print_output(&cli, &output)?;
    Ok(())
}

fn print_output(cli: &Cli, output: &RecognitionOutput) -> Result<()> {
    if cli.json {
        let json = serde_json::to_string_pretty(output).context("Failed to serialise output")?;
        println!("{json}");
    } else if cli.output.is_none() {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        writeln!(handle, "{}", output.latex).context("Failed to write to stdout")?;
    }

    if cli.quiet {
        return Ok(());
    }
    if let Some(ref err) = output.render_error {
        eprintln!("{} {}  {}", cyan("⚠"), output.preview, dim(&err.to_string()));
    }
    if output.stats.truncated() {
        eprintln!(
            "{} output reached {} tokens and may be incomplete",
            cyan("⚠"),
            cli.max_seq_len
        );
    }
    let target = cli
        .output
        .as_ref()
        .map(|p| format!("  →  {}", bold(&p.display().to_string())))
        .unwrap_or_default();
    eprintln!(
        "{}  {} tokens  {}x{} → {}x{}  {}ms{}",
        green("✔"),
        output.stats.decode_steps,
        output.stats.input_width,
        output.stats.input_height,
        output.stats.final_width,
        output.stats.final_height,
        output.stats.total_ms,
        target,
    );
    Ok(())
}

/// Map CLI args to `RecognitionConfig`.
fn build_config(cli: &Cli) -> Result<RecognitionConfig> {
    let mut models = match cli.models_url {
        Some(ref url) => ModelSources::from_base_url(url),
        None => ModelSources::from_dir(&cli.models_dir),
    };
    for (slot, flag) in [
        (&mut models.resizer, &cli.resizer),
        (&mut models.encoder, &cli.encoder),
        (&mut models.decoder, &cli.decoder),
        (&mut models.tokenizer, &cli.tokenizer),
    ] {
        if let Some(source) = flag {
            *slot = source.clone();
        }
    }

    let mut builder = RecognitionConfig::builder()
        .models(models)
        .max_width(cli.max_width)
        .max_height(cli.max_height)
        .max_seq_len(cli.max_seq_len)
        .download_timeout_secs(cli.download_timeout)
        .render_mode(if cli.inline {
            RenderMode::Inline
        } else {
            RenderMode::Display
        });
    if let Some(ref dir) = cli.cache_dir {
        builder = builder.cache_dir(dir);
    }
    if let Some(n) = cli.threads {
        builder = builder.intra_threads(n);
    }

    builder.build().context("Invalid configuration")
}
