//! CLI binary for flux-convert.
//!
//! A thin shim over the library crate: maps CLI flags to `PipelineConfig`,
//! drives one `Session` submission, and saves the resulting artifact.

use anyhow::{Context, Result};
use clap::Parser;
use flux_convert::{
    FormatPair, FormatTag, LoadPolicy, PipelineConfig, SelectedFile, Session, ViewState,
    KNOWN_FORMATS,
};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing::warn;
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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert next to the input (scene.ply -> scene.spz)
  flux-convert scene.ply --to spz

  # Explicit output; formats taken from both extensions
  flux-convert scene.ply -o out/scene.splat

  # Use a specific engine library, never retry a failed load
  flux-convert --engine-lib ./libflux_engine.so --load-policy poison cloud.csv --to ply

  # Machine-readable result
  flux-convert --json scene.ply --to spz

KNOWN FORMATS:
  ply, spz, splat, csv   (other tags are passed to the engine unchanged)

ENVIRONMENT VARIABLES:
  FLUX_ENGINE_LIB_PATH    Path to an existing engine library
  FLUX_ENGINE_URL         Base URL hosting flux-engine-{os}-{arch}.tgz archives
  FLUX_ENGINE_CACHE_DIR   Override the default engine cache directory
  FLUX_LOAD_POLICY        retry (default) or poison

ENGINE DISCOVERY:
  The engine library is looked up on first use: --engine-lib, then
  FLUX_ENGINE_LIB_PATH, then the cache (~/.cache/flux-convert/engine-abi1/ on
  Linux), then a download from --engine-url when one is configured.
"#;

/// Convert a file between formats using the flux native engine.
#[derive(Parser, Debug)]
#[command(
    name = "flux-convert",
    version,
    about = "Convert a file between formats using the flux native engine",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// File to convert.
    input: PathBuf,

    /// Write the converted file here instead of next to the input.
    #[arg(short, long, env = "FLUX_OUTPUT")]
    output: Option<PathBuf>,

    /// Source format tag. Defaults to the input's extension.
    #[arg(long = "from", value_name = "FMT")]
    from: Option<String>,

    /// Target format tag. Defaults to the output's extension.
    #[arg(long = "to", value_name = "FMT")]
    to: Option<String>,

    /// Path to the engine library.
    #[arg(long, env = "FLUX_ENGINE_LIB_PATH", value_name = "PATH")]
    engine_lib: Option<PathBuf>,

    /// Base URL to download the engine from when it is not cached.
    #[arg(long, env = "FLUX_ENGINE_URL", value_name = "URL")]
    engine_url: Option<String>,

    /// Cache directory for downloaded engines.
    #[arg(long, env = "FLUX_ENGINE_CACHE_DIR", value_name = "DIR")]
    engine_cache_dir: Option<PathBuf>,

    /// What a failed engine load means for later requests: retry or poison.
    #[arg(long, env = "FLUX_LOAD_POLICY", default_value = "retry")]
    load_policy: LoadPolicy,

    /// Print the final view state as JSON instead of a summary.
    #[arg(long, env = "FLUX_JSON")]
    json: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "FLUX_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "FLUX_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_spinner = !cli.quiet && !cli.json;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_log_filter(&cli))),
        )
        .with_writer(io::stderr)
        .init();

    let formats = resolve_formats(&cli)?;
    for tag in [&formats.source, &formats.target] {
        if !tag.is_known() {
            warn!("format '{tag}' is not one of {KNOWN_FORMATS:?}; passing it through");
        }
    }

    let config = build_config(&cli)?;

    // ── Make sure the engine is on disk ─────────────────────────────────
    // The worker would download it lazily anyway; doing it here lets the
    // download show a real progress bar.
    let source = config.engine_source();
    if source.download_base_url.is_some() && engine_auto::cached_engine_path(&source).is_none() {
        if show_spinner {
            let dl_bar = ProgressBar::new(0);
            dl_bar.set_style(
                ProgressStyle::with_template(
                    "{spinner:.cyan} {prefix:.bold}  \
                     [{bar:42.green/238}] {bytes}/{total_bytes}  ETA {eta_precise}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▉▊▋▌▍▎▏  ")
                .tick_strings(TICKS),
            );
            dl_bar.set_prefix("Engine");
            dl_bar.enable_steady_tick(Duration::from_millis(80));

            let bar = dl_bar.clone();
            tokio::task::block_in_place(|| {
                engine_auto::ensure_engine_library(
                    &source,
                    Some(&|downloaded, total| {
                        if let Some(t) = total {
                            if bar.length().unwrap_or(0) != t {
                                bar.set_length(t);
                            }
                        }
                        bar.set_position(downloaded);
                    }),
                )
            })
            .context("Failed to download the conversion engine")?;

            dl_bar.finish_with_message("ready");
        } else {
            tokio::task::block_in_place(|| engine_auto::ensure_engine_library(&source, None))
                .context("Failed to download the conversion engine")?;
        }
    }

    // ── Run the conversion ───────────────────────────────────────────────
    let started = Instant::now();
    let session = Session::launch(&config).context("Failed to start the conversion worker")?;
    session
        .select_file(SelectedFile::from_path(&cli.input))
        .context("Failed to select input")?;
    session
        .submit(formats.clone())
        .await
        .context("Submission rejected")?;

    let view = if show_spinner {
        follow_with_spinner(&session).await
    } else {
        session.settled().await.context("Conversion session stopped")?
    };

    // ── Save and report ──────────────────────────────────────────────────
    let saved = match view.artifact {
        Some(ref artifact) => {
            let path = output_path(&cli, artifact.file_name());
            artifact
                .save_to(&path)
                .with_context(|| format!("Failed to save {}", path.display()))?;
            Some(path)
        }
        None => None,
    };

    if cli.json {
        let json = serde_json::to_string_pretty(&view).context("Failed to serialise view")?;
        println!("{json}");
    }

    match saved {
        Some(path) => {
            if !cli.quiet && !cli.json {
                let size = view.artifact.as_ref().map_or(0, |a| a.len());
                eprintln!(
                    "{} {}  {}  {}",
                    green("✔"),
                    bold(&path.display().to_string()),
                    dim(&format!("{size} bytes")),
                    dim(&format!("{}ms", started.elapsed().as_millis())),
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        None => {
            if !cli.json {
                eprintln!("{} {}", red("✘"), view.status);
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Render status changes on a spinner until the session settles.
async fn follow_with_spinner(session: &Session) -> ViewState {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS),
    );
    spinner.set_prefix("flux");
    spinner.enable_steady_tick(Duration::from_millis(80));

    let mut updates = session.updates();
    let mut last = session.view();
    while let Some(view) = updates.next().await {
        spinner.set_message(view.status.clone());
        let done = !view.busy;
        last = view;
        if done {
            break;
        }
    }
    spinner.finish_and_clear();
    last
}

/// Work out the format pair from flags and file extensions.
/// Library INFO logs would fight with the spinner, so it only lets WARN
/// through. Engine load failures are logged at that level.
fn default_log_filter(cli: &Cli) -> &'static str {
    if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else if !cli.json {
        "warn"
    } else {
        "info"
    }
}

fn resolve_formats(cli: &Cli) -> Result<FormatPair> {
    let source = match cli.from {
        Some(ref tag) => tag.clone(),
        None => extension_of(&cli.input).with_context(|| {
            format!(
                "Cannot infer the source format of '{}'; pass --from",
                cli.input.display()
            )
        })?,
    };
    let target = match (cli.to.as_ref(), cli.output.as_deref()) {
        (Some(tag), _) => tag.clone(),
        (None, Some(out)) => extension_of(out).with_context(|| {
            format!(
                "Cannot infer the target format of '{}'; pass --to",
                out.display()
            )
        })?,
        (None, None) => anyhow::bail!("Either --to or -o/--output is required"),
    };
    Ok(FormatPair::new(FormatTag::new(source), FormatTag::new(target)))
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .filter(|e| !e.is_empty())
}

/// `-o` if given, else the artifact name next to the input.
fn output_path(cli: &Cli, artifact_name: &str) -> PathBuf {
    match cli.output {
        Some(ref out) => out.clone(),
        None => cli
            .input
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(artifact_name),
    }
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder().load_policy(cli.load_policy);
    if let Some(ref lib) = cli.engine_lib {
        builder = builder.engine_library(lib);
    }
    if let Some(ref url) = cli.engine_url {
        builder = builder.engine_url(url);
    }
    if let Some(ref dir) = cli.engine_cache_dir {
        builder = builder.engine_cache_dir(dir);
    }
    builder.build().context("Invalid configuration")
}
