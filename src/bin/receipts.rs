//! CLI binary for edgequake-receipts.
//!
//! A thin shim over the library crate that maps CLI flags to `IngestConfig`
//! and prints records as JSON on stdout. Progress and tallies go to stderr.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use edgequake_receipts::pipeline::input::load_image;
use edgequake_receipts::pipeline::normalize::normalize;
use edgequake_receipts::progress::ProgressCallback;
use edgequake_receipts::schema::{self, Schema};
use edgequake_receipts::{
    summarize, BatchOutput, CancelToken, CatalogEntry, DateRange, IngestConfig,
    IngestProgressCallback, Ingestor, SummaryItem,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress bar for batches. Items may finish out of order when
/// `--concurrency` is above 1.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        let bar = ProgressBar::new(0);
        bar.set_style(style);
        bar.set_prefix("Ingesting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }
}

impl IngestProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize) {
        self.bar.set_length(total as u64);
    }

    fn on_item_start(&self, _index: usize, _total: usize, label: &str) {
        self.bar.set_message(label.to_string());
    }

    fn on_item_complete(&self, index: usize, total: usize) {
        self.bar
            .println(format!("  {} {:>3}/{:<3}", green("✓"), index + 1, total));
        self.bar.inc(1);
    }

    fn on_item_error(&self, index: usize, total: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        // Keep the log line on one terminal row.
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}",
            red("✗"),
            index + 1,
            total,
            red(&msg)
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, _total: usize, _succeeded: usize) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Receipt photo → JSON (tesseract is used when installed)
  receipts receipt photo.jpg

  # Several photos, linked against a catalog
  receipts receipt a.jpg b.jpg https://example.com/c.png --catalog foods.json

  # Typed receipt text
  receipts receipt --text receipt.txt

  # Nutrition label photo (values per 100 g)
  receipts label label.jpg

  # Estimate nutrition by name
  receipts estimate "rye bread" "oat milk"

  # Match a name against the catalog without any network call
  receipts resolve "ORG BANANAS" --catalog foods.json

  # Re-normalise a saved model response
  receipts normalize response.txt --kind nutrition

  # Nutrition totals and daily average for a week
  receipts summarize items.json --from 2024-03-01 --to 2024-03-07

CATALOG FORMAT:
  [{"id": "1", "name": "Whole Milk"}, {"id": "2", "name": "Rye Bread"}]

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
"#;

/// Turn receipt and nutrition-label photos into JSON records using OCR and LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "receipts",
    version,
    about = "Turn receipt and nutrition-label photos into JSON records using OCR and LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    global: GlobalArgs,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, global = true, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Response-size budget per call, in tokens.
    #[arg(long, global = true, env = "RECEIPTS_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, global = true, env = "RECEIPTS_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Per-call LLM timeout in seconds.
    #[arg(long, global = true, env = "RECEIPTS_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// HTTP download timeout for image URLs, in seconds.
    #[arg(long, global = true, env = "RECEIPTS_DOWNLOAD_TIMEOUT", default_value_t = 60)]
    download_timeout: u64,

    /// Minimum containment score for a local catalog match (0.0–1.0).
    #[arg(long, global = true, env = "RECEIPTS_MATCH_THRESHOLD", default_value_t = 0.6)]
    match_threshold: f64,

    /// Batch items processed at once.
    #[arg(short, long, global = true, env = "RECEIPTS_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Tesseract language code(s), e.g. eng or eng+deu.
    #[arg(long, global = true, env = "RECEIPTS_OCR_LANG", default_value = "eng")]
    ocr_lang: String,

    /// Disable the progress bar.
    #[arg(long, global = true, env = "RECEIPTS_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "RECEIPTS_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "RECEIPTS_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract receipts from photos (paths or URLs) or typed text.
    Receipt {
        /// Receipt images: local paths or HTTP/HTTPS URLs.
        #[arg(required_unless_present = "text")]
        inputs: Vec<String>,

        /// Read a typed receipt from this file ("-" for stdin) instead of images.
        #[arg(long, conflicts_with = "inputs")]
        text: Option<PathBuf>,

        /// Catalog JSON to link items against.
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Send images without recognised text.
        #[arg(long)]
        no_ocr: bool,
    },
    /// Read a nutrition-facts label photo.
    Label {
        /// Label image: local path or HTTP/HTTPS URL.
        input: String,
    },
    /// Estimate per-100 g nutrition for foods by name.
    Estimate {
        /// Food names.
        #[arg(required_unless_present = "catalog")]
        names: Vec<String>,

        /// Estimate every entry of this catalog JSON instead.
        #[arg(long, conflicts_with = "names")]
        catalog: Option<PathBuf>,
    },
    /// Match a name against a catalog (local scoring, or `--remote` to ask the model).
    Resolve {
        name: String,

        #[arg(long)]
        catalog: PathBuf,

        /// Ask the model when the local match finds nothing.
        #[arg(long)]
        remote: bool,
    },
    /// Normalise a saved model response offline.
    Normalize {
        /// Raw response file; stdin when absent.
        file: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "receipt")]
        kind: ResponseKind,
    },
    /// Print recognised text of an image (tesseract).
    Ocr {
        input: String,
    },
    /// Sum nutrition over line items and average it per day.
    Summarize {
        /// JSON array of items: {grams, date, nutrition?, skipped?, excluded?}.
        items: PathBuf,

        #[arg(long, requires = "to")]
        from: Option<NaiveDate>,

        #[arg(long, requires = "from")]
        to: Option<NaiveDate>,

        /// Leave out items whose catalog entry is flagged "excluded".
        #[arg(long)]
        exclude_flagged: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ResponseKind {
    Receipt,
    Nutrition,
    Estimate,
    Match,
}

impl ResponseKind {
    fn schema(self) -> &'static Schema {
        match self {
            ResponseKind::Receipt => &schema::RECEIPT,
            ResponseKind::Nutrition => &schema::NUTRITION_LABEL,
            ResponseKind::Estimate => &schema::NUTRITION_ESTIMATE,
            ResponseKind::Match => &schema::FOOD_MATCH,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let g = &cli.global;

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if g.verbose {
        "debug"
    } else if g.quiet {
        "error"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // Ctrl-C abandons the in-flight model call; nothing partial is printed.
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling");
                cancel.cancel();
            }
        });
    }

    match &cli.command {
        // ── Offline commands ─────────────────────────────────────────────
        Command::Normalize { file, kind } => {
            let raw = read_text(file.as_deref()).await?;
            let value = normalize(&raw, kind.schema()).context("Could not normalise response")?;
            print_json(&value)?;
        }
        Command::Resolve {
            name,
            catalog,
            remote: false,
        } => {
            let catalog = read_catalog(catalog).await?;
            let result = edgequake_receipts::resolve_with_threshold(
                name,
                &catalog,
                g.match_threshold.clamp(0.0, 1.0),
            );
            print_json(&result)?;
        }
        Command::Summarize {
            items,
            from,
            to,
            exclude_flagged,
        } => {
            let text = tokio::fs::read_to_string(items)
                .await
                .with_context(|| format!("Failed to read {}", items.display()))?;
            let items: Vec<SummaryItem> =
                serde_json::from_str(&text).context("Items file is not a JSON array of items")?;
            let range = match (from, to) {
                (Some(a), Some(b)) => Some(DateRange::new(*a, *b)),
                _ => None,
            };
            let summary = summarize(&items, range, *exclude_flagged);

            #[derive(Serialize)]
            #[serde(rename_all = "camelCase")]
            struct Report<'a> {
                #[serde(flatten)]
                summary: &'a edgequake_receipts::NutritionSummary,
                daily_average: edgequake_receipts::NutritionFacts,
            }
            print_json(&Report {
                summary: &summary,
                daily_average: summary.daily_average(),
            })?;
        }

        // ── Commands that call the model ─────────────────────────────────
        Command::Receipt {
            inputs,
            text,
            catalog,
            no_ocr,
        } => {
            let catalog = match catalog {
                Some(path) => Some(read_catalog(path).await?),
                None => None,
            };
            let show_progress = !g.quiet && !g.no_progress && inputs.len() > 1;
            let mut ingestor = build_ingestor(g, show_progress).await?;
            if *no_ocr {
                ingestor = ingestor.without_recognizer();
            }

            if let Some(path) = text {
                let text = read_text(Some(path.as_path())).await?;
                let mut receipt = ingestor
                    .receipt_from_text(&text, &cancel)
                    .await
                    .context("Receipt extraction failed")?;
                if let Some(ref catalog) = catalog {
                    ingestor.link_receipt(&mut receipt, catalog);
                }
                print_json(&receipt)?;
            } else {
                let mut output = ingestor.receipts_from_inputs(inputs, &cancel).await;
                if let Some(ref catalog) = catalog {
                    for item in output.items.iter_mut() {
                        if let Ok(receipt) = item.outcome.as_mut() {
                            ingestor.link_receipt(receipt, catalog);
                        }
                    }
                }
                finish_batch(&output, g.quiet)?;
            }
        }
        Command::Label { input } => {
            let ingestor = build_ingestor(g, false).await?;
            let image = load_image(input, g.download_timeout)
                .await
                .context("Failed to load label image")?;
            let record = ingestor
                .nutrition_from_label(&image, &cancel)
                .await
                .context("Label extraction failed")?;
            print_json(&record)?;
        }
        Command::Estimate { names, catalog } => {
            let entries = match catalog {
                Some(path) => read_catalog(path).await?,
                None => names
                    .iter()
                    .map(|n| CatalogEntry::new(n.as_str(), n.as_str()))
                    .collect(),
            };
            let show_progress = !g.quiet && !g.no_progress && entries.len() > 1;
            let ingestor = build_ingestor(g, show_progress).await?;
            let output = ingestor.estimate_batch(&entries, &cancel).await;
            finish_batch(&output, g.quiet)?;
        }
        Command::Resolve {
            name,
            catalog,
            remote: true,
        } => {
            let catalog = read_catalog(catalog).await?;
            let ingestor = build_ingestor(g, false).await?;
            let result = ingestor
                .match_food(name, &catalog, &cancel)
                .await
                .context("Matching failed")?;
            print_json(&result)?;
        }
        Command::Ocr { input } => {
            let ingestor = build_ingestor(g, false).await?;
            let image = load_image(input, g.download_timeout)
                .await
                .context("Failed to load image")?;
            let text = ingestor
                .recognize_text(&image)
                .await
                .context("Text recognition failed")?;
            println!("{text}");
        }
    }

    Ok(())
}

/// Map CLI args to `IngestConfig` and build an `Ingestor`.
async fn build_ingestor(g: &GlobalArgs, show_progress: bool) -> Result<Ingestor> {
    let mut builder = IngestConfig::builder()
        .max_tokens(g.max_tokens)
        .temperature(g.temperature)
        .api_timeout_secs(g.api_timeout)
        .download_timeout_secs(g.download_timeout)
        .match_threshold(g.match_threshold)
        .concurrency(g.concurrency)
        .ocr_language(g.ocr_lang.clone());

    if let Some(ref model) = g.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = g.provider {
        builder = builder.provider_name(provider.clone());
    }
    if show_progress {
        let cb: ProgressCallback = CliProgressCallback::new();
        builder = builder.progress_callback(cb);
    }

    let config = builder.build().context("Invalid configuration")?;
    Ingestor::from_config(config)
        .await
        .context("Failed to set up the LLM provider")
}

/// Print successful records as a JSON array and the tally on stderr.
fn finish_batch<T: Serialize>(output: &BatchOutput<T>, quiet: bool) -> Result<()> {
    let records: Vec<&T> = output.records().collect();
    print_json(&records)?;

    if !quiet {
        for err in output.errors() {
            eprintln!("{} {}", red("✗"), err);
        }
        eprintln!(
            "{} {}/{} succeeded{}",
            if output.failed == 0 {
                green("✔")
            } else if output.succeeded == 0 {
                red("✘")
            } else {
                cyan("⚠")
            },
            bold(&output.succeeded.to_string()),
            output.total(),
            if output.failed > 0 {
                format!("  ({} failed)", red(&output.failed.to_string()))
            } else {
                String::new()
            }
        );
    }

    if output.succeeded == 0 && output.failed > 0 {
        anyhow::bail!("All {} items failed", output.failed);
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialise output")?;
    println!("{json}");
    Ok(())
}

/// Read a file, or stdin when `path` is `None` or `-`.
async fn read_text(path: Option<&Path>) -> Result<String> {
    match path {
        Some(p) if p != Path::new("-") => tokio::fs::read_to_string(p)
            .await
            .with_context(|| format!("Failed to read {}", p.display())),
        _ => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            Ok(buf)
        }
    }
}

async fn read_catalog(path: &Path) -> Result<Vec<CatalogEntry>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read catalog {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Catalog {} is not a JSON array of {{id, name}}", path.display()))
}
