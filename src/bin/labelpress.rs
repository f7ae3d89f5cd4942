//! CLI binary for labelpress.
//!
//! A thin shim over the library crate: reads the ZPL export and the JSON
//! side files, maps flags to `PipelineConfig`, writes sheets and the updated
//! print ledger.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use labelpress::process::write_atomic;
use labelpress::{
    process_batch_to_dir, BatchInput, BatchProgressCallback, BatchSummary, LayoutConfig,
    OrderBook, PairingMode, PipelineConfig, PrintLedger, PrintLedgerEntry,
    ProcessingMode, ProgressCallback, SkuLinkTable,
};
use serde::de::DeserializeOwned;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar advanced per finished chunk, with a
/// log line for every page that failed to render.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_batch_start` tells us how many pages there are.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading labels…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>4}/{len} pages  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Rendering");
        self.bar.reset_eta();
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_pages: usize, mode: ProcessingMode) {
        self.activate_bar(total_pages);
        let mode = match mode {
            ProcessingMode::Full => "",
            ProcessingMode::FastLabelOnly => " (labels only)",
        };
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Rendering {total_pages} pages{mode}…"))
        ));
    }

    fn on_progress(&self, completed: usize, _total: usize, message: &str) {
        self.bar.set_position(completed as u64);
        self.bar.set_message(message.to_string());
    }

    fn on_page_error(&self, slot: usize, total: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(['…']).collect()
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Page {:>4}/{:<4}  {}",
            red("✗"),
            slot + 1,
            total,
            red(&msg),
        ));
    }

    fn on_batch_complete(&self, summary: &BatchSummary) {
        self.bar.finish_and_clear();
        let failed = self.errors.load(Ordering::SeqCst);
        if failed == 0 {
            eprintln!(
                "{} {} pages rendered",
                green("✔"),
                bold(&summary.rendered_pages.to_string())
            );
        } else {
            eprintln!(
                "{} {} pages rendered  ({} failed)",
                cyan("⚠"),
                bold(&summary.rendered_pages.to_string()),
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Render a marketplace export into ./out
  labelpress labels.zpl -o out

  # Link SKUs to the catalog and skip labels printed before
  labelpress labels.zpl --sku-links links.json --ledger printed.json

  # Labels only, no invoices rendered
  labelpress --fast --no-invoice labels.zpl

  # Machine-readable summary
  labelpress --json labels.zpl > summary.json

FILE FORMATS:
  --sku-links   {"SKU-A": {"master_sku": "KIT-1", "multiplier": 2, "display_name": "Mug"}}
  --orders      [{"order_reference": "2000123", "buyer_name": "Ana", "shipping_method": "Flex"}]
  --ledger      [{"content_hash": "<sha256>", "first_seen_at": "2026-01-01T00:00:00Z"}]
  --layout      {"pair_layout": "Vertical", "include_invoice": true, "footer": {...}}

  A missing ledger file is treated as an empty ledger and created on exit.
"#;

/// Split, pair and render marketplace shipping labels.
#[derive(Parser, Debug)]
#[command(
    name = "labelpress",
    version,
    about = "Split, pair and render marketplace ZPL shipping labels",
    long_about = "Turn a concatenated ZPL shipping-label export into printable sheets. \
Invoices are paired with their labels, SKUs are linked to the catalog and printed in a \
footer under each label, and labels printed before are flagged as reprints.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// ZPL file holding one or more ^XA…^XZ documents.
    input: PathBuf,

    /// Directory for page PNGs and manifest.json.
    #[arg(short, long, env = "LABELPRESS_OUTPUT", default_value = "out")]
    output: PathBuf,

    /// JSON map of SKU → link (master SKU, multiplier, display name).
    #[arg(long, env = "LABELPRESS_SKU_LINKS")]
    sku_links: Option<PathBuf>,

    /// JSON array of known orders.
    #[arg(long, env = "LABELPRESS_ORDERS")]
    orders: Option<PathBuf>,

    /// JSON print ledger; read before and rewritten after the batch.
    #[arg(long, env = "LABELPRESS_LEDGER")]
    ledger: Option<PathBuf>,

    /// JSON layout overrides (sheet, pair layout, footer).
    #[arg(long, env = "LABELPRESS_LAYOUT")]
    layout: Option<PathBuf>,

    /// Do not rasterise invoice pages.
    #[arg(long, env = "LABELPRESS_FAST")]
    fast: bool,

    /// Treat every non-invoice document as a standalone label.
    #[arg(long, env = "LABELPRESS_LABEL_ONLY")]
    label_only: bool,

    /// Leave invoice pages out of the output sheets.
    #[arg(long, env = "LABELPRESS_NO_INVOICE")]
    no_invoice: bool,

    /// Pages per render chunk.
    #[arg(long, env = "LABELPRESS_CHUNK_SIZE", default_value_t = 24)]
    chunk_size: usize,

    /// Pages rasterised at once.
    #[arg(short, long, env = "LABELPRESS_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Print the batch summary as JSON.
    #[arg(long, env = "LABELPRESS_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "LABELPRESS_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "LABELPRESS_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "LABELPRESS_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs unless --verbose is given.
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

    // ── Read inputs ──────────────────────────────────────────────────────
    let started = Instant::now();
    let markup = tokio::fs::read_to_string(&cli.input)
        .await
        .with_context(|| format!("Failed to read {}", cli.input.display()))?;

    let sku_links: SkuLinkTable = match cli.sku_links {
        Some(ref path) => read_json(path).await?,
        None => SkuLinkTable::new(),
    };
    let orders: OrderBook = match cli.orders {
        Some(ref path) => read_json(path).await?,
        None => OrderBook::new(),
    };
    let mut ledger = match cli.ledger {
        Some(ref path) if path.exists() => {
            let history: Vec<PrintLedgerEntry> = read_json(path).await?;
            PrintLedger::from_history(history)
        }
        _ => PrintLedger::new(),
    };

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb).await?;

    // ── Run batch ────────────────────────────────────────────────────────
    let input = BatchInput::new(markup)
        .with_sku_links(sku_links)
        .with_orders(orders);
    let output = process_batch_to_dir(&input, &mut ledger, &config, &cli.output)
        .await
        .context("Batch failed")?;

    // ── Persist ledger ───────────────────────────────────────────────────
    if let Some(ref path) = cli.ledger {
        let json = serde_json::to_vec_pretty(&ledger.entries()).context("Failed to serialise ledger")?;
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .context("Ledger path has no file name")?;
        write_atomic(dir, name, &json)
            .with_context(|| format!("Failed to write ledger {}", path.display()))?;
    }

    // ── Report ───────────────────────────────────────────────────────────
    let s = &output.summary;
    if cli.json {
        let json = serde_json::to_string_pretty(s).context("Failed to serialise summary")?;
        println!("{json}");
    } else if !cli.quiet {
        eprintln!(
            "{}  {} documents → {} units → {} sheets  {}ms  →  {}",
            if s.failed_pages == 0 { green("✔") } else { cyan("⚠") },
            s.documents,
            s.shipment_units,
            s.sheets,
            started.elapsed().as_millis(),
            bold(&cli.output.display().to_string()),
        );
        eprintln!(
            "   {} new labels  /  {} reprints  /  {} unresolved SKUs",
            dim(&output.new_hashes.len().to_string()),
            dim(&s.reprints.to_string()),
            dim(&s.unresolved_skus.to_string()),
        );
        if s.embedded_invoices_detected {
            eprintln!(
                "   {}",
                dim("Labels embed their invoice; consider --no-invoice")
            );
        }
        for w in &s.warnings {
            eprintln!("   {} {} ×{}: {}", cyan("!"), w.kind, w.occurrences, w.message);
        }
    }

    Ok(())
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("Invalid JSON in {}", path.display()))
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let layout: LayoutConfig = match cli.layout {
        Some(ref path) => read_json(path).await?,
        None => LayoutConfig::default(),
    };

    let mut builder = PipelineConfig::builder()
        .layout(layout)
        .chunk_size(cli.chunk_size)
        .concurrency(cli.concurrency)
        .mode(if cli.fast {
            ProcessingMode::FastLabelOnly
        } else {
            ProcessingMode::Full
        })
        .pairing(if cli.label_only {
            PairingMode::LabelOnly
        } else {
            PairingMode::Paired
        });

    if cli.no_invoice {
        builder = builder.include_invoice(false);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
