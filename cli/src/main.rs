use anyhow::{anyhow, bail, Context};
use clap::Parser;
use colored::*;
use std::process;

use httpinject_core::{ConsoleSink, FindingStore, FuzzConfig, FuzzEngine, SinkRef};

/// Exit status when the run stored at least one new finding.
const EXIT_NEW_FINDINGS: i32 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "httpinject",
    version,
    about = "HTTP anomaly injector with finding deduplication",
    after_help = "\x1b[1;36mEXAMPLES:\x1b[0m
  Fuzz the configured targets:    httpinject -c fuzz.json --db findings.sqlite
  More dynamic anomalies:         httpinject -c fuzz.json --db findings.sqlite --anomalies 50
  Static payloads only:           httpinject -c fuzz.json --db findings.sqlite --anomalies 0
  Plan without sending:           httpinject -c fuzz.json --dry-run
  Review new findings:            httpinject --db findings.sqlite --list-new
  Acknowledge new findings:       httpinject --db findings.sqlite --mark-processed

\x1b[1;36mEXIT STATUS:\x1b[0m
  0 no new findings, 2 new findings stored, 1 fatal error"
)]
pub struct Args {
    #[arg(short = 'c', long, required_unless_present = "db", help = "JSON configuration file")]
    pub config: Option<String>,

    #[arg(long, help = "SQLite findings database (\":memory:\" for a throwaway one)")]
    pub db: Option<String>,

    #[arg(long, help = "Path to the radamsa binary")]
    pub radamsa: Option<String>,

    #[arg(short = 'n', long, help = "Dynamic anomaly rounds per target (0 disables radamsa)")]
    pub anomalies: Option<usize>,

    #[arg(long, default_value_t = false, help = "Skip the built-in static payloads")]
    pub no_static: bool,

    #[arg(short = 'p', long, help = "Add a list of static payloads from a file")]
    pub payloads: Option<String>,

    #[arg(long, help = "Request timeout in seconds")]
    pub timeout: Option<u64>,

    #[arg(long, help = "Proxy URL (e.g. http://127.0.0.1:8080)")]
    pub proxy: Option<String>,

    #[arg(short = 'H', long = "header", help = "Custom header (e.g. \"Authorization: Bearer TOKEN\")")]
    pub headers: Vec<String>,

    #[arg(short = 'o', long, help = "Append new findings as JSON lines to this file")]
    pub output: Option<String>,

    #[arg(long, help = "Print the request plan without sending anything")]
    pub dry_run: bool,

    #[arg(long, help = "Mark every new finding in the database as processed")]
    pub mark_processed: bool,

    #[arg(long, help = "List findings not yet marked as processed")]
    pub list_new: bool,

    #[arg(short = 'v', long, default_value_t = false, help = "Debug logging")]
    pub verbose: bool,
}

#[tokio::main]
async fn main() {
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let code = match run(&args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", format!("[!] {:#}", e).red());
            1
        }
    };
    process::exit(code);
}

async fn run(args: &Args) -> anyhow::Result<i32> {
    let config = load_config(args)?;
    let sink = ConsoleSink::new_ref();

    if args.list_new || args.mark_processed {
        manage_findings(&config, args, &sink)?;
        return Ok(0);
    }

    if config.targets.is_empty() {
        bail!("No targets configured");
    }

    print_run_config(&config, args);

    let mut engine = FuzzEngine::from_config(&config, sink.clone()).await?;

    if args.dry_run {
        for plan in engine.dry_run() {
            println!(
                "[DRY RUN] {}: {} variant(s) x {} round(s) x {} method(s) = {} request(s)",
                plan.scenario_id,
                plan.variants_per_round,
                plan.dynamic_rounds + plan.static_rounds,
                plan.methods.len(),
                plan.requests
            );
        }
        return Ok(0);
    }

    let summary = engine.run().await?;
    Ok(if summary.has_new_findings() { EXIT_NEW_FINDINGS } else { 0 })
}

/// Config file values, then command-line overrides.
fn load_config(args: &Args) -> anyhow::Result<FuzzConfig> {
    let mut config = match &args.config {
        Some(path) => FuzzConfig::load(path).with_context(|| format!("Failed to load config '{}'", path))?,
        None => FuzzConfig::default(),
    };

    if let Some(db) = &args.db {
        config.database = Some(db.clone());
    }
    if let Some(radamsa) = &args.radamsa {
        config.radamsa_path = Some(radamsa.clone());
    }
    if let Some(anomalies) = args.anomalies {
        config.anomalies = anomalies;
    }
    if args.no_static {
        config.static_anomalies = false;
    }
    if let Some(payloads) = &args.payloads {
        config.static_payloads = Some(payloads.clone());
    }
    if let Some(timeout) = args.timeout {
        config.timeout_seconds = timeout;
    }
    if let Some(proxy) = &args.proxy {
        config.proxy = proxy.clone();
    }
    if !args.headers.is_empty() {
        let extra = args.headers.join(";");
        config.headers = if config.headers.is_empty() {
            extra
        } else {
            format!("{};{}", config.headers, extra)
        };
    }
    if let Some(output) = &args.output {
        config.output = Some(output.clone());
    }
    Ok(config)
}

fn manage_findings(config: &FuzzConfig, args: &Args, sink: &SinkRef) -> anyhow::Result<()> {
    let db = config
        .database
        .as_deref()
        .ok_or_else(|| anyhow!("--list-new and --mark-processed need a findings database (--db)"))?;
    let mut store = FindingStore::init(Some(db))?;

    if args.list_new {
        let findings = store.new_findings()?;
        for finding in &findings {
            sink.on_finding(finding);
        }
        sink.on_log("phase", &format!("[*] {} new finding(s) in {}", findings.len(), db));
    }

    if args.mark_processed {
        let marked = store.mark_all_processed()?;
        sink.on_log("success", &format!("[+] Marked {} finding(s) as processed", marked));
    }
    Ok(())
}

fn print_run_config(config: &FuzzConfig, args: &Args) {
    println!("{}", format!("[+] Targets:    {}", config.targets.len()).green().bold());
    println!("{}", format!("[+] Methods:    {}", config.methods.join(", ")).blue());
    println!("{}", format!("[+] Anomalies:  {}", config.anomalies).blue());
    println!(
        "{}",
        format!("[+] Static:     {}", if config.static_anomalies { "ON" } else { "OFF" }).blue()
    );
    println!("{}", format!("[+] Timeout:    {}s", config.timeout_seconds).blue());
    match &config.database {
        Some(db) => println!("{}", format!("[+] Database:   {}", db).magenta()),
        None => println!("{}", "[!] Database:   none, any finding aborts the run".yellow()),
    }
    if let Some(proxy) = config.proxy_ref() {
        println!("{}", format!("[+] Proxy:      {}", proxy).yellow());
    }
    if args.verbose {
        println!("{}", "[+] Verbose:    ON".magenta());
    }
    println!("{}", "──────────────────────────────────────────────────".dimmed());
}
