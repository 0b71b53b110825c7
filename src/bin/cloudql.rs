//! cloudql: SQL over cloud provider APIs
//!
//! # Usage
//!
//! ```bash
//! # Run a query
//! cloudql exec "SELECT name, status FROM google.compute.instances WHERE project = 'p' AND zone = 'z'"
//!
//! # Run a file of statements
//! cloudql exec --infile deploy.iql
//!
//! # Show the plan without sending anything
//! cloudql explain "DELETE FROM compute.networks WHERE project = 'p' AND network = 'n'"
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use cloudql::output::table_lines;
use cloudql::prelude::*;
use colored::*;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cloudql")]
#[command(author = "cloudql contributors")]
#[command(version)]
#[command(about = "Query cloud provider REST APIs with SQL", long_about = None)]
#[command(after_help = "EXAMPLES:
    cloudql exec \"SHOW SERVICES IN google LIKE 'comp%'\"
    cloudql exec --keyfilepath sa.json \"SELECT name FROM compute.networks WHERE project = 'p'\"
    cloudql --output csv exec --infile queries.iql")]
struct Cli {
    #[command(flatten)]
    flags: GlobalFlags,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one or more `;`-separated statements
    Exec {
        /// The statements to run
        query: Option<String>,

        /// Read statements from a file instead
        #[arg(short, long)]
        infile: Option<PathBuf>,
    },
    /// Interactive shell; statements end with `;`
    Shell,
    /// Show the plan for each statement without executing it
    Explain {
        /// The statements to explain
        query: String,
    },
}

#[derive(Args)]
struct GlobalFlags {
    /// Config file (default ~/.cloudql/config.toml)
    #[arg(long = "configfile", global = true)]
    config_file: Option<PathBuf>,

    /// Default provider for unqualified table names
    #[arg(long, global = true)]
    provider: Option<String>,

    /// Service account key file
    #[arg(long = "keyfilepath", env = "CLOUDQL_KEYFILE", global = true)]
    key_file_path: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, global = true)]
    output: Option<OutputFormat>,

    /// Write results to this file instead of stdout
    #[arg(long, global = true)]
    outfile: Option<PathBuf>,

    /// CSV field delimiter
    #[arg(long, global = true)]
    delimiter: Option<char>,

    /// Omit column headers
    #[arg(long = "hideheaders", global = true)]
    hide_headers: bool,

    /// Show the requests instead of sending them
    #[arg(long = "dryrun", global = true)]
    dry_run: bool,

    /// Where errors are rendered
    #[arg(long = "errorpresentation", value_enum, global = true)]
    error_presentation: Option<ErrorPresentation>,

    /// Log filter, e.g. `debug` or `cloudql=trace`
    #[arg(long = "loglevel", global = true)]
    log_level: Option<String>,

    /// Never fetch discovery documents over the network
    #[arg(long, global = true)]
    offline: bool,

    /// Root directory for cached discovery documents
    #[arg(long = "providerroot", global = true)]
    provider_root: Option<PathBuf>,

    /// Include non-preferred API versions
    #[arg(long = "usenonpreferredapis", global = true)]
    use_non_preferred_apis: bool,

    /// Seconds between polls of long-running operations
    #[arg(long = "pollinterval", global = true)]
    poll_interval: Option<u64>,

    /// Page size hint for SELECT
    #[arg(long = "maxresults", global = true)]
    max_results: Option<u64>,

    /// Maximum pages fetched per SELECT
    #[arg(long = "pagelimit", global = true)]
    page_limit: Option<u64>,

    /// Per-request timeout in seconds
    #[arg(long = "apirequesttimeout", global = true)]
    api_request_timeout: Option<u64>,

    /// Capacity of the plan cache
    #[arg(long = "querycachesize", global = true)]
    query_cache_size: Option<usize>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

impl GlobalFlags {
    fn into_config(self) -> Result<RuntimeConfig> {
        let mut config = match &self.config_file {
            Some(path) => RuntimeConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => RuntimeConfig::load_default()?,
        };
        if let Some(v) = self.provider {
            config.provider = v;
        }
        if let Some(v) = self.key_file_path {
            config.key_file_path = Some(v);
        }
        if let Some(v) = self.output {
            config.output = v;
        }
        if let Some(v) = self.outfile {
            config.outfile = Some(v);
        }
        if let Some(v) = self.delimiter {
            config.delimiter = v;
        }
        if let Some(v) = self.error_presentation {
            config.error_presentation = v;
        }
        if let Some(v) = self.log_level {
            config.log_level = v;
        }
        if let Some(v) = self.provider_root {
            config.provider_root = v;
        }
        if let Some(v) = self.poll_interval {
            config.poll_interval = v;
        }
        if let Some(v) = self.max_results {
            config.max_results = v;
        }
        if let Some(v) = self.page_limit {
            config.page_limit = v;
        }
        if let Some(v) = self.api_request_timeout {
            config.api_request_timeout = v;
        }
        if let Some(v) = self.query_cache_size {
            config.query_cache_size = v;
        }
        config.config_file = self.config_file.or(config.config_file);
        config.hide_headers |= self.hide_headers;
        config.dry_run |= self.dry_run;
        config.offline |= self.offline;
        config.use_non_preferred_apis |= self.use_non_preferred_apis;
        config.verbose |= self.verbose;
        Ok(config)
    }
}

fn init_logging(config: &RuntimeConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.flags.into_config()?;
    init_logging(&config);

    match cli.command {
        Commands::Exec { query, infile } => {
            let query = match (query, infile.or_else(|| config.infile.clone())) {
                (Some(q), _) => q,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?,
                (None, None) => anyhow::bail!("no query given; pass one or use --infile"),
            };
            if config.verbose {
                eprintln!("{} {}", "Input:".dimmed(), query.trim().yellow());
            }
            let mut printer = Printer::new(&config)?;
            let mut session = Session::new(config)?;
            let outputs = session.execute(&query).await;
            let failed = outputs.iter().any(ExecutorOutput::is_error);
            for output in &outputs {
                printer.print(output)?;
            }
            if failed {
                std::process::exit(1);
            }
        }
        Commands::Shell => run_shell(config).await?,
        Commands::Explain { query } => {
            let session = Session::new(config)?;
            println!("{}", "Plan:".green().bold());
            for line in session.explain(&query).await? {
                println!("  {}", line.white());
            }
        }
    }
    Ok(())
}

async fn run_shell(config: RuntimeConfig) -> Result<()> {
    println!("{}", "cloudql interactive shell".cyan().bold());
    println!("{}", "End statements with ';'. Type 'exit' or Ctrl+D to quit.".dimmed());

    let mut printer = Printer::new(&config)?;
    let mut session = Session::new(config)?;
    let stdin = std::io::stdin();
    let mut buffer = String::new();

    loop {
        let prompt = if buffer.is_empty() { "cloudql>> " } else { "       -> " };
        print!("{}", prompt.cyan());
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            println!();
            break;
        }
        let trimmed = line.trim();
        if buffer.is_empty() && matches!(trimmed, "exit" | "quit" | "\\q") {
            break;
        }
        buffer.push_str(&line);
        if !trimmed.ends_with(';') {
            continue;
        }
        for output in session.execute(&buffer).await {
            printer.print(&output)?;
        }
        buffer.clear();
    }
    Ok(())
}

/// Writes outputs to stdout or the configured outfile.
struct Printer {
    options: RenderOptions,
    error_presentation: ErrorPresentation,
    outfile: Option<std::fs::File>,
}

impl Printer {
    fn new(config: &RuntimeConfig) -> Result<Self> {
        let outfile = match &config.outfile {
            Some(path) => Some(
                std::fs::File::create(path)
                    .with_context(|| format!("creating {}", path.display()))?,
            ),
            None => None,
        };
        Ok(Self {
            options: RenderOptions {
                format: config.output,
                delimiter: config.delimiter,
                hide_headers: config.hide_headers,
            },
            error_presentation: config.error_presentation,
            outfile,
        })
    }

    fn print(&mut self, output: &ExecutorOutput) -> Result<()> {
        for message in &output.messages {
            eprintln!("{}", message.dimmed());
        }
        if let Some(error) = &output.error {
            return self.print_error(error);
        }
        let Some(result) = &output.result else {
            return Ok(());
        };
        if let Some(file) = &mut self.outfile {
            writeln!(file, "{}", render(result, &self.options))?;
            return Ok(());
        }
        if self.options.format == OutputFormat::Table {
            print_table(result, self.options.hide_headers);
        } else {
            println!("{}", render(result, &self.options));
        }
        Ok(())
    }

    fn print_error(&mut self, error: &CloudqlError) -> Result<()> {
        match self.error_presentation {
            ErrorPresentation::Stderr => {
                eprintln!("{} {}", "Error:".red().bold(), error);
            }
            ErrorPresentation::Record => {
                let row = serde_json::Map::from_iter([(
                    "error".to_string(),
                    serde_json::Value::from(error.to_string()),
                )]);
                let result = ResultSet::new(vec!["error".to_string()], vec![row]);
                match &mut self.outfile {
                    Some(file) => writeln!(file, "{}", render(&result, &self.options))?,
                    None => println!("{}", render(&result, &self.options)),
                }
            }
        }
        Ok(())
    }
}

fn print_table(result: &ResultSet, hide_headers: bool) {
    if result.is_empty() {
        println!("{}", "(no results)".dimmed());
        return;
    }
    let lines = table_lines(result, hide_headers);
    let body_start = if hide_headers { 0 } else { 2 };
    for (i, line) in lines.iter().enumerate() {
        match i {
            0 if !hide_headers => println!("{}", line.white().bold()),
            1 if !hide_headers => println!("{}", line.dimmed()),
            _ => println!("{}", line),
        }
    }
    println!();
    println!(
        "{} row(s) returned",
        (lines.len() - body_start).to_string().cyan()
    );
}
