//! Mailmerge CLI - personalized batch email from a recipients CSV
//!
//! # Main Commands
//!
//! ```bash
//! mailmerge serve                                   # Start HTTP server (port 3000)
//! mailmerge send list.csv -c Email -t welcome       # Send a stored template to every row
//! mailmerge send list.csv -c Email -t welcome --mode draft
//! mailmerge template list                           # Manage stored templates
//! ```
//!
//! # Inspection Commands
//!
//! ```bash
//! mailmerge parse list.csv                          # Parse CSV to JSON
//! mailmerge validate list.csv -c Email              # Check recipient addresses
//! mailmerge preview list.csv -c Email -s "Hi {{Name}}" -b "..."
//! ```
//!
//! `send` reads the Gmail access token from `GMAIL_ACCESS_TOKEN`.

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use mailmerge::config::{access_token_from_env, Config};
use mailmerge::pipeline::format_delimiter;
use mailmerge::{
    delimiter_byte, parse_file_auto, parse_with_delimiter, prepare_file, send_prepared, validate,
    BodyFormat, DeliveryMode, FileTemplateStore, GmailDelivery, Template, TemplateStore,
};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "mailmerge")]
#[command(about = "Send personalized emails from a CSV recipient list", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a CSV file and output JSON
    Parse {
        /// Input CSV file
        input: PathBuf,

        /// CSV delimiter (auto-detect if not specified)
        #[arg(short, long)]
        delimiter: Option<char>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate the recipient address column
    Validate {
        /// Input CSV file
        input: PathBuf,

        /// Column holding email addresses
        #[arg(short, long)]
        column: String,
    },

    /// Show personalized messages without sending
    Preview {
        /// Input CSV file
        input: PathBuf,

        /// Column holding email addresses
        #[arg(short, long)]
        column: String,

        #[command(flatten)]
        template: TemplateArgs,

        /// Only show this row (1-based)
        #[arg(short, long)]
        row: Option<usize>,
    },

    /// Personalize and deliver one message per row
    Send {
        /// Input CSV file
        input: PathBuf,

        /// Column holding email addresses
        #[arg(short, long)]
        column: String,

        #[command(flatten)]
        template: TemplateArgs,

        /// Send now or save as drafts
        #[arg(short, long, value_enum, default_value = "now")]
        mode: ModeArg,

        /// Requested send time (RFC 3339); messages are saved as drafts
        #[arg(long)]
        schedule: Option<DateTime<Utc>>,

        /// Body is already HTML
        #[arg(long)]
        html: bool,

        /// Write per-recipient results as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Start HTTP server
    Serve {
        /// Port to listen on (default: MAILMERGE_PORT or 3000)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Manage stored message templates
    Template {
        #[command(subcommand)]
        action: TemplateAction,
    },
}

/// Template given inline or by stored name.
#[derive(Args)]
struct TemplateArgs {
    /// Stored template name
    #[arg(short, long, conflicts_with_all = ["subject", "body", "body_file"])]
    template: Option<String>,

    /// Subject line
    #[arg(short, long)]
    subject: Option<String>,

    /// Body text
    #[arg(short, long, conflicts_with = "body_file")]
    body: Option<String>,

    /// Read the body from a file
    #[arg(long)]
    body_file: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Now,
    Draft,
}

impl From<ModeArg> for DeliveryMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Now => DeliveryMode::Now,
            ModeArg::Draft => DeliveryMode::Draft,
        }
    }
}

#[derive(Subcommand)]
enum TemplateAction {
    /// List all stored templates
    List,

    /// Save (or replace) a template
    Save {
        /// Template name
        name: String,

        /// Subject line
        #[arg(short, long)]
        subject: String,

        /// Body text
        #[arg(short, long, conflicts_with = "body_file")]
        body: Option<String>,

        /// Read the body from a file
        #[arg(long)]
        body_file: Option<PathBuf>,
    },

    /// Show a template and its placeholders
    Show {
        /// Template name
        name: String,
    },

    /// Delete a template
    Delete {
        /// Template name
        name: String,
    },
}

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let result = match Config::from_env() {
        Err(e) => Err(e.into()),
        Ok(config) => match cli.command {
            Commands::Parse {
                input,
                delimiter,
                output,
            } => cmd_parse(&input, delimiter, output.as_deref()),

            Commands::Validate { input, column } => cmd_validate(&input, &column),

            Commands::Preview {
                input,
                column,
                template,
                row,
            } => cmd_preview(&config, &input, &column, &template, row),

            Commands::Send {
                input,
                column,
                template,
                mode,
                schedule,
                html,
                output,
            } => {
                cmd_send(
                    &config,
                    &input,
                    &column,
                    &template,
                    mode.into(),
                    schedule,
                    html,
                    output.as_deref(),
                )
                .await
            }

            Commands::Serve { port } => cmd_serve(config, port).await,

            Commands::Template { action } => cmd_template(&config, action),
        },
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

fn cmd_parse(
    input: &Path,
    delimiter: Option<char>,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("📄 Parsing CSV: {}", input.display());

    let mut result = parse_file_auto(input)?;
    if let Some(d) = delimiter {
        if delimiter_byte(d).is_none() {
            return Err(format!("Delimiter must be an ASCII character, got '{}'", d).into());
        }
        let content = mailmerge::decode_content(&fs::read(input)?, &result.encoding);
        result.table = parse_with_delimiter(&content, d);
        result.delimiter = d;
    }

    eprintln!("   Encoding: {}", result.encoding);
    eprintln!(
        "   Delimiter: '{}'{}",
        format_delimiter(result.delimiter),
        if delimiter.is_none() { " (auto-detected)" } else { "" }
    );
    eprintln!("   Columns: {}", result.table.headers.join(", "));
    for err in &result.table.parse_errors {
        eprintln!("   ⚠️  {}", err);
    }
    eprintln!("✅ Parsed {} rows", result.table.rows.len());

    let json = serde_json::to_string_pretty(&result.table)?;
    write_output(&json, output)?;

    Ok(())
}

fn cmd_validate(input: &Path, column: &str) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("✔️  Validating \"{}\" in: {}", column, input.display());

    let table = parse_file_auto(input)?.table;
    let report = validate(&table, column);

    for warning in &report.warnings {
        eprintln!("   ⚠️  {}", warning);
    }
    for err in &report.errors {
        eprintln!("   ❌ {}", err);
    }

    eprintln!(
        "\n📊 Results: {} rows, {} error(s), {} warning(s)",
        table.rows.len(),
        report.errors.len(),
        report.warnings.len()
    );

    if !report.is_valid {
        std::process::exit(1);
    }

    Ok(())
}

fn cmd_preview(
    config: &Config,
    input: &Path,
    column: &str,
    args: &TemplateArgs,
    row: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let template = resolve_template(config, args)?;
    let prepared = prepare_file(input, &template, column)?;

    let selected: Vec<_> = match row {
        Some(0) => return Err("Rows are numbered from 1".into()),
        Some(n) => {
            let message = prepared
                .messages
                .get(n - 1)
                .ok_or_else(|| format!("Row {} not found ({} rows)", n, prepared.messages.len()))?;
            vec![(n, message)]
        }
        None => prepared
            .messages
            .iter()
            .enumerate()
            .map(|(i, m)| (i + 1, m))
            .collect(),
    };

    for (index, message) in selected {
        println!("\n── Row {} ──", index);
        println!("To:      {}", message.recipient_address);
        println!("Subject: {}", message.subject);
        println!();
        println!("{}", message.body);
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn cmd_send(
    config: &Config,
    input: &Path,
    column: &str,
    args: &TemplateArgs,
    mode: DeliveryMode,
    schedule: Option<DateTime<Utc>>,
    html: bool,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let token = access_token_from_env()?;
    let template = resolve_template(config, args)?;
    let prepared = prepare_file(input, &template, column)?;

    let mode = mode.effective(schedule);
    if let Some(at) = schedule {
        eprintln!("🕒 Scheduled for {}: saving as drafts", at.to_rfc3339());
    }

    let body_format = if html { BodyFormat::Html } else { BodyFormat::Text };
    let delivery =
        GmailDelivery::new(config.gmail_client(&token), mode).with_body_format(body_format);

    let summary = send_prepared(&prepared, &delivery, &config.dispatch_options()).await?;

    for result in summary.results.iter().filter(|r| !r.succeeded) {
        eprintln!(
            "   ❌ {}: {}",
            result.recipient_address,
            result.error_detail.as_deref().unwrap_or("unknown error")
        );
    }
    eprintln!(
        "\n📊 {}: {} ok, {} failed (of {})",
        match mode {
            DeliveryMode::Now => "Sent",
            DeliveryMode::Draft => "Drafted",
        },
        summary.sent_count,
        summary.failed_count,
        summary.total
    );

    if let Some(path) = output {
        let json = serde_json::to_string_pretty(&summary)?;
        write_output(&json, Some(path))?;
    }

    Ok(())
}

async fn cmd_serve(mut config: Config, port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(port) = port {
        config.port = port;
    }
    mailmerge::server::start_server(config).await
}

fn cmd_template(config: &Config, action: TemplateAction) -> Result<(), Box<dyn std::error::Error>> {
    let mut store = FileTemplateStore::with_path(&config.templates_path);

    match action {
        TemplateAction::List => {
            let templates = store.load_all()?;
            if templates.is_empty() {
                eprintln!("📋 No templates stored yet.");
                eprintln!("   Use 'mailmerge template save <name>' to add one.");
                return Ok(());
            }

            eprintln!("📋 Stored templates ({}):\n", templates.len());
            for t in templates.values() {
                println!("  📄 {}", t.name);
                println!("     Subject: {}", t.template.subject);
                println!("     Updated: {}", t.updated_at.to_rfc3339());
                println!();
            }
        }

        TemplateAction::Save {
            name,
            subject,
            body,
            body_file,
        } => {
            let body = read_body(body, body_file.as_deref())?;
            store.save(&name, Template::new(subject, body))?;
            eprintln!("✅ Template saved: {}", name.trim());
        }

        TemplateAction::Show { name } => {
            let stored = store
                .get(&name)?
                .ok_or_else(|| format!("Template not found: {}", name))?;

            let placeholders: Vec<String> = mailmerge::extract_from_template(&stored.template)
                .into_iter()
                .map(|p| p.name)
                .collect();

            println!("📄 Template: {}\n", stored.name);
            println!("Updated: {}", stored.updated_at.to_rfc3339());
            println!("Placeholders: {}", placeholders.join(", "));
            println!("\nSubject: {}", stored.template.subject);
            println!("\n{}", stored.template.body);
        }

        TemplateAction::Delete { name } => {
            store.delete(&name)?;
            eprintln!("🗑️  Template deleted: {}", name);
        }
    }

    Ok(())
}

fn resolve_template(
    config: &Config,
    args: &TemplateArgs,
) -> Result<Template, Box<dyn std::error::Error>> {
    if let Some(name) = &args.template {
        let store = FileTemplateStore::with_path(&config.templates_path);
        let stored = store
            .get(name)?
            .ok_or_else(|| format!("Template not found: {}", name))?;
        return Ok(stored.template);
    }

    let subject = args
        .subject
        .clone()
        .ok_or("Provide --template <name> or --subject with --body/--body-file")?;
    let body = read_body(args.body.clone(), args.body_file.as_deref())?;
    Ok(Template::new(subject, body))
}

fn read_body(body: Option<String>, body_file: Option<&Path>) -> Result<String, Box<dyn std::error::Error>> {
    match (body, body_file) {
        (Some(body), _) => Ok(body),
        (None, Some(path)) => Ok(fs::read_to_string(path)?),
        (None, None) => Err("Provide --body or --body-file".into()),
    }
}

fn write_output(content: &str, path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    match path {
        Some(p) => {
            fs::write(p, content)?;
            eprintln!("💾 Output written to: {}", p.display());
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
