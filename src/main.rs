use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use doorpass::api::BackendClient;
use doorpass::config;
use doorpass::display::{DisplaySettings, RotatingTokenDisplay};
use doorpass::model::CheckAction;
use doorpass::qr;
use doorpass::scanner::wedge::WedgeProvider;
use doorpass::scanner::{ScanController, ScannerSettings, ScannerView};

const PROGRESS_CELLS: usize = 30;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show a ticket's rotating QR code
    Display {
        /// Ticket identifier; defaults to the first ticket this account holds
        #[arg(long)]
        ticket: Option<String>,

        /// Override display.refresh_interval_ms
        #[arg(long)]
        refresh_ms: Option<u64>,
    },
    /// Check tickets in or out at the door using a keyboard-wedge reader
    Scan {
        /// Event the door belongs to
        #[arg(long)]
        event: String,

        /// Starting action (in|out), overrides scanner.default_action
        #[arg(long)]
        action: Option<CheckAction>,
    },
    /// List the tickets this account holds
    Tickets,
    /// Print how many scans this operator account has made
    Account,
    /// Print an example configuration file
    ExampleConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    if let Command::ExampleConfig = args.command {
        print!("{}", config::example());
        return Ok(());
    }

    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    let client = BackendClient::from_config(&cfg)?;

    match args.command {
        Command::Display { ticket, refresh_ms } => {
            let mut settings = DisplaySettings::from(&cfg.display);
            if let Some(ms) = refresh_ms.filter(|ms| *ms > 0) {
                settings.refresh_interval = Duration::from_millis(ms);
            }
            let ticket = match ticket {
                Some(ticket) => ticket,
                None => first_held_ticket(&client).await?,
            };
            run_display(Arc::new(client), ticket, settings, cfg.display.qr_margin).await
        }
        Command::Scan { event, action } => {
            let mut settings = ScannerSettings::from_config(&cfg.scanner, event);
            if let Some(action) = action {
                settings.default_action = action;
            }
            run_scan(Arc::new(client), settings).await
        }
        Command::Tickets => {
            let tickets = client.list_tickets().await?;
            if tickets.is_empty() {
                println!("No tickets.");
            }
            for ticket in &tickets {
                println!("{}", ticket.summary());
            }
            Ok(())
        }
        Command::Account => {
            let summary = client.account_summary().await?;
            println!("Scanned: {}", summary.scanned_count);
            Ok(())
        }
        Command::ExampleConfig => Ok(()),
    }
}

async fn first_held_ticket(client: &BackendClient) -> Result<String> {
    let tickets = client
        .list_tickets()
        .await
        .context("failed to list tickets; pass --ticket")?;
    let first = tickets
        .into_iter()
        .next()
        .context("this account holds no tickets; pass --ticket")?;
    info!(ticket = %first.summary(), "no --ticket given; showing first held ticket");
    Ok(first.id)
}

async fn run_display(
    client: Arc<BackendClient>,
    ticket: String,
    settings: DisplaySettings,
    margin: u32,
) -> Result<()> {
    info!(%ticket, refresh_ms = settings.refresh_interval.as_millis() as u64, "showing rotating QR");
    let display = RotatingTokenDisplay::start(client, ticket, settings)?;
    let mut tokens = display.subscribe();
    let mut progress = display.subscribe_progress();
    draw_token(&display.value(), margin);

    loop {
        tokio::select! {
            changed = tokens.changed() => {
                if changed.is_err() {
                    break;
                }
                let value = tokens.borrow_and_update().value.clone();
                draw_token(&value, margin);
            }
            changed = progress.changed() => {
                if changed.is_err() {
                    break;
                }
                let pct = *progress.borrow_and_update();
                print!("\r{}", qr::progress_bar(pct, PROGRESS_CELLS));
                let _ = std::io::stdout().flush();
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    println!();
    Ok(())
}

fn draw_token(value: &str, margin: u32) {
    // clear screen, home cursor
    print!("\x1b[2J\x1b[H");
    match qr::render(value, margin) {
        Ok(code) => print!("{}", code),
        Err(err) => {
            warn!(?err, "failed to render QR");
            println!("{}", value);
        }
    }
    let _ = std::io::stdout().flush();
}

async fn run_scan(client: Arc<BackendClient>, settings: ScannerSettings) -> Result<()> {
    let event = settings.event_id.clone();
    let (provider, input) = WedgeProvider::channel();
    let scanner = ScanController::start(settings, Arc::new(provider), client)?;
    let mut views = scanner.subscribe();

    println!("Event: {}", event);
    println!("Scan a code, then /confirm (or /c), /next (or /n), /in, /out, /toggle, /retry, /quit");
    print_view(&scanner.view());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                match parse_line(&line) {
                    Input::Confirm => scanner.confirm(),
                    Input::Dismiss => scanner.dismiss(),
                    Input::Action(action) => scanner.set_action(action),
                    Input::Toggle => scanner.toggle_action(),
                    Input::Retry => scanner.retry(),
                    Input::Quit => break,
                    Input::Code(code) => input.push(code),
                }
            }
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                print_view(&view);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    scanner.shutdown().await;
    Ok(())
}

/// One line typed at the door terminal.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Confirm,
    Dismiss,
    Action(CheckAction),
    Toggle,
    Retry,
    Quit,
    Code(&'a str),
}

/// Only the exact operator commands are intercepted. Every other line,
/// including one that merely starts with '/', is a scanned code.
fn parse_line(line: &str) -> Input<'_> {
    match line.trim() {
        "/confirm" | "/c" => Input::Confirm,
        "/next" | "/n" => Input::Dismiss,
        "/in" => Input::Action(CheckAction::In),
        "/out" => Input::Action(CheckAction::Out),
        "/toggle" | "/t" => Input::Toggle,
        "/retry" => Input::Retry,
        "/quit" | "/q" => Input::Quit,
        code => Input::Code(code),
    }
}

fn print_view(view: &ScannerView) {
    let last = view
        .last_scan
        .as_ref()
        .map(|entry| format!(" | last: {} {}", entry.action, entry.ticket_reference))
        .unwrap_or_default();
    println!("[{}] {}{}", view.action, view.status, last);
}
