//! mailsync: concurrent, resumable migration of mail between IMAP accounts and mbox archives
//!
//! # Architecture
//!
//! - [`main`]: CLI entry point, env loading, subcommand dispatch
//! - [`config`]: endpoint/credential resolution shared by every command
//! - [`errors`]: application error model
//! - [`imap`]: IMAP transport/session operations with timeout wrappers
//! - [`filter`]: mailbox include/exclude/special-folder filtering
//! - [`state`]: durable resume state (high-water UID, mbox byte offsets)
//! - [`events`]: lossy progress event bus
//! - [`engine`]: the IMAP-to-IMAP sync engine (this crate's core)
//! - [`mbox`] / [`mbox_copy`]: streaming mbox reader and its copy pipeline
//! - [`backup`] / [`send`] / [`mark_read`] / [`delete`]: the thinner commands
//! - [`progress`]: the default `indicatif`-based event consumer

mod backup;
mod config;
mod delete;
mod engine;
mod errors;
mod events;
mod filter;
mod imap;
mod mark_read;
mod mbox;
mod mbox_copy;
mod progress;
mod send;
mod state;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing_subscriber::EnvFilter;

use config::EndpointArgs;
use engine::{MailboxSyncer, Options};
use errors::{AppError, AppResult};
use filter::{MailboxFilter, SpecialFolders};

/// Concurrent, resumable migration of mail between IMAP accounts and mbox archives
#[derive(Debug, Parser)]
#[command(name = "mailsync", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Copy messages IMAP -> IMAP, or mbox -> IMAP
    Copy(CopyArgs),
    /// Back up messages from IMAP to the filesystem
    Backup(BackupArgs),
    /// Submit a raw message over SMTP
    Send(SendArgs),
    /// Mark unseen messages `\Seen` across mailboxes
    MarkRead(MarkReadArgs),
    /// Delete matching messages, with confirmation
    Delete(DeleteArgs),
}

#[derive(Debug, Args)]
struct FilterArgs {
    /// Only mailboxes matching this regex
    #[arg(long)]
    include: Option<String>,
    /// Exclude mailboxes matching this regex
    #[arg(long)]
    exclude: Option<String>,
    /// Skip Trash-class mailboxes
    #[arg(long)]
    skip_trash: bool,
    /// Skip Junk/Spam-class mailboxes
    #[arg(long)]
    skip_junk: bool,
    /// Skip Drafts-class mailboxes
    #[arg(long)]
    skip_drafts: bool,
    /// Skip Sent-class mailboxes
    #[arg(long)]
    skip_sent: bool,
    /// Skip every special-folder class (Trash, Junk, Drafts, Sent)
    #[arg(long)]
    skip_special: bool,
}

impl FilterArgs {
    fn build(&self) -> AppResult<MailboxFilter> {
        let special = SpecialFolders {
            skip_trash: self.skip_trash || self.skip_special,
            skip_junk: self.skip_junk || self.skip_special,
            skip_drafts: self.skip_drafts || self.skip_special,
            skip_sent: self.skip_sent || self.skip_special,
        };
        MailboxFilter::new(self.include.as_deref(), self.exclude.as_deref(), special)
    }
}

#[derive(Debug, Args)]
struct CopyArgs {
    /// mbox file to copy from, instead of a source IMAP account
    #[arg(long, conflicts_with_all = ["src_host"])]
    mbox_file: Option<PathBuf>,

    #[arg(long = "src-host", required_unless_present = "mbox_file")]
    src_host: Option<String>,
    #[arg(long = "src-port", default_value_t = 993)]
    src_port: u16,
    #[arg(long = "src-starttls")]
    src_starttls: bool,
    #[arg(long = "src-insecure")]
    src_insecure: bool,
    #[arg(long = "src-user", required_unless_present = "mbox_file")]
    src_user: Option<String>,
    #[arg(long = "src-password")]
    src_password: Option<String>,
    #[arg(long = "src-password-command", value_name = "CMD", num_args = 1..)]
    src_password_command: Option<Vec<String>>,
    #[arg(long = "src-password-env-segment", value_name = "SEGMENT")]
    src_password_env_segment: Option<String>,

    #[arg(long = "dst-host")]
    dst_host: String,
    #[arg(long = "dst-port", default_value_t = 993)]
    dst_port: u16,
    #[arg(long = "dst-starttls")]
    dst_starttls: bool,
    #[arg(long = "dst-insecure")]
    dst_insecure: bool,
    #[arg(long = "dst-user")]
    dst_user: String,
    #[arg(long = "dst-password")]
    dst_password: Option<String>,
    #[arg(long = "dst-password-command", value_name = "CMD", num_args = 1..)]
    dst_password_command: Option<Vec<String>>,
    #[arg(long = "dst-password-env-segment", value_name = "SEGMENT")]
    dst_password_env_segment: Option<String>,

    /// Destination mailbox for `--mbox-file` mode
    #[arg(long)]
    dst_mailbox: Option<String>,

    #[command(flatten)]
    filter: FilterArgs,

    /// Only fetch messages with INTERNALDATE on or after this date (YYYY-MM-DD)
    #[arg(long)]
    since: Option<String>,
    /// Max mailboxes processed in parallel
    #[arg(long, default_value_t = 4)]
    concurrency: usize,
    /// Perform SELECT/FETCH but never APPEND, and never mutate state
    #[arg(long)]
    dry_run: bool,
    /// Suppress per-message log output
    #[arg(long)]
    quiet: bool,
    /// Treat the resume high-water mark as 0
    #[arg(long)]
    ignore_state: bool,
    /// Rename a source mailbox on copy: `SRC=DST` (repeatable)
    #[arg(long = "map", value_name = "SRC=DST")]
    map: Vec<String>,
    /// Resume-state file path
    #[arg(long, default_value = "mailsync-state.json")]
    state: PathBuf,
}

#[derive(Debug, Args)]
struct BackupArgs {
    #[command(flatten)]
    endpoint: EndpointArgs,
    #[command(flatten)]
    filter: FilterArgs,
    /// Directory to write the backup into
    #[arg(long)]
    dest: PathBuf,
    /// One file per message, or a single mbox file per mailbox
    #[arg(long, value_enum, default_value = "maildir-like")]
    format: BackupFormatArg,
    #[arg(long)]
    since: Option<String>,
    #[arg(long)]
    dry_run: bool,
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    ignore_state: bool,
    #[arg(long, default_value = "mailsync-state.json")]
    state: PathBuf,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum BackupFormatArg {
    MaildirLike,
    Mbox,
}

#[derive(Debug, Args)]
struct SendArgs {
    #[command(flatten)]
    endpoint: EndpointArgs,
    /// File containing the raw RFC 822 message, or stdin if omitted
    #[arg(long)]
    file: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct MarkReadArgs {
    #[command(flatten)]
    endpoint: EndpointArgs,
    #[command(flatten)]
    filter: FilterArgs,
    #[arg(long)]
    since: Option<String>,
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct DeleteArgs {
    #[command(flatten)]
    endpoint: EndpointArgs,
    #[command(flatten)]
    filter: FilterArgs,
    #[arg(long)]
    since: Option<String>,
    /// Skip the confirmation prompt
    #[arg(long)]
    yes: bool,
    /// Issue EXPUNGE after marking \Deleted
    #[arg(long)]
    expunge: bool,
}

/// Application entry point
///
/// Initializes tracing from the environment, loads `.env`, dispatches to
/// the selected subcommand, and maps the aggregated error list to a
/// process exit code.
#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, "mailsync failed");
            ExitCode::FAILURE
        }
    }
}

/// Returns `Ok(true)` on a clean run, `Ok(false)` if the run completed but
/// reported per-mailbox errors, `Err` for a fatal startup failure.
async fn run(cli: Cli) -> AppResult<bool> {
    match cli.command {
        Commands::Copy(args) => run_copy(args).await,
        Commands::Backup(args) => run_backup(args).await,
        Commands::Send(args) => run_send(args).await,
        Commands::MarkRead(args) => run_mark_read(args).await,
        Commands::Delete(args) => run_delete(args).await,
    }
}

fn parse_since(value: &Option<String>) -> AppResult<Option<DateTime<FixedOffset>>> {
    let Some(value) = value else { return Ok(None) };
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| AppError::invalid(format!("invalid --since date {value:?}: {e}")))?;
    let datetime = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| AppError::invalid(format!("invalid --since date {value:?}")))?;
    Ok(Some(Utc.from_utc_datetime(&datetime).fixed_offset()))
}

fn parse_map(entries: &[String]) -> AppResult<std::collections::HashMap<String, String>> {
    let mut map = std::collections::HashMap::new();
    for entry in entries {
        let (src, dst) = entry
            .split_once('=')
            .ok_or_else(|| AppError::invalid(format!("--map entries must be SRC=DST, got {entry:?}")))?;
        map.insert(src.to_owned(), dst.to_owned());
    }
    Ok(map)
}

async fn run_copy(args: CopyArgs) -> AppResult<bool> {
    let since = parse_since(&args.since)?;
    let filter = args.filter.build()?;
    let map = parse_map(&args.map)?;
    let state = Arc::new(state::State::load(&args.state)?);

    let dst_password = config::resolve_password(
        args.dst_password.as_deref(),
        args.dst_password_command.as_deref(),
        args.dst_password_env_segment.as_deref(),
    )?;
    let dst_endpoint = config::build_endpoint(
        args.dst_host,
        args.dst_port,
        args.dst_starttls,
        args.dst_insecure,
        args.dst_user,
        dst_password,
    );
    let mut dst_session = imap::connect(&dst_endpoint).await?;

    let options = Options {
        dry_run: args.dry_run,
        since,
        concurrency: args.concurrency,
        quiet: args.quiet,
        ignore_state: args.ignore_state,
        map,
    };

    let errors = if let Some(mbox_path) = args.mbox_file {
        let dst_mailbox = args
            .dst_mailbox
            .ok_or_else(|| AppError::invalid("--dst-mailbox is required with --mbox-file"))?;
        let (events_tx, events_rx) = events::channel(events::MIN_EVENT_BUFFER);
        let render_handle = tokio::spawn(progress::render(events_rx));
        let result = mbox_copy::copy_mbox_to_imap(
            &mut dst_session,
            &mbox_path,
            &dst_mailbox,
            &state,
            &args.state,
            &options,
            &events_tx,
        )
        .await;
        drop(events_tx);
        let _ = render_handle.await;
        match result {
            Ok(()) => Vec::new(),
            Err(e) => vec![e],
        }
    } else {
        let src_host = args.src_host.expect("clap enforces src_host without --mbox-file");
        let src_user = args.src_user.expect("clap enforces src_user without --mbox-file");
        let src_password = config::resolve_password(
            args.src_password.as_deref(),
            args.src_password_command.as_deref(),
            args.src_password_env_segment.as_deref(),
        )?;
        let src_endpoint = config::build_endpoint(
            src_host,
            args.src_port,
            args.src_starttls,
            args.src_insecure,
            src_user,
            src_password,
        );
        let src_session = imap::connect(&src_endpoint).await?;

        let mut src_for_list = src_session;
        let mailboxes = imap::list_mailboxes(&mut src_for_list).await?;
        let mailboxes: Vec<String> = filter.apply(mailboxes.iter().map(String::as_str)).into_iter().map(str::to_owned).collect();

        let mut syncer = MailboxSyncer::new(src_for_list, dst_session, Arc::clone(&state), options);
        let events_rx = syncer.events().expect("events receiver taken exactly once");
        let render_handle = tokio::spawn(progress::render(events_rx));
        let cancel = CancellationToken::new();
        let cancel_on_signal = cancel.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            cancel_on_signal.cancel();
        });
        let errors = syncer.sync_all(cancel, &mailboxes).await;
        let _ = render_handle.await;
        errors
    };

    state.save(&args.state)?;
    for err in &errors {
        error!(error = %err, "mailbox failed");
    }
    Ok(errors.is_empty())
}

async fn run_backup(args: BackupArgs) -> AppResult<bool> {
    let since = parse_since(&args.since)?;
    let filter = args.filter.build()?;
    let state = Arc::new(state::State::load(&args.state)?);
    let endpoint = args.endpoint.resolve()?;
    let mut session = imap::connect(&endpoint).await?;

    let mailboxes = imap::list_mailboxes(&mut session).await?;
    let mailboxes: Vec<String> = filter.apply(mailboxes.iter().map(String::as_str)).into_iter().map(str::to_owned).collect();

    let options = Options {
        dry_run: args.dry_run,
        since,
        quiet: args.quiet,
        ignore_state: args.ignore_state,
        ..Options::default()
    };
    let format = match args.format {
        BackupFormatArg::MaildirLike => backup::BackupFormat::MaildirLike,
        BackupFormatArg::Mbox => backup::BackupFormat::Mbox,
    };
    let errors = backup::run(&mut session, &args.dest, &mailboxes, format, &state, &options).await?;
    state.save(&args.state)?;
    for err in &errors {
        error!(error = %err, "backup failed for mailbox");
    }
    Ok(errors.is_empty())
}

async fn run_send(args: SendArgs) -> AppResult<bool> {
    let endpoint = args.endpoint.resolve()?;
    let raw = send::read_raw_message(args.file.as_deref())?;
    send::send_raw(&endpoint, &raw).await?;
    Ok(true)
}

async fn run_mark_read(args: MarkReadArgs) -> AppResult<bool> {
    let since = parse_since(&args.since)?;
    let filter = args.filter.build()?;
    let endpoint = args.endpoint.resolve()?;
    let mut session = imap::connect(&endpoint).await?;

    let mailboxes = imap::list_mailboxes(&mut session).await?;
    let mailboxes: Vec<String> = filter.apply(mailboxes.iter().map(String::as_str)).into_iter().map(str::to_owned).collect();

    let options = Options {
        dry_run: args.dry_run,
        since,
        ..Options::default()
    };
    let (results, errors) = mark_read::run(&mut session, &mailboxes, &options).await?;
    for result in &results {
        tracing::info!(mailbox = %result.mailbox, marked = result.marked, "marked read");
    }
    for err in &errors {
        error!(error = %err, "mark-read failed for mailbox");
    }
    Ok(errors.is_empty())
}

async fn run_delete(args: DeleteArgs) -> AppResult<bool> {
    let since = parse_since(&args.since)?;
    let filter = args.filter.build()?;
    let endpoint = args.endpoint.resolve()?;
    let mut session = imap::connect(&endpoint).await?;

    let mailboxes = imap::list_mailboxes(&mut session).await?;
    let mailboxes: Vec<String> = filter.apply(mailboxes.iter().map(String::as_str)).into_iter().map(str::to_owned).collect();

    let options = Options {
        since,
        ..Options::default()
    };
    let matches = delete::preview(&mut session, &mailboxes, &options).await?;
    let total: usize = matches.iter().map(|m| m.uids.len()).sum();
    if total == 0 {
        tracing::info!("no messages matched");
        return Ok(true);
    }
    if !args.yes {
        println!("{total} message(s) matched across {} mailbox(es). Re-run with --yes to delete.", matches.len());
        return Ok(true);
    }

    let errors = delete::apply(&mut session, &matches, args.expunge).await;
    for err in &errors {
        error!(error = %err, "delete failed for mailbox");
    }
    Ok(errors.is_empty())
}
