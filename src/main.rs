//! CLI entry point for `mboxstore`.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand};
use humansize::{format_size, BINARY};

use mboxstore::config::{self, Config};
use mboxstore::model::{MessageSummary, MsgFlags};
use mboxstore::store::MboxStore;

#[derive(Parser)]
#[command(
    name = "mboxstore",
    version,
    about = "Read and maintain mbox mailboxes safely alongside other mail programs"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// List the messages of a mailbox
    List {
        mailbox: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Extract a message into its own file
    Fetch {
        mailbox: PathBuf,
        msgnum: u32,
        /// Write the message to stdout instead of printing the file path
        #[arg(short, long)]
        print: bool,
    },
    /// Append a message (read from FILE, or stdin)
    Append {
        mailbox: PathBuf,
        file: Option<PathBuf>,
        /// Delete FILE once it has been appended
        #[arg(long, requires = "file")]
        remove_source: bool,
    },
    /// Delete messages and rewrite the mailbox
    Delete {
        mailbox: PathBuf,
        #[arg(required = true)]
        msgnums: Vec<u32>,
    },
    /// Set or clear flags (new, unread, marked, deleted, replied, forwarded)
    Flag {
        mailbox: PathBuf,
        #[arg(required = true)]
        msgnums: Vec<u32>,
        #[arg(long, value_parser = parse_flag)]
        set: Vec<MsgFlags>,
        #[arg(long, value_parser = parse_flag)]
        clear: Vec<MsgFlags>,
    },
    /// Write pending changes: purge deleted messages, refresh status headers
    Flush {
        mailbox: PathBuf,
    },
    /// Show mailbox statistics
    Stats {
        mailbox: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Move messages to another mailbox
    Move {
        source: PathBuf,
        dest: PathBuf,
        #[arg(required = true)]
        msgnums: Vec<u32>,
        /// Copy instead of moving
        #[arg(long)]
        copy: bool,
    },
    /// Remove every message from a mailbox
    Clear {
        mailbox: PathBuf,
    },
    /// Print the effective configuration (or write it to the config file)
    Config {
        #[arg(long)]
        write: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn parse_flag(name: &str) -> Result<MsgFlags, String> {
    MsgFlags::from_name(name).ok_or_else(|| format!("unknown flag '{name}'"))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = config::load_config();

    // Configure logging: stderr + optional log file
    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    let mut store = MboxStore::from_config(&config);

    match cli.command {
        Commands::List { mailbox, json } => cmd_list(&mut store, &mailbox, json),
        Commands::Fetch {
            mailbox,
            msgnum,
            print,
        } => cmd_fetch(&mut store, &mailbox, msgnum, print),
        Commands::Append {
            mailbox,
            file,
            remove_source,
        } => cmd_append(&mut store, &mailbox, file.as_deref(), remove_source),
        Commands::Delete { mailbox, msgnums } => cmd_delete(&mut store, &mailbox, &msgnums),
        Commands::Flag {
            mailbox,
            msgnums,
            set,
            clear,
        } => cmd_flag(&mut store, &mailbox, &msgnums, &set, &clear),
        Commands::Flush { mailbox } => cmd_flush(&mut store, &mailbox),
        Commands::Stats { mailbox, json } => cmd_stats(&mut store, &mailbox, json),
        Commands::Move {
            source,
            dest,
            msgnums,
            copy,
        } => cmd_move(&mut store, &source, &dest, &msgnums, copy),
        Commands::Clear { mailbox } => {
            store.remove_all(&mailbox)?;
            println!("  Emptied {}", mailbox.display());
            Ok(())
        }
        Commands::Config { write } => cmd_config(&config, write),
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    // Try to set up file logging
    let log_dir = config::cache_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "mboxstore.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        // Fall back to stderr only
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mboxstore", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::stdout().write_all(&buf)?;
    Ok(())
}

fn cmd_list(store: &mut MboxStore, mailbox: &Path, json: bool) -> anyhow::Result<()> {
    let messages = store.enumerate(mailbox)?;
    if json {
        let output = serde_json::json!({
            "mailbox": mailbox.to_string_lossy(),
            "count": messages.len(),
            "messages": messages,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_message_table(&messages);
    }
    Ok(())
}

fn cmd_fetch(store: &mut MboxStore, mailbox: &Path, msgnum: u32, print: bool) -> anyhow::Result<()> {
    let file = store.fetch(mailbox, msgnum)?;
    if print {
        let bytes = std::fs::read(&file)?;
        std::io::stdout().write_all(&bytes)?;
    } else {
        println!("{}", file.display());
    }
    Ok(())
}

fn cmd_append(
    store: &mut MboxStore,
    mailbox: &Path,
    file: Option<&Path>,
    remove_source: bool,
) -> anyhow::Result<()> {
    let msgnum = match file {
        Some(src) => store.append_file(mailbox, src, remove_source)?,
        None => {
            let mut message = Vec::new();
            std::io::stdin().read_to_end(&mut message)?;
            if message.is_empty() {
                anyhow::bail!("No message on stdin");
            }
            store.append(mailbox, &message)?
        }
    };
    println!("  Appended message #{msgnum} to {}", mailbox.display());
    Ok(())
}

fn cmd_delete(store: &mut MboxStore, mailbox: &Path, msgnums: &[u32]) -> anyhow::Result<()> {
    store.mark_deleted(mailbox, msgnums)?;
    let stats = store.flush(mailbox)?;
    if let Some(stats) = stats {
        print_compact_stats(mailbox, &stats);
    }
    Ok(())
}

fn cmd_flag(
    store: &mut MboxStore,
    mailbox: &Path,
    msgnums: &[u32],
    set: &[MsgFlags],
    clear: &[MsgFlags],
) -> anyhow::Result<()> {
    if set.is_empty() && clear.is_empty() {
        anyhow::bail!("Nothing to do: give --set and/or --clear");
    }
    let to_set = set.iter().fold(MsgFlags::empty(), |acc, f| acc | *f);
    let to_clear = clear.iter().fold(MsgFlags::empty(), |acc, f| acc | *f);

    store.set_flags(mailbox, msgnums, to_set)?;
    store.clear_flags(mailbox, msgnums, to_clear)?;
    match store.flush(mailbox)? {
        Some(stats) => print_compact_stats(mailbox, &stats),
        None => println!("  No change written to {}", mailbox.display()),
    }
    Ok(())
}

fn cmd_flush(store: &mut MboxStore, mailbox: &Path) -> anyhow::Result<()> {
    match store.flush(mailbox)? {
        Some(stats) => print_compact_stats(mailbox, &stats),
        None => println!("  {} is up to date", mailbox.display()),
    }
    Ok(())
}

fn cmd_move(
    store: &mut MboxStore,
    source: &Path,
    dest: &Path,
    msgnums: &[u32],
    copy: bool,
) -> anyhow::Result<()> {
    let added = if copy {
        store.copy_to(source, msgnums, dest)?
    } else {
        store.move_to(source, msgnums, dest)?
    };
    println!(
        "  {} {} message(s) to {} (now #{})",
        if copy { "Copied" } else { "Moved" },
        added.len(),
        dest.display(),
        added
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(())
}

/// Show statistics for a mailbox.
fn cmd_stats(store: &mut MboxStore, mailbox: &Path, json: bool) -> anyhow::Result<()> {
    let file_size = std::fs::metadata(mailbox)?.len();
    let messages = store.enumerate(mailbox)?;
    let counts = store.counts(mailbox)?;

    let mut dates = messages.iter().filter_map(|m| m.date);
    let first = dates.next();
    let date_range = first.map(|d| dates.fold((d, d), |(lo, hi), d| (lo.min(d), hi.max(d))));

    if json {
        let stats = serde_json::json!({
            "file": mailbox.to_string_lossy(),
            "file_size": file_size,
            "message_count": counts.total,
            "new": counts.new,
            "unread": counts.unread,
            "date_range": date_range.map(|(min, max)| serde_json::json!({
                "oldest": min.to_rfc3339(),
                "newest": max.to_rfc3339(),
            })),
        });
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!();
    println!("  {:<20} {}", "File", mailbox.display());
    println!("  {:<20} {}", "File size", format_size(file_size, BINARY));
    println!("  {:<20} {}", "Messages", counts.total);
    println!("  {:<20} {}", "New", counts.new);
    println!("  {:<20} {}", "Unread", counts.unread);
    if let Some((min, max)) = date_range {
        println!(
            "  {:<20} {} - {}",
            "Date range",
            min.format("%Y-%m-%d"),
            max.format("%Y-%m-%d")
        );
    }
    println!();
    Ok(())
}

fn cmd_config(config: &Config, write: bool) -> anyhow::Result<()> {
    if write {
        let path = config::save_config(config)?;
        println!("  Wrote {}", path.display());
    } else {
        print!("{}", toml::to_string_pretty(config)?);
    }
    Ok(())
}

/// Print messages as a human-readable table.
fn print_message_table(messages: &[MessageSummary]) {
    println!();
    println!("  {} message(s)", messages.len());
    println!();

    if messages.is_empty() {
        return;
    }

    println!(
        "  {:<5} {:<5} {:<17} {:<25} {:<40} {:>9}",
        "#", "Flags", "Date", "From", "Subject", "Size"
    );
    println!("  {}", "-".repeat(106));

    for msg in messages {
        let date = msg
            .date
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        let from: String = msg.from.chars().take(24).collect();
        let subject: String = msg.subject.chars().take(39).collect();
        println!(
            "  {:<5} {:<5} {:<17} {:<25} {:<40} {:>9}",
            msg.msgnum,
            msg.flags,
            date,
            from,
            subject,
            format_size(msg.size, BINARY)
        );
    }
    println!();
}

fn print_compact_stats(mailbox: &Path, stats: &mboxstore::store::compact::CompactStats) {
    println!();
    println!("  Rewrote {}", mailbox.display());
    println!("  {:<20} {}", "Messages kept", stats.kept);
    println!("  {:<20} {}", "Messages purged", stats.purged);
    println!(
        "  {:<20} {} -> {}",
        "Size",
        format_size(stats.bytes_before, BINARY),
        format_size(stats.bytes_after, BINARY)
    );
    println!();
}
