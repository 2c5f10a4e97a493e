#![forbid(unsafe_code)]

mod cmd;
mod output;

use clap::{Parser, Subcommand};
use output::{CliError, OutputMode, render_error};
use palimpsest_core::StoreError;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Exit status for a rejected compare-and-set, so scripts can retry.
const EXIT_CONFLICT: u8 = 3;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "pal: versioned user directory with point-in-time reads",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Database file (overrides PAL_DB and the project config).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Per-operation deadline in milliseconds.
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Output format.
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true, hide = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn global_flags(&self) -> cmd::GlobalFlags<'_> {
        cmd::GlobalFlags {
            db: self.db.as_deref(),
            timeout_ms: self.timeout_ms,
            format: self.format,
            json: self.json,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Write",
        about = "Create a user",
        long_about = "Create a user at revision 0.",
        after_help = "EXAMPLES:\n    # Create a guest\n    pal create --name Ada --dob 1815-12-10\n\n    # Create an admin, machine-readable\n    pal create --name Grace --dob 1906-12-09 --role admin --json"
    )]
    Create(cmd::create::CreateArgs),

    #[command(
        next_help_heading = "Read",
        about = "Show a user",
        long_about = "Show the current state of a user, or reconstruct it as of an earlier revision.",
        after_help = "EXAMPLES:\n    # Latest state\n    pal show 0190a0c4-...\n\n    # As of revision 2\n    pal show 0190a0c4-... --at 2"
    )]
    Show(cmd::show::ShowArgs),

    #[command(
        next_help_heading = "Write",
        about = "Rename a user",
        after_help = "EXAMPLES:\n    # Rename, based on revision 3\n    pal rename 0190a0c4-... --expect 3 \"Alan Turing\""
    )]
    Rename(cmd::mutate::RenameArgs),

    #[command(
        next_help_heading = "Write",
        about = "Change a user's date of birth",
        after_help = "EXAMPLES:\n    pal set-dob 0190a0c4-... --expect 1 1912-06-23"
    )]
    SetDob(cmd::mutate::SetDobArgs),

    #[command(
        next_help_heading = "Write",
        about = "Change a user's role",
        after_help = "EXAMPLES:\n    pal set-role 0190a0c4-... --expect 2 admin"
    )]
    SetRole(cmd::mutate::SetRoleArgs),

    #[command(
        next_help_heading = "Read",
        about = "List every revision of a user",
        long_about = "List every reconstructed state of a user, newest first.",
        after_help = "EXAMPLES:\n    # Full history\n    pal history 0190a0c4-...\n\n    # Revisions 2 and later, as JSON\n    pal history 0190a0c4-... --from 2 --json"
    )]
    History(cmd::history::HistoryArgs),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("PAL_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "palimpsest=debug,info"
        } else {
            "palimpsest=info,warn"
        })
    });

    let format = env::var("PAL_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn run(command: &Commands, ctx: &cmd::Context) -> anyhow::Result<()> {
    match command {
        Commands::Create(args) => cmd::create::run_create(args, ctx),
        Commands::Show(args) => cmd::show::run_show(args, ctx),
        Commands::Rename(args) => cmd::mutate::run_rename(args, ctx),
        Commands::SetDob(args) => cmd::mutate::run_set_dob(args, ctx),
        Commands::SetRole(args) => cmd::mutate::run_set_role(args, ctx),
        Commands::History(args) => cmd::history::run_history(args, ctx),
    }
}

/// Render `err` on stderr and pick the process exit status.
fn fail(output: OutputMode, err: &anyhow::Error) -> ExitCode {
    tracing::debug!(error = ?err, "command failed");
    if let Err(render_err) = render_error(output, &CliError::from_anyhow(err)) {
        eprintln!("error: {err:#} (while rendering: {render_err})");
    }
    match err.downcast_ref::<StoreError>() {
        Some(StoreError::ConcurrencyConflict { .. }) => ExitCode::from(EXIT_CONFLICT),
        _ => ExitCode::FAILURE,
    }
}

fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    if cli.verbose {
        info!("Verbose mode enabled");
    }

    let fallback_output = output::resolve_output_mode(cli.format, cli.json, None);
    let ctx = match env::current_dir()
        .map_err(anyhow::Error::from)
        .and_then(|root| cmd::Context::resolve(&root, cli.global_flags()))
    {
        Ok(ctx) => ctx,
        Err(err) => return fail(fallback_output, &err),
    };

    match run(&cli.command, &ctx) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => fail(ctx.output, &err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "0190a0c4-0000-7000-8000-000000000001";

    #[test]
    fn json_flag_parses_after_subcommand() {
        let cli = Cli::parse_from(["pal", "show", ID, "--json"]);
        assert!(cli.json);
        assert!(cli.global_flags().json);
    }

    #[test]
    fn format_flag_is_global() {
        let cli = Cli::parse_from(["pal", "history", ID, "--format", "text"]);
        assert_eq!(cli.format, Some(OutputMode::Text));
    }

    #[test]
    fn db_and_timeout_flags_parse_before_subcommand() {
        let cli = Cli::parse_from(["pal", "--db", "/tmp/x.db", "--timeout-ms", "50", "show", ID]);
        assert_eq!(cli.db.as_deref(), Some(std::path::Path::new("/tmp/x.db")));
        assert_eq!(cli.timeout_ms, Some(50));
    }

    #[test]
    fn create_defaults_to_guest() {
        let cli = Cli::parse_from(["pal", "create", "--name", "Ada", "--dob", "1815-12-10"]);
        let Commands::Create(args) = cli.command else {
            panic!("expected create");
        };
        assert_eq!(args.role, palimpsest_core::Role::Guest);
        assert_eq!(args.name.as_str(), "Ada");
    }

    #[test]
    fn show_at_parses_revision() {
        let cli = Cli::parse_from(["pal", "show", ID, "--at", "2"]);
        let Commands::Show(args) = cli.command else {
            panic!("expected show");
        };
        assert_eq!(args.at, Some(2));
        assert_eq!(args.id.to_string(), ID);
    }

    #[test]
    fn mutations_require_expected_revision() {
        assert!(Cli::try_parse_from(["pal", "rename", ID, "Alan"]).is_err());
        assert!(Cli::try_parse_from(["pal", "rename", ID, "--expect", "0", "Alan"]).is_ok());
        assert!(Cli::try_parse_from(["pal", "set-dob", ID, "--expect", "1", "1912-06-23"]).is_ok());
        assert!(Cli::try_parse_from(["pal", "set-role", ID, "--expect", "2", "ADMIN"]).is_ok());
    }

    #[test]
    fn invalid_values_are_rejected_at_parse_time() {
        let long_name = "x".repeat(31);
        assert!(Cli::try_parse_from(["pal", "rename", ID, "--expect", "0", long_name.as_str()]).is_err());
        assert!(Cli::try_parse_from(["pal", "set-dob", ID, "--expect", "0", "1912-13-01"]).is_err());
        assert!(Cli::try_parse_from(["pal", "set-role", ID, "--expect", "0", "owner"]).is_err());
        assert!(Cli::try_parse_from(["pal", "show", "not-a-uuid"]).is_err());
    }

    #[test]
    fn history_from_defaults_to_base_revision() {
        let cli = Cli::parse_from(["pal", "history", ID]);
        let Commands::History(args) = cli.command else {
            panic!("expected history");
        };
        assert_eq!(args.from, 0);
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
