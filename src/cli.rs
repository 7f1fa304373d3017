use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(version, about = "Hierarchical file storage on object-store buckets")]
pub struct Cli {
    /// Configuration file, layered over the platform defaults.
    #[arg(long, global = true, env = "BUCKETFS_CONFIG")]
    pub config: Option<PathBuf>,
    /// Mute output as much as possible.
    #[arg(short, long, global = true)]
    pub silent: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Copy every catalogued file of one storage into another.
    Copy {
        /// Source storage name.
        source: String,
        /// Target storage name. Must be an s3 storage.
        target: String,
    },
    /// Move catalogued files into another storage, re-pointing their catalog
    /// rows. Source files are deleted once uploaded.
    Move {
        source: String,
        target: String,
        /// Don't ask for confirmation.
        #[arg(short, long)]
        yes: bool,
        #[command(flatten)]
        selection: SelectionArgs,
        /// Report what would happen without writing to either storage or the
        /// catalog.
        #[arg(long)]
        dry_run: bool,
    },
    /// Drop every cached listing of a storage.
    FlushCache { storage: String },
    /// Check that a storage is reachable with its configured credentials.
    Check { storage: String },
}

#[derive(Debug, Clone, Default, Args)]
pub struct SelectionArgs {
    /// Only identifiers matching this pattern, with `%` wildcards
    /// (`--filter="%.pdf"`).
    #[arg(long)]
    pub filter: Option<String>,
    /// Comma-separated patterns to skip (`--exclude="/apps/%,/_temp/%"`).
    #[arg(long)]
    pub exclude: Option<String>,
    /// `limit` or `offset,limit` (`--limit=0,100`).
    #[arg(long)]
    pub limit: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_move() {
        let cli = Cli::try_parse_from([
            "bucketfs",
            "-s",
            "move",
            "legacy",
            "fileadmin",
            "--yes",
            "--filter=%.pdf",
            "--exclude=/apps/%,/_temp/%",
            "--limit=0,100",
        ])
        .unwrap();
        assert!(cli.silent);
        let Command::Move {
            source,
            target,
            yes,
            selection,
            dry_run,
        } = cli.command
        else {
            panic!("expected move command");
        };
        assert_eq!((source.as_str(), target.as_str()), ("legacy", "fileadmin"));
        assert!(yes && !dry_run);
        assert_eq!(selection.filter.as_deref(), Some("%.pdf"));
        assert_eq!(selection.exclude.as_deref(), Some("/apps/%,/_temp/%"));
        assert_eq!(selection.limit.as_deref(), Some("0,100"));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["bucketfs", "check", "fileadmin", "--config", "/etc/bucketfs.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/bucketfs.toml")));
        assert!(matches!(cli.command, Command::Check { storage } if storage == "fileadmin"));
    }

    #[test]
    fn test_copy_takes_no_selection() {
        assert!(Cli::try_parse_from(["bucketfs", "copy", "a", "b", "--filter=%"]).is_err());
    }
}
