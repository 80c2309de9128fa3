pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use commands::user_add::UserAddArgs;

#[derive(Debug, Parser)]
#[command(
    name = "assetdesk",
    about = "AssetDesk operator CLI",
    long_about = "Operate the AssetDesk approval service: migrations, demo data, user provisioning, config inspection, and readiness checks.",
    after_help = "Examples:\n  assetdesk migrate\n  assetdesk user-add --username cm.fourth --full-name \"Fourth Floor Manager\" --email cm4@example.com --role \"Concern Manager\" --floor 4th\n  assetdesk doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the demo organisation and one pending request per approval chain")]
    Seed,
    #[command(name = "user-add", about = "Create a user with a role and optional floor")]
    UserAdd(UserAddArgs),
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config, database connectivity, and migration state")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::UserAdd(args) => commands::user_add::run(&args),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Command};

    #[test]
    fn parses_user_add_with_optional_floor() {
        let cli = Cli::try_parse_from([
            "assetdesk",
            "user-add",
            "--username",
            "cm.fourth",
            "--full-name",
            "Fourth Floor Manager",
            "--email",
            "cm4@example.com",
            "--role",
            "Concern Manager",
            "--floor",
            "4th",
        ])
        .expect("parse");

        let Command::UserAdd(args) = cli.command else {
            panic!("expected user-add");
        };
        assert_eq!(args.role, "Concern Manager");
        assert_eq!(args.floor.as_deref(), Some("4th"));
        assert_eq!(args.department, None);
    }

    #[test]
    fn user_add_requires_role() {
        let result = Cli::try_parse_from([
            "assetdesk",
            "user-add",
            "--username",
            "x",
            "--full-name",
            "X",
            "--email",
            "x@example.com",
        ]);
        assert!(result.is_err());
    }
}
