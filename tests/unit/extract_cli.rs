//! Command line parsing

use clap::Parser;
use jira_extractor::cli::checkpoints::CheckpointsSubcommand;
use jira_extractor::cli::{Cli, Commands, OutputFormat};
use jira_extractor::extractor::SchemaErrorPolicy;
use jira_extractor::RecordType;
use std::path::PathBuf;

#[test]
fn test_defaults() {
    let cli = Cli::try_parse_from(["jira-extractor", "extract", "--project", "DEMO"]).unwrap();

    assert_eq!(cli.output_dir, PathBuf::from("data"));
    assert_eq!(cli.checkpoint_dir, PathBuf::from("checkpoints"));
    assert_eq!(cli.max_retries, 5);
    assert_eq!(cli.requests_per_minute, 120);
    assert_eq!(cli.concurrency, 4);
    assert!(!cli.force);
    assert_eq!(cli.on_schema_error, SchemaErrorPolicy::Fail);
    assert_eq!(cli.output_format, OutputFormat::Human);

    match cli.command {
        Commands::Extract(args) => {
            assert_eq!(args.project.as_deref(), Some("DEMO"));
            assert_eq!(args.record_type, RecordType::Issue);
            assert_eq!(args.page_size, 100);
            let queries = args.build_queries(None).unwrap();
            assert_eq!(queries[0].jql(), "project = DEMO ORDER BY key ASC");
        }
        other => panic!("Expected extract, got {:?}", other),
    }
}

#[test]
fn test_global_flags_after_subcommand() {
    let cli = Cli::try_parse_from([
        "jira-extractor",
        "extract",
        "--query-file",
        "queries.json",
        "--force",
        "--concurrency",
        "8",
        "--output-format",
        "json",
        "--requests-per-minute",
        "30",
    ])
    .unwrap();

    assert!(cli.force);
    assert_eq!(cli.concurrency, 8);
    assert_eq!(cli.requests_per_minute, 30);
    assert_eq!(cli.output_format, OutputFormat::Json);
}

#[test]
fn test_invalid_values_rejected() {
    assert!(Cli::try_parse_from(["jira-extractor", "extract", "--record-type", "worklog"]).is_err());
    assert!(Cli::try_parse_from(["jira-extractor", "extract", "--on-schema-error", "ignore"]).is_err());
    assert!(Cli::try_parse_from(["jira-extractor", "extract", "--concurrency", "0"]).is_err());
    assert!(Cli::try_parse_from(["jira-extractor", "extract", "--requests-per-minute", "0"]).is_err());
    assert!(Cli::try_parse_from(["jira-extractor", "extract", "--jql", "a", "--project", "B"]).is_err());
}

#[test]
fn test_checkpoint_subcommands() {
    let cli = Cli::try_parse_from(["jira-extractor", "checkpoints", "show", "ab12"]).unwrap();
    match cli.command {
        Commands::Checkpoints(cmd) => match cmd.command {
            CheckpointsSubcommand::Show { hash } => assert_eq!(hash, "ab12"),
            other => panic!("Expected show, got {:?}", other),
        },
        other => panic!("Expected checkpoints, got {:?}", other),
    }

    let cli = Cli::try_parse_from(["jira-extractor", "--checkpoint-dir", "/tmp/cp", "checkpoints", "verify"]).unwrap();
    assert_eq!(cli.checkpoint_dir, PathBuf::from("/tmp/cp"));
    assert!(matches!(cli.command, Commands::Checkpoints(_)));
}

#[test]
fn test_auth_check() {
    let cli = Cli::try_parse_from(["jira-extractor", "auth", "check", "--credentials", "creds.toml"]).unwrap();
    assert_eq!(cli.credentials, Some(PathBuf::from("creds.toml")));
    assert!(matches!(cli.command, Commands::Auth(_)));
}
