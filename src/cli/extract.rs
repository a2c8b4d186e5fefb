//! Extract command implementation

use super::{Cli, CliError, OutputFormat};
use crate::auth::{Credentials, TokenCredentialProvider};
use crate::extractor::{ExtractionExecutor, ExtractionResult};
use crate::fetcher::JiraHttpSource;
use crate::query::{load_query_file, DEFAULT_PAGE_SIZE};
use crate::shutdown::SharedShutdown;
use crate::{QueryDescriptor, RecordType};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Arguments for the extract command
#[derive(Args, Debug, Clone)]
pub struct ExtractArgs {
    /// JQL filter to extract
    #[arg(long, conflicts_with_all = ["project", "query_file"])]
    pub jql: Option<String>,

    /// Extract every issue of this project (shorthand for `project = KEY ORDER BY key ASC`)
    #[arg(long, conflicts_with = "query_file")]
    pub project: Option<String>,

    /// JSON file holding one query descriptor or an array of them
    #[arg(long)]
    pub query_file: Option<PathBuf>,

    /// Record type to produce from each issue
    #[arg(long, default_value = "issue")]
    pub record_type: RecordType,

    /// Comma-separated issue fields to request (default: all)
    #[arg(long, value_delimiter = ',')]
    pub fields: Vec<String>,

    /// Issues requested per page
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    pub page_size: u32,

    /// Label used in the dataset file name
    #[arg(long)]
    pub label: Option<String>,
}

impl ExtractArgs {
    /// Resolve the arguments into query descriptors
    ///
    /// Without `--jql`, `--project` or `--query-file` the credentials' default project is
    /// extracted.
    pub fn build_queries(&self, default_project: Option<&str>) -> Result<Vec<QueryDescriptor>, CliError> {
        if let Some(path) = &self.query_file {
            return Ok(load_query_file(path)?);
        }

        let query = match (&self.jql, &self.project, default_project) {
            (Some(jql), _, _) => QueryDescriptor::new(jql.clone(), self.record_type),
            (None, Some(project), _) => QueryDescriptor::for_project(project, self.record_type),
            (None, None, Some(project)) => QueryDescriptor::for_project(project, self.record_type),
            (None, None, None) => {
                return Err(CliError::InvalidArgument(
                    "one of --jql, --project or --query-file is required when no default project is configured"
                        .to_string(),
                ))
            }
        };

        let mut query = query
            .with_fields(self.fields.iter().map(|f| f.trim()).filter(|f| !f.is_empty()))
            .with_page_size(self.page_size);
        if let Some(label) = &self.label {
            query = query.with_label(label.clone());
        }
        query.validate()?;
        Ok(vec![query])
    }

    /// Execute the extract command
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<(), CliError> {
        let credentials = Credentials::load(cli.credentials.as_deref())?;
        let queries = self.build_queries(credentials.default_project_key())?;

        info!(
            queries = queries.len(),
            concurrency = cli.concurrency,
            force = cli.force,
            "Starting extraction"
        );

        let executor = build_executor(cli, credentials, shutdown)?;
        let results = executor.run_many(&queries, cli.concurrency).await;
        report(&results, cli.output_format)?;

        let failed = results.iter().filter(|r| !r.is_complete()).count();
        if failed > 0 {
            return Err(CliError::ExtractionFailed {
                failed,
                total: results.len(),
            });
        }
        Ok(())
    }
}

/// Executor configured from the global flags, one rate budget shared by every query
fn build_executor(
    cli: &Cli,
    credentials: Credentials,
    shutdown: SharedShutdown,
) -> Result<ExtractionExecutor, CliError> {
    Ok(ExtractionExecutor::new(
        Arc::new(TokenCredentialProvider::new(credentials)),
        Arc::new(JiraHttpSource::new()),
        &cli.output_dir,
        &cli.checkpoint_dir,
    )?
    .with_requests_per_minute(cli.requests_per_minute)
    .with_max_retries(cli.max_retries)
    .with_force(cli.force)
    .with_schema_policy(cli.on_schema_error)
    .with_shutdown(shutdown))
}

fn report(results: &[ExtractionResult], format: OutputFormat) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(results)
                .map_err(|e| CliError::SerializationError(e.to_string()))?;
            println!("{}", json);
        }
        OutputFormat::Human => {
            for result in results {
                println!("{}", result.summary());
            }
        }
    }
    Ok(())
}
