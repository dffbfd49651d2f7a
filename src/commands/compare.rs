use anyhow::Result;

/// `compare` is an external collaborator (reconciling archived artifacts
/// against live partitions) that this repo names but doesn't implement.
/// The subcommand exists so the CLI surface is complete; it reports that
/// up front rather than silently doing nothing.
pub async fn handle_compare(table: &str) -> Result<()> {
    anyhow::bail!(
        "`compare` for table '{table}' is not implemented by this binary; it is a separate \
         collaborator that consumes the cache and task-info JSON this tool produces"
    )
}
