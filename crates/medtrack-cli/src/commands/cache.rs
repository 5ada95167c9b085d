use medtrack_core::CacheTable;

use crate::commands::common::{format_cached_lines, Context};
use crate::error::CliError;

pub async fn run_cache(context: &Context, table: CacheTable, as_json: bool) -> Result<(), CliError> {
    let entities = context.store().get_all(table).await?;

    if as_json {
        let rows = entities.iter().map(|entity| &entity.data).collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else if entities.is_empty() {
        println!("No cached {table}.");
    } else {
        for line in format_cached_lines(&entities) {
            println!("{line}");
        }
    }

    Ok(())
}
