use medtrack_core::QueueAction;

use crate::commands::common::{
    format_dead_letter_lines, format_queue_lines, normalize_item_id, parse_payload, Context,
};
use crate::error::CliError;

pub async fn run_enqueue(
    context: &Context,
    action: QueueAction,
    entity_type: &str,
    entity_id: &str,
    payload: &str,
) -> Result<(), CliError> {
    let payload = parse_payload(payload)?;
    let id = context
        .queue()
        .enqueue(action, entity_type, entity_id, payload)
        .await?;
    println!("{id}");
    Ok(())
}

pub async fn run_queue(context: &Context, as_json: bool) -> Result<(), CliError> {
    let items = context.queue().list().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else if items.is_empty() {
        println!("Queue is empty.");
    } else {
        for line in format_queue_lines(&items) {
            println!("{line}");
        }
    }

    Ok(())
}

pub async fn run_dead_letters(context: &Context, as_json: bool) -> Result<(), CliError> {
    let letters = context.queue().dead_letters().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&letters)?);
    } else if letters.is_empty() {
        println!("No quarantined mutations.");
    } else {
        for line in format_dead_letter_lines(&letters) {
            println!("{line}");
        }
    }

    Ok(())
}

pub async fn run_quarantine(context: &Context, max_retries: u32) -> Result<(), CliError> {
    let moved = context.queue().quarantine_exhausted(max_retries).await?;
    println!("Quarantined {moved} mutation(s).");
    Ok(())
}

pub async fn run_requeue(context: &Context, id: &str) -> Result<(), CliError> {
    let id = normalize_item_id(id)?;
    let item = context.queue().requeue_dead_letter(&id).await?;
    println!("Requeued {} {} {}/{}", item.id, item.action, item.entity_type, item.entity_id);
    Ok(())
}
