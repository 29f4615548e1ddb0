use std::collections::BTreeMap;

use discord_webhook2::{message, webhook::DiscordWebhook};
use uuid::Uuid;

use crate::{config::WebhookConfig, conversion::ConversionKind};

/// Posts a failed job to the operators' Discord channel, with the tool output
/// collected during the run attached as `<jobId>.log`.
pub async fn job_failed(
    webhook: &WebhookConfig,
    job_id: Uuid,
    kind: ConversionKind,
    error: &str,
    logs: &str,
) -> anyhow::Result<()> {
    let mut files = BTreeMap::new();
    files.insert(format!("{}.log", job_id), logs.as_bytes().to_vec());

    let client = DiscordWebhook::new(&webhook.url)?;
    let message = failure_message(&webhook.pings, job_id, kind, error);
    client.send_with_files(&message, files).await?;

    Ok(())
}

fn failure_message(pings: &str, job_id: Uuid, kind: ConversionKind, error: &str) -> message::Message {
    message::Message::new(|m| {
        m.content(format!("🚨 {}", pings)).embed(|e| {
            e.title("convertd job failed")
                .field(|f| f.name("job id").value(job_id))
                .field(|f| f.name("type").value(kind.to_string()).inline(true))
                .field(|f| f.name("error").value(truncate(error, 1000)))
                .color(0xff83fa)
        })
    })
}

/// Discord caps embed field values at 1024 characters.
fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}
