// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Subcommand implementations.
//!
//! Each command returns the text to print so it can be tested without a
//! terminal.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parley_config::ParleyConfig;
use parley_core::{Identity, InboundMessage, MediaCategory, MediaRef, ParleyError};
use parley_dispatch::payload;
use parley_egress::{Delivery, EgressQueue, WasenderClient};
use parley_media::{open_blob, resolve_content};
use parley_storage::Database;
use parley_storage::models::format_timestamp;
use parley_storage::queries::{ledger, sessions};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// `parley migrate`
pub async fn migrate(config: &ParleyConfig) -> Result<String, ParleyError> {
    let db = Database::open_with(&config.storage).await?;
    let count = ledger::count_inbound(&db).await?;
    db.close().await?;
    Ok(format!(
        "database ready at {} ({count} inbound events)\n",
        config.storage.database_path
    ))
}

/// `parley send <to> <text>`: one message through the paced egress queue.
pub async fn send(config: &ParleyConfig, to: &str, text: &str) -> Result<String, ParleyError> {
    let identity = Identity::normalize(to, config.adapter.default_country_code.as_deref())
        .ok_or_else(|| ParleyError::Config(format!("{to:?} is not a phone number")))?;
    let client = WasenderClient::from_config(&config.egress)?;

    let cancel = CancellationToken::new();
    let (queue, worker) = EgressQueue::from_config(Arc::new(client), &config.egress, cancel.clone());
    let result = queue.send(&identity, text).await;
    cancel.cancel();
    let _ = worker.await;

    match result? {
        Delivery::Sent { attempts } => {
            info!(to = %identity, attempts, "message sent");
            Ok(format!("sent to {identity} after {attempts} attempt(s)\n"))
        }
        Delivery::Skipped => Ok("nothing to send: text is blank\n".to_string()),
    }
}

/// Options of `parley decrypt`.
#[derive(Debug, Clone)]
pub struct DecryptArgs {
    pub input: PathBuf,
    pub media_key: String,
    pub category: MediaCategory,
    pub mimetype: Option<String>,
    pub output: Option<PathBuf>,
}

/// `parley decrypt`: opens a downloaded `.enc` blob with its media key.
pub async fn decrypt(args: &DecryptArgs) -> Result<String, ParleyError> {
    let blob = tokio::fs::read(&args.input)
        .await
        .map_err(|e| ParleyError::Media {
            message: format!("cannot read {}", args.input.display()),
            source: Some(Box::new(e)),
        })?;

    let media = MediaRef {
        url: args.input.display().to_string(),
        crypto_key: Some(args.media_key.clone()),
        mimetype: args.mimetype.clone(),
        file_name: None,
        category: args.category,
    };
    let plaintext = open_blob(&media, blob)?;
    let content = resolve_content(media.mimetype.as_deref(), None, &plaintext, &media.url);

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output(&args.input, &content.extension));
    tokio::fs::write(&output, &plaintext)
        .await
        .map_err(|e| ParleyError::Media {
            message: format!("cannot write {}", output.display()),
            source: Some(Box::new(e)),
        })?;

    Ok(format!(
        "wrote {} bytes ({}) to {}\n",
        plaintext.len(),
        content.content_type,
        output.display()
    ))
}

fn default_output(input: &Path, extension: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "media".to_string());
    input.with_file_name(format!("{stem}{extension}"))
}

/// `parley ledger failed`: ledger rows whose last turn rolled back.
pub async fn ledger_failed(
    config: &ParleyConfig,
    limit: usize,
    as_json: bool,
) -> Result<String, ParleyError> {
    let db = Database::open_with(&config.storage).await?;
    let failed = ledger::list_failed_events(&db, limit).await?;

    if as_json {
        let rows: Vec<_> = failed
            .iter()
            .map(|f| {
                json!({
                    "event_id": f.event.id,
                    "dedupe_key": f.event.dedupe_key.as_str(),
                    "identity": f.event.identity.as_str(),
                    "body": f.event.body,
                    "error_kind": f.error_kind,
                    "error": f.error,
                    "recorded_at": format_timestamp(f.recorded_at),
                })
            })
            .collect();
        return Ok(format!("{}\n", serde_json::to_string_pretty(&rows)?));
    }

    if failed.is_empty() {
        return Ok("no failed events\n".to_string());
    }
    let mut out = String::new();
    for f in &failed {
        let _ = writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}",
            f.event.id,
            format_timestamp(f.recorded_at),
            f.event.identity,
            f.error_kind.as_deref().unwrap_or("-"),
            f.error.as_deref().unwrap_or("-"),
        );
    }
    Ok(out)
}

/// `parley sessions open`
pub async fn sessions_open(config: &ParleyConfig, as_json: bool) -> Result<String, ParleyError> {
    let db = Database::open_with(&config.storage).await?;
    let open = sessions::list_open_sessions(&db).await?;

    if as_json {
        return Ok(format!("{}\n", serde_json::to_string_pretty(&open)?));
    }
    if open.is_empty() {
        return Ok("no open sessions\n".to_string());
    }
    let mut out = String::new();
    for s in &open {
        let _ = writeln!(
            out,
            "{}\t{}\t{}\tstep {}\t{}",
            s.id,
            s.identity,
            s.flow,
            s.step,
            format_timestamp(s.updated_at),
        );
    }
    Ok(out)
}

/// `parley config show`
pub fn config_show(config: &ParleyConfig) -> Result<String, ParleyError> {
    config
        .to_redacted_toml()
        .map_err(|e| ParleyError::Internal(format!("cannot render config: {e}")))
}

/// `parley normalize <file>`
pub async fn normalize(config: &ParleyConfig, input: &Path) -> Result<String, ParleyError> {
    let raw = tokio::fs::read_to_string(input)
        .await
        .map_err(|e| ParleyError::Config(format!("cannot read {}: {e}", input.display())))?;
    let body: serde_json::Value = serde_json::from_str(&raw)?;

    match payload::normalize(&body, config.adapter.default_country_code.as_deref()) {
        Ok(messages) => {
            let rows: Vec<_> = messages.iter().map(message_json).collect();
            Ok(format!("{}\n", serde_json::to_string_pretty(&rows)?))
        }
        Err(reason) => Ok(format!("skipped: {reason}\n")),
    }
}

fn message_json(message: &InboundMessage) -> serde_json::Value {
    json!({
        "dedupe_key": message.dedupe_key.as_str(),
        "identity": message.identity.as_str(),
        "text": message.text,
        "profile_name": message.profile_name,
        "media": message.media,
    })
}
