//! Print the persisted conversations of a data directory.
//!
//! Usage: dm-inspect [DATA_DIR] [--me <pubkey>] [--purge]

use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::{TimeZone, Utc};
use dm_core::config::CoreConfig;
use dm_core::constants::kinds;
use dm_core::expiration::{Clock, SystemClock};
use dm_core::store::{MessageStore, SqliteKv};

fn format_ms(ms: u64) -> String {
    match Utc.timestamp_millis_opt(ms as i64).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        None => format!("{}ms", ms),
    }
}

fn kind_label(kind: u16) -> &'static str {
    match kind {
        kinds::CHAT_MESSAGE => "chat",
        kinds::FILE_MESSAGE => "file",
        kinds::REACTION => "reaction",
        _ => "other",
    }
}

fn main() -> Result<()> {
    dm_core::tracing_setup::init_tracing()?;

    let mut config = CoreConfig::from_env();
    let mut me: Option<String> = None;
    let mut purge = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--me" => match args.next() {
                Some(pubkey) => me = Some(pubkey),
                None => bail!("--me requires a pubkey"),
            },
            "--purge" => purge = true,
            dir => config = CoreConfig::new(dir),
        }
    }

    let path = config.database_path();
    if !path.exists() {
        println!("No message database at {}", path.display());
        return Ok(());
    }

    let store = MessageStore::new(Arc::new(SqliteKv::open(&path)?));
    let loaded = store.hydrate()?;
    println!("Loaded {} conversation(s) from {}\n", loaded, path.display());

    let now = SystemClock.now_secs();
    if purge {
        let removed = store.purge_expired(now);
        let written = store.flush()?;
        println!("Purged {} expired message(s), rewrote {} conversation(s)\n", removed, written);
    }

    for conversation_id in store.conversation_ids() {
        let Some(messages) = store.messages(&conversation_id) else {
            continue;
        };
        let last_seen = store.last_seen(&conversation_id).unwrap_or(0);

        println!("Conversation {}", &conversation_id[..16]);
        println!("  messages:  {}", messages.len());
        println!("  last seen: {}", format_ms(last_seen));
        if let Some(ref me) = me {
            println!("  unread:    {}", store.unread_count(&conversation_id, me));
        }

        for message in messages.values() {
            let mine = me.as_deref().is_some_and(|me| message.is_from(me));
            let expiry = match message.expires_at() {
                Some(deadline) if deadline <= now => " [expired]".to_string(),
                Some(deadline) => format!(" [expires in {}s]", deadline - now),
                None => String::new(),
            };
            let status = message.status.map(|s| s.as_str()).unwrap_or("-");

            println!(
                "  {} {} {:>8} {:<9} {}{}",
                format_ms(message.order_ms()),
                if mine { "me  " } else { "peer" },
                kind_label(message.kind),
                status,
                message.content.chars().take(60).collect::<String>(),
                expiry
            );
        }
        println!();
    }

    match store.next_expiration_after(now) {
        Some(deadline) => println!("Next expiration in {}s", deadline - now),
        None => println!("No pending expirations"),
    }

    Ok(())
}
