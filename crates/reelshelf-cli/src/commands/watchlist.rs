use super::{parse_kind, AppContext};
use crate::output::Output;
use crate::WatchlistCommands;
use color_eyre::Result;
use dialoguer::Confirm;
use reelshelf_models::{NewWatchlistItem, WatchlistItem};
use serde_json::json;
use std::io::IsTerminal;

pub fn run_watchlist(cmd: WatchlistCommands, ctx: &AppContext, output: &Output) -> Result<()> {
    let manager = ctx.watchlist();

    match cmd {
        WatchlistCommands::List => {
            let items = manager.list();
            print_items(&items, output);
        }
        WatchlistCommands::Add { id, kind, title, poster } => {
            let kind = parse_kind(&kind)?;
            let mut item = NewWatchlistItem::new(id.clone(), kind, title.clone());
            if let Some(poster) = poster {
                item = item.with_poster(poster);
            }

            let added = manager.add(item);
            let saved = added || manager.contains(&id, kind);
            output.json(&json!({ "id": id, "type": kind, "added": added, "saved": saved }));
            if added {
                output.success(format!("Added {} '{}' to watchlist", kind, title));
            } else if saved {
                output.info(format!("{} {} is already on the watchlist", kind, id));
            } else {
                output.warn("Watchlist could not be saved (storage full or unavailable)");
            }
        }
        WatchlistCommands::Remove { id, kind } => {
            let kind = parse_kind(&kind)?;
            let removed = manager.remove(&id, kind);
            output.json(&json!({ "id": id, "type": kind, "removed": removed }));
            if removed {
                output.success(format!("Removed {} {} from watchlist", kind, id));
            } else if manager.contains(&id, kind) {
                output.warn("Watchlist could not be saved (storage full or unavailable)");
            } else {
                output.info(format!("{} {} is not on the watchlist", kind, id));
            }
        }
        WatchlistCommands::Contains { id, kind } => {
            let kind = parse_kind(&kind)?;
            let contains = manager.contains(&id, kind);
            output.json(&json!({ "id": id, "type": kind, "contains": contains }));
            if output.is_human() {
                output.info(if contains { "yes" } else { "no" });
            }
        }
        WatchlistCommands::Clear { yes } => {
            let count = manager.list().len();
            if count == 0 {
                output.info("Watchlist is already empty");
                return Ok(());
            }

            let confirmed = yes
                || !output.is_human()
                || !std::io::stdin().is_terminal()
                || Confirm::new()
                    .with_prompt(format!("Remove all {} watchlist entries?", count))
                    .default(false)
                    .interact()?;
            if !confirmed {
                output.info("Cancelled");
                return Ok(());
            }

            let cleared = manager.clear();
            output.json(&json!({ "cleared": cleared, "removed": if cleared { count } else { 0 } }));
            if cleared {
                output.success(format!("Cleared {} watchlist entries", count));
            } else {
                output.warn("Watchlist could not be cleared (storage unavailable)");
            }
        }
    }

    Ok(())
}

pub fn print_items(items: &[WatchlistItem], output: &Output) {
    if !output.is_human() {
        output.json(&json!({ "items": items }));
        return;
    }

    if items.is_empty() {
        output.info("Watchlist is empty");
        return;
    }

    let rows = items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            vec![
                (i + 1).to_string(),
                item.kind.to_string(),
                item.id.clone(),
                item.title.clone(),
                item.added_at.format("%Y-%m-%d %H:%M").to_string(),
                item.detail_route(),
            ]
        })
        .collect();
    output.table(&["#", "Type", "Id", "Title", "Added (UTC)", "Route"], rows);
}
