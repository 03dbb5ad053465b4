use super::AppContext;
use crate::output::Output;
use color_eyre::Result;
use reelshelf_core::LocalStore;

pub fn run_clear(all: bool, watchlist: bool, visited: bool, ctx: &AppContext, output: &Output) -> Result<()> {
    if !(all || watchlist || visited) {
        output.warn("No clear option specified. Use --watchlist, --visited, or --all");
        output.info("\nExample: reelshelf clear --watchlist");
        return Ok(());
    }

    output.info(format!("Profile: {}", ctx.config.profile_dir(&ctx.paths).display()));

    if all || watchlist {
        clear_key(ctx, &ctx.config.storage.watchlist_key, "watchlist", output);
    }
    if all || visited {
        clear_key(ctx, &ctx.config.storage.visited_key, "visited flag", output);
    }
    Ok(())
}

fn clear_key(ctx: &AppContext, key: &str, label: &str, output: &Output) {
    if ctx.store.read(key).is_none() {
        output.info(format!("No {} found to clear", label));
        return;
    }

    match ctx.store.remove(key) {
        Ok(()) => output.success(format!("Cleared {}", label)),
        Err(e) => output.warn(format!("Failed to clear {}: {}", label, e)),
    }
}
