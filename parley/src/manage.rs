//! Store management commands: list, show, delete, sweep, completions.

use anyhow::{anyhow, bail};
use jiff::Timestamp;
use protocol::Role;
use store::Store;

use crate::age::{format_age, parse_age};
use crate::args::Args;

pub fn run(args: &Args, store: &Store) -> anyhow::Result<()> {
    if args.list {
        return list(store);
    }

    if let Some(prefix) = &args.complete {
        for line in store.completions(prefix)? {
            println!("{line}");
        }
        return Ok(());
    }

    if let Some(reference) = &args.show {
        return show(store, reference);
    }

    if args.show_last {
        let row = store
            .find_head()?
            .ok_or_else(|| anyhow!("there are no saved conversations"))?;
        return show(store, &row.id);
    }

    if let Some(reference) = &args.delete {
        let row = store.find(reference)?;
        store.delete(&row.id)?;
        eprintln!("deleted {} ({})", row.short_id(), row.title);
        return Ok(());
    }

    if let Some(age) = &args.delete_older_than {
        let age = parse_age(age).map_err(|err| anyhow!("invalid --delete-older-than: {err}"))?;
        let removed = store.delete_older_than(age)?;
        eprintln!("deleted {} conversations", removed.len());
        return Ok(());
    }

    bail!("no management command given");
}

fn list(store: &Store) -> anyhow::Result<()> {
    let now = Timestamp::now().as_second();

    for row in store.list()? {
        println!(
            "{}\t{}\t{}",
            row.short_id(),
            format_age(now - row.updated_at),
            row.title
        );
    }

    Ok(())
}

/// Print a stored conversation's last assistant response.
fn show(store: &Store, reference: &str) -> anyhow::Result<()> {
    let row = store.find(reference)?;
    let messages = store.read(&row.id)?;

    let response = messages
        .iter()
        .rev()
        .find(|message| message.role == Role::Assistant)
        .ok_or_else(|| anyhow!("conversation '{}' has no response yet", row.title))?;

    println!("{}", response.content.trim_end());
    Ok(())
}
