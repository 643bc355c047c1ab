use std::process::ExitCode;

use anyhow::anyhow;
use args::Args;
use clap::Parser;
use config::Settings;
use store::Store;

mod age;
mod args;
mod logger;
mod manage;
mod session;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    logger::init(&args.log_filter);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("parley: {err:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let settings = match args.settings.clone().or_else(Settings::default_path) {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };

    let cache_root = args
        .cache_dir
        .clone()
        .or_else(Settings::default_cache_dir)
        .ok_or_else(|| anyhow!("could not determine a cache directory; pass --cache-dir"))?;

    if args.is_management() {
        let store = Store::open(&cache_root)
            .map_err(|err| anyhow!("{err}; pass --no-cache to run without the conversation store"))?;
        return manage::run(&args, &store);
    }

    let store = if args.no_cache {
        None
    } else {
        Some(Store::open(&cache_root).map_err(|err| {
            anyhow!("{err}; pass --no-cache to run without the conversation store")
        })?)
    };

    session::run(&args, &settings, store.as_ref(), &cache_root).await
}
