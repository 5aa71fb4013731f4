use anyhow::{bail, Context};
use clap::{Arg, ArgAction, ArgMatches, Command};
use futures::StreamExt;
use serde_json::Value;
use smartcache::{
    arguments::set_cmd_args,
    config::{self, SmartCacheConfig},
    logger::{self, LogTag},
    paths,
    smart_cache::{now_ms, CacheEvent, ResultEvent, ValidityPolicy},
    storage::{self, JsonDirStore},
    CacheOptions, LoadConfig, SmartCache,
};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

fn cli() -> Command {
    let type_arg = || {
        Arg::new("type")
            .value_name("TYPE")
            .help("Cache type (namespace), e.g. prices")
            .required(true)
    };
    let key_arg = || {
        Arg::new("key")
            .value_name("KEY")
            .help("Cache key")
            .required(true)
    };

    Command::new("SmartCache Tool")
        .version("1.0")
        .about("Inspect and manage the SmartCache persisted tier")
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .global(true)
                .help("Config file (defaults to <base>/config.toml)"),
        )
        .arg(Arg::new("debug-cache").long("debug-cache").action(ArgAction::SetTrue).global(true))
        .arg(Arg::new("debug-queue").long("debug-queue").action(ArgAction::SetTrue).global(true))
        .arg(Arg::new("debug-storage").long("debug-storage").action(ArgAction::SetTrue).global(true))
        .arg(Arg::new("verbose").long("verbose").action(ArgAction::SetTrue).global(true))
        .arg(Arg::new("quiet").long("quiet").action(ArgAction::SetTrue).global(true))
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .global(true)
                .help("error, warning, info, debug or verbose"),
        )
        .arg(
            Arg::new("log-tags")
                .long("log-tags")
                .value_name("TAGS")
                .global(true)
                .help("Comma separated tags to show, e.g. cache,queue (errors always shown)"),
        )
        .arg(Arg::new("no-log-file").long("no-log-file").action(ArgAction::SetTrue).global(true))
        .subcommand_required(true)
        .subcommand(
            Command::new("peek")
                .about("Show a persisted entry and its freshness")
                .arg(type_arg())
                .arg(key_arg()),
        )
        .subcommand(
            Command::new("list")
                .about("List persisted keys of a cache type with their age")
                .arg(type_arg()),
        )
        .subcommand(
            Command::new("fetch")
                .about("Load a key through a SmartCache backed by an HTTP source")
                .arg(type_arg())
                .arg(key_arg())
                .arg(
                    Arg::new("url")
                        .long("url")
                        .value_name("TEMPLATE")
                        .required(true)
                        .help("URL template, {key} is replaced by the key"),
                )
                .arg(
                    Arg::new("max-age")
                        .long("max-age")
                        .value_name("MS")
                        .value_parser(clap::value_parser!(u64))
                        .help("Freshness budget in milliseconds"),
                )
                .arg(
                    Arg::new("max-stale")
                        .long("max-stale")
                        .value_name("MS")
                        .value_parser(clap::value_parser!(u64))
                        .help("Staleness window in milliseconds"),
                ),
        )
        .subcommand(
            Command::new("clear")
                .about("Remove every persisted entry of a cache type")
                .arg(type_arg()),
        )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    set_cmd_args(env::args().collect());
    logger::init();

    let matches = cli().get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .map(PathBuf::from)
        .unwrap_or_else(paths::get_config_path);
    paths::ensure_all_directories().map_err(anyhow::Error::msg)?;
    config::load_config_from_path(&config_path).map_err(anyhow::Error::msg)?;
    if !config_path.exists() {
        config::save_config(Some(&config_path)).map_err(anyhow::Error::msg)?;
        logger::info(
            LogTag::Config,
            &format!("Wrote default configuration to {}", config_path.display()),
        );
    }
    let config = config::get_config_clone();

    let store = JsonDirStore::new(cache_root(&config));
    logger::debug(
        LogTag::System,
        &format!("Persisted tier at {}", store.base().display()),
    );

    let result = match matches.subcommand() {
        Some(("peek", sub)) => peek(&store, &config, sub),
        Some(("list", sub)) => list(&store, &config, sub),
        Some(("fetch", sub)) => fetch(store, &config, sub).await,
        Some(("clear", sub)) => clear(&store, sub),
        _ => bail!("unknown command"),
    };

    logger::flush();
    result
}

fn cache_root(config: &SmartCacheConfig) -> PathBuf {
    if config.cache_dir.trim().is_empty() {
        paths::get_cache_directory()
    } else {
        PathBuf::from(&config.cache_dir)
    }
}

fn required<'a>(matches: &'a ArgMatches, name: &str) -> anyhow::Result<&'a str> {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .with_context(|| format!("missing argument <{}>", name))
}

fn read_result(store: &JsonDirStore, cache_type: &str, key: &str) -> Option<ResultEvent<Value>> {
    let candidates: [&[&str]; 2] = [&["cache", cache_type, key], &["cache", key]];
    candidates.iter().find_map(|path| {
        match storage::read_typed::<CacheEvent<Value>>(store, path) {
            Some(CacheEvent::Result(result)) => Some(result),
            _ => None,
        }
    })
}

fn freshness(result: &ResultEvent<Value>, config: &SmartCacheConfig) -> &'static str {
    let validity = ValidityPolicy::from_env();
    let horizon = config.default_max_age_ms.saturating_add(config.default_max_stale_ms);

    if validity.is_valid(result.timestamp_ms, config.default_max_age_ms) {
        "fresh"
    } else if validity.is_valid(result.timestamp_ms, horizon) {
        "stale"
    } else {
        "expired"
    }
}

fn peek(store: &JsonDirStore, config: &SmartCacheConfig, matches: &ArgMatches) -> anyhow::Result<()> {
    let cache_type = required(matches, "type")?;
    let key = required(matches, "key")?;

    let Some(result) = read_result(store, cache_type, key) else {
        println!("No persisted entry for {}/{}", cache_type, key);
        return Ok(());
    };

    println!("Key:       {}", result.key);
    println!("Age:       {:.1}s ({})", result.age_ms(now_ms()) as f64 / 1000.0, freshness(&result, config));
    match &result.result {
        Some(value) => println!("Value:     {}", serde_json::to_string_pretty(value)?),
        None => println!("Value:     <no data>"),
    }
    Ok(())
}

fn list(store: &JsonDirStore, config: &SmartCacheConfig, matches: &ArgMatches) -> anyhow::Result<()> {
    let cache_type = required(matches, "type")?;
    let keys = store.list(&["cache", cache_type]);

    if keys.is_empty() {
        println!("No persisted entries for type '{}'", cache_type);
        return Ok(());
    }

    let now = now_ms();
    println!("{:<40} {:>12} {:>8}", "KEY", "AGE (s)", "STATE");
    for key in &keys {
        match read_result(store, cache_type, key) {
            Some(result) => println!(
                "{:<40} {:>12.1} {:>8}",
                key,
                result.age_ms(now) as f64 / 1000.0,
                freshness(&result, config)
            ),
            None => println!("{:<40} {:>12} {:>8}", key, "-", "corrupt"),
        }
    }
    println!("{} entries", keys.len());
    Ok(())
}

async fn fetch(store: JsonDirStore, config: &SmartCacheConfig, matches: &ArgMatches) -> anyhow::Result<()> {
    let cache_type = required(matches, "type")?;
    let key = required(matches, "key")?;
    let template = required(matches, "url")?.to_string();

    let client = reqwest::Client::new();
    let fetcher = move |key: String| {
        let client = client.clone();
        let url = template.replace("{key}", &key);
        async move {
            logger::debug(LogTag::System, &format!("GET {}", url));
            let response = client.get(&url).send().await?.error_for_status()?;
            let value: Value = response.json().await?;
            Ok::<_, anyhow::Error>(Some(value))
        }
    };

    let cache: SmartCache<Value> =
        SmartCache::with_options(Arc::new(store), cache_type, fetcher, CacheOptions::from_config(config))?;

    let mut load = LoadConfig::new(key);
    if let Some(max_age) = matches.get_one::<u64>("max-age") {
        load = load.max_age_ms(*max_age);
    }
    if let Some(max_stale) = matches.get_one::<u64>("max-stale") {
        load = load.max_stale_ms(*max_stale);
    }

    let mut events = cache.load(load)?;
    while let Some(event) = events.next().await {
        match event? {
            CacheEvent::Result(result) => {
                let value = match &result.result {
                    Some(value) => serde_json::to_string_pretty(value)?,
                    None => "<no data>".to_string(),
                };
                println!("result ({}ms old): {}", result.age_ms(now_ms()), value);
            }
            CacheEvent::RateLimit { limit_expires_ms, .. } => {
                println!("rate-limit: waiting {}ms", limit_expires_ms)
            }
            other => println!("{}", other.kind()),
        }
    }

    // A stale hit queues a background refresh; let it land before exiting
    while cache.peek(key).map(|entry| entry.is_in_flight()).unwrap_or(false) {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    Ok(())
}

fn clear(store: &JsonDirStore, matches: &ArgMatches) -> anyhow::Result<()> {
    let cache_type = required(matches, "type")?;
    let removed = store.clear(&["cache", cache_type])?;
    logger::info(
        LogTag::Storage,
        &format!("Removed {} persisted entries for '{}'", removed, cache_type),
    );
    Ok(())
}
