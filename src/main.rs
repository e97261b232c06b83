mod core;
mod sites;

use crate::core::fetch::HttpFetch;
use crate::core::model::{MediaItem, ResolvedMedia};
use crate::sites::registry::ResolverRegistry;
use crate::sites::ResolveContext;
use clap::{Arg, ArgAction, Command};
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn build_cli() -> Command {
    Command::new("tangerine")
        .about("Resolve media page URLs into directly playable stream URLs")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("resolve")
                .about("Resolve one media page URL")
                .arg(Arg::new("url").help("Media page URL").required(true).num_args(1))
                .arg(
                    Arg::new("json")
                        .long("json")
                        .help("Print the full result as JSON")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(Command::new("test-cases").about("List the declared test-case corpus"))
        .subcommand(
            Command::new("find-test")
                .about("Print the test identifier covering a URL")
                .arg(Arg::new("url").required(true).num_args(1)),
        )
        .subcommand(
            Command::new("check-dispatch")
                .about("Verify that no resolver shadows another resolver's URLs"),
        )
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let registry = ResolverRegistry::with_defaults();
    let matches = build_cli().get_matches();

    match matches.subcommand() {
        Some(("resolve", m)) => {
            let url = m.get_one::<String>("url").unwrap();
            let as_json = m.get_flag("json");

            let Some(resolver) = registry.find(url) else {
                eprintln!("no resolver knows this URL: {url}");
                return Ok(ExitCode::from(2));
            };

            let fetch = HttpFetch::new("tangerine/0.1", Duration::from_secs(30))?;
            let ctx = ResolveContext { fetch: &fetch };
            match resolver.resolve(url, &ctx).await {
                Ok(media) => {
                    if as_json {
                        println!("{}", serde_json::to_string_pretty(&media)?);
                    } else {
                        print_summary(resolver.name(), &media);
                    }
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) if e.is_expected() => {
                    // The site declined; distinct from our integration breaking.
                    eprintln!("[{}] content unavailable: {e}", resolver.name());
                    Ok(ExitCode::from(3))
                }
                Err(e) => Err(anyhow::anyhow!("[{}] resolution failed: {e}", resolver.name())),
            }
        }
        Some(("test-cases", _)) => {
            for (name, idx, tc) in registry.test_cases() {
                let mut flags = Vec::new();
                if tc.only_matching {
                    flags.push("only-matching".to_string());
                }
                if let Some(reason) = tc.skip {
                    flags.push(format!("skip: {reason}"));
                }
                if let Some(md5) = tc.md5 {
                    flags.push(format!("md5: {md5}"));
                }
                let suffix =
                    if flags.is_empty() { String::new() } else { format!(" [{}]", flags.join(", ")) };
                println!("{name} #{idx}: {}{suffix}", tc.url);
            }
            Ok(ExitCode::SUCCESS)
        }
        Some(("find-test", m)) => {
            let url = m.get_one::<String>("url").unwrap();
            match registry.find_test_name(url) {
                Some(name) => {
                    println!("{name}");
                    Ok(ExitCode::SUCCESS)
                }
                None => {
                    eprintln!("no test case declares this URL");
                    Ok(ExitCode::from(2))
                }
            }
        }
        Some(("check-dispatch", _)) => {
            let conflicts = registry.dispatch_conflicts();
            if conflicts.is_empty() {
                println!("ok: every test-case URL dispatches to its own resolver");
                Ok(ExitCode::SUCCESS)
            } else {
                for conflict in &conflicts {
                    eprintln!("{conflict}");
                }
                Ok(ExitCode::FAILURE)
            }
        }
        _ => unreachable!("subcommand_required"),
    }
}

fn print_summary(resolver: &str, media: &ResolvedMedia) {
    match media {
        ResolvedMedia::Single(item) => print_item(resolver, item),
        ResolvedMedia::Collection(col) => {
            println!("[{resolver}] {} ({} parts): {}", col.id, col.entries.len(), col.title);
            for entry in &col.entries {
                print_item(resolver, entry);
            }
        }
    }
}

fn print_item(resolver: &str, item: &MediaItem) {
    println!("[{resolver}] {}: {}", item.id, item.title);
    if let Some(duration) = item.duration_seconds {
        println!("  duration: {duration:.2}s");
    }
    if let Some(player) = &item.player_url {
        println!("  player: {player}");
    }
    if let Some(subs) = &item.subtitles {
        let mut langs: Vec<&str> = subs.keys().map(String::as_str).collect();
        langs.sort_unstable();
        println!("  subtitles: {}", langs.join(", "));
    }
    for format in &item.formats {
        match &format.note {
            Some(note) => println!("  format ({note}): {}", format.url),
            None => println!("  format: {}", format.url),
        }
    }
}
