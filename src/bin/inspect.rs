//! Session inspector
//!
//! Reads the controller's durable state without starting an engine.
//!
//! Usage: fxchain-inspect [--data-dir <dir>] <command>
//! - `session` - saved chain, one plugin per line
//! - `pending` - load marker left by a run that died mid-load
//! - `blacklist [remove <path> | clear]`
//! - `presets`, `templates`
//! - `log [clear]` - contents of the log file
//!
//! Failures are printed as "error:message" with exit code 1.

use std::env;
use std::path::PathBuf;

use fxchain_lib::chain::gain_db_label;
use fxchain_lib::config::{default_data_dir, SessionConfig};
use fxchain_lib::presets::{FilePresetStore, PresetStore, TemplateLibrary};
use fxchain_lib::session::{Blacklist, SessionStore};
use fxchain_lib::{logging, StorageError};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp_millis()
        .init();

    let mut args: Vec<String> = env::args().skip(1).collect();
    let data_dir = match take_data_dir(&mut args) {
        Some(dir) => dir,
        None => default_data_dir(),
    };
    if args.is_empty() {
        eprintln!("Usage: fxchain-inspect [--data-dir <dir>] <session|pending|blacklist|presets|templates|log>");
        println!("error:Missing command");
        std::process::exit(1);
    }
    log::debug!("Data dir: {}", data_dir.display());

    let config = match SessionConfig::load(&data_dir) {
        Ok(config) => config,
        Err(e) => {
            log::warn!("Ignoring unreadable config: {}", e);
            SessionConfig::with_data_dir(&data_dir)
        }
    };

    if let Err(e) = run(&config, &args) {
        println!("error:{}", e);
        std::process::exit(1);
    }
}

fn take_data_dir(args: &mut Vec<String>) -> Option<PathBuf> {
    let pos = args.iter().position(|a| a == "--data-dir")?;
    if pos + 1 >= args.len() {
        return None;
    }
    let dir = args.remove(pos + 1);
    args.remove(pos);
    Some(PathBuf::from(dir))
}

fn run(config: &SessionConfig, args: &[String]) -> Result<(), String> {
    let command = args[0].as_str();
    match command {
        "session" => print_session(config).map_err(|e| e.to_string()),
        "pending" => {
            match SessionStore::new(&config.data_dir)
                .pending()
                .map_err(|e| e.to_string())?
            {
                Some(pending) => println!("{} (started {})", pending.path, pending.started_at),
                None => println!("none"),
            }
            Ok(())
        }
        "blacklist" => edit_blacklist(config, &args[1..]),
        "presets" => {
            for name in FilePresetStore::new(config.presets_dir())
                .list()
                .map_err(|e| e.to_string())?
            {
                println!("{}", name);
            }
            Ok(())
        }
        "templates" => {
            for template in TemplateLibrary::new(config.templates_dir())
                .all()
                .map_err(|e| e.to_string())?
            {
                match template.description {
                    Some(desc) => println!("{} - {}", template.name, desc),
                    None => println!("{}", template.name),
                }
            }
            Ok(())
        }
        "log" => {
            logging::set_log_file(config.log_file());
            if args.get(1).map(String::as_str) == Some("clear") {
                logging::clear_log_file().map_err(|e| e.to_string())?;
                println!("cleared");
                return Ok(());
            }
            let content = logging::read_log_file().map_err(|e| e.to_string())?;
            print!("{}", content);
            log::debug!(
                "{} ({} bytes)",
                logging::log_file_path().display(),
                logging::log_file_size().unwrap_or(0)
            );
            Ok(())
        }
        other => Err(format!("Unknown command: {}", other)),
    }
}

fn print_session(config: &SessionConfig) -> Result<(), StorageError> {
    let snapshot = SessionStore::new(&config.data_dir).load_snapshot()?;
    if snapshot.is_empty() {
        println!("empty");
    }
    for (index, entry) in snapshot.iter().enumerate() {
        let mut flags: Vec<String> = Vec::new();
        if !entry.enabled {
            flags.push("bypassed".into());
        }
        if entry.muted {
            flags.push("muted".into());
        }
        if let Some(token) = &entry.state {
            flags.push(format!("state:{}b", token.as_bytes().len()));
        }
        println!(
            "{}. {} [{}] {} {}",
            index + 1,
            entry.name,
            entry.path,
            gain_db_label(entry.gain),
            flags.join(",")
        );
    }
    Ok(())
}

fn edit_blacklist(config: &SessionConfig, args: &[String]) -> Result<(), String> {
    let mut blacklist = Blacklist::open(&config.data_dir);
    match args.first().map(String::as_str) {
        None => {
            for path in &blacklist.paths {
                println!("{}", path);
            }
        }
        Some("clear") => {
            blacklist.clear();
            println!("cleared");
        }
        Some("remove") => {
            let path = args.get(1).ok_or("Missing path for remove")?;
            if blacklist.remove(path) {
                println!("removed");
            } else {
                return Err(format!("Not blacklisted: {}", path));
            }
        }
        Some(other) => return Err(format!("Unknown blacklist command: {}", other)),
    }
    Ok(())
}
