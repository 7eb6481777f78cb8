mod config;
mod connections;
mod exec;
mod signal;
mod watcher;

use std::{path::PathBuf, process::ExitCode, sync::Arc};

use colored::{Color, Colorize};

use futures_util::future::maybe_done;
use tokio::{join, select, spawn, task::JoinError};
use tokio_util::sync::CancellationToken;

use crate::{
    connections::{connections_actor, Hub},
    exec::Shell,
    signal::signal_received,
    watcher::watcher_actor,
};

const SERVER: &str = "wss_server";

fn level_color(level: log::Level) -> Color {
    match level {
        log::Level::Error => Color::Red,
        log::Level::Warn => Color::Yellow,
        log::Level::Info => Color::Green,
        log::Level::Debug => Color::Blue,
        log::Level::Trace => Color::Magenta,
    }
}

/// Logs to the journal when started by systemd, to stdout otherwise.
fn init_logger() {
    use log::LevelFilter;
    use systemd_journal_logger::{connected_to_journal, JournalLog};

    let dispatch = fern::Dispatch::new()
        .level(LevelFilter::Off)
        .level_for(SERVER, LevelFilter::Trace);

    let journal = if connected_to_journal() {
        match JournalLog::new() {
            Ok(journal) => Some(journal),
            Err(e) => {
                eprintln!("Failed to create the systemd logger: {e:?}");
                None
            }
        }
    } else {
        None
    };

    let dispatch = match journal {
        Some(journal) => dispatch.chain(Box::new(journal) as Box<dyn log::Log>),
        None => dispatch
            .format(|out, message, record| {
                out.finish(format_args!(
                    "[{}] [{}] {}",
                    record.level().as_str().color(level_color(record.level())),
                    record.target(),
                    message
                ))
            })
            .chain(std::io::stdout()),
    };
    dispatch
        .apply()
        .expect("no logger should have been set yet");
}

fn log_actor_error(res: Result<Result<(), anyhow::Error>, JoinError>, name: &str) {
    match res {
        Err(je) => log::error!("Actor '{}' join error: {}", name, je),
        Ok(Err(ae)) => log::error!("Actor '{}' errored with: {:?}", name, ae),
        Ok(Ok(())) => (),
    }
}

#[tokio::main]
async fn async_main() -> ExitCode {
    let hub = Arc::new(Hub::default());
    let shell = Arc::new(Shell::new(config::shell(), config::root()));
    let canceltoken = CancellationToken::new();

    log::info!(
        "Serving {:?} with '{}' as the shell",
        config::root(),
        config::shell()
    );

    let connections = maybe_done(spawn(connections_actor(
        config::bind().to_string(),
        Arc::clone(&hub),
        shell,
        canceltoken.child_token(),
    )));
    let watcher = maybe_done(spawn(watcher_actor(
        hub,
        config::root().to_path_buf(),
        config::watch().clone(),
        canceltoken.child_token(),
    )));
    tokio::pin!(connections);
    tokio::pin!(watcher);

    select! {
        res = signal_received() => match res {
            Ok(()) => log::info!("Terminating due to a signal"),
            Err(e) => log::error!("Could not listen for signals: {}", e),
        },
        _ = &mut connections => log::error!("Connections actor terminated early"),
        _ = &mut watcher => log::error!("Watcher actor terminated early"),
    }

    log::info!("Cancelling remaining actors...");
    canceltoken.cancel();

    join!(&mut connections, &mut watcher);
    let code = match (
        connections.take_output().expect("value not taken"),
        watcher.take_output().expect("value not taken"),
    ) {
        (Ok(Ok(())), Ok(Ok(()))) => {
            log::info!("Tasks exited normally");
            ExitCode::SUCCESS
        }
        (r1, r2) => {
            log::error!("Some actor exited abnormally");
            log_actor_error(r1, "connections");
            log_actor_error(r2, "watcher");
            ExitCode::FAILURE
        }
    };

    log::info!("Goodbye");
    code
}

fn main() -> ExitCode {
    init_logger();
    log::info!("Welcome");

    let path = std::env::args_os().nth(1).map(PathBuf::from);
    if let Err(e) = config::init_config(path.as_deref()) {
        log::error!("Failed to read config: {:?}", e);
        return ExitCode::FAILURE;
    }

    async_main()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_levels_have_distinct_colors() {
        let colors: Vec<Color> = log::Level::iter().map(level_color).collect();
        for (i, a) in colors.iter().enumerate() {
            assert!(!colors[i + 1..].contains(a), "{:?} is used twice", a);
        }
    }

    #[test]
    fn test_log_target_covers_this_crate() {
        assert!(module_path!().starts_with(SERVER));
    }
}
