//! smq daemon: reader and writer workers around the queue engine

use smq::engine::{Smq, SmqCommand};
use smq::limits::MAX_DATAGRAM_SIZE;
use smq::network::UdpTransport;
use smq::{persist, Config, TableDirectory, Transport};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Reader poll timeout: how long one blocking receive may sit
const READER_POLL: Duration = Duration::from_millis(200);
/// Writer tick: the state-machine cadence between commands
const WRITER_TICK: Duration = Duration::from_millis(150);

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 {
        let config = Config::default();
        for arg in &args[1..] {
            match arg.as_str() {
                "--version" | "-v" => {
                    println!("smq {}", env!("CARGO_PKG_VERSION"));
                }
                "--gensql" => print!("{}", config.gen_sql()),
                "--gentex" => print!("{}", config.gen_tex()),
                other => eprintln!("unknown flag {}", other),
            }
        }
        return;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run() {
        error!("smqueue failed: {}", e);
        std::process::exit(1);
    }
}

fn load_config() -> Config {
    match std::env::var_os("SMQUEUE_CONFIG") {
        Some(path) => {
            let path = PathBuf::from(path);
            match Config::from_file(&path) {
                Ok(config) => {
                    info!("Configuration loaded from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("Could not load {}: {}; using defaults", path.display(), e);
                    Config::default()
                }
            }
        }
        None => Config::default(),
    }
}

fn run() -> smq::SmqResult<()> {
    info!("smqueue (re)starting");
    let config = load_config();

    let port = config.get_num("SIP.myPort") as u16;
    let savefile = PathBuf::from(config.get_str("savefile"));
    let transport = Arc::new(UdpTransport::bind(port)?);
    // The registry backend is an external collaborator; until one is wired
    // in we run against the in-process table (plus the built-in fallback
    // pairs).
    let directory = Arc::new(TableDirectory::new());

    let smq = Arc::new(Smq::new(config, directory, transport.clone())?);
    info!("SIP.myPort UDP {}", port);

    match persist::load_queue(&smq, &savefile) {
        Ok(stats) if stats.loaded > 0 => {
            info!("Restored {} queued messages", stats.loaded)
        }
        Ok(_) => {}
        Err(e) => warn!("Failed to read queue on startup: {}", e),
    }

    let (tx, rx) = mpsc::channel::<SmqCommand>();

    // Reader: block on the wire, validate, ack, enqueue.
    let reader = {
        let smq = smq.clone();
        let transport = transport.clone();
        thread::spawn(move || {
            let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
            while !smq.stop_requested() {
                match transport.recv_datagram(&mut buffer, READER_POLL) {
                    Ok(Some((len, src))) => {
                        let command = smq.accept_datagram(&buffer[..len], src);
                        if tx.send(command).is_err() {
                            break;
                        }
                        let _ = tx.send(SmqCommand::DeliverNow);
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Error from recv_datagram: {}", e),
                }
            }
        })
    };

    // Writer: state-machine ticks interleaved with reader commands.
    let writer = {
        let smq = smq.clone();
        thread::spawn(move || {
            while !smq.stop_requested() {
                match rx.recv_timeout(WRITER_TICK) {
                    Ok(command) => smq.run_command(command),
                    Err(mpsc::RecvTimeoutError::Timeout) => smq.process_pending(),
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }
        })
    };

    writer.join().ok();
    reader.join().ok();

    shutdown(&smq, &savefile);
    Ok(())
}

fn shutdown(smq: &Smq, savefile: &Path) {
    if smq.reexec_requested() {
        warn!("====== Re-Execing! ======");
    } else {
        info!("====== Quitting! ======");
    }
    if let Err(e) = persist::save_queue(smq, savefile) {
        error!("OUCH!  Could not save queue to file {}: {}", savefile.display(), e);
    }

    if smq.reexec_requested() {
        reexec();
    }
}

#[cfg(unix)]
fn reexec() {
    use std::os::unix::process::CommandExt;
    if let Ok(exe) = std::env::current_exe() {
        let err = std::process::Command::new(exe).exec();
        error!("re-exec failed: {}", err);
    }
}

#[cfg(not(unix))]
fn reexec() {
    warn!("re-exec is not supported on this platform");
}
