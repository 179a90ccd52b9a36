//! Manipulate and display the checkpoint state of one protected connection.
//!
//! One action per invocation: resolve the key, optionally recover a saved
//! checkpoint into a fresh record, optionally checkpoint or shut down either
//! direction, optionally block until the connection is done, dump the
//! record, optionally save the checkpoint, optionally destroy the backing
//! files.
use std::fs::{File, OpenOptions};
use std::net::{IpAddr, ToSocketAddrs};
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use clap::Parser;
use tcpr::{Config, Connection, ConnectionKey, Record, Setup};

#[derive(Parser)]
#[command(about = "Manipulate and display protected TCP connection state")]
struct Options {
    /// The local port the protected application is bound to.
    #[arg(short = 'a', long, default_value_t = 8888)]
    port: u16,

    /// The host the peer is bound to.
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    peer_host: String,

    /// The port the peer is bound to.
    #[arg(short = 'p', long, default_value_t = 9999)]
    peer_port: u16,

    /// Save the connection's checkpoint into FILE.
    #[arg(short = 'S', long, value_name = "FILE")]
    save: Option<PathBuf>,

    /// Recover the connection's checkpoint from FILE into a fresh record.
    #[arg(short = 'R', long, value_name = "FILE")]
    recover: Option<PathBuf>,

    /// Acknowledge NUM bytes of input, `all` outstanding input, or `done`
    /// to shut down input.
    #[arg(short = 'I', long, value_name = "NUM|all|done")]
    input: Option<Amount>,

    /// Checkpoint NUM bytes of output, `all` outstanding output, or `done`
    /// to shut down output.
    #[arg(short = 'O', long, value_name = "NUM|all|done")]
    output: Option<Amount>,

    /// Wait until the connection is done.
    #[arg(short = 'W', long)]
    wait: bool,

    /// Destroy the connection state.
    #[arg(short = 'D', long)]
    destroy: bool,

    /// Directory holding the state and control files.
    #[arg(long, default_value = "/var/tmp")]
    dir: PathBuf,
}

#[derive(Clone, Copy, Debug)]
enum Amount {
    Bytes(u32),
    All,
    Done,
}

impl FromStr for Amount {
    type Err = String;

    fn from_str(source: &str) -> Result<Self, Self::Err> {
        match source {
            "all" => Ok(Amount::All),
            "done" => Ok(Amount::Done),
            number => number
                .parse()
                .map(Amount::Bytes)
                .map_err(|err| format!("expected a byte count, `all`, or `done`: {err}")),
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let options = Options::parse();

    let peer = resolve(&options.peer_host, options.peer_port)?;
    let key = ConnectionKey {
        peer,
        peer_port: options.peer_port,
        port: options.port,
    };
    let config = Config {
        dir: options.dir.clone(),
        ..Config::default()
    };

    let mut flags = Setup::empty();
    if options.recover.is_some() {
        flags |= Setup::CREATE;
    }
    let mut connection =
        Connection::setup(&config, &key, flags).context("opening connection state")?;

    if let Some(path) = &options.recover {
        let source = File::open(path)
            .with_context(|| format!("opening recovery file `{}`", path.display()))?;
        connection.recover(source).context("recovering")?;
    }

    // Shutdowns are unconditional; byte counts are clamped to what is
    // actually outstanding. The core trusts its callers, so the clamp
    // lives here.
    match options.output {
        Some(Amount::Done) => connection.shutdown_output(),
        Some(Amount::All) => connection.checkpoint_output(connection.output_bytes()),
        Some(Amount::Bytes(count)) => {
            connection.checkpoint_output(count.min(connection.output_bytes()));
        }
        None => {}
    }

    // A missing filter only loses the advisory wake-up; the record update
    // itself sticks.
    match options.input {
        Some(Amount::Done) => {
            let _ = connection.shutdown_input();
        }
        Some(Amount::All) => {
            let _ = connection.checkpoint_input(connection.input_bytes());
        }
        Some(Amount::Bytes(count)) => {
            let _ = connection.checkpoint_input(count.min(connection.input_bytes()));
        }
        None => {}
    }

    if options.wait {
        connection.wait();
    }

    print_record(connection.record());

    if let Some(path) = &options.save {
        let sink = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .with_context(|| format!("opening save file `{}`", path.display()))?;
        connection.save(sink).context("saving")?;
    }

    connection.teardown();
    if options.destroy {
        tcpr::destroy(&config, &key).context("destroying connection state")?;
    }

    Ok(())
}

fn resolve(host: &str, port: u16) -> anyhow::Result<IpAddr> {
    let mut addresses = (host, port)
        .to_socket_addrs()
        .with_context(|| format!("resolving peer `{host}`"))?;
    addresses
        .next()
        .map(|address| address.ip())
        .with_context(|| format!("peer `{host}` did not resolve to an address"))
}

fn print_record(record: &Record) {
    println!("saved ACK\t{}", record.saved_ack());
    println!("saved peer ACK\t{}", record.safe());
    if let Some(mss) = record.peer_mss() {
        println!("peer MSS\t{mss}");
    }
    if let Some(ws) = record.peer_ws() {
        println!("peer WS\t{ws}");
    }
    if record.peer_sack_permitted() {
        println!("peer SACK permitted");
    }
    println!("delta\t{}", record.delta());
    println!("ACK\t{}", record.ack());
    if record.have_fin() {
        println!("FIN\t{}", record.fin());
    }
    println!("SEQ\t{}", record.seq());
    println!("WIN\t{}", record.win());
    if record.peer_have_ack() {
        println!("peer ACK\t{}", record.peer_ack());
    }
    if record.peer_have_fin() {
        println!("peer FIN\t{}", record.peer_fin());
    }
    println!("peer WIN\t{}", record.peer_win());
    if record.done_reading() {
        println!("done reading");
    }
    if record.done_writing() {
        println!("done writing");
    }
    if record.done() {
        println!("closed");
    }
}
