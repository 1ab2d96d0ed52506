//! CLI surface: `gelf-proxy listen` and `gelf-proxy debug-client`, plus the verbosity-to-log-level
//! mapping that gates what an operator sees. Argument parsing itself is out of scope for the
//! design (spec.md §1); this module only wires validated input into the core pipeline.

use std::time::{SystemTime, UNIX_EPOCH};

use structopt::StructOpt;
use thiserror::Error;
use tracing::{debug, info, Level};

use crate::defaults;
use crate::net::host::{ListenAddress, RemoteAddress, RemoteTransport};
use crate::net::listener::Listener;
use crate::net::pool::{HttpPool, HttpsPool, Pool, TcpPool, TcpTlsPool};
use crate::pipeline::{self, Delimiter};

/// Top-level error a subcommand can fail with. `Usage` exits 2, matching a `structopt` parse
/// error; `Runtime` exits 1.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error(transparent)]
    Runtime(#[from] anyhow::Error),
}

impl From<crate::net::error::FatalError> for CliError {
    fn from(err: crate::net::error::FatalError) -> Self {
        CliError::Runtime(err.into())
    }
}

#[derive(Debug, StructOpt)]
#[structopt(name = "gelf-proxy", about = "A GELF ingestion proxy")]
pub struct Cli {
    /// Disable all output, overriding `-v`.
    #[structopt(short, long, global = true)]
    pub quiet: bool,

    /// Increase verbosity; repeatable (`-v`, `-vv`, `-vvv`).
    #[structopt(short, long, parse(from_occurrences), global = true)]
    pub verbose: u8,

    #[structopt(subcommand)]
    pub command: Command,
}

#[derive(Debug, StructOpt)]
pub enum Command {
    /// Listen for GELF datagrams and forward decoded payloads to a remote Graylog input.
    Listen(Listen),
    /// Send one GELF message through the same forwarding path, for debugging a remote.
    DebugClient(DebugClient),
}

#[derive(Debug, StructOpt)]
pub struct Listen {
    /// Local connectionless address to bind, e.g. `udp://127.0.0.1:12201`. A bare `host:port`
    /// is treated as `udp://host:port`.
    pub local: String,

    /// Remote Graylog input to forward to, e.g. `tcp+tls://graylog.example.com:12201`. Optional
    /// only when `--print` is set. A bare `host:port` is treated as `tcp+tls://host:port`.
    pub remote: Option<String>,

    /// Number of worker connections in the forwarding pool. Defaults to `defaults::workers()`.
    #[structopt(short, long)]
    pub workers: Option<usize>,

    /// Use `\n` instead of a null byte as the inter-message delimiter.
    #[structopt(long)]
    pub new_line: bool,

    /// Dump each decoded payload to stdout as it arrives. Makes `remote` optional.
    #[structopt(short, long)]
    pub print: bool,

    /// Skip loading client TLS material even for a `+tls`/`https` remote.
    #[structopt(long)]
    pub no_client_auth: bool,

    /// Client private key (PKCS#8, PEM). Defaults to `defaults::client_pem()`.
    #[structopt(long)]
    pub pem: Option<String>,

    /// Client certificate (PEM). Defaults to `defaults::client_crt()`.
    #[structopt(long)]
    pub crt: Option<String>,

    /// CA bundle trusted when dialing a secure remote (PEM). Defaults to `defaults::ca_bundle()`.
    #[structopt(long)]
    pub ca: Option<String>,

    /// Attempts per message before it is dropped. Defaults to `defaults::tries()`.
    #[structopt(long)]
    pub tries: Option<usize>,
}

impl Listen {
    fn workers(&self) -> usize {
        self.workers.unwrap_or_else(defaults::workers)
    }

    fn tries(&self) -> usize {
        self.tries.unwrap_or_else(defaults::tries)
    }

    fn pem(&self) -> &str {
        self.pem.as_deref().unwrap_or_else(defaults::client_pem)
    }

    fn crt(&self) -> &str {
        self.crt.as_deref().unwrap_or_else(defaults::client_crt)
    }

    fn ca(&self) -> &str {
        self.ca.as_deref().unwrap_or_else(defaults::ca_bundle)
    }
}

#[derive(Debug, StructOpt)]
pub struct DebugClient {
    /// Remote Graylog input to send one message to.
    pub remote: String,

    /// `short_message` field of the GELF payload.
    #[structopt(long, default_value = "example stack trace")]
    pub short_message: String,

    /// `full_message` field of the GELF payload. Defaults to a captured backtrace of the
    /// running process (the closest stable-Rust analog to the source's "stack trace of all
    /// live goroutines" — see DESIGN.md).
    #[structopt(long)]
    pub full_message: Option<String>,

    /// `host` field of the GELF payload. Defaults to the machine's hostname.
    #[structopt(long)]
    pub host: Option<String>,

    /// `level` field of the GELF payload (syslog severity).
    #[structopt(long, default_value = "1")]
    pub level: i8,

    /// Hex-dump the outgoing payload before sending it.
    #[structopt(long)]
    pub dump: bool,

    /// Use `\n` instead of a null byte as the trailing delimiter.
    #[structopt(long)]
    pub new_line: bool,

    #[structopt(long)]
    pub no_client_auth: bool,

    /// Client private key (PKCS#8, PEM). Defaults to `defaults::client_pem()`.
    #[structopt(long)]
    pub pem: Option<String>,

    /// Client certificate (PEM). Defaults to `defaults::client_crt()`.
    #[structopt(long)]
    pub crt: Option<String>,

    /// CA bundle trusted when dialing a secure remote (PEM). Defaults to `defaults::ca_bundle()`.
    #[structopt(long)]
    pub ca: Option<String>,

    /// Attempts per message before it is dropped. Defaults to `defaults::tries()`.
    #[structopt(long)]
    pub tries: Option<usize>,
}

impl DebugClient {
    fn tries(&self) -> usize {
        self.tries.unwrap_or_else(defaults::tries)
    }

    fn pem(&self) -> &str {
        self.pem.as_deref().unwrap_or_else(defaults::client_pem)
    }

    fn crt(&self) -> &str {
        self.crt.as_deref().unwrap_or_else(defaults::client_crt)
    }

    fn ca(&self) -> &str {
        self.ca.as_deref().unwrap_or_else(defaults::ca_bundle)
    }
}

/// Map `-q`/`-v` occurrences to a `tracing::Level`, per the design's logging section. `None`
/// means "no subscriber at all" (quiet).
fn level_for(quiet: bool, verbose: u8) -> Option<Level> {
    if quiet {
        return None;
    }
    Some(match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    })
}

/// Install the global tracing subscriber, or none at all under `--quiet`.
pub fn init_logging(cli: &Cli) {
    if let Some(level) = level_for(cli.quiet, cli.verbose) {
        let filter = tracing_subscriber::EnvFilter::builder()
            .with_default_directive(level.into())
            .from_env_lossy();
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// A bare `host:port` is treated as using the given default scheme, matching the source's CLI
/// convenience of not requiring `udp://`/`tcp+tls://` to be spelled out.
fn with_default_scheme(s: &str, default_scheme: &str) -> String {
    if s.contains("://") {
        s.to_string()
    } else {
        format!("{}://{}", default_scheme, s)
    }
}

pub async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Listen(args) => listen(args).await,
        Command::DebugClient(args) => debug_client(args).await,
    }
}

async fn listen(args: Listen) -> Result<(), CliError> {
    if !args.print && args.remote.is_none() {
        return Err(CliError::Usage(
            "missing remote address (required unless --print is set)".to_string(),
        ));
    }

    let local: ListenAddress = with_default_scheme(&args.local, "udp")
        .parse()
        .map_err(|err: crate::net::error::HostAddressError| CliError::Usage(err.to_string()))?;

    let remote: Option<RemoteAddress> = args
        .remote
        .as_deref()
        .map(|r| with_default_scheme(r, "tcp+tls").parse())
        .transpose()
        .map_err(|err: crate::net::error::HostAddressError| CliError::Usage(err.to_string()))?;

    info!(%local, remote = ?remote.as_ref().map(ToString::to_string), "starting forward");

    let listener = Listener::new(local);
    let (done_tx, done_rx) = tokio::sync::mpsc::channel(64);
    tokio::spawn(listener.listen(done_tx));

    let pool = match &remote {
        Some(remote) => {
            debug!(workers = args.workers(), "starting connection pool");
            Some(build_pool(remote, &args)?)
        }
        None => None,
    };

    // HTTP/HTTPS bodies are discrete requests, never delimited; every other transport is a
    // persistent stream and needs a delimiter to frame one payload from the next.
    let delimiter = match remote.as_ref().map(|r| r.transport()) {
        Some(RemoteTransport::Http) | Some(RemoteTransport::Https) => None,
        Some(_) | None => Some(if args.new_line {
            Delimiter::NewLine
        } else {
            Delimiter::Null
        }),
    };
    let queue = pool.as_ref().map(|pool| pool.queue.clone());

    let result = pipeline::run(done_rx, queue, delimiter, args.print).await;

    listener.close().await;
    if let Some(pool) = pool {
        pool.close().await;
    }

    result.map_err(CliError::from)
}

fn build_pool(remote: &RemoteAddress, args: &Listen) -> Result<Pool, CliError> {
    let url = remote.to_string();
    let pool = match remote.transport() {
        RemoteTransport::Http => {
            Pool::start(HttpPool::new(url), args.tries(), args.workers())
        }
        RemoteTransport::Https => Pool::start(
            HttpsPool::new(url, args.ca(), args.pem(), args.crt(), args.no_client_auth)
                .map_err(anyhow::Error::from)?,
            args.tries(),
            args.workers(),
        ),
        RemoteTransport::Tcp | RemoteTransport::Tcp4 | RemoteTransport::Tcp6 => {
            if remote.secure() {
                Pool::start(
                    TcpTlsPool::new(
                        remote.authority(),
                        args.ca(),
                        args.pem(),
                        args.crt(),
                        args.no_client_auth,
                    )
                    .map_err(anyhow::Error::from)?,
                    args.tries(),
                    args.workers(),
                )
            } else {
                Pool::start(TcpPool::new(remote.authority()), args.tries(), args.workers())
            }
        }
    };
    Ok(pool)
}

async fn debug_client(args: DebugClient) -> Result<(), CliError> {
    let remote: RemoteAddress = with_default_scheme(&args.remote, "tcp+tls")
        .parse()
        .map_err(|err: crate::net::error::HostAddressError| CliError::Usage(err.to_string()))?;

    let listen_args = Listen {
        local: String::new(),
        remote: None,
        workers: Some(1),
        new_line: args.new_line,
        print: false,
        no_client_auth: args.no_client_auth,
        pem: Some(args.pem().to_string()),
        crt: Some(args.crt().to_string()),
        ca: Some(args.ca().to_string()),
        tries: Some(args.tries()),
    };
    let pool = build_pool(&remote, &listen_args)?;

    let message = build_gelf_message(&args);
    let mut framed = message.into_bytes();
    framed.push(if args.new_line { b'\n' } else { 0 });

    if args.dump {
        print!("{}", hex_dump(&framed));
    }

    pool.queue.write(framed).await;
    pool.close().await;
    Ok(())
}

/// Build the one-shot GELF JSON payload described in spec.md §6.
fn build_gelf_message(args: &DebugClient) -> String {
    let host = args
        .host
        .clone()
        .or_else(hostname)
        .unwrap_or_else(|| "unknown".to_string());
    let full_message = args
        .full_message
        .clone()
        .unwrap_or_else(captured_backtrace);
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    serde_json::json!({
        "version": "1.1",
        "host": host,
        "short_message": args.short_message,
        "full_message": full_message,
        "timestamp": timestamp,
        "level": args.level,
    })
    .to_string()
}

/// The closest stable-Rust equivalent of the source's `os.Hostname()`: read the kernel's
/// hostname directly rather than add a dependency for one field. Falls back to the environment
/// for non-Linux hosts running this tool.
fn hostname() -> Option<String> {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .or_else(|| std::env::var("COMPUTERNAME").ok())
}

/// Stable-Rust substitute for the source's "stack trace of all live goroutines": a captured
/// backtrace of the current process. Documented as an intentional substitution in DESIGN.md.
fn captured_backtrace() -> String {
    std::backtrace::Backtrace::force_capture().to_string()
}

/// A `hexdump -C`-style rendering of `data`, 16 bytes per line, matching the source's use of
/// Go's `encoding/hex.Dump` for `--dump`.
fn hex_dump(data: &[u8]) -> String {
    let mut out = String::new();
    for (offset, chunk) in data.chunks(16).enumerate() {
        out.push_str(&format!("{:08x}  ", offset * 16));
        for (i, byte) in chunk.iter().enumerate() {
            out.push_str(&format!("{:02x} ", byte));
            if i == 7 {
                out.push(' ');
            }
        }
        for _ in chunk.len()..16 {
            out.push_str("   ");
        }
        out.push_str(" |");
        for byte in chunk {
            let c = *byte as char;
            out.push(if c.is_ascii_graphic() || c == ' ' { c } else { '.' });
        }
        out.push_str("|\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adds_default_scheme_when_missing() {
        assert_eq!(
            with_default_scheme("127.0.0.1:12201", "udp"),
            "udp://127.0.0.1:12201"
        );
        assert_eq!(
            with_default_scheme("udp6://[::1]:12201", "udp"),
            "udp6://[::1]:12201"
        );
    }

    #[test]
    fn hex_dump_formats_short_payload() {
        let dump = hex_dump(b"hi");
        assert!(dump.starts_with("00000000  68 69"));
        assert!(dump.contains("|hi|"));
    }

    #[test]
    fn gelf_message_has_required_fields() {
        let args = DebugClient {
            remote: "tcp://x:1".to_string(),
            short_message: "hi".to_string(),
            full_message: Some("full".to_string()),
            host: Some("myhost".to_string()),
            level: 1,
            dump: false,
            new_line: false,
            no_client_auth: true,
            pem: None,
            crt: None,
            ca: None,
            tries: Some(1),
        };
        let message = build_gelf_message(&args);
        let value: serde_json::Value = serde_json::from_str(&message).unwrap();
        assert_eq!(value["version"], "1.1");
        assert_eq!(value["host"], "myhost");
        assert_eq!(value["short_message"], "hi");
        assert_eq!(value["full_message"], "full");
        assert_eq!(value["level"], 1);
        assert!(value["timestamp"].is_u64());
    }
}
