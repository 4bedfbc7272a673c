//! sim800 - drive a SIM800 modem from the command line.
//!
//! Every subcommand except `config` opens the configured port, boots the
//! modem and runs one operation. Configuration comes from an optional YAML
//! file, then `SIM800_*` environment variables, then flags.

mod report;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use sim800_modem::{telemetry, ModemConfig, Session, Sim800Error};
use thiserror::Error;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use report::{HttpReport, Printer, SignalReport};

/// sim800 - talk to a SIM800 modem over its AT interface
#[derive(Parser)]
#[command(name = "sim800", version, about)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true, env = "SIM800_CONFIG")]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print command metrics in Prometheus text format to stderr on exit
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

/// Settings layered over the configuration file.
#[derive(Args)]
struct Overrides {
    /// Serial device, or tcp://host:port for a serial bridge
    #[arg(long, global = true, env = "SIM800_PORT")]
    port: Option<String>,

    /// Serial baud rate
    #[arg(long, global = true, env = "SIM800_BAUD")]
    baud: Option<u32>,

    /// Access point name
    #[arg(long, global = true, env = "SIM800_APN")]
    apn: Option<String>,

    /// GPIO pin wired to the modem reset line
    #[arg(long, global = true, env = "SIM800_RESET_PIN")]
    reset_pin: Option<u32>,

    /// No reset line; boot with a soft reset only
    #[arg(long, global = true)]
    no_reset: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Reset the modem and wait until it answers
    Boot,

    /// GET a plain HTTP URL
    HttpGet {
        /// Request URL
        url: String,
    },

    /// GET an HTTPS URL
    HttpsGet {
        /// Request URL
        url: String,
    },

    /// POST a body to a URL
    HttpPost {
        /// Request URL
        url: String,

        #[command(flatten)]
        body: PostBody,
    },

    /// Open a TCP connection, send one message and close it
    TcpSend {
        /// Remote host
        host: String,
        /// Remote port
        port: u16,
        /// Message text (1 to 1460 bytes)
        message: String,
    },

    /// Read a stored text message
    SmsRead {
        /// Storage index
        index: u16,
    },

    /// Delete every stored text message
    SmsDeleteAll,

    /// Send a text message
    SmsSend {
        /// Destination number
        number: String,
        /// Message text
        text: String,
    },

    /// Show signal quality
    Signal,

    /// Attach to the packet service and show the local address
    Ip,

    /// Print the effective configuration as YAML
    Config,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct PostBody {
    /// Body text
    #[arg(long)]
    data: Option<String>,

    /// Read the body from a file
    #[arg(long)]
    file: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub(crate) enum CliError {
    #[error(transparent)]
    Modem(#[from] Sim800Error),

    #[error("failed to read {path}: {source}")]
    ReadBody {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("server answered {0}")]
    HttpStatus(u16),

    #[error("failed to install metrics recorder: {0}")]
    Metrics(#[from] BuildError),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let metrics = if cli.metrics {
        match init_metrics() {
            Ok(handle) => Some(handle),
            Err(err) => {
                eprintln!("Error: {err}");
                return ExitCode::from(1);
            }
        }
    } else {
        None
    };

    let result = run(cli);
    if let Some(handle) = metrics {
        eprint!("{}", handle.render());
    }
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::from(1)
        }
    }
}

/// Install the Prometheus recorder, then register metric descriptions with it.
fn init_metrics() -> Result<PrometheusHandle, CliError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    telemetry::describe_metrics();
    Ok(handle)
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();
}

/// Configuration file (or defaults) with the overrides applied.
fn load_config(path: Option<&Path>, overrides: &Overrides) -> Result<ModemConfig, CliError> {
    let mut config = match path {
        Some(path) => ModemConfig::load(path)?,
        None => ModemConfig::default(),
    };
    if let Some(port) = &overrides.port {
        config.serial_port = port.clone();
    }
    if let Some(baud) = overrides.baud {
        config.baud_rate = baud;
    }
    if let Some(apn) = &overrides.apn {
        config.apn = apn.clone();
    }
    if let Some(pin) = overrides.reset_pin {
        config.reset_pin = Some(pin);
    }
    if overrides.no_reset {
        config.reset_pin = None;
    }
    config.validate()?;
    Ok(config)
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = load_config(cli.config.as_deref(), &cli.overrides)?;
    let out = Printer::new(cli.json);

    if let Command::Config = cli.command {
        print!("{}", config.to_yaml()?);
        return Ok(());
    }

    let session = Session::open(config)?;
    let token = session.cancel_token();
    if let Err(err) = ctrlc::set_handler(move || token.cancel()) {
        warn!(error = %err, "Ctrl-C handler not installed");
    }
    session.boot().map_err(Sim800Error::from)?;
    debug!(?session, "booted");

    match cli.command {
        Command::Boot => out.state(session.state()),
        Command::HttpGet { url } => http(&out, session.http_get(&url)?),
        Command::HttpsGet { url } => http(&out, session.https_get(&url)?),
        Command::HttpPost { url, body } => {
            let data = match (body.data, body.file) {
                (Some(text), _) => text.into_bytes(),
                (None, Some(path)) => {
                    fs::read(&path).map_err(|source| CliError::ReadBody { path, source })?
                }
                (None, None) => Vec::new(),
            };
            http(&out, session.http_post(&url, &data)?)
        }
        Command::TcpSend {
            host,
            port,
            message,
        } => {
            let report = session.send_tcp_message(&host, port, message.as_bytes())?;
            out.emit(&report, |r| format!("sent {} bytes to {}:{}", r.bytes_sent, host, port))
        }
        Command::SmsRead { index } => {
            let message = session.read_sms_message(index)?;
            out.emit(&message, |m| {
                let when = m
                    .timestamp
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".into());
                format!("[{}] {} {}\n{}", m.status, m.sender, when, m.text)
            })
        }
        Command::SmsDeleteAll => {
            session.delete_all_sms_messages()?;
            out.done("deleted all messages")
        }
        Command::SmsSend { number, text } => {
            let report = session.send_sms_message(&number, &text)?;
            out.emit(&report, |r| format!("sent, reference {}", r.reference))
        }
        Command::Signal => {
            let report = SignalReport::from(session.signal_quality()?);
            out.emit(&report, SignalReport::to_string)
        }
        Command::Ip => {
            let ip = session.connect()?;
            out.emit(&ip, |ip| ip.to_string())
        }
        Command::Config => Ok(()),
    }
}

fn http(out: &Printer, response: sim800_modem::HttpResponse) -> Result<(), CliError> {
    let report = HttpReport::from(&response);
    out.emit(&report, HttpReport::to_string)?;
    if response.is_success() {
        Ok(())
    } else {
        Err(CliError::HttpStatus(response.status_code))
    }
}
