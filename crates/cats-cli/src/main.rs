//! cats-cli — command-line client for a running `catsd`.

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use anyhow::{Context, Result};
use cats_client::{Config, Sha256TimeHandshake};
use cats_codec::codec::{EncodeInput, Payload};
use cats_core::Headers;

const ECHO_HANDLER_ID: u16 = 0x0001;
const FORM_HANDLER_ID: u16 = 0x0002;
const INTERACTIVE_HANDLER_ID: u16 = 0x0003;

struct Options {
    host: String,
    port: u16,
    handshake_secret: Option<String>,
    api_version: u32,
    input_timeout: Option<Duration>,
    idle_timeout: Duration,
    tls: bool,
    debug: bool,
    command: Vec<String>,
}

fn print_usage() {
    println!("Usage: cats-cli [options] <command>");
    println!();
    println!("Commands:");
    println!("  echo <text>          Send text through the byte-echo handler");
    println!("  form <json>          Send a JSON form to the validation handler");
    println!("  ask <yes|no|cancel>  Drive the interactive input demo");
    println!("  ping                 Send a single Ping and wait for the echo");
    println!();
    println!("Options:");
    println!("  -H, --host <host>            Server host (default: 127.0.0.1)");
    println!("  -P, --port <port>            Server port (default: 6969)");
    println!("      --handshake <secret>     Enable the SHA-256 time handshake");
    println!("  -A, --api <version>          Proposed api version (default: 2)");
    println!("      --input-timeout <secs>   Timeout for ask() interactions");
    println!("      --idle-timeout <secs>    Ping interval / idle timeout (default: 30)");
    println!("  -T, --tls                    Reserved; TLS is not yet implemented");
    println!("  -D, --debug                  Verbose logging of actions sent/received");
}

fn parse_args(args: Vec<String>) -> Result<Options> {
    let mut host = "127.0.0.1".to_string();
    let mut port: u16 = 6969;
    let mut handshake_secret = None;
    let mut api_version: u32 = cats_core::wire::PROTOCOL_VERSION;
    let mut input_timeout = None;
    let mut idle_timeout = Duration::from_secs(30);
    let mut tls = false;
    let mut debug = false;
    let mut command = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-H" | "--host" => {
                i += 1;
                host = args.get(i).context("--host requires a value")?.clone();
            }
            "-P" | "--port" => {
                i += 1;
                port = args.get(i).context("--port requires a value")?.parse().context("--port must be a number")?;
            }
            "--handshake" => {
                i += 1;
                handshake_secret = Some(args.get(i).context("--handshake requires a secret")?.clone());
            }
            "-A" | "--api" => {
                i += 1;
                api_version = args.get(i).context("--api requires a value")?.parse().context("--api must be a number")?;
            }
            "--input-timeout" => {
                i += 1;
                let secs: f64 = args.get(i).context("--input-timeout requires seconds")?.parse()?;
                input_timeout = Some(Duration::from_secs_f64(secs));
            }
            "--idle-timeout" => {
                i += 1;
                let secs: f64 = args.get(i).context("--idle-timeout requires seconds")?.parse()?;
                idle_timeout = Duration::from_secs_f64(secs);
            }
            "-T" | "--tls" => tls = true,
            "-D" | "--debug" => debug = true,
            other => command.push(other.to_string()),
        }
        i += 1;
    }

    Ok(Options { host, port, handshake_secret, api_version, input_timeout, idle_timeout, tls, debug, command })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() || args[0] == "help" || args[0] == "--help" || args[0] == "-h" {
        print_usage();
        return Ok(());
    }

    let opts = parse_args(args)?;
    if opts.tls {
        eprintln!("warning: --tls was requested but TLS is not yet implemented; connecting in plaintext");
    }

    let addr = resolve_addr(&opts.host, opts.port)?;
    let handshake = opts.handshake_secret.as_ref().map(|secret| Sha256TimeHandshake::new(secret.clone().into_bytes()));
    let config = Config {
        api_version: opts.api_version,
        idle_timeout: opts.idle_timeout,
        handshake,
        ..Config::default()
    };

    let (client, mut inputs) = cats_client::dial(addr, config).await.context("failed to connect to catsd")?;
    client.spawn_ping_loop(opts.idle_timeout);

    match opts.command.as_slice() {
        [cmd] if cmd == "ping" => {
            client.ping().await?;
            println!("ping sent");
        }
        [cmd, text] if cmd == "echo" => {
            let (headers, payload) =
                client.send(ECHO_HANDLER_ID, EncodeInput::Bytes(text.as_bytes().to_vec()), Headers::new(), opts.input_timeout).await?;
            print_result(opts.debug, &headers, &payload);
        }
        [cmd, json] if cmd == "form" => {
            let value: serde_json::Value = serde_json::from_str(json).context("form payload must be JSON")?;
            let (headers, payload) =
                client.send(FORM_HANDLER_ID, EncodeInput::Document(value), Headers::new(), opts.input_timeout).await?;
            print_result(opts.debug, &headers, &payload);
        }
        [cmd, reply] if cmd == "ask" => {
            // The interactive handler blocks server-side on its own
            // question until we reply, so the request and the reply race:
            // send the request, then answer the InputAction as soon as it
            // arrives, and only then wait for the final response.
            let send_client = client.clone();
            let send_task = tokio::spawn(async move {
                send_client.send(INTERACTIVE_HANDLER_ID, EncodeInput::Bytes(Vec::new()), Headers::new(), opts.input_timeout).await
            });

            if let Some(incoming) = inputs.recv().await {
                match reply.as_str() {
                    "cancel" => client.cancel_input(incoming.message_id).await?,
                    text => {
                        client
                            .reply_input(incoming.message_id, EncodeInput::Bytes(text.as_bytes().to_vec()), Headers::new())
                            .await?
                    }
                }
            }

            let (headers, payload) = send_task.await.context("ask task panicked")??;
            print_result(opts.debug, &headers, &payload);
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            print_usage();
            std::process::exit(1);
        }
    }

    Ok(())
}

fn resolve_addr(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port).to_socket_addrs()?.next().with_context(|| format!("could not resolve {host}:{port}"))
}

fn print_result(debug: bool, headers: &Headers, payload: &Payload) {
    if debug {
        for (key, value) in headers.iter() {
            eprintln!("  {key}: {value}");
        }
    }
    match payload {
        Payload::Bytes(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => println!("{text}"),
            Err(_) => println!("{} bytes", bytes.len()),
        },
        Payload::Document(value) => println!("{value}"),
        Payload::Files(files) => println!("{} file(s)", files.len()),
    }
}
