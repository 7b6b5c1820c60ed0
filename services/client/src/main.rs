use clap::Parser;
use parley_client::ChatState;
use parley_net::{Client, ClientConfig, ClientEvent, TransportMode};
use serde_json::json;
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Length-prefixed JSON-RPC chat client.
#[derive(Debug, Parser)]
#[command(name = "parley-client", version)]
struct Args {
    /// Server host.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    /// Server port.
    #[arg(long, default_value_t = 12345)]
    port: u16,
    /// Enable TLS.
    #[arg(long)]
    secure: bool,
    /// Display name sent at login.
    #[arg(long, default_value = "guest")]
    name: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args = Args::parse();
    let cfg = ClientConfig {
        host: args.host.clone(),
        port: args.port,
        mode: if args.secure {
            TransportMode::Secure
        } else {
            TransportMode::Plain
        },
        ..ClientConfig::default()
    };

    let (client, mut events) = match Client::connect(&cfg).await {
        Ok(connected) => connected,
        Err(e) => {
            error!(host = %args.host, port = args.port, error = %e, "connect failed");
            return ExitCode::FAILURE;
        }
    };

    let mut state = ChatState::new();
    match client.request("login", json!({"name": args.name})).await {
        Ok(result) => {
            state.apply_login(&result);
            if let Some(uid) = state.my_uid() {
                println!("[login] you are uid {uid}");
            }
        }
        Err(e) => {
            error!(error = %e, "login failed");
            return ExitCode::FAILURE;
        }
    }
    if let Ok(result) = client.request("client_list", json!({})).await {
        state.set_roster(&result);
    }

    println!("Type messages and press Enter");
    println!("Commands:");
    println!("  /q                 quit");
    println!("  /w <uid> <msg>     private message");
    println!("  /list              show connected users");
    println!();

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    None | Some(ClientEvent::Disconnected) => {
                        println!("[disconnected]");
                        break;
                    }
                    Some(ClientEvent::Connected) => println!("[connected]"),
                    Some(ClientEvent::Error(e)) => println!("[error] {e}"),
                    Some(ClientEvent::Push(push)) => {
                        if let Some(line) = state.apply_push(&push) {
                            println!("{line}");
                        }
                    }
                }
            }
            line = stdin.next_line() => {
                let Ok(Some(line)) = line else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if !handle_command(&client, &mut state, line).await {
                    break;
                }
            }
        }
    }

    client.close();
    println!("bye");
    ExitCode::SUCCESS
}

/// Run one REPL command.  Returns false to quit.
async fn handle_command(client: &Client, state: &mut ChatState, line: &str) -> bool {
    if line == "/q" {
        return false;
    }

    if line == "/list" {
        match client.request("client_list", json!({})).await {
            Ok(result) => {
                state.set_roster(&result);
                println!("--- USERS ---");
                for entry in state.roster_lines() {
                    println!("{entry}");
                }
            }
            Err(e) => println!("[error] {e}"),
        }
        return true;
    }

    if let Some(rest) = line.strip_prefix("/w ") {
        let mut parts = rest.splitn(2, ' ');
        let to_uid = parts.next().and_then(|s| s.parse::<u32>().ok());
        let text = parts.next().unwrap_or_default();
        let Some(to_uid) = to_uid else {
            println!("usage: /w <uid> <msg>");
            return true;
        };
        match client
            .request("send_private", json!({"to_uid": to_uid, "text": text}))
            .await
        {
            Ok(_) => println!("[PM to {to_uid}] {text}"),
            Err(e) => println!("[error] {e}"),
        }
        return true;
    }

    if let Err(e) = client.request("send_public", json!({"text": line})).await {
        println!("[error] {e}");
    }
    true
}
