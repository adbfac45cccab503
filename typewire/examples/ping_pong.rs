//! Ping-Pong example: typed message-RPC over real TCP.
//!
//! Run as two separate processes:
//!
//! ```bash
//! # Terminal 1 - start the server
//! cargo run --example ping_pong -- server
//!
//! # Terminal 2 - run the client
//! cargo run --example ping_pong -- client
//! ```
//!
//! The client sends `Ping { value, count }`; the server answers with
//! `Pong { value, square, count - 1 }`; the client keeps the rally going
//! until the countdown reaches zero.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use typewire::{
    FnHandlerFactory, JsonCodec, MessageClient, MessageSender, MessageServer, NetConfig,
    NoHooks, TypeTable, TypeTableBuilder, bind_handlers, message_types,
};

const SERVER_ADDR: &str = "127.0.0.1:4600";

// ============================================================================
// Message Types
// ============================================================================

message_types! {
    /// Probe carrying a countdown.
    pub struct Ping {
        pub value: i32,
        pub count: i32,
    }

    /// Reply echoing the value, its square, and the decremented countdown.
    pub struct Pong {
        pub value: i32,
        pub square: i32,
        pub count: i32,
    }
}

fn types() -> Arc<TypeTable> {
    Arc::new(
        TypeTableBuilder::new(JsonCodec)
            .register::<Ping>()
            .register::<Pong>()
            .build()
            .expect("type set is valid"),
    )
}

// ============================================================================
// Server
// ============================================================================

struct ServerHandler {
    sender: MessageSender,
}

impl ServerHandler {
    async fn handle_ping(&self, ping: Ping) {
        println!("received ping value={} count={}", ping.value, ping.count);
        self.sender
            .send(Pong {
                value: ping.value,
                square: ping.value * ping.value,
                count: ping.count - 1,
            })
            .await;
    }
}

bind_handlers! {
    ServerHandler {
        async fn handle_ping(Ping);
    }
}

async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Ping-Pong Server ===\n");

    let factory = Arc::new(FnHandlerFactory::new(|ctx| ServerHandler {
        sender: ctx.sender,
    }));
    let server = MessageServer::bind(
        NetConfig::new(SERVER_ADDR),
        types(),
        factory,
        Arc::new(NoHooks),
    )
    .await?;

    println!("Server listening on {}\n", server.local_addr());
    tokio::signal::ctrl_c().await?;

    println!("Shutting down.");
    server.shutdown().await;
    Ok(())
}

// ============================================================================
// Client
// ============================================================================

struct ClientHandler {
    sender: MessageSender,
}

impl ClientHandler {
    async fn handle_pong(&self, pong: Pong) {
        println!(
            "received pong value={} square={} count={}",
            pong.value, pong.square, pong.count
        );
        if pong.count > 0 {
            self.sender
                .send(Ping {
                    value: pong.value,
                    count: pong.count,
                })
                .await;
        } else {
            println!("\nrally finished");
        }
    }
}

bind_handlers! {
    ClientHandler {
        async fn handle_pong(Pong);
    }
}

async fn run_client() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Ping-Pong Client ===\n");

    let factory = Arc::new(FnHandlerFactory::new(|ctx| ClientHandler {
        sender: ctx.sender,
    }));
    let client = MessageClient::connect(
        NetConfig::new(SERVER_ADDR),
        types(),
        factory,
        Arc::new(NoHooks),
    )
    .await?;

    println!("Connected to {}\n", SERVER_ADDR);

    client
        .sender()
        .send(Ping {
            value: 100,
            count: 5,
        })
        .await;

    // Give the rally time to play out, then hang up.
    tokio::time::sleep(Duration::from_secs(1)).await;
    client.disconnect().await;
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let mode = args.get(1).map(|s| s.as_str()).unwrap_or("help");

    let result = match mode {
        "server" => run_server().await,
        "client" => run_client().await,
        _ => {
            println!("Ping-Pong Example: typed message-RPC over TCP\n");
            println!("Usage:");
            println!("  cargo run --example ping_pong -- server   # Start the server");
            println!("  cargo run --example ping_pong -- client   # Run the client\n");
            println!("Run the server first in one terminal, then the client in another.");
            Ok(())
        }
    };

    if let Err(error) = result {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}
