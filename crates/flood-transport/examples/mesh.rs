//! Three peers on loopback: bob and carol join alice's document, everyone
//! types a line, and each peer prints what it received.
//!
//! ```text
//! cargo run -p flood-transport --example mesh
//! ```

use flood_core::{Event, EventKind, Session, SiteId};
use flood_transport::{Node, NodeConfig, NodeHandle};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

async fn start(alias: &'static str) -> Result<NodeHandle, Box<dyn std::error::Error>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let site = SiteId::new(listener.local_addr()?.to_string())?;
    let session = Arc::new(Session::new(alias, "shopping list"));

    let mut node = Node::new(site, session, NodeConfig::default());
    node.subscribe(EventKind::RemoteInsertion, move |event| {
        if let Event::RemoteInsertion(data) = event {
            println!("{:>6} got {}", alias, data);
        }
    });

    Ok(node.spawn(listener))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let alice = start("alice").await?;
    let bob = start("bob").await?;
    let carol = start("carol").await?;

    bob.join(alice.local_site()).await?;
    tokio::time::sleep(Duration::from_millis(200)).await;
    carol.join(alice.local_site()).await?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    alice.insert(json!(["milk"]))?;
    bob.insert(json!(["eggs"]))?;
    carol.insert(json!(["bread"]))?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    for peer in [&alice, &bob, &carol] {
        let status = peer.status().await?;
        println!("{} clock {} neighbours {:?}", peer.local_site(), status.clock, status.neighbours);
    }

    for peer in [carol, bob, alice] {
        peer.shutdown().await?;
    }
    Ok(())
}
