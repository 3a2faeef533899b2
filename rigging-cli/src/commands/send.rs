//! `rigging send`: write one unit to a product socket.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;

use rigging_core::{Protocol, SocketAddress};
use rigging_socket::{Framing, SocketController};

use super::block_on;

/// Arguments for `rigging send`.
#[derive(Args, Debug)]
pub struct SendArgs {
    /// Local socket node to connect to.
    #[arg(long, conflicts_with = "network")]
    pub local: Option<PathBuf>,

    /// `HOST:PORT` to connect to.
    #[arg(long)]
    pub network: Option<String>,

    /// Use a datagram socket instead of a stream.
    #[arg(long)]
    pub datagram: bool,

    /// Stream framing: le, be, newline or raw.
    #[arg(long, default_value = "le")]
    pub framing: Framing,

    /// Wait this many seconds for one reply unit and print it.
    #[arg(long, value_name = "SECS")]
    pub expect_reply: Option<u64>,

    /// Payload, sent as-is.
    pub payload: String,
}

impl SendArgs {
    pub fn run(self) -> Result<()> {
        let protocol = if self.datagram {
            Protocol::Datagram
        } else {
            Protocol::Stream
        };
        let address = match (self.local, self.network) {
            (Some(path), None) => SocketAddress::local(path, protocol),
            (None, Some(host_port)) => SocketAddress::network(host_port, protocol),
            _ => bail!("exactly one of --local or --network is required"),
        };

        let mut controller = SocketController::new(address.clone(), self.framing);
        let payload = self.payload.into_bytes();
        let expect_reply = self.expect_reply.map(Duration::from_secs);
        let reply = block_on(async move {
            controller.connect().await?;
            let sent = controller.send(&payload).await?;
            tracing::info!(address = %controller.address(), bytes = sent, "sent");
            let reply = match expect_reply {
                Some(timeout) => Some(controller.receive(timeout).await?),
                None => None,
            };
            controller.close().await;
            Ok::<_, rigging_socket::SocketError>(reply)
        })?
        .with_context(|| format!("send to {address} failed"))?;

        if let Some(reply) = reply {
            println!("{}", String::from_utf8_lossy(&reply));
        }
        Ok(())
    }
}
