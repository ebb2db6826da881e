use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::command::dispatcher::{Session, dispatch_command};
use crate::frontend::context::FrontendContext;
use crate::shared::config::CONFIG;
use crate::shared::protocol::messages::{ClientRequest, read_frame, write_frame};

pub async fn run_tcp_server(ctx: Arc<FrontendContext>) -> anyhow::Result<()> {
    let addr = &CONFIG.server.tcp_addr;

    let listener = TcpListener::bind(addr).await?;
    info!("TCP listener active on {}", addr);

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Failed to accept TCP connection: {}", e);
                continue;
            }
        };
        let ctx = ctx.clone();

        tokio::spawn(async move {
            let mut stream = stream;

            // new clients authenticate before anything else
            match ctx.auth.authenticate(&mut stream).await {
                Ok(true) => {}
                Ok(false) => {
                    info!(%peer, "Client failed authentication");
                    return;
                }
                Err(e) => {
                    warn!(%peer, error = %e, "Connection setup failed");
                    return;
                }
            }

            let mut session = Session::new();
            loop {
                let request = match read_frame::<_, ClientRequest>(&mut stream).await {
                    Ok(Some(req)) => req,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(%peer, error = %e, "Malformed client frame");
                        break;
                    }
                };
                let response = dispatch_command(&ctx.engine, &mut session, request).await;
                if let Err(e) = write_frame(&mut stream, &response).await {
                    warn!(%peer, error = %e, "Failed to write response");
                    break;
                }
            }
        });
    }
}
