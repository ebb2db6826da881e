use rooster_db::frontend::start_all;
use rooster_db::logging;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init()?;
    info!("RoosterDB is starting...");

    let _ = start_all().await;

    Ok(())
}
