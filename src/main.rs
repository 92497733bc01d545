use dotenv::dotenv;
use studyhelper_backend::config::Config;
use studyhelper_backend::server::Server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = Config::from_env()?;
    let server_addr = config.server_addr.clone();
    let server = Server::new(config).await?;

    tokio::select! {
        result = server.run(&server_addr) => result?,
        _ = tokio::signal::ctrl_c() => log::info!("Shutting down server..."),
    }

    Ok(())
}
