use flourish_wizard::{Config, app};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Read configuration from the environment
    let config = Config::from_env()?;

    // Start the web application
    app::run(config).await?;

    Ok(())
}
