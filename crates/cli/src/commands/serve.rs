//! `toolstream serve`: start the HTTP gateway.

use toolstream_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    if !config.has_api_key() {
        eprintln!("  ERROR: No API key configured!");
        eprintln!("  Set TOOLSTREAM_API_KEY or OPENAI_API_KEY, or add api_key to:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        return Err("No API key found".into());
    }

    println!("Toolstream Gateway");
    println!("   Listening:  {}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:      {}", config.default_model);
    println!("   Iterations: {}", config.agent.max_iterations);

    toolstream_gateway::start(config).await?;

    Ok(())
}
