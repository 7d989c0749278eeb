//! `toolstream config`: configuration management commands.

use toolstream_config::AppConfig;

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    println!("{}", config.redacted_toml());
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", config_path().display());
    Ok(())
}

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating {}", config_path().display());

    match AppConfig::load() {
        Ok(config) => {
            println!("   ok: config parsed and validated");

            let mut warnings = Vec::new();
            if !config.has_api_key() {
                warnings.push("No API key set (set TOOLSTREAM_API_KEY or OPENAI_API_KEY)");
            }
            if config.search.api_key.is_none() {
                warnings.push("No search key set, web_search will fail (set SERPAPI_API_KEY)");
            }
            if config.gateway.allowed_origins.is_empty() {
                warnings.push("No CORS origins allowed, browsers cannot reach /chat");
            }
            for w in &warnings {
                println!("   warning: {w}");
            }

            println!();
            println!("   Model:      {}", config.default_model);
            println!("   Endpoint:   {}", config.base_url);
            println!(
                "   Gateway:    {}:{}",
                config.gateway.host, config.gateway.port
            );
            println!("   Iterations: {}", config.agent.max_iterations);
        }
        Err(e) => {
            println!("   error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

fn config_path() -> std::path::PathBuf {
    AppConfig::config_dir().join("config.toml")
}
