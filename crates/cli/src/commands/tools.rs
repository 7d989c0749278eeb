//! `toolstream tools`: list the tools the agent can select.

use toolstream_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let registry = toolstream_tools::default_registry(&config.search)?;

    println!("{} tools registered:\n", registry.len());
    for definition in registry.definitions() {
        println!("  {:<14} {}", definition.name, definition.description);
    }
    if config.search.api_key.is_none() {
        println!();
        println!("  note: web_search will fail until SERPAPI_API_KEY is set");
    }

    Ok(())
}
