//! `studyguide onboard` — First-time setup.

use studyguide_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    println!("📚 StudyGuide — First-Time Setup");
    println!("================================\n");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("✅ Created config directory: {}", config_dir.display());
    } else {
        println!("  Config directory exists: {}", config_dir.display());
    }

    let config = if config_path.exists() {
        println!("\n⚠️  Config already exists at: {}", config_path.display());
        println!("   Edit it manually or delete and re-run onboard.\n");
        AppConfig::load_from(&config_path)?
    } else {
        std::fs::write(&config_path, AppConfig::default_toml())?;
        println!("✅ Created config.toml at: {}", config_path.display());
        AppConfig::default()
    };

    for (label, dir) in [
        ("uploads", &config.storage.uploads_dir),
        ("audio", &config.storage.audio_dir),
    ] {
        if !dir.exists() {
            std::fs::create_dir_all(dir)?;
            println!("✅ Created {label} directory: {}", dir.display());
        }
    }
    if let Some(parent) = config.storage.database_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    println!("\n📝 Next steps:");
    println!("   1. Set api_key in {} (or export GROQ_API_KEY)", config_path.display());
    println!("   2. Point [speech].api_url at an OpenAI-compatible speech endpoint");
    println!("   3. Run: studyguide gateway\n");

    Ok(())
}
