//! `studyguide doctor` — Diagnose system health.

use std::path::Path;
use studyguide_config::AppConfig;
use studyguide_core::Provider;

fn check_dir(label: &str, dir: &Path) -> bool {
    if dir.is_dir() {
        println!("  ✅ {label} directory: {}", dir.display());
        true
    } else {
        println!("  ⚠️  Missing {label} directory {} — run `studyguide onboard`", dir.display());
        false
    }
}

pub async fn run(online: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 StudyGuide Doctor — System Diagnostics");
    println!("========================================\n");

    let mut issues = 0;

    let config_path = AppConfig::config_dir().join("config.toml");
    if !config_path.exists() {
        println!("  ⚠️  No config file — run `studyguide onboard` (using defaults)");
        issues += 1;
    }

    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ Config invalid: {e}");
            println!("\n  ⚠️  Fix the config before running other checks.");
            return Ok(());
        }
    };

    if config.has_api_key() {
        println!("  ✅ API key configured");
    } else {
        println!("  ⚠️  No API key — set api_key in config.toml or export GROQ_API_KEY");
        issues += 1;
    }

    println!("  ✅ Model: {} via {}", config.default_model, config.provider_url);
    println!(
        "  ✅ Speech: {} voice style(s), default '{}'",
        config.speech.voices.len(),
        config.speech.default_voice_style
    );

    for (label, dir) in [
        ("uploads", &config.storage.uploads_dir),
        ("audio", &config.storage.audio_dir),
    ] {
        if !check_dir(label, dir) {
            issues += 1;
        }
    }

    if online {
        match studyguide_providers::build_from_config(&config) {
            Ok(provider) => match provider.health_check().await {
                Ok(true) => println!("  ✅ Provider '{}' reachable", provider.name()),
                Ok(false) => {
                    println!("  ❌ Provider '{}' rejected the health check", provider.name());
                    issues += 1;
                }
                Err(e) => {
                    println!("  ❌ Provider '{}' unreachable: {e}", provider.name());
                    issues += 1;
                }
            },
            Err(e) => {
                println!("  ❌ Provider could not be built: {e}");
                issues += 1;
            }
        }
    }

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
