use anyhow::Context;
use magic_caster_wand::domain::settings::SettingsService;
use magic_caster_wand::infrastructure::logging::init_logger;
use tracing::info;

/// Accepts `AA:BB:CC:DD:EE:FF` or plain hex.
fn parse_address(text: &str) -> Option<u64> {
    let text = text.trim();
    let text = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    let hex: String = text.chars().filter(|c| *c != ':' && *c != '-').collect();
    if hex.is_empty() || hex.len() > 12 {
        return None;
    }
    u64::from_str_radix(&hex, 16).ok()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut settings_service = SettingsService::new()?;
    let _logging = init_logger(&settings_service.get().log_settings)?;
    info!("Starting Magic Caster Wand controller");
    info!("Settings file: {}", settings_service.path().display());

    let candidates = match std::env::args().nth(1) {
        Some(arg) => {
            vec![parse_address(&arg).with_context(|| format!("invalid address {:?}", arg))?]
        }
        None => settings_service.get().reconnect_candidates(),
    };
    if candidates.is_empty() {
        anyhow::bail!("no wand address given and none remembered");
    }

    run(&mut settings_service, &candidates).await
}

#[cfg(windows)]
async fn run(settings_service: &mut SettingsService, candidates: &[u64]) -> anyhow::Result<()> {
    use magic_caster_wand::domain::classifier::DetectorBackend;
    use magic_caster_wand::domain::models::WandEvent;
    use magic_caster_wand::infrastructure::bluetooth::connection::{
        ConnectionConfig, WinRtTransport,
    };
    use magic_caster_wand::infrastructure::bluetooth::WandService;
    use std::sync::Arc;
    use tracing::warn;

    let settings = settings_service.get().clone();
    let backend = DetectorBackend::from_settings(&settings)?;
    info!("Classifier model: {}", settings.model_path());
    let config = ConnectionConfig::from_settings(&settings);

    let mut connected = None;
    for &address in candidates {
        match WinRtTransport::connect(address, config.clone()).await {
            Ok(transport) => {
                connected = Some((address, transport));
                break;
            }
            Err(e) => warn!("Wand {:012X} unavailable: {}", address, e),
        }
    }
    let (address, transport) = connected.context("no known wand could be reached")?;
    let transport = Arc::new(transport);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut service = WandService::new(transport, backend, settings, tx);
    service.init_classifier().await;
    service.connect().await?;
    settings_service.add_known_address(address)?;

    if let Some(wand_type) = service.wand_type().await? {
        info!("Wand type: {:?}", wand_type);
    }
    service.start_imu_streaming().await?;

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(WandEvent::Imu(_)) | Some(WandEvent::TrailPoint(_)) => {}
                Some(WandEvent::SpellResult(Some(spell))) => info!("Spell cast: {}", spell),
                Some(WandEvent::SpellResult(None)) => info!("Gesture not recognised"),
                Some(event) => info!("{:?}", event),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
        if !service.is_connected() {
            warn!("Wand connection lost");
            break;
        }
    }

    if let Err(e) = service.stop_imu_streaming().await {
        warn!("Failed to stop IMU streaming: {}", e);
    }
    service.disconnect().await;
    Ok(())
}

#[cfg(not(windows))]
async fn run(_settings_service: &mut SettingsService, candidates: &[u64]) -> anyhow::Result<()> {
    anyhow::bail!(
        "no BLE transport for this platform ({} candidate wands)",
        candidates.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("AA:BB:CC:DD:EE:FF"), Some(0xAABBCCDDEEFF));
        assert_eq!(parse_address("0x1234"), Some(0x1234));
        assert_eq!(parse_address("0xAABBCCDDEEFF"), Some(0xAABBCCDDEEFF));
        assert_eq!(parse_address("0X0000000000FF"), Some(0xFF));
        assert_eq!(parse_address("0x1AABBCCDDEEFF"), None);
        assert_eq!(parse_address("e0-5a-1b-00-00-01"), Some(0xE05A1B000001));
        assert_eq!(parse_address("not an address"), None);
        assert_eq!(parse_address(""), None);
    }
}
