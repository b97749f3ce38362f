//! Wand Service Module
//!
//! Main service that coordinates the transport, the command correlator and
//! the notification router for one connected wand.

use crate::domain::classifier::{InferenceBackend, SpellClassifier};
use crate::domain::models::{ConnectionStatus, WandEvent, WandInfo, WandType};
use crate::domain::settings::Settings;
use crate::domain::spells;
use crate::error::WandError;
use crate::infrastructure::bluetooth::{
    correlator::{CommandCorrelator, CorrelatorConfig},
    guard_gatt,
    macros::{LedGroup, Macro},
    protocol::{product_info, WandCommand, IMU_STREAM_FLAG},
    router::{NotificationRouter, RouterConfig},
    TransportEvent, WandTransport,
};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Settle time around the factory unlock before button calibration
const CALIBRATION_SETTLE: Duration = Duration::from_secs(1);

/// Device orchestrator for one wand connection
pub struct WandService<T, B> {
    transport: Arc<T>,
    correlator: Arc<CommandCorrelator<T>>,
    classifier: Arc<SpellClassifier<B>>,
    info: Arc<Mutex<WandInfo>>,
    event_sender: mpsc::UnboundedSender<WandEvent>,
    router_sender: Option<mpsc::UnboundedSender<TransportEvent>>,
    settings: Settings,
}

impl<T: WandTransport, B: InferenceBackend> WandService<T, B> {
    pub fn new(
        transport: Arc<T>,
        backend: B,
        settings: Settings,
        event_sender: mpsc::UnboundedSender<WandEvent>,
    ) -> Self {
        let correlator = Arc::new(CommandCorrelator::new(
            transport.clone(),
            CorrelatorConfig::from_settings(&settings),
        ));
        Self {
            transport,
            correlator,
            classifier: Arc::new(SpellClassifier::new(backend)),
            info: Arc::new(Mutex::new(WandInfo::default())),
            event_sender,
            router_sender: None,
            settings,
        }
    }

    /// Subscribe to notifications and initialise the wand.
    pub async fn connect(&mut self) -> Result<(), WandError> {
        self.emit(WandEvent::ConnectionStatus(ConnectionStatus::Connecting));

        let (tx, rx) = mpsc::unbounded_channel();
        let router = NotificationRouter::new(
            self.correlator.clone(),
            self.classifier.clone(),
            self.info.clone(),
            self.event_sender.clone(),
            RouterConfig::from_settings(&self.settings),
        );
        tokio::spawn(router.run(rx));

        if let Err(e) = guard_gatt(self.transport.as_ref(), self.transport.start_notify(tx.clone())).await
        {
            warn!("Failed to enable notifications: {}", e);
            self.emit(WandEvent::ConnectionStatus(ConnectionStatus::Error));
            return Err(e);
        }
        self.router_sender = Some(tx);

        info!("Wand connected");
        self.emit(WandEvent::ConnectionStatus(ConnectionStatus::Connected));
        self.initialize_wand().await;
        Ok(())
    }

    async fn initialize_wand(&self) {
        if let Err(e) = self.device_id().await {
            warn!("Failed to read device id: {}", e);
        }

        for (index, value) in self.settings.button_thresholds.iter().enumerate() {
            let command = WandCommand::SetButtonThreshold {
                index: index as u8,
                value: *value,
            };
            if let Err(e) = self.correlator.send_command(command).await {
                warn!("Failed to set button {} threshold: {}", index, e);
            }
        }

        if let Err(e) = self.read_battery().await {
            debug!("Initial battery read failed: {}", e);
        }
    }

    /// Stop notifications, return to the idle baseline, release the link.
    pub async fn disconnect(&mut self) {
        if let Err(e) = self.transport.stop_notify().await {
            warn!("Failed to stop notifications: {}", e);
        }
        if let Some(router) = self.router_sender.take() {
            let _ = router.send(TransportEvent::Disconnected);
        }
        self.transport.disconnect().await;
        info!("Disconnected from wand");
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub async fn send_macro(&self, sequence: &Macro) -> Result<(), WandError> {
        self.correlator.send_macro(sequence).await
    }

    pub async fn set_led(
        &self,
        group: LedGroup,
        r: u32,
        g: u32,
        b: u32,
        duration_ms: u32,
    ) -> Result<(), WandError> {
        self.send_macro(&Macro::new().add_led(group, r, g, b, duration_ms))
            .await
    }

    pub async fn clear_leds(&self) -> Result<(), WandError> {
        self.send_macro(&Macro::new().add_clear()).await
    }

    pub async fn buzz(&self, duration_ms: u32) -> Result<(), WandError> {
        self.send_macro(&Macro::new().add_buzz(duration_ms)).await
    }

    /// Play the payoff macro for a spell. Returns false for unknown names.
    pub async fn play_spell(&self, name: &str) -> Result<bool, WandError> {
        match spells::spell_macro(name) {
            Some(sequence) => {
                debug!("Playing macro for {}", name);
                self.send_macro(&sequence).await?;
                Ok(true)
            }
            None => {
                warn!("No macro for spell {:?}", name);
                Ok(false)
            }
        }
    }

    pub async fn start_imu_streaming(&self) -> Result<(), WandError> {
        self.correlator
            .send_command(WandCommand::ImuFlagSet(IMU_STREAM_FLAG))
            .await
    }

    pub async fn stop_imu_streaming(&self) -> Result<(), WandError> {
        self.correlator
            .send_command(WandCommand::ImuFlagReset(IMU_STREAM_FLAG))
            .await
    }

    /// Button baseline then IMU calibration.
    pub async fn trigger_calibration(&self) -> Result<(), WandError> {
        self.calibrate_buttons().await?;
        self.calibrate_imu().await
    }

    pub async fn calibrate_buttons(&self) -> Result<(), WandError> {
        tokio::time::sleep(CALIBRATION_SETTLE).await;
        self.correlator.send_command(WandCommand::FactoryUnlock).await?;
        self.correlator
            .send_command(WandCommand::CalibrateButtons)
            .await?;
        tokio::time::sleep(CALIBRATION_SETTLE).await;
        Ok(())
    }

    pub async fn calibrate_imu(&self) -> Result<(), WandError> {
        self.correlator.send_command(WandCommand::CalibrateImu).await
    }

    pub async fn keep_alive(&self) -> Result<(), WandError> {
        self.correlator.send_command(WandCommand::KeepAlive).await
    }

    pub async fn reset_wand(&self) -> Result<(), WandError> {
        self.correlator.send_command(WandCommand::Reset).await
    }

    pub async fn firmware_version(&self) -> Result<Option<String>, WandError> {
        self.cached_or_query(WandCommand::FirmwareVersion, |info| {
            info.firmware_version.clone()
        })
        .await
    }

    pub async fn box_address(&self) -> Result<Option<String>, WandError> {
        self.cached_or_query(WandCommand::BoxAddress, |info| info.box_address.clone())
            .await
    }

    pub async fn device_id(&self) -> Result<Option<String>, WandError> {
        self.cached_or_query(
            WandCommand::ProductInfo(product_info::DEVICE_ID),
            |info| info.device_id.clone(),
        )
        .await
    }

    pub async fn serial_number(&self) -> Result<Option<u32>, WandError> {
        self.cached_or_query(
            WandCommand::ProductInfo(product_info::SERIAL_NUMBER),
            |info| info.serial_number,
        )
        .await
    }

    pub async fn sku(&self) -> Result<Option<String>, WandError> {
        self.cached_or_query(WandCommand::ProductInfo(product_info::SKU), |info| {
            info.sku.clone()
        })
        .await
    }

    pub async fn wand_type(&self) -> Result<Option<WandType>, WandError> {
        Ok(self.device_id().await?.map(|id| WandType::from_device_id(&id)))
    }

    /// Read the battery characteristic and publish the level.
    pub async fn read_battery(&self) -> Result<u8, WandError> {
        let level = guard_gatt(self.transport.as_ref(), self.transport.read_battery()).await?;
        self.emit(WandEvent::Battery(level));
        Ok(level)
    }

    /// Probe the classifier backend and upload the model when it answers.
    pub async fn init_classifier(&self) -> bool {
        let ready = match self.classifier.initialize().await {
            Ok(ready) => ready,
            Err(e) => {
                warn!("Failed to initialise classifier: {}", e);
                false
            }
        };
        self.emit(WandEvent::ServerReachable(self.classifier.is_reachable()));
        ready
    }

    pub fn server_reachable(&self) -> bool {
        self.classifier.is_reachable()
    }

    pub fn wand_info(&self) -> WandInfo {
        self.info
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    async fn cached_or_query<V>(
        &self,
        command: WandCommand,
        read: impl Fn(&WandInfo) -> Option<V>,
    ) -> Result<Option<V>, WandError> {
        if let Some(value) = self.cached(&read) {
            return Ok(Some(value));
        }
        self.correlator.send_command(command).await?;
        Ok(self.cached(&read))
    }

    fn cached<V>(&self, read: &impl Fn(&WandInfo) -> Option<V>) -> Option<V> {
        read(&self.info.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn emit(&self, event: WandEvent) {
        let _ = self.event_sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::classifier::testing::FixedBackend;
    use crate::infrastructure::bluetooth::macros::opcode;
    use crate::infrastructure::bluetooth::mock::MockTransport;
    use crate::infrastructure::bluetooth::protocol::command;

    struct Fixture {
        transport: Arc<MockTransport>,
        service: WandService<MockTransport, FixedBackend>,
        events: mpsc::UnboundedReceiver<WandEvent>,
    }

    fn fixture(backend: FixedBackend) -> Fixture {
        let transport = Arc::new(MockTransport::new());
        transport.respond_to(
            command::GET_PRODUCT_INFO,
            &[0x0E, 0x04, b'W', b'B', b'M', b'C', b'2', b'2', b'G', b'1', b'S', b'H', b'N', b'W'],
        );
        let settings = Settings {
            command_timeout_ms: 200,
            ..Settings::default()
        };
        let (tx, events) = mpsc::unbounded_channel();
        let service = WandService::new(transport.clone(), backend, settings, tx);
        Fixture {
            transport,
            service,
            events,
        }
    }

    fn drain(events: &mut mpsc::UnboundedReceiver<WandEvent>) -> Vec<WandEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn test_connect_initialises_wand() {
        let Fixture {
            transport,
            mut service,
            mut events,
        } = fixture(FixedBackend::peaked(0, 1.0));
        transport.set_battery(64);

        service.connect().await.unwrap();
        assert!(transport.is_notifying());

        let writes = transport.writes();
        assert_eq!(writes[0], vec![0x0E, 0x04]);
        let thresholds: Vec<_> = writes[1..].iter().filter(|w| w[0] == 0xDC).cloned().collect();
        assert_eq!(thresholds.len(), 8);
        assert_eq!(thresholds[0], vec![0xDC, 0, 5]);
        assert_eq!(thresholds[7], vec![0xDC, 7, 8]);

        assert_eq!(
            service.wand_info().device_id.as_deref(),
            Some("WBMC22G1SHNW")
        );
        assert_eq!(service.wand_type().await.unwrap(), Some(WandType::Honourable));
        // Cached: no second product info write
        assert_eq!(transport.writes().len(), 9);

        let seen = drain(&mut events);
        assert!(matches!(
            seen[0],
            WandEvent::ConnectionStatus(ConnectionStatus::Connecting)
        ));
        assert!(matches!(
            seen[1],
            WandEvent::ConnectionStatus(ConnectionStatus::Connected)
        ));
        assert!(seen.iter().any(|e| matches!(e, WandEvent::Battery(64))));
    }

    #[tokio::test]
    async fn test_connect_fails_when_service_missing() {
        let Fixture {
            transport,
            mut service,
            mut events,
        } = fixture(FixedBackend::peaked(0, 1.0));
        transport.fail_notify(WandError::ServiceMissing("wand".into()));

        let result = service.connect().await;
        assert!(matches!(result, Err(WandError::ServiceMissing(_))));
        assert_eq!(transport.cache_clears(), 1);
        assert_eq!(transport.disconnects(), 1);
        assert!(!service.is_connected());
        assert!(drain(&mut events)
            .iter()
            .any(|e| matches!(e, WandEvent::ConnectionStatus(ConnectionStatus::Error))));
    }

    #[tokio::test]
    async fn test_outgoing_commands() {
        let Fixture {
            transport,
            service,
            ..
        } = fixture(FixedBackend::peaked(0, 1.0));

        service.set_led(LedGroup::Pommel, 0x1FF, 0x80, 0, 250).await.unwrap();
        service.clear_leds().await.unwrap();
        service.buzz(300).await.unwrap();
        service.start_imu_streaming().await.unwrap();
        service.stop_imu_streaming().await.unwrap();
        assert!(service.play_spell("wingardium leviosa").await.unwrap());
        assert!(!service.play_spell("not a spell").await.unwrap());

        let writes = transport.writes();
        assert_eq!(
            writes[0],
            vec![opcode::CONTROL, opcode::LIGHT_TRANSITION, 3, 0xFF, 0x80, 0, 250, 0]
        );
        assert_eq!(writes[1], vec![opcode::CONTROL, opcode::LIGHT_CLEAR_ALL]);
        assert_eq!(writes[2], vec![opcode::CONTROL, opcode::HAP_BUZZ, 0x2C, 0x01]);
        assert_eq!(writes[3], vec![0x30, 0x01]);
        assert_eq!(writes[4], vec![0x31, 0x01]);
        assert_eq!(writes[5][0], opcode::CONTROL);
        assert_eq!(writes.len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_calibration_sequence() {
        let Fixture {
            transport,
            mut service,
            ..
        } = fixture(FixedBackend::peaked(0, 1.0));
        transport.respond_to(command::CALIBRATE_BUTTON_BASELINE, &[0xFB]);
        service.connect().await.unwrap();
        let before = transport.writes().len();

        let started = tokio::time::Instant::now();
        service.trigger_calibration().await.unwrap();

        let writes = transport.writes();
        assert_eq!(
            writes[before..].to_vec(),
            vec![vec![0xFE, 0x55, 0xAA], vec![0xFB], vec![0xFC]]
        );
        let times = transport.write_times();
        assert!(times[before].duration_since(started) >= CALIBRATION_SETTLE);
        assert!(times[before + 2].duration_since(times[before + 1]) >= CALIBRATION_SETTLE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_without_response_times_out() {
        let Fixture {
            transport,
            service,
            ..
        } = fixture(FixedBackend::peaked(0, 1.0));

        let result = service.firmware_version().await;
        assert!(matches!(result, Err(WandError::Timeout { opcode: 0x00, .. })));
        assert_eq!(transport.writes().len(), 3);
    }

    #[tokio::test]
    async fn test_disconnect_stops_notifications_and_resets() {
        let Fixture {
            transport,
            mut service,
            mut events,
        } = fixture(FixedBackend::peaked(0, 1.0));
        service.connect().await.unwrap();
        transport.inject(&[0x10, 0x0F]);
        tokio::task::yield_now().await;
        drain(&mut events);

        service.disconnect().await;
        assert!(!transport.is_notifying());
        assert!(!service.is_connected());
        assert!(!transport.inject(&[0x10, 0x00]));

        let mut seen = Vec::new();
        while let Some(event) = events.recv().await {
            let done = matches!(
                event,
                WandEvent::ConnectionStatus(ConnectionStatus::Disconnected)
            );
            seen.push(event);
            if done {
                break;
            }
        }
        assert!(seen
            .iter()
            .any(|e| matches!(e, WandEvent::Buttons(state) if state.mask() == 0)));
    }

    #[tokio::test]
    async fn test_init_classifier_reports_reachability() {
        let Fixture {
            service,
            mut events,
            ..
        } = fixture(FixedBackend::failing("connection refused"));
        assert!(!service.init_classifier().await);
        assert!(!service.server_reachable());
        assert!(matches!(
            drain(&mut events).as_slice(),
            [WandEvent::ServerReachable(false)]
        ));

        let Fixture { service, .. } = fixture(FixedBackend::peaked(0, 1.0));
        assert!(service.init_classifier().await);
        assert!(service.server_reachable());
    }
}
