//! Notification router
//!
//! Owns the per-connection gesture state. Every transport event is decoded
//! and dispatched here; decode failures are logged and dropped so one bad
//! packet never stops the stream.
//!
//! Button edges drive capture: all four pads going down starts a gesture,
//! any pad lifting ends it and hands the trail to the classifier on a
//! separate task.

use super::correlator::CommandCorrelator;
use super::macros::{LedGroup, Macro};
use super::protocol::{self, Notification};
use super::{TransportEvent, WandTransport};
use crate::domain::classifier::{InferenceBackend, SpellClassifier};
use crate::domain::models::{
    ButtonState, CalibrationKind, ConnectionStatus, ImuSample, WandEvent, WandInfo,
};
use crate::domain::settings::Settings;
use crate::domain::tracker::SpellTracker;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Vibration on a recognised spell
const SPELL_BUZZ_MS: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouterConfig {
    pub confidence_threshold: f32,
    /// 0xRRGGBB shown on the tip while casting
    pub casting_color: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl RouterConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            confidence_threshold: settings.confidence_threshold,
            casting_color: settings.casting_led_color.rgb(),
        }
    }
}

pub struct NotificationRouter<T, B> {
    correlator: Arc<CommandCorrelator<T>>,
    classifier: Arc<SpellClassifier<B>>,
    info: Arc<Mutex<WandInfo>>,
    events: mpsc::UnboundedSender<WandEvent>,
    tracker: SpellTracker,
    buttons: ButtonState,
    config: RouterConfig,
}

impl<T: WandTransport, B: InferenceBackend> NotificationRouter<T, B> {
    pub fn new(
        correlator: Arc<CommandCorrelator<T>>,
        classifier: Arc<SpellClassifier<B>>,
        info: Arc<Mutex<WandInfo>>,
        events: mpsc::UnboundedSender<WandEvent>,
        config: RouterConfig,
    ) -> Self {
        Self {
            correlator,
            classifier,
            info,
            events,
            tracker: SpellTracker::new(),
            buttons: ButtonState::default(),
            config,
        }
    }

    pub fn buttons(&self) -> ButtonState {
        self.buttons
    }

    pub fn is_capturing(&self) -> bool {
        self.tracker.is_capturing()
    }

    /// Process events until every sender is dropped.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<TransportEvent>) {
        debug!("Notification router started");
        while let Some(event) = rx.recv().await {
            self.handle_event(event);
        }
        debug!("Notification router stopped");
    }

    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Notification(bytes) => self.handle_notification(&bytes),
            TransportEvent::Battery(bytes) => match bytes.first() {
                Some(&level) => {
                    debug!("Battery level: {}%", level);
                    self.emit(WandEvent::Battery(level));
                }
                None => debug!("Dropping empty battery notification"),
            },
            TransportEvent::Disconnected => {
                info!("Wand disconnected");
                self.reset();
                self.emit(WandEvent::ConnectionStatus(ConnectionStatus::Disconnected));
            }
        }
    }

    fn handle_notification(&mut self, bytes: &[u8]) {
        match protocol::decode_notification(bytes) {
            Ok(notification) => self.dispatch(notification),
            Err(e) => debug!("Dropping notification: {}", e),
        }

        // Cached info is updated before the waiting command is released
        if let Some(&opcode) = bytes.first() {
            self.correlator.on_notification(opcode);
        }
    }

    fn dispatch(&mut self, notification: Notification) {
        match notification {
            Notification::FirmwareVersion(version) => {
                info!("Firmware version: {}", version);
                self.with_info(|info| info.firmware_version = Some(version));
            }
            Notification::Challenge(challenge) => trace!("Challenge: {:02X?}", challenge),
            Notification::BoxAddress(address) => {
                info!("Box address: {}", address);
                self.with_info(|info| info.box_address = Some(address));
            }
            Notification::ProductInfo(product) => {
                info!("Product info: {:?}", product);
                self.with_info(|info| info.apply_product_info(product));
            }
            Notification::Buttons(state) => self.on_buttons(state),
            Notification::SpellCast(name) => {
                info!("Wand recognised spell: {}", name);
                self.emit(WandEvent::WandSpell(name));
            }
            Notification::Imu(samples) => self.on_imu(samples),
            Notification::ButtonThreshold { index, threshold } => {
                info!("Button {} threshold: {}", index, threshold);
            }
            Notification::ButtonCalibration => {
                info!("Button calibration complete");
                self.emit(WandEvent::Calibration(CalibrationKind::Buttons));
            }
            Notification::ImuCalibration => {
                info!("IMU calibration complete");
                self.emit(WandEvent::Calibration(CalibrationKind::Imu));
            }
            Notification::Unknown { opcode, len } => {
                debug!("Unhandled notification 0x{:02X} ({} bytes)", opcode, len);
            }
        }
    }

    fn on_buttons(&mut self, state: ButtonState) {
        let was_pressed = self.buttons.all_pressed();
        let is_pressed = state.all_pressed();
        self.buttons = state;
        self.emit(WandEvent::Buttons(state));

        match (was_pressed, is_pressed) {
            (false, true) => self.begin_gesture(),
            (true, false) => self.end_gesture(),
            _ => {}
        }
    }

    fn on_imu(&mut self, samples: Vec<ImuSample>) {
        for sample in &samples {
            if let Some(point) = self.tracker.update(sample) {
                self.emit(WandEvent::TrailPoint(point));
            }
        }
        self.emit(WandEvent::Imu(samples));
    }

    fn begin_gesture(&mut self) {
        debug!("All pads pressed, starting spell capture");
        self.tracker.start();

        let indicator = Macro::new().add_led_rgb(LedGroup::Tip, self.config.casting_color, 0);
        self.spawn_macro(indicator, "turn on casting LED");
    }

    fn end_gesture(&mut self) {
        debug!("Pads released, stopping spell capture");
        let captured = self.tracker.stop();
        self.spawn_macro(Macro::new().add_clear(), "turn off casting LED");

        let classifier = self.classifier.clone();
        let correlator = self.correlator.clone();
        let events = self.events.clone();
        let threshold = self.config.confidence_threshold;

        tokio::spawn(async move {
            let label = match captured {
                Ok(series) => classifier.detect(&series, threshold).await,
                Err(e) => {
                    debug!("Gesture not classified: {}", e);
                    None
                }
            };

            match label {
                Some(spell) => info!("Spell detected: {}", spell),
                None => debug!("No spell detected"),
            }
            let _ = events.send(WandEvent::SpellResult(label));

            if label.is_some() {
                if let Err(e) = correlator.send_macro(&Macro::new().add_buzz(SPELL_BUZZ_MS)).await {
                    warn!("Failed to buzz wand: {}", e);
                }
            }
        });
    }

    fn spawn_macro(&self, sequence: Macro, what: &'static str) {
        let correlator = self.correlator.clone();
        tokio::spawn(async move {
            if let Err(e) = correlator.send_macro(&sequence).await {
                warn!("Failed to {}: {}", what, e);
            }
        });
    }

    /// Back to the idle baseline: no capture, no pads.
    fn reset(&mut self) {
        if self.tracker.is_capturing() {
            let _ = self.tracker.stop();
        }
        if self.buttons != ButtonState::default() {
            self.buttons = ButtonState::default();
            self.emit(WandEvent::Buttons(self.buttons));
        }
    }

    fn with_info(&self, update: impl FnOnce(&mut WandInfo)) {
        let mut info = self.info.lock().unwrap_or_else(PoisonError::into_inner);
        update(&mut info);
    }

    fn emit(&self, event: WandEvent) {
        if self.events.send(event).is_err() {
            trace!("No event listener");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::classifier::testing::FixedBackend;
    use crate::domain::spells::SPELL_NAMES;
    use crate::infrastructure::bluetooth::correlator::CorrelatorConfig;
    use crate::infrastructure::bluetooth::macros::opcode;
    use crate::infrastructure::bluetooth::mock::MockTransport;
    use std::time::Duration;

    struct Harness {
        transport: Arc<MockTransport>,
        router: NotificationRouter<MockTransport, FixedBackend>,
        events: mpsc::UnboundedReceiver<WandEvent>,
        info: Arc<Mutex<WandInfo>>,
    }

    fn harness(backend: FixedBackend) -> Harness {
        let transport = Arc::new(MockTransport::new());
        let correlator = Arc::new(CommandCorrelator::new(
            transport.clone(),
            CorrelatorConfig::default(),
        ));
        let info = Arc::new(Mutex::new(WandInfo::default()));
        let (tx, events) = mpsc::unbounded_channel();
        let router = NotificationRouter::new(
            correlator,
            Arc::new(SpellClassifier::new(backend)),
            info.clone(),
            tx,
            RouterConfig::default(),
        );
        Harness {
            transport,
            router,
            events,
            info,
        }
    }

    fn notify(router: &mut NotificationRouter<MockTransport, FixedBackend>, bytes: &[u8]) {
        router.handle_event(TransportEvent::Notification(bytes.to_vec()));
    }

    /// One 0x2C packet carrying `count` copies of the same raw sample.
    fn imu_packet(gyro: [i16; 3], accel: [i16; 3], count: u8) -> Vec<u8> {
        let mut bytes = vec![0x2C, 0x00, 0x00, count];
        for _ in 0..count {
            for axis in gyro.iter().chain(accel.iter()) {
                bytes.extend_from_slice(&axis.to_le_bytes());
            }
        }
        bytes
    }

    fn drain(events: &mut mpsc::UnboundedReceiver<WandEvent>) -> Vec<WandEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    async fn next_spell_result(events: &mut mpsc::UnboundedReceiver<WandEvent>) -> Option<WandEvent> {
        tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(event) = events.recv().await {
                if matches!(event, WandEvent::SpellResult(_)) {
                    return Some(event);
                }
            }
            None
        })
        .await
        .ok()
        .flatten()
    }

    #[tokio::test]
    async fn test_gesture_end_to_end() {
        let lumos = SPELL_NAMES.iter().position(|n| *n == "Lumos").unwrap();
        let Harness {
            transport,
            mut router,
            mut events,
            ..
        } = harness(FixedBackend::peaked(lumos, 0.999));

        notify(&mut router, &[0x10, 0x0F]);
        assert!(router.is_capturing());

        // Level wand yawing one way, then back: 1 g on z, ~±1 rad/s about z
        let one_g = 2048;
        for i in 0..40 {
            let rate = if i < 20 { 940 } else { -940 };
            notify(&mut router, &imu_packet([0, 0, rate], [0, 0, one_g], 10));
        }
        let trail_points = drain(&mut events)
            .iter()
            .filter(|e| matches!(e, WandEvent::TrailPoint(_)))
            .count();
        assert_eq!(trail_points, 400);

        notify(&mut router, &[0x10, 0x00]);
        assert!(!router.is_capturing());

        match next_spell_result(&mut events).await {
            Some(WandEvent::SpellResult(Some(label))) => assert_eq!(label.name(), "Lumos"),
            other => panic!("unexpected {:?}", other),
        }

        // Casting LED on, LEDs cleared, then the recognition buzz
        tokio::time::sleep(Duration::from_millis(50)).await;
        let writes = transport.writes();
        assert!(writes.iter().any(|w| w[..2] == [opcode::CONTROL, opcode::LIGHT_TRANSITION]));
        assert!(writes.iter().any(|w| w[..] == [opcode::CONTROL, opcode::LIGHT_CLEAR_ALL]));
        assert!(writes.iter().any(|w| w[..2] == [opcode::CONTROL, opcode::HAP_BUZZ]));
    }

    #[tokio::test]
    async fn test_short_gesture_is_not_classified() {
        let Harness {
            mut router,
            mut events,
            ..
        } = harness(FixedBackend::peaked(0, 1.0));

        notify(&mut router, &[0x10, 0x0F]);
        notify(&mut router, &imu_packet([0, 0, 900], [0, 0, 2048], 5));
        notify(&mut router, &[0x10, 0x07]);

        assert!(matches!(
            next_spell_result(&mut events).await,
            Some(WandEvent::SpellResult(None))
        ));
        assert_eq!(router.classifier.backend().calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_partial_press_does_not_start_capture() {
        let Harness {
            mut router,
            mut events,
            ..
        } = harness(FixedBackend::peaked(0, 1.0));

        notify(&mut router, &[0x10, 0x0E]);
        assert!(!router.is_capturing());
        notify(&mut router, &[0x10, 0x0F]);
        notify(&mut router, &[0x10, 0x0F]);
        assert!(router.is_capturing());

        let buttons: Vec<_> = drain(&mut events)
            .into_iter()
            .filter_map(|e| match e {
                WandEvent::Buttons(state) => Some(state.mask()),
                _ => None,
            })
            .collect();
        assert_eq!(buttons, vec![0x0E, 0x0F, 0x0F]);
    }

    #[tokio::test]
    async fn test_malformed_notifications_are_dropped() {
        let Harness {
            mut router,
            mut events,
            ..
        } = harness(FixedBackend::peaked(0, 1.0));

        // Header claims 3 samples, only one follows
        let mut truncated = imu_packet([1, 2, 3], [4, 5, 6], 1);
        truncated[3] = 3;
        notify(&mut router, &truncated);
        notify(&mut router, &[]);
        notify(&mut router, &[0x10]);
        notify(&mut router, &[0x77, 0x01]);
        assert!(drain(&mut events).is_empty());

        // The stream keeps working afterwards
        notify(&mut router, &imu_packet([1, 2, 3], [4, 5, 6], 2));
        assert!(matches!(
            drain(&mut events).as_slice(),
            [WandEvent::Imu(samples)] if samples.len() == 2
        ));
    }

    #[tokio::test]
    async fn test_info_and_pass_through_events() {
        let Harness {
            mut router,
            mut events,
            info,
            ..
        } = harness(FixedBackend::peaked(0, 1.0));

        notify(&mut router, &[0x00, 2, 1, 7]);
        notify(&mut router, &[0x0E, 0x04, b'W', b'B', b'M', b'C', b'W', b'S', b'X', 0]);
        notify(&mut router, &[0xFB]);
        notify(&mut router, &[0xFC]);
        notify(&mut router, &[0x24, 0, 0, 5, b'L', b'u', b'm', b'o', b's']);
        router.handle_event(TransportEvent::Battery(vec![87]));

        let cached = info.lock().unwrap().clone();
        assert_eq!(cached.firmware_version.as_deref(), Some("2.1.7"));
        assert_eq!(cached.device_id.as_deref(), Some("WBMCWSX"));

        let events = drain(&mut events);
        assert!(matches!(events[0], WandEvent::Calibration(CalibrationKind::Buttons)));
        assert!(matches!(events[1], WandEvent::Calibration(CalibrationKind::Imu)));
        assert!(matches!(&events[2], WandEvent::WandSpell(name) if name == "Lumos"));
        assert!(matches!(events[3], WandEvent::Battery(87)));
    }

    #[tokio::test]
    async fn test_disconnect_resets_to_baseline() {
        let Harness {
            mut router,
            mut events,
            ..
        } = harness(FixedBackend::peaked(0, 1.0));

        notify(&mut router, &[0x10, 0x0F]);
        assert!(router.is_capturing());
        drain(&mut events);

        router.handle_event(TransportEvent::Disconnected);
        assert!(!router.is_capturing());
        assert_eq!(router.buttons(), ButtonState::default());

        let seen = drain(&mut events);
        assert!(matches!(seen[0], WandEvent::Buttons(state) if state.mask() == 0));
        assert!(matches!(
            seen[1],
            WandEvent::ConnectionStatus(ConnectionStatus::Disconnected)
        ));

        // Releasing after a reset is not a gesture end
        notify(&mut router, &[0x10, 0x00]);
        tokio::task::yield_now().await;
        assert!(!drain(&mut events)
            .iter()
            .any(|e| matches!(e, WandEvent::SpellResult(_))));
    }
}
