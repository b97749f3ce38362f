//! BLE Connection Module
//!
//! WinRT GATT implementation of [`WandTransport`].

use crate::domain::settings::Settings;
use crate::error::WandError;
use crate::infrastructure::bluetooth::protocol::{self, BATTERY_CHAR_UUID};
use crate::infrastructure::bluetooth::{TransportEvent, WandTransport};
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use windows::core::GUID;
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattClientCharacteristicConfigurationDescriptorValue,
    GattCommunicationStatus, GattDeviceService, GattSession, GattValueChangedEventArgs, GattWriteOption,
};
use windows::Devices::Bluetooth::{BluetoothCacheMode, BluetoothConnectionStatus, BluetoothLEDevice};
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::{DataReader, DataWriter, IBuffer};

const BATTERY_SERVICE_UUID: &str = "0000180f-0000-1000-8000-00805f9b34fb";

impl From<windows::core::Error> for WandError {
    fn from(e: windows::core::Error) -> Self {
        WandError::Transport(e.message().to_string())
    }
}

/// Configuration for connection behavior
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Wand service UUID
    pub service_uuid: String,
    /// Command write characteristic UUID
    pub command_char_uuid: String,
    /// Notification characteristic UUID
    pub notify_char_uuid: String,
    /// Attempts at enabling notifications
    pub notify_retries: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl ConnectionConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            service_uuid: settings.ble_service_uuid.clone(),
            command_char_uuid: settings.ble_command_char_uuid.clone(),
            notify_char_uuid: settings.ble_notify_char_uuid.clone(),
            notify_retries: 3,
        }
    }
}

#[derive(Clone)]
struct GattHandles {
    command: GattCharacteristic,
    notify: GattCharacteristic,
    battery: Option<GattCharacteristic>,
}

#[derive(Default)]
struct Subscriptions {
    notify: Option<(GattCharacteristic, i64)>,
    battery: Option<(GattCharacteristic, i64)>,
    status: Option<i64>,
}

pub struct WinRtTransport {
    device: BluetoothLEDevice,
    config: ConnectionConfig,
    handles: Mutex<Option<GattHandles>>,
    subscriptions: Mutex<Subscriptions>,
    session: Mutex<Option<GattSession>>,
}

fn guid(uuid: &str) -> Result<GUID, WandError> {
    protocol::parse_uuid(uuid)
        .map(GUID::from_u128)
        .ok_or_else(|| WandError::Transport(format!("invalid UUID {:?}", uuid)))
}

fn buffer_bytes(buffer: &IBuffer) -> windows::core::Result<Vec<u8>> {
    let reader = DataReader::FromBuffer(buffer)?;
    let mut bytes = vec![0u8; reader.UnconsumedBufferLength()? as usize];
    reader.ReadBytes(&mut bytes)?;
    Ok(bytes)
}

impl WinRtTransport {
    /// Connect to a wand by Bluetooth address
    pub async fn connect(address: u64, config: ConnectionConfig) -> Result<Self, WandError> {
        info!("Connecting to wand: {:#X}", address);
        let device = BluetoothLEDevice::FromBluetoothAddressAsync(address)?.await?;
        info!("Device found: {:?}", device.Name()?);

        let session = match Self::create_gatt_session(&device).await {
            Ok(session) => {
                debug!("GattSession created, MaintainConnection set to true");
                Some(session)
            }
            Err(e) => {
                warn!("Failed to create GattSession, continuing anyway: {}", e);
                None
            }
        };

        let transport = Self {
            device,
            config,
            handles: Mutex::new(None),
            subscriptions: Mutex::new(Subscriptions::default()),
            session: Mutex::new(session),
        };
        transport.handles().await?;
        Ok(transport)
    }

    async fn create_gatt_session(device: &BluetoothLEDevice) -> Result<GattSession, WandError> {
        let device_id = device.BluetoothDeviceId()?;
        let session = GattSession::FromDeviceIdAsync(&device_id)?.await?;
        session.SetMaintainConnection(true)?;
        Ok(session)
    }

    /// Cached characteristics, resolved on first use after a cache clear.
    async fn handles(&self) -> Result<GattHandles, WandError> {
        if let Some(handles) = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Ok(handles);
        }

        let handles = self.resolve().await?;
        *self.handles.lock().unwrap_or_else(PoisonError::into_inner) = Some(handles.clone());
        Ok(handles)
    }

    async fn resolve(&self) -> Result<GattHandles, WandError> {
        let service_uuid = guid(&self.config.service_uuid)?;
        let services = self.device.GetGattServicesForUuidAsync(service_uuid)?.await?;
        if services.Status()? != GattCommunicationStatus::Success {
            error!("Failed to get GATT services: {:?}", services.Status()?);
            return Err(WandError::ServiceMissing(self.config.service_uuid.clone()));
        }
        let services = services.Services()?;
        if services.Size()? == 0 {
            return Err(WandError::ServiceMissing(self.config.service_uuid.clone()));
        }
        let service = services.GetAt(0)?;

        let access = service.RequestAccessAsync()?.await?;
        debug!("Service access status: {:?}", access);

        let command = self
            .characteristic(&service, &self.config.command_char_uuid)
            .await?;
        let notify = self
            .characteristic(&service, &self.config.notify_char_uuid)
            .await?;
        let battery = match self.battery_characteristic().await {
            Ok(battery) => Some(battery),
            Err(e) => {
                warn!("Battery characteristic unavailable: {}", e);
                None
            }
        };

        info!("Wand GATT characteristics resolved");
        Ok(GattHandles {
            command,
            notify,
            battery,
        })
    }

    async fn characteristic(
        &self,
        service: &GattDeviceService,
        uuid: &str,
    ) -> Result<GattCharacteristic, WandError> {
        let result = service.GetCharacteristicsForUuidAsync(guid(uuid)?)?.await?;
        if result.Status()? != GattCommunicationStatus::Success {
            return Err(WandError::CharacteristicMissing(uuid.to_string()));
        }
        let characteristics = result.Characteristics()?;
        if characteristics.Size()? == 0 {
            return Err(WandError::CharacteristicMissing(uuid.to_string()));
        }
        Ok(characteristics.GetAt(0)?)
    }

    async fn battery_characteristic(&self) -> Result<GattCharacteristic, WandError> {
        let services = self
            .device
            .GetGattServicesForUuidAsync(guid(BATTERY_SERVICE_UUID)?)?
            .await?;
        let services = services.Services()?;
        if services.Size()? == 0 {
            return Err(WandError::ServiceMissing(BATTERY_SERVICE_UUID.to_string()));
        }
        self.characteristic(&services.GetAt(0)?, BATTERY_CHAR_UUID)
            .await
    }

    /// Enable notifications with retry
    async fn enable_notifications(&self, characteristic: &GattCharacteristic) -> Result<(), WandError> {
        let attempts = self.config.notify_retries.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            let outcome = match characteristic.WriteClientCharacteristicConfigurationDescriptorAsync(
                GattClientCharacteristicConfigurationDescriptorValue::Notify,
            ) {
                Ok(op) => op.await.map_err(WandError::from),
                Err(e) => Err(e.into()),
            };
            match outcome {
                Ok(GattCommunicationStatus::Success) => return Ok(()),
                Ok(status) => {
                    warn!("Notification subscription returned status: {:?}", status);
                    last_error = Some(WandError::Transport(format!("{:?}", status)));
                }
                Err(e) => {
                    warn!("Notification subscription attempt {} failed: {}", attempt, e);
                    last_error = Some(e);
                }
            }
            if attempt < attempts {
                tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            }
        }

        error!("Failed to enable notifications after {} attempts", attempts);
        Err(last_error.unwrap_or_else(|| WandError::Transport("notify".into())))
    }

    fn forward_values(
        characteristic: &GattCharacteristic,
        sink: mpsc::UnboundedSender<TransportEvent>,
        wrap: fn(Vec<u8>) -> TransportEvent,
    ) -> Result<i64, WandError> {
        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<GattCharacteristic>,
                  args: windows::core::Ref<GattValueChangedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    match args.CharacteristicValue().and_then(|v| buffer_bytes(&v)) {
                        Ok(bytes) => {
                            let _ = sink.send(wrap(bytes));
                        }
                        Err(e) => debug!("Unreadable notification value: {}", e),
                    }
                }
                Ok(())
            },
        );
        Ok(characteristic.ValueChanged(&handler)?)
    }

    fn unsubscribe(&self) {
        let mut subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for (characteristic, token) in [subscriptions.notify.take(), subscriptions.battery.take()]
            .into_iter()
            .flatten()
        {
            let _ = characteristic.RemoveValueChanged(token);
        }
        if let Some(token) = subscriptions.status.take() {
            let _ = self.device.RemoveConnectionStatusChanged(token);
        }
    }
}

impl WandTransport for WinRtTransport {
    async fn write_command(&self, data: &[u8]) -> Result<(), WandError> {
        let handles = self.handles().await?;

        let writer = DataWriter::new()?;
        writer.WriteBytes(data)?;
        let buffer = writer.DetachBuffer()?;

        let status = handles
            .command
            .WriteValueWithOptionAsync(&buffer, GattWriteOption::WriteWithoutResponse)?
            .await?;
        if status != GattCommunicationStatus::Success {
            return Err(WandError::Transport(format!("write returned {:?}", status)));
        }
        Ok(())
    }

    async fn start_notify(
        &self,
        sink: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<(), WandError> {
        let handles = self.handles().await?;
        self.unsubscribe();

        self.enable_notifications(&handles.notify).await?;
        let notify_token =
            Self::forward_values(&handles.notify, sink.clone(), TransportEvent::Notification)?;

        let battery = match &handles.battery {
            Some(battery) => match self.enable_notifications(battery).await {
                Ok(()) => Self::forward_values(battery, sink.clone(), TransportEvent::Battery)
                    .ok()
                    .map(|token| (battery.clone(), token)),
                Err(e) => {
                    warn!("Battery notifications unavailable: {}", e);
                    None
                }
            },
            None => None,
        };

        let status_handler =
            TypedEventHandler::new(move |dev: windows::core::Ref<BluetoothLEDevice>, _| {
                if let Some(dev) = dev.as_ref() {
                    if dev.ConnectionStatus()? == BluetoothConnectionStatus::Disconnected {
                        let _ = sink.send(TransportEvent::Disconnected);
                    }
                }
                Ok(())
            });
        let status_token = self.device.ConnectionStatusChanged(&status_handler)?;

        let mut subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscriptions.notify = Some((handles.notify.clone(), notify_token));
        subscriptions.battery = battery;
        subscriptions.status = Some(status_token);

        info!("Notifications enabled");
        Ok(())
    }

    async fn stop_notify(&self) -> Result<(), WandError> {
        self.unsubscribe();
        let handles = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(handles) = handles {
            let status = handles
                .notify
                .WriteClientCharacteristicConfigurationDescriptorAsync(
                    GattClientCharacteristicConfigurationDescriptorValue::None,
                )?
                .await?;
            debug!("Notification unsubscribe status: {:?}", status);
        }
        Ok(())
    }

    async fn read_battery(&self) -> Result<u8, WandError> {
        let handles = self.handles().await?;
        let battery = handles
            .battery
            .ok_or_else(|| WandError::CharacteristicMissing(BATTERY_CHAR_UUID.to_string()))?;

        let result = battery
            .ReadValueWithCacheModeAsync(BluetoothCacheMode::Uncached)?
            .await?;
        if result.Status()? != GattCommunicationStatus::Success {
            return Err(WandError::Transport(format!(
                "battery read returned {:?}",
                result.Status()?
            )));
        }
        let bytes = buffer_bytes(&result.Value()?)?;
        bytes
            .first()
            .copied()
            .ok_or_else(|| WandError::Transport("empty battery value".into()))
    }

    async fn clear_cache(&self) {
        debug!("Clearing cached GATT handles");
        *self.handles.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    async fn disconnect(&self) {
        self.unsubscribe();
        *self.handles.lock().unwrap_or_else(PoisonError::into_inner) = None;
        if let Some(session) = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = session.Close();
        }
        let _ = self.device.Close();
        info!("Disconnected from device");
    }

    fn is_connected(&self) -> bool {
        self.device
            .ConnectionStatus()
            .map(|s| s == BluetoothConnectionStatus::Connected)
            .unwrap_or(false)
    }
}
