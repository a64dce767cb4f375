//! Windows GATT client.
//!
//! Implements [`BleTransport`] on top of the WinRT Bluetooth LE APIs. WinRT
//! event handlers only push [`TransportEvent`]s into the channel given at
//! subscription time, and they stay registered exactly as long as the
//! [`WinRtSubscription`] that owns their tokens.

use crate::infrastructure::bluetooth::transport::{
    BleTransport, GattHandle, PairingOutcome, TransportError, TransportEvent, WriteStatus,
};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;
use windows::core::GUID;
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattClientCharacteristicConfigurationDescriptorValue,
    GattCommunicationStatus, GattDeviceService, GattSession, GattValueChangedEventArgs,
};
use windows::Devices::Bluetooth::{BluetoothConnectionStatus, BluetoothLEDevice};
use windows::Devices::Enumeration::{DevicePairingKinds, DevicePairingResultStatus};
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::{DataReader, DataWriter, IBuffer};

impl From<windows::core::Error> for TransportError {
    fn from(e: windows::core::Error) -> Self {
        TransportError::Gatt(e.to_string())
    }
}

fn to_uuid(guid: GUID) -> Uuid {
    Uuid::from_fields(guid.data1, guid.data2, guid.data3, &guid.data4)
}

fn check(status: GattCommunicationStatus, what: &str) -> Result<(), TransportError> {
    if status == GattCommunicationStatus::Success {
        Ok(())
    } else if status == GattCommunicationStatus::Unreachable {
        Err(TransportError::Unreachable)
    } else {
        Err(TransportError::Gatt(format!("{} returned {:?}", what, status)))
    }
}

#[derive(Clone)]
pub struct WinRtDevice {
    device: BluetoothLEDevice,
    // Keeps Windows from dropping the link between GATT calls
    session: Option<GattSession>,
}

#[derive(Clone)]
pub struct WinRtService(GattDeviceService);

impl GattHandle for WinRtService {
    fn uuid(&self) -> Uuid {
        self.0.Uuid().map(to_uuid).unwrap_or_default()
    }
}

#[derive(Clone)]
pub struct WinRtCharacteristic(GattCharacteristic);

impl GattHandle for WinRtCharacteristic {
    fn uuid(&self) -> Uuid {
        self.0.Uuid().map(to_uuid).unwrap_or_default()
    }
}

/// Registered notification and connection status handlers; dropping it
/// removes both
pub struct WinRtSubscription {
    device: BluetoothLEDevice,
    characteristic: GattCharacteristic,
    value_token: i64,
    status_token: i64,
}

impl Drop for WinRtSubscription {
    fn drop(&mut self) {
        if let Err(e) = self.characteristic.RemoveValueChanged(self.value_token) {
            warn!("Failed to remove notification handler: {}", e);
        }
        if let Err(e) = self.device.RemoveConnectionStatusChanged(self.status_token) {
            warn!("Failed to remove connection status handler: {}", e);
        }
        debug!("Notification handlers removed");
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WinRtTransport;

impl WinRtTransport {
    pub fn new() -> Self {
        Self
    }

    /// Create a GattSession to maintain the BLE connection
    async fn maintain_connection(device: &BluetoothLEDevice) -> windows::core::Result<GattSession> {
        let device_id = device.BluetoothDeviceId()?;
        let session = GattSession::FromDeviceIdAsync(&device_id)?.await?;
        session.SetMaintainConnection(true)?;
        Ok(session)
    }

    fn read_buffer(buffer: &IBuffer) -> windows::core::Result<Vec<u8>> {
        let reader = DataReader::FromBuffer(buffer)?;
        let mut bytes = vec![0u8; reader.UnconsumedBufferLength()? as usize];
        reader.ReadBytes(&mut bytes)?;
        Ok(bytes)
    }
}

impl BleTransport for WinRtTransport {
    type Device = WinRtDevice;
    type Service = WinRtService;
    type Characteristic = WinRtCharacteristic;
    type Subscription = WinRtSubscription;

    async fn resolve_device(&self, address: u64) -> Result<Option<WinRtDevice>, TransportError> {
        // A null device comes back as an error from the async operation
        let device = match BluetoothLEDevice::FromBluetoothAddressAsync(address)?.await {
            Ok(device) => device,
            Err(e) => {
                debug!("No device at {:#X}: {}", address, e);
                return Ok(None);
            }
        };
        if let Ok(name) = device.Name() {
            info!("Device connected: {}", name);
        }

        let session = match Self::maintain_connection(&device).await {
            Ok(session) => {
                info!("GattSession created, MaintainConnection set to true");
                Some(session)
            }
            Err(e) => {
                warn!("Failed to create GattSession ({}), continuing anyway...", e);
                None
            }
        };

        Ok(Some(WinRtDevice { device, session }))
    }

    async fn pair(&self, device: &WinRtDevice) -> Result<PairingOutcome, TransportError> {
        let pairing = device.device.DeviceInformation()?.Pairing()?;
        let is_paired = pairing.IsPaired()?;
        info!("Device pairing status - IsPaired: {}", is_paired);
        if is_paired {
            return Ok(PairingOutcome::AlreadyPaired);
        }

        let result = match pairing
            .Custom()?
            .PairAsync(DevicePairingKinds::ConfirmOnly)?
            .await
        {
            Ok(result) => result,
            // 0x800704C7: the user dismissed the prompt
            Err(e) => return Ok(PairingOutcome::Rejected(e.to_string())),
        };
        let status = result.Status()?;
        info!("Pairing result: {:?}", status);
        Ok(match status {
            DevicePairingResultStatus::Paired => PairingOutcome::Paired,
            DevicePairingResultStatus::AlreadyPaired => PairingOutcome::AlreadyPaired,
            // Status 19; BLE controllers routinely refuse classic pairing
            DevicePairingResultStatus::Failed
            | DevicePairingResultStatus::RequiredHandlerNotRegistered => {
                PairingOutcome::NotRequired
            }
            other => PairingOutcome::Rejected(format!("{:?}", other)),
        })
    }

    async fn services(&self, device: &WinRtDevice) -> Result<Vec<WinRtService>, TransportError> {
        let result = device.device.GetGattServicesAsync()?.await?;
        check(result.Status()?, "GetGattServicesAsync")?;

        let services = result.Services()?;
        let mut found = Vec::with_capacity(services.Size()? as usize);
        for i in 0..services.Size()? {
            found.push(WinRtService(services.GetAt(i)?));
        }
        Ok(found)
    }

    async fn characteristics(
        &self,
        service: &WinRtService,
    ) -> Result<Vec<WinRtCharacteristic>, TransportError> {
        let access = service.0.RequestAccessAsync()?.await?;
        debug!("Service access status: {:?}", access);

        let result = service.0.GetCharacteristicsAsync()?.await?;
        check(result.Status()?, "GetCharacteristicsAsync")?;

        let characteristics = result.Characteristics()?;
        let mut found = Vec::with_capacity(characteristics.Size()? as usize);
        for i in 0..characteristics.Size()? {
            found.push(WinRtCharacteristic(characteristics.GetAt(i)?));
        }
        Ok(found)
    }

    async fn write(
        &self,
        characteristic: &WinRtCharacteristic,
        payload: &[u8],
    ) -> Result<WriteStatus, TransportError> {
        let writer = DataWriter::new()?;
        writer.WriteBytes(payload)?;
        let buffer = writer.DetachBuffer()?;

        let status = characteristic.0.WriteValueAsync(&buffer)?.await?;
        Ok(if status == GattCommunicationStatus::Success {
            WriteStatus::Success
        } else if status == GattCommunicationStatus::Unreachable {
            WriteStatus::Unreachable
        } else if status == GattCommunicationStatus::AccessDenied {
            WriteStatus::AccessDenied
        } else {
            WriteStatus::ProtocolError
        })
    }

    async fn subscribe(
        &self,
        device: &WinRtDevice,
        characteristic: &WinRtCharacteristic,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<WinRtSubscription, TransportError> {
        // Data notification handler
        let sender = events.clone();
        let data_handler = TypedEventHandler::new(
            move |_: windows::core::Ref<GattCharacteristic>,
                  args: windows::core::Ref<GattValueChangedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let bytes = Self::read_buffer(&args.CharacteristicValue()?)?;
                    // 2-byte packets are command responses, not sensor data
                    if bytes.len() == 2 {
                        trace!("Command response {:02X?}", bytes);
                    } else {
                        let _ = sender.send(TransportEvent::Notification(bytes));
                    }
                }
                Ok(())
            },
        );
        let value_token = characteristic.0.ValueChanged(&data_handler)?;

        // Connection status handler
        let sender = events;
        let status_handler =
            TypedEventHandler::new(move |dev: windows::core::Ref<BluetoothLEDevice>, _| {
                if let Some(dev) = dev.as_ref() {
                    if dev.ConnectionStatus()? == BluetoothConnectionStatus::Disconnected {
                        let _ = sender.send(TransportEvent::Disconnected);
                    }
                }
                Ok(())
            });
        let status_token = match device.device.ConnectionStatusChanged(&status_handler) {
            Ok(token) => token,
            Err(e) => {
                let _ = characteristic.0.RemoveValueChanged(value_token);
                return Err(e.into());
            }
        };

        // Owned from here on: an error return or a dropped future unregisters
        let subscription = WinRtSubscription {
            device: device.device.clone(),
            characteristic: characteristic.0.clone(),
            value_token,
            status_token,
        };

        info!("Enabling notifications...");
        let status = characteristic
            .0
            .WriteClientCharacteristicConfigurationDescriptorAsync(
                GattClientCharacteristicConfigurationDescriptorValue::Notify,
            )?
            .await?;
        check(status, "Enabling notifications")?;
        Ok(subscription)
    }

    fn unsubscribe(&self, subscription: WinRtSubscription) {
        drop(subscription);
    }

    fn disconnect(&self, device: WinRtDevice) {
        if let Some(session) = device.session {
            let _ = session.Close();
        }
        let _ = device.device.Close();
    }
}
