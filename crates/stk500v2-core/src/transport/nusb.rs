//! nusb-based USB transport implementation.

use nusb::transfer::{Bulk, In, Out};
use nusb::{Device, Interface, MaybeFuture, list_devices};
use std::io::{Read, Write};
use tracing::{debug, info, instrument};

use super::traits::{Transport, TransportError, TransportKind};
use crate::protocol::constants::{ATMEL_VENDOR_ID, AVRISP_MKII_PRODUCT_ID, PROGRAMMER_INTERFACE};

const TRANSFER_BUFFER_SIZE: usize = 4096;

/// Bulk IN/OUT endpoint addresses of the programmer interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointPair {
    pub in_endpoint: u8,
    pub out_endpoint: u8,
}

/// nusb-based USB transport.
pub struct NusbTransport {
    vid: u16,
    pid: u16,
    device: Option<Device>,
    interface: Option<Interface>,
    endpoints: Option<EndpointPair>,
}

impl NusbTransport {
    /// Transport for the device with the given VID/PID. Nothing is opened yet.
    pub fn new(vid: u16, pid: u16) -> Self {
        Self {
            vid,
            pid,
            device: None,
            interface: None,
            endpoints: None,
        }
    }

    /// Transport for an AVRISP mkII.
    pub fn avrisp_mkii() -> Self {
        Self::new(ATMEL_VENDOR_ID, AVRISP_MKII_PRODUCT_ID)
    }

    pub fn vendor_id(&self) -> u16 {
        self.vid
    }

    pub fn product_id(&self) -> u16 {
        self.pid
    }

    /// Endpoints found by `set_up_interface`.
    pub fn endpoints(&self) -> Option<EndpointPair> {
        self.endpoints
    }

    fn claim(&mut self) -> Result<(), TransportError> {
        if self.interface.is_some() {
            return Ok(());
        }
        let device = self.device.as_ref().ok_or(TransportError::NotOpen)?;
        let interface = device
            .claim_interface(PROGRAMMER_INTERFACE)
            .wait()
            .map_err(|e| TransportError::ClaimInterfaceFailed {
                interface: PROGRAMMER_INTERFACE,
                message: e.to_string(),
            })?;
        self.interface = Some(interface);
        Ok(())
    }

    fn find_endpoints(device: &Device) -> Result<EndpointPair, TransportError> {
        let config = device
            .active_configuration()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        let mut in_endpoint: u8 = 0;
        let mut out_endpoint: u8 = 0;

        for iface in config.interfaces() {
            if iface.interface_number() != PROGRAMMER_INTERFACE {
                continue;
            }
            for alt in iface.alt_settings() {
                for ep in alt.endpoints() {
                    if ep.transfer_type() != nusb::descriptors::TransferType::Bulk {
                        continue;
                    }
                    if ep.direction() == nusb::transfer::Direction::In {
                        in_endpoint = ep.address();
                    } else {
                        out_endpoint = ep.address();
                    }
                }
            }
        }

        if in_endpoint == 0 {
            return Err(TransportError::EndpointNotFound {
                ep_type: "Bulk".into(),
                direction: "In".into(),
            });
        }
        if out_endpoint == 0 {
            return Err(TransportError::EndpointNotFound {
                ep_type: "Bulk".into(),
                direction: "Out".into(),
            });
        }

        Ok(EndpointPair {
            in_endpoint,
            out_endpoint,
        })
    }

    fn ready(&self) -> Result<(&Interface, EndpointPair), TransportError> {
        match (&self.interface, self.endpoints) {
            (Some(interface), Some(endpoints)) => Ok((interface, endpoints)),
            _ => Err(TransportError::NotOpen),
        }
    }
}

impl Transport for NusbTransport {
    #[instrument(level = "info", skip(self), fields(vid = format!("{:04X}", self.vid), pid = format!("{:04X}", self.pid)))]
    fn open(&mut self) -> Result<(), TransportError> {
        let device_info = list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?
            .find(|d| d.vendor_id() == self.vid && d.product_id() == self.pid)
            .ok_or(TransportError::DeviceNotFound {
                vid: self.vid,
                pid: self.pid,
            })?;

        let device = device_info
            .open()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;
        self.device = Some(device);

        // macOS refuses bulk transfers on an interface that was not claimed
        // straight after open.
        if cfg!(target_os = "macos") {
            debug!("Claiming interface right after open");
            self.claim()?;
        }

        info!("Device opened");
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.endpoints = None;
        self.interface = None;
        if self.device.take().is_some() {
            info!("Device closed");
        }
        Ok(())
    }

    fn set_up_interface(&mut self) -> Result<(), TransportError> {
        let device = self.device.as_ref().ok_or(TransportError::NotOpen)?;
        let endpoints = Self::find_endpoints(device)?;
        self.claim()?;

        info!(
            in_ep = %format!("0x{:02X}", endpoints.in_endpoint),
            out_ep = %format!("0x{:02X}", endpoints.out_endpoint),
            "Interface ready"
        );
        self.endpoints = Some(endpoints);
        Ok(())
    }

    #[instrument(skip(self, data), fields(len = data.len()))]
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let (interface, endpoints) = self.ready()?;
        let ep = interface
            .endpoint::<Bulk, Out>(endpoints.out_endpoint)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;

        let mut writer = ep.writer(TRANSFER_BUFFER_SIZE);
        writer
            .write_all(data)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;

        debug!(bytes_written = data.len(), "Write complete");
        Ok(())
    }

    #[instrument(skip(self))]
    fn read(&mut self, count: usize) -> Result<Vec<u8>, TransportError> {
        let (interface, endpoints) = self.ready()?;
        let ep = interface
            .endpoint::<Bulk, In>(endpoints.in_endpoint)
            .map_err(|e| TransportError::ReadFailed(e.to_string()))?;

        let mut reader = ep.reader(TRANSFER_BUFFER_SIZE);
        let mut buf = vec![0u8; count];

        let n = reader
            .read(&mut buf)
            .map_err(|e| TransportError::ReadFailed(e.to_string()))?;

        buf.truncate(n);
        debug!(bytes_read = n, "Read complete");
        Ok(buf)
    }

    /// Bulk IN data is only fetched on request, so nothing is ever queued.
    fn discard_input(&mut self) -> Result<usize, TransportError> {
        Ok(0)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Usb
    }
}
