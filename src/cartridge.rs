use crate::catalog::{self, Catalog, RomCatalogEntry, Utilization};
use crate::command::{self, Command};
use crate::context::UsbContext;
use crate::device_info::{self, DeviceInfo, Identity, SerialId};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::session::{Delay, Endpoints, Session, UsbSession};
use crate::transfer::{self, Direction, Download, TransferPlan, Upload};
use crate::{PRODUCT_ID, TIMEOUT, VENDOR_ID};
use rusb::{Device, DeviceHandle, TransferType};
use std::io::Write;
use tracing::{debug, info, warn};

/// Interface class of the cartridge's command interface.
const VENDOR_SPECIFIC_CLASS: u8 = 0xff;

/// Class request sent after claiming the interface (SET_CONTROL_LINE_STATE, DTR set).
const LINE_STATE_REQUEST: u8 = 0x22;
const LINE_STATE_VALUE: u16 = 0x0001;

/// Contains necessary information to connect to a cartridge via USB.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CartridgeInfo {
    /// USB bus ID the cartridge is connected to.
    pub usb_bus_number: u8,

    /// USB device address of the cartridge.
    pub usb_bus_address: u8,

    pub vendor_id: u16,
    pub product_id: u16,
}

impl CartridgeInfo {
    /// Connects to a cartridge: locates its vendor interface, claims it and prepares it for
    /// commands. Fails if the USB device is not a Croco Cartridge.
    pub fn open<T: UsbContext>(&self, context: &T) -> Result<Cartridge<UsbSession<T>>> {
        for device in context.devices()?.iter() {
            if device.bus_number() != self.usb_bus_number || device.address() != self.usb_bus_address
            {
                continue;
            }

            // The device may have been replaced by a different one since enumeration
            let descriptor = device.device_descriptor()?;
            if descriptor.vendor_id() != VENDOR_ID || descriptor.product_id() != PRODUCT_ID {
                return Err(Error::UnsupportedDevice {
                    vendor_id: descriptor.vendor_id(),
                    product_id: descriptor.product_id(),
                });
            }

            let (interface, endpoints) = find_vendor_interface(&device)?;
            debug!(
                interface,
                bulk_in = %format!("0x{:02x}", endpoints.bulk_in),
                bulk_out = %format!("0x{:02x}", endpoints.bulk_out),
                "Found vendor interface"
            );

            let mut handle = device.open()?;
            claim(&mut handle, interface)?;
            info!(
                bus = self.usb_bus_number,
                address = self.usb_bus_address,
                "Cartridge ready"
            );
            return Ok(Cartridge::new(UsbSession::new(handle, endpoints, interface)));
        }
        Err(Error::CartridgeNotFound)
    }
}

/// Finds the first vendor-specific interface and its bulk endpoint pair.
fn find_vendor_interface<T: UsbContext>(device: &Device<T>) -> Result<(u8, Endpoints)> {
    let config = device.active_config_descriptor()?;

    for interface in config.interfaces() {
        let Some(descriptor) = interface.descriptors().next() else {
            continue;
        };
        if descriptor.class_code() != VENDOR_SPECIFIC_CLASS {
            continue;
        }

        let mut endpoints = Endpoints {
            bulk_in: 0,
            bulk_out: 0,
        };
        for endpoint in descriptor.endpoint_descriptors() {
            if endpoint.transfer_type() != TransferType::Bulk {
                continue;
            }
            match endpoint.direction() {
                rusb::Direction::In => endpoints.bulk_in = endpoint.address(),
                rusb::Direction::Out => endpoints.bulk_out = endpoint.address(),
            }
        }

        if endpoints.bulk_in == 0 || endpoints.bulk_out == 0 {
            return Err(Error::EndpointsNotFound);
        }
        return Ok((descriptor.interface_number(), endpoints));
    }

    Err(Error::EndpointsNotFound)
}

/// Detaches a kernel driver if necessary and claims the interface. The interface is released
/// again if the setup after claiming fails.
fn claim<T: UsbContext>(handle: &mut DeviceHandle<T>, interface: u8) -> Result<()> {
    if let Ok(true) = handle.kernel_driver_active(interface) {
        match handle.detach_kernel_driver(interface) {
            Ok(()) | Err(rusb::Error::NotSupported) => {}
            Err(error) => return Err(error.into()),
        }
    }

    handle.claim_interface(interface)?;

    let setup = handle
        .set_alternate_setting(interface, 0)
        .and_then(|()| {
            handle.write_control(
                rusb::request_type(
                    rusb::Direction::Out,
                    rusb::RequestType::Class,
                    rusb::Recipient::Interface,
                ),
                LINE_STATE_REQUEST,
                LINE_STATE_VALUE,
                u16::from(interface),
                &[0u8; 0],
                TIMEOUT,
            )
        });

    if let Err(error) = setup {
        if let Err(release_error) = handle.release_interface(interface) {
            warn!(interface, error = %release_error, "Failed to release interface");
        }
        return Err(error.into());
    }
    Ok(())
}

/// Contains a connected cartridge and allows operations to be carried out.
pub struct Cartridge<S: Session> {
    engine: Engine<S>,
}

impl<S: Session> Cartridge<S> {
    /// Wraps an already prepared session.
    pub fn new(session: S) -> Self {
        Self {
            engine: Engine::new(session),
        }
    }

    pub fn session(&self) -> &S {
        self.engine.session()
    }

    pub fn into_session(self) -> S {
        self.engine.into_session()
    }

    /// Queries the ROM count and bank usage.
    pub fn utilization(&mut self) -> Result<Utilization> {
        catalog::query_utilization(&mut self.engine)
    }

    /// Queries the catalog entry of a single ROM.
    pub fn rom_info(&mut self, id: u8) -> Result<RomCatalogEntry> {
        catalog::query_rom_info(&mut self.engine, id)
    }

    /// Lists all installed ROMs.
    pub fn catalog(&mut self) -> Result<Catalog> {
        catalog::list(&mut self.engine)
    }

    pub fn device_info(&mut self) -> Result<DeviceInfo> {
        device_info::query_device_info(&mut self.engine)
    }

    pub fn serial_id(&mut self) -> Result<SerialId> {
        device_info::query_serial_id(&mut self.engine)
    }

    /// Queries device info and then the serial ID. A failing serial query is logged and leaves
    /// the serial empty.
    pub fn identity(&mut self) -> Result<Identity> {
        let info = self.device_info()?;

        self.engine.pause(Delay::SerialQuery);
        let serial = match self.serial_id() {
            Ok(serial) => Some(serial),
            Err(error) => {
                warn!(%error, "Serial ID query failed");
                None
            }
        };

        Ok(Identity { info, serial })
    }

    /// Deletes a ROM from the cartridge.
    pub fn delete_rom(&mut self, id: u8) -> Result<()> {
        let response = self.engine.execute(Command::DeleteRom, &[id], 1)?;
        command::check_status(Command::DeleteRom, &response, None)?;
        info!(rom_id = id, "ROM deleted");
        Ok(())
    }

    /// Announces a ROM upload and returns the operation sending its chunks. The last bank is
    /// zero-padded. Nothing but the handshake is sent if the cartridge refuses the upload.
    pub fn upload_rom<'d>(&mut self, name: &[u8], data: &'d [u8]) -> Result<Upload<'d, '_, S>> {
        let plan = TransferPlan::rom_upload(data.len())?;
        transfer::request_rom_upload(&mut self.engine, &plan, name)?;
        Ok(Upload::new(&mut self.engine, plan, data))
    }

    /// Announces a save download for a ROM and returns the operation receiving its save memory
    /// into `writer`.
    pub fn download_save<W: Write>(&mut self, id: u8, writer: W) -> Result<Download<'_, S, W>> {
        let entry = self.rom_info(id)?;
        let plan = TransferPlan::save(Direction::Download, id, entry.ram_banks)?;
        transfer::request_save_transfer(&mut self.engine, &plan)?;
        Ok(Download::new(&mut self.engine, plan, writer))
    }

    /// Announces a save upload for a ROM and returns the operation sending `data` into its save
    /// memory. Data shorter than the save memory is zero-padded.
    pub fn upload_save<'d>(&mut self, id: u8, data: &'d [u8]) -> Result<Upload<'d, '_, S>> {
        let entry = self.rom_info(id)?;
        let plan = TransferPlan::save(Direction::Upload, id, entry.ram_banks)?;
        if data.len() > plan.total_bytes() {
            return Err(Error::InvalidRequest("save data larger than the save memory"));
        }
        transfer::request_save_transfer(&mut self.engine, &plan)?;
        Ok(Upload::new(&mut self.engine, plan, data))
    }
}
