use crate::cartridge::{Cartridge, CartridgeInfo};
use crate::error::{Error, Result};
use crate::session::UsbSession;
use crate::{PRODUCT_ID, VENDOR_ID};

pub use rusb::UsbContext;

/// Owns the USB context and finds connected cartridges.
pub struct Context {
    pub usb_context: rusb::Context,
}

impl Context {
    pub fn new() -> Result<Self> {
        let usb_context = rusb::Context::new()?;
        Ok(Context { usb_context })
    }

    /// Lists all connected devices carrying the cartridge's vendor and product ID.
    pub fn find_cartridges(&self) -> Result<Vec<CartridgeInfo>> {
        let mut cartridges = Vec::new();

        for device in self.usb_context.devices()?.iter() {
            // Devices whose descriptor cannot be read are certainly not ours
            let Ok(descriptor) = device.device_descriptor() else {
                continue;
            };
            if descriptor.vendor_id() == VENDOR_ID && descriptor.product_id() == PRODUCT_ID {
                cartridges.push(CartridgeInfo {
                    usb_bus_number: device.bus_number(),
                    usb_bus_address: device.address(),
                    vendor_id: descriptor.vendor_id(),
                    product_id: descriptor.product_id(),
                });
            }
        }

        Ok(cartridges)
    }

    /// Picks the cartridge at the given `(bus, address)`, or the only connected one if no
    /// location is given.
    pub fn pick_cartridge(&self, location: Option<(u8, u8)>) -> Result<CartridgeInfo> {
        select(self.find_cartridges()?, location)
    }

    /// Picks a cartridge like [`pick_cartridge`] and opens it.
    ///
    /// [`pick_cartridge`]: #method.pick_cartridge
    pub fn open_cartridge(
        &self,
        location: Option<(u8, u8)>,
    ) -> Result<Cartridge<UsbSession<rusb::Context>>> {
        self.pick_cartridge(location)?.open(&self.usb_context)
    }
}

fn select(cartridges: Vec<CartridgeInfo>, location: Option<(u8, u8)>) -> Result<CartridgeInfo> {
    if let Some((bus, address)) = location {
        cartridges
            .into_iter()
            .find(|c| c.usb_bus_number == bus && c.usb_bus_address == address)
            .ok_or(Error::CartridgeNotFound)
    } else {
        let mut cartridges = cartridges.into_iter();
        match (cartridges.next(), cartridges.next()) {
            (None, _) => Err(Error::CartridgeNotFound),
            (Some(cartridge), None) => Ok(cartridge),
            // More than one cartridge and no location given
            (Some(_), Some(_)) => Err(Error::TooManyMatches),
        }
    }
}
