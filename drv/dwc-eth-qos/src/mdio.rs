// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MDIO access through the MAC's station management registers.

use drv_boot_io_api::RegisterWindow;
use embedded_hal::blocking::delay::DelayUs;

use crate::regs::mac;
use crate::EthError;

/// Upper bound on waiting for the MDIO unit to go idle, in 1 µs polls.
pub const MDIO_IDLE_POLLS: u32 = 1_000_000;

/// A bus over which PHY registers can be read and written.
///
/// `devad` selects a clause-45 MMD; `None` is a clause-22 access.
pub trait MdioBus {
    fn mdio_read(
        &mut self,
        phy: u8,
        devad: Option<u8>,
        reg: u16,
    ) -> Result<u16, EthError>;

    fn mdio_write(
        &mut self,
        phy: u8,
        devad: Option<u8>,
        reg: u16,
        value: u16,
    ) -> Result<(), EthError>;
}

/// The controller's MDIO unit, borrowed from an [`Eqos`](crate::Eqos).
pub struct Mdio<'a, R: RegisterWindow, D: DelayUs<u32>> {
    pub(crate) regs: &'a R,
    pub(crate) delay: &'a mut D,
    /// `CR` field: MDC divider for the CSR clock.
    pub(crate) clock_range: u32,
    /// Settle time between issuing an operation and polling for it.
    pub(crate) wait_us: u32,
}

impl<R: RegisterWindow, D: DelayUs<u32>> Mdio<'_, R, D> {
    fn wait_idle(&mut self) -> Result<(), EthError> {
        for _ in 0..MDIO_IDLE_POLLS {
            if self.regs.read32(mac::MDIO_ADDRESS) & mac::MDIO_ADDRESS_GB == 0
            {
                return Ok(());
            }
            self.delay.delay_us(1);
        }
        Err(EthError::Timeout)
    }

    /// Builds the `MDIO_ADDRESS` value that starts an operation, keeping only
    /// the preamble-suppression bit of the current contents.
    fn command(&self, phy: u8, devad: Option<u8>, reg: u16, goc: u32) -> u32 {
        let keep = self.regs.read32(mac::MDIO_ADDRESS) & mac::MDIO_ADDRESS_SKAP;
        let (rda, c45) = match devad {
            Some(devad) => (u32::from(devad), mac::MDIO_ADDRESS_C45E),
            None => (u32::from(reg), 0),
        };
        keep | (u32::from(phy) << mac::MDIO_ADDRESS_PA_SHIFT)
            | (rda << mac::MDIO_ADDRESS_RDA_SHIFT)
            | (self.clock_range << mac::MDIO_ADDRESS_CR_SHIFT)
            | (goc << mac::MDIO_ADDRESS_GOC_SHIFT)
            | c45
            | mac::MDIO_ADDRESS_GB
    }

    fn run(&mut self, command: u32) -> Result<(), EthError> {
        self.regs.write32(mac::MDIO_ADDRESS, command);
        self.delay.delay_us(self.wait_us);
        self.wait_idle()
    }
}

impl<R: RegisterWindow, D: DelayUs<u32>> MdioBus for Mdio<'_, R, D> {
    fn mdio_read(
        &mut self,
        phy: u8,
        devad: Option<u8>,
        reg: u16,
    ) -> Result<u16, EthError> {
        self.wait_idle()?;
        if devad.is_some() {
            // Clause 45 takes the register number through the data register.
            self.regs.write32(
                mac::MDIO_DATA,
                u32::from(reg) << mac::MDIO_DATA_RA_SHIFT,
            );
        }
        let command =
            self.command(phy, devad, reg, mac::MDIO_ADDRESS_GOC_READ);
        self.run(command)?;
        Ok((self.regs.read32(mac::MDIO_DATA) & mac::MDIO_DATA_GD_MASK) as u16)
    }

    fn mdio_write(
        &mut self,
        phy: u8,
        devad: Option<u8>,
        reg: u16,
        value: u16,
    ) -> Result<(), EthError> {
        self.wait_idle()?;
        let mut data = u32::from(value);
        if devad.is_some() {
            data |= u32::from(reg) << mac::MDIO_DATA_RA_SHIFT;
        }
        self.regs.write32(mac::MDIO_DATA, data);
        let command =
            self.command(phy, devad, reg, mac::MDIO_ADDRESS_GOC_WRITE);
        self.run(command)
    }
}

/// Standard MDIO registers laid out in IEEE 802.3 standard clause 22. Vendors
/// often add to this set in the 16+ range.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SmiClause22Register {
    Control = 0,
    Status = 1,
    PhyIdent2 = 2,
    PhyIdent3 = 3,
    AutoNegAdvertisement = 4,
    AutoNegPartnerAbility = 5,
    AutoNegExpansion = 6,
    AutoNegNextPageTransmit = 7,
    AutoNegPartnerReceivedNextPage = 8,
    MasterSlaveControl = 9,
    MasterSlaveStatus = 10,
    PseControl = 11,
    PseStatus = 12,
    MmdAccessControl = 13,
    MmdAccessAddressData = 14,
    ExtendedStatus = 15,
}

impl From<SmiClause22Register> for u16 {
    fn from(x: SmiClause22Register) -> Self {
        x as u16
    }
}
