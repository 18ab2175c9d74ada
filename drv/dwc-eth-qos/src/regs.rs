// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Register map of the DWC Ethernet QoS controller.
//!
//! Offsets are relative to the start of the controller's register window.
//! Single-bit controls are `bitflags`; multi-bit fields are `SHIFT`/`MASK`
//! pairs, with the mask applied before shifting.

use bitflags::bitflags;

pub const MAC_BASE: u32 = 0x0000;
pub const MMC_BASE: u32 = 0x0700;
pub const MTL_BASE: u32 = 0x0d00;
pub const DMA_BASE: u32 = 0x1000;

pub mod mac {
    use super::MAC_BASE;

    pub const CONFIGURATION: u32 = MAC_BASE;
    pub const Q0_TX_FLOW_CTRL: u32 = MAC_BASE + 0x070;
    pub const RX_FLOW_CTRL: u32 = MAC_BASE + 0x090;
    pub const TXQ_PRTY_MAP0: u32 = MAC_BASE + 0x098;
    pub const RXQ_CTRL0: u32 = MAC_BASE + 0x0a0;
    pub const RXQ_CTRL2: u32 = MAC_BASE + 0x0a8;
    pub const US_TIC_COUNTER: u32 = MAC_BASE + 0x0dc;
    pub const VERSION: u32 = MAC_BASE + 0x110;
    pub const HW_FEATURE0: u32 = MAC_BASE + 0x11c;
    pub const HW_FEATURE1: u32 = MAC_BASE + 0x120;
    pub const HW_FEATURE3: u32 = MAC_BASE + 0x128;
    pub const MDIO_ADDRESS: u32 = MAC_BASE + 0x200;
    pub const MDIO_DATA: u32 = MAC_BASE + 0x204;
    pub const ADDRESS0_HIGH: u32 = MAC_BASE + 0x300;
    pub const ADDRESS0_LOW: u32 = MAC_BASE + 0x304;

    pub const Q0_TX_FLOW_CTRL_PT_SHIFT: u32 = 16;
    pub const Q0_TX_FLOW_CTRL_PT_MASK: u32 = 0xffff;
    pub const Q0_TX_FLOW_CTRL_TFE: u32 = 1 << 1;

    pub const RX_FLOW_CTRL_RFE: u32 = 1 << 0;

    pub const TXQ_PRTY_MAP0_PSTQ0_SHIFT: u32 = 0;
    pub const TXQ_PRTY_MAP0_PSTQ0_MASK: u32 = 0xff;

    pub const RXQ_CTRL0_RXQ0EN_SHIFT: u32 = 0;
    pub const RXQ_CTRL0_RXQ0EN_MASK: u32 = 3;
    pub const RXQ_CTRL0_RXQ0EN_ENABLED_DCB: u32 = 2;

    pub const RXQ_CTRL2_PSRQ0_SHIFT: u32 = 0;
    pub const RXQ_CTRL2_PSRQ0_MASK: u32 = 0xff;

    pub const HW_FEATURE0_MIISEL_SHIFT: u32 = 0;
    pub const HW_FEATURE0_GMIISEL_SHIFT: u32 = 1;
    pub const HW_FEATURE0_HDSEL_SHIFT: u32 = 2;
    pub const HW_FEATURE0_MMCSEL_SHIFT: u32 = 8;

    pub const HW_FEATURE1_RXFIFOSIZE_SHIFT: u32 = 0;
    pub const HW_FEATURE1_RXFIFOSIZE_MASK: u32 = 0x1f;
    pub const HW_FEATURE1_TXFIFOSIZE_SHIFT: u32 = 6;
    pub const HW_FEATURE1_TXFIFOSIZE_MASK: u32 = 0x1f;

    pub const HW_FEATURE3_ASP_SHIFT: u32 = 28;
    pub const HW_FEATURE3_ASP_MASK: u32 = 0x3;

    pub const MDIO_ADDRESS_PA_SHIFT: u32 = 21;
    pub const MDIO_ADDRESS_RDA_SHIFT: u32 = 16;
    pub const MDIO_ADDRESS_CR_SHIFT: u32 = 8;
    pub const MDIO_ADDRESS_SKAP: u32 = 1 << 4;
    pub const MDIO_ADDRESS_GOC_SHIFT: u32 = 2;
    pub const MDIO_ADDRESS_GOC_READ: u32 = 3;
    pub const MDIO_ADDRESS_GOC_WRITE: u32 = 1;
    pub const MDIO_ADDRESS_C45E: u32 = 1 << 1;
    pub const MDIO_ADDRESS_GB: u32 = 1 << 0;

    pub const MDIO_DATA_RA_SHIFT: u32 = 16;
    pub const MDIO_DATA_GD_MASK: u32 = 0xffff;

    /// Major/minor IP version lives in the low byte of `VERSION`; `0x50` is
    /// the first release with the automotive safety package.
    pub const IP_VERSION_5_0: u32 = 0x50;
}

bitflags! {
    /// `MAC_CONFIGURATION`.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct MacConfig: u32 {
        const RE = 1 << 0;
        const TE = 1 << 1;
        const DM = 1 << 13;
        const FES = 1 << 14;
        const PS = 1 << 15;
        const JE = 1 << 16;
        const JD = 1 << 17;
        const WD = 1 << 19;
        const ACS = 1 << 20;
        const CST = 1 << 21;
        const GPSLCE = 1 << 23;
    }
}

pub mod mmc {
    use super::MMC_BASE;

    pub const TX_PACKET_COUNT_GOOD_BAD: u32 = MMC_BASE + 0x018;
    pub const RX_PACKETS_COUNT_GOOD_BAD: u32 = MMC_BASE + 0x080;
}

pub mod mtl {
    use super::MTL_BASE;

    pub const TXQ0_OPERATION_MODE: u32 = MTL_BASE;
    pub const TXQ0_DEBUG: u32 = MTL_BASE + 0x008;
    pub const TXQ0_QUANTUM_WEIGHT: u32 = MTL_BASE + 0x018;
    pub const RXQ0_OPERATION_MODE: u32 = MTL_BASE + 0x030;
    pub const RXQ0_DEBUG: u32 = MTL_BASE + 0x038;

    pub const TXQ0_OPERATION_MODE_TQS_SHIFT: u32 = 16;
    pub const TXQ0_OPERATION_MODE_TQS_MASK: u32 = 0x1ff;
    pub const TXQ0_OPERATION_MODE_TXQEN_SHIFT: u32 = 2;
    pub const TXQ0_OPERATION_MODE_TXQEN_ENABLED: u32 = 2;
    pub const TXQ0_OPERATION_MODE_TSF: u32 = 1 << 1;
    pub const TXQ0_OPERATION_MODE_FTQ: u32 = 1 << 0;

    pub const TXQ0_DEBUG_TXQSTS: u32 = 1 << 4;
    pub const TXQ0_DEBUG_TRCSTS_SHIFT: u32 = 1;
    pub const TXQ0_DEBUG_TRCSTS_MASK: u32 = 0x3;
    /// Transmit read controller is reading the queue.
    pub const TXQ0_DEBUG_TRCSTS_READING: u32 = 1;

    pub const RXQ0_OPERATION_MODE_RQS_SHIFT: u32 = 20;
    pub const RXQ0_OPERATION_MODE_RQS_MASK: u32 = 0x3ff;
    pub const RXQ0_OPERATION_MODE_RFD_SHIFT: u32 = 14;
    pub const RXQ0_OPERATION_MODE_RFD_MASK: u32 = 0x3f;
    pub const RXQ0_OPERATION_MODE_RFA_SHIFT: u32 = 8;
    pub const RXQ0_OPERATION_MODE_RFA_MASK: u32 = 0x3f;
    pub const RXQ0_OPERATION_MODE_EHFC: u32 = 1 << 7;
    pub const RXQ0_OPERATION_MODE_RSF: u32 = 1 << 5;

    pub const RXQ0_DEBUG_PRXQ_SHIFT: u32 = 16;
    pub const RXQ0_DEBUG_PRXQ_MASK: u32 = 0x7fff;
    pub const RXQ0_DEBUG_RXQSTS_SHIFT: u32 = 4;
    pub const RXQ0_DEBUG_RXQSTS_MASK: u32 = 0x3;
}

pub mod dma {
    use super::DMA_BASE;

    pub const MODE: u32 = DMA_BASE;
    pub const SYSBUS_MODE: u32 = DMA_BASE + 0x004;
    pub const CH0_CONTROL: u32 = DMA_BASE + 0x100;
    pub const CH0_TX_CONTROL: u32 = DMA_BASE + 0x104;
    pub const CH0_RX_CONTROL: u32 = DMA_BASE + 0x108;
    pub const CH0_TXDESC_LIST_HADDRESS: u32 = DMA_BASE + 0x110;
    pub const CH0_TXDESC_LIST_ADDRESS: u32 = DMA_BASE + 0x114;
    pub const CH0_RXDESC_LIST_HADDRESS: u32 = DMA_BASE + 0x118;
    pub const CH0_RXDESC_LIST_ADDRESS: u32 = DMA_BASE + 0x11c;
    pub const CH0_TXDESC_TAIL_POINTER: u32 = DMA_BASE + 0x120;
    pub const CH0_RXDESC_TAIL_POINTER: u32 = DMA_BASE + 0x128;
    pub const CH0_TXDESC_RING_LENGTH: u32 = DMA_BASE + 0x12c;
    pub const CH0_RXDESC_RING_LENGTH: u32 = DMA_BASE + 0x130;

    pub const MODE_SWR: u32 = 1 << 0;

    pub const SYSBUS_MODE_RD_OSR_LMT_SHIFT: u32 = 16;
    pub const SYSBUS_MODE_EAME: u32 = 1 << 11;
    pub const SYSBUS_MODE_BLEN16: u32 = 1 << 3;
    pub const SYSBUS_MODE_BLEN8: u32 = 1 << 2;
    pub const SYSBUS_MODE_BLEN4: u32 = 1 << 1;

    pub const CH0_CONTROL_PBLX8: u32 = 1 << 16;

    pub const CH0_TX_CONTROL_TXPBL_SHIFT: u32 = 16;
    pub const CH0_TX_CONTROL_TXPBL_MASK: u32 = 0x3f;
    pub const CH0_TX_CONTROL_OSP: u32 = 1 << 4;
    pub const CH0_TX_CONTROL_ST: u32 = 1 << 0;

    pub const CH0_RX_CONTROL_RXPBL_SHIFT: u32 = 16;
    pub const CH0_RX_CONTROL_RXPBL_MASK: u32 = 0x3f;
    pub const CH0_RX_CONTROL_RBSZ_SHIFT: u32 = 1;
    pub const CH0_RX_CONTROL_RBSZ_MASK: u32 = 0x3fff;
    pub const CH0_RX_CONTROL_SR: u32 = 1 << 0;
}

/// Extracts the field at `shift` of width `mask`.
pub const fn field(reg: u32, shift: u32, mask: u32) -> u32 {
    (reg >> shift) & mask
}

/// Places `value` into the field at `shift` of width `mask`.
pub const fn place(value: u32, shift: u32, mask: u32) -> u32 {
    (value & mask) << shift
}
