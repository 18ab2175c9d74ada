// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Boot-time driver for the Synopsys DesignWare Ethernet QoS MAC.
//!
//! This drives a single DMA channel with one transmit and one receive ring
//! (see [`ring`]), in the simplest way that moves frames: every `send` waits
//! for its frame to leave, and `receive` hands out one frame at a time until
//! it is released. That's all a bootloader needs.
//!
//! Clocks, resets, pad calibration and the TX clock mux are SoC-specific and
//! come in through [`EqosPlatform`]; the PHY comes in through [`EthPhy`] and
//! is given our MDIO unit to talk over.

#![cfg_attr(not(test), no_std)]

pub mod mdio;
pub mod regs;
pub mod ring;

use core::fmt;

use bitflags::bitflags;
use drv_boot_io_api::{CacheControl, MacAddress, RegisterWindow, TransportError};
use embedded_hal::blocking::delay::DelayUs;
use ringbuf::*;

pub use mdio::{Mdio, MdioBus, SmiClause22Register};
use regs::{dma, field, mac, mmc, mtl, place, MacConfig};
use ring::{Commit, DmaPool, DmaRings, MAX_PACKET_SIZE};

/// Upper bound on waiting for a transmitted frame, in 1 µs polls.
pub const TX_POLLS: u32 = 1_000_000;

/// Upper bound on waiting for the MTL queues to drain on stop, in reads.
pub const DRAIN_POLLS: u32 = 1_000_000;

/// Settle time after releasing the resets.
const RESET_SETTLE_US: u32 = 10;

/// RX queue depth, as programmed into `RQS`, from which hardware flow control
/// is worth turning on (4 KiB).
const FLOW_CONTROL_MIN_RQS: u32 = 4096 / 256 - 1;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EthError {
    /// A collaborator's bus access failed.
    Transport(TransportError),
    /// A bounded poll ran out.
    Timeout,
    /// The DMA software reset never completed.
    ResetTimeout,
    InvalidArgument,
    /// The DMA pool is claimed by someone else.
    NoMemory,
    /// The PHY came up without a link.
    NoLink,
    /// The PHY driver failed.
    Phy,
    /// A platform clock/reset/pad operation failed.
    Platform,
    /// The engine isn't running.
    NotRunning,
}

impl From<TransportError> for EthError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl fmt::Display for EthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::Timeout => f.write_str("timed out"),
            Self::ResetTimeout => f.write_str("DMA reset timed out"),
            Self::InvalidArgument => f.write_str("invalid argument"),
            Self::NoMemory => f.write_str("DMA memory unavailable"),
            Self::NoLink => f.write_str("no link"),
            Self::Phy => f.write_str("PHY error"),
            Self::Platform => f.write_str("platform error"),
            Self::NotRunning => f.write_str("not running"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LinkSpeed {
    Mbps10,
    Mbps100,
    Mbps1000,
}

impl LinkSpeed {
    pub fn from_mbps(mbps: u32) -> Option<Self> {
        match mbps {
            10 => Some(Self::Mbps10),
            100 => Some(Self::Mbps100),
            1000 => Some(Self::Mbps1000),
            _ => None,
        }
    }
}

/// What the PHY negotiated.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PhyLink {
    pub up: bool,
    /// In Mbps, as the PHY reports it.
    pub speed: u32,
    pub full_duplex: bool,
}

/// SoC glue around the controller.
pub trait EqosPlatform {
    fn start_clocks(&mut self) -> Result<(), EthError>;
    fn stop_clocks(&mut self);
    fn start_resets(&mut self) -> Result<(), EthError>;
    fn stop_resets(&mut self);

    fn calibrate_pads(&mut self) -> Result<(), EthError> {
        Ok(())
    }

    fn disable_calibration(&mut self) -> Result<(), EthError> {
        Ok(())
    }

    fn set_tx_clock_speed(
        &mut self,
        _speed: LinkSpeed,
    ) -> Result<(), EthError> {
        Ok(())
    }

    /// Rate of the clock behind the MAC's 1 µs tick counter, in Hz.
    fn tick_clock_rate(&self) -> u32;
}

/// The PHY attached to the MAC.
pub trait EthPhy {
    /// Finds and configures the PHY. Called once, on the first start.
    fn connect(&mut self, bus: &mut dyn MdioBus) -> Result<(), EthError>;

    /// Brings the PHY up and reports the link.
    fn startup(&mut self, bus: &mut dyn MdioBus) -> Result<PhyLink, EthError>;

    fn shutdown(&mut self, bus: &mut dyn MdioBus);
}

/// Per-instance settings, normally from the board's device description.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EqosConfig {
    /// Value for `RXQ_CTRL0.RXQ0EN`.
    pub rxq_enable: u32,
    /// `MDIO_ADDRESS.CR`: MDC divider for the CSR clock.
    pub mdio_clock_range: u32,
    /// Settle time after issuing an MDIO operation, in µs.
    pub mdio_wait_us: u32,
    /// How long the DMA software reset may take, in ms.
    pub swr_wait_ms: u32,
    /// Overrides the TX FIFO size reported by `HW_FEATURE1`, in bytes.
    pub tx_fifo_size: Option<u32>,
    /// Overrides the RX FIFO size reported by `HW_FEATURE1`, in bytes.
    pub rx_fifo_size: Option<u32>,
    /// The register block is clocked even while the engine is stopped, so
    /// the MAC address may be written at any time.
    pub reg_access_always_ok: bool,
}

impl Default for EqosConfig {
    fn default() -> Self {
        Self {
            rxq_enable: mac::RXQ_CTRL0_RXQ0EN_ENABLED_DCB,
            mdio_clock_range: 0,
            mdio_wait_us: 10,
            swr_wait_ms: 50,
            tx_fifo_size: None,
            rx_fifo_size: None,
            reg_access_always_ok: false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EngineState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// A received frame, as handed out by [`Eqos::receive`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RxFrame {
    /// Ring slot the frame arrived in.
    pub index: usize,
    /// CPU address of the frame buffer; this is the handle given back to
    /// [`Eqos::release`].
    pub addr: usize,
    pub len: usize,
}

bitflags! {
    /// Start-sequence steps that need undoing if a later step fails.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    struct Undo: u8 {
        const CLOCKS = 1 << 0;
        const RESETS = 1 << 1;
        const PHY = 1 << 2;
    }
}

bitflags! {
    /// Capabilities reported in `HW_FEATURE0`.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct HwFeatures: u8 {
        /// RMON (MMC) counters.
        const MMC = 1 << 0;
        const GMII = 1 << 1;
        const MII = 1 << 2;
        const HALF_DUPLEX = 1 << 3;
    }
}

/// Automotive safety package, from `HW_FEATURE3.ASP`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SafetyMode {
    None,
    EccOnly,
    Nppe,
    Ppe,
}

impl SafetyMode {
    fn from_asp(asp: u32) -> Self {
        match asp & mac::HW_FEATURE3_ASP_MASK {
            0 => Self::None,
            1 => Self::EccOnly,
            2 => Self::Nppe,
            _ => Self::Ppe,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::EccOnly => "ECC_ONLY",
            Self::Nppe => "NPPE",
            Self::Ppe => "PPE",
        }
    }
}

/// Controller identification, for the console.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HwInfo {
    pub major: u8,
    pub minor: u8,
    pub user_version: u8,
    pub features: HwFeatures,
    /// Only reported from IP version 5.0 on.
    pub safety: Option<SafetyMode>,
}

impl fmt::Display for HwInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn state(on: bool) -> &'static str {
            if on {
                "enabled"
            } else {
                "disabled"
            }
        }

        writeln!(
            f,
            "IP version {:x}.{:x} ulevel {:x}",
            self.major, self.minor, self.user_version
        )?;
        writeln!(f, "features:")?;
        let rows = [
            ("RMON module        ", HwFeatures::MMC),
            ("1 Gbps support     ", HwFeatures::GMII),
            ("10/100 Mbps support", HwFeatures::MII),
            ("Half-duplex support", HwFeatures::HALF_DUPLEX),
        ];
        for (name, bit) in rows {
            writeln!(f, "  {name}: {}", state(self.features.contains(bit)))?;
        }
        if let Some(safety) = self.safety {
            writeln!(f, "  Auto safety support: {}", safety.name())?;
        }
        Ok(())
    }
}

/// MMC packet counters.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Counters {
    pub rx_packets: u32,
    pub tx_packets: u32,
}

impl fmt::Display for Counters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RX packets: {} TX packets: {}",
            self.rx_packets, self.tx_packets
        )
    }
}

/// `RFD`/`RFA` flow-control thresholds for an RX queue of `RQS` size.
pub fn flow_control_thresholds(rqs: u32) -> (u32, u32) {
    match rqs {
        15 => (0x3, 0x1),
        31 => (0x6, 0xa),
        63 => (0x6, 0x12),
        _ => (0x6, 0x1e),
    }
}

#[derive(Copy, Clone, PartialEq)]
enum Trace {
    None,
    Starting,
    ResetTimeout,
    NoLink,
    Link { speed: u32, full_duplex: bool },
    FifoSizes { tx: u32, rx: u32 },
    Started,
    StartFailed(EthError),
    TxSlotBusy(u8),
    TxTimeout(u8),
    RxFrame { index: u8, len: u16 },
    Released(u8),
    TxDrainTimeout,
    RxDrainTimeout,
    Stopped,
    HwAddrDeferred,
}

ringbuf!(Trace, 32, Trace::None);

fn mdio_bus<'a, R: RegisterWindow, D: DelayUs<u32>>(
    regs: &'a R,
    delay: &'a mut D,
    config: &EqosConfig,
) -> Mdio<'a, R, D> {
    Mdio {
        regs,
        delay,
        clock_range: config.mdio_clock_range,
        wait_us: config.mdio_wait_us,
    }
}

/// Driver instance for one controller.
pub struct Eqos<R, C, P, Y, D>
where
    R: RegisterWindow,
    C: CacheControl,
    P: EqosPlatform,
    Y: EthPhy,
    D: DelayUs<u32>,
{
    regs: R,
    cache: C,
    platform: P,
    phy: Y,
    delay: D,
    config: EqosConfig,
    pool: &'static DmaPool,
    rings: Option<DmaRings>,
    state: EngineState,
    /// Clocks are running and resets released.
    reg_access_ok: bool,
    phy_connected: bool,
    hw_address: MacAddress,
}

impl<R, C, P, Y, D> Eqos<R, C, P, Y, D>
where
    R: RegisterWindow,
    C: CacheControl,
    P: EqosPlatform,
    Y: EthPhy,
    D: DelayUs<u32>,
{
    pub fn new(
        regs: R,
        cache: C,
        platform: P,
        phy: Y,
        delay: D,
        pool: &'static DmaPool,
        config: EqosConfig,
    ) -> Self {
        Self {
            regs,
            cache,
            platform,
            phy,
            delay,
            config,
            pool,
            rings: None,
            state: EngineState::Stopped,
            reg_access_ok: false,
            phy_connected: false,
            hw_address: MacAddress::ZERO,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn hw_address(&self) -> MacAddress {
        self.hw_address
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn phy(&self) -> &Y {
        &self.phy
    }

    /// Our MDIO unit, for talking to the PHY directly.
    pub fn mdio(&mut self) -> Mdio<'_, R, D> {
        mdio_bus(&self.regs, &mut self.delay, &self.config)
    }

    pub fn mdio_read(
        &mut self,
        phy: u8,
        devad: Option<u8>,
        reg: u16,
    ) -> Result<u16, EthError> {
        self.mdio().mdio_read(phy, devad, reg)
    }

    pub fn mdio_write(
        &mut self,
        phy: u8,
        devad: Option<u8>,
        reg: u16,
        value: u16,
    ) -> Result<(), EthError> {
        self.mdio().mdio_write(phy, devad, reg, value)
    }

    fn registers_accessible(&self) -> bool {
        self.config.reg_access_always_ok || self.reg_access_ok
    }

    /// Records the station address, and programs it if the register block
    /// can be touched right now. Otherwise it is programmed on the next
    /// start.
    pub fn write_hw_address(&mut self, addr: MacAddress) {
        self.hw_address = addr;
        if !self.registers_accessible() {
            ringbuf_entry!(Trace::HwAddrDeferred);
            return;
        }
        self.program_hw_address();
    }

    fn program_hw_address(&self) {
        let m = self.hw_address.0;
        let high = (u32::from(m[5]) << 8) | u32::from(m[4]);
        let low = u32::from_le_bytes([m[0], m[1], m[2], m[3]]);
        self.regs.write32(mac::ADDRESS0_HIGH, high);
        self.regs.write32(mac::ADDRESS0_LOW, low);
    }

    /// Programs the MAC for the link the PHY negotiated. Needs the register
    /// block clocked.
    pub fn adjust_link(&mut self, link: &PhyLink) -> Result<(), EthError> {
        if !self.registers_accessible() {
            return Err(EthError::NotRunning);
        }
        let dm = MacConfig::DM.bits();
        if link.full_duplex {
            self.regs.set_bits32(mac::CONFIGURATION, dm);
        } else {
            self.regs.clear_bits32(mac::CONFIGURATION, dm);
            self.regs.set_bits32(
                mtl::TXQ0_OPERATION_MODE,
                mtl::TXQ0_OPERATION_MODE_FTQ,
            );
        }

        let speed =
            LinkSpeed::from_mbps(link.speed).ok_or(EthError::InvalidArgument)?;
        let ps = MacConfig::PS.bits();
        let fes = MacConfig::FES.bits();
        match speed {
            LinkSpeed::Mbps1000 => {
                self.regs.clear_bits32(mac::CONFIGURATION, ps | fes)
            }
            LinkSpeed::Mbps100 => {
                self.regs.set_bits32(mac::CONFIGURATION, ps | fes)
            }
            LinkSpeed::Mbps10 => {
                self.regs.modify32(mac::CONFIGURATION, fes, ps)
            }
        }

        match speed {
            LinkSpeed::Mbps10 => self.platform.disable_calibration()?,
            _ => self.platform.calibrate_pads()?,
        }
        self.platform.set_tx_clock_speed(speed)?;
        ringbuf_entry!(Trace::Link {
            speed: link.speed,
            full_duplex: link.full_duplex,
        });
        Ok(())
    }

    /// Brings the controller up: clocks, resets, PHY, MTL, MAC and DMA, in
    /// that order. On failure everything acquired so far is released again
    /// in reverse order and the engine is left stopped.
    pub fn start(&mut self) -> Result<(), EthError> {
        if self.state == EngineState::Running {
            return Ok(());
        }
        self.state = EngineState::Starting;
        ringbuf_entry!(Trace::Starting);

        let mut undo = Undo::empty();
        match self.bring_up(&mut undo) {
            Ok(()) => {
                self.state = EngineState::Running;
                ringbuf_entry!(Trace::Started);
                Ok(())
            }
            Err(e) => {
                ringbuf_entry!(Trace::StartFailed(e));
                self.unwind(undo);
                self.state = EngineState::Stopped;
                Err(e)
            }
        }
    }

    fn unwind(&mut self, undo: Undo) {
        if undo.contains(Undo::PHY) {
            let mut bus = mdio_bus(&self.regs, &mut self.delay, &self.config);
            self.phy.shutdown(&mut bus);
        }
        if undo.contains(Undo::RESETS) {
            self.reg_access_ok = false;
            self.platform.stop_resets();
        }
        if undo.contains(Undo::CLOCKS) {
            self.platform.stop_clocks();
        }
    }

    fn bring_up(&mut self, undo: &mut Undo) -> Result<(), EthError> {
        if self.rings.is_none() {
            self.rings = Some(self.pool.claim().ok_or(EthError::NoMemory)?);
        }

        self.platform.start_clocks()?;
        *undo |= Undo::CLOCKS;
        self.platform.start_resets()?;
        *undo |= Undo::RESETS;
        self.delay.delay_us(RESET_SETTLE_US);
        self.reg_access_ok = true;

        self.regs.set_bits32(dma::MODE, dma::MODE_SWR);
        self.wait_for_reset()?;

        self.platform.calibrate_pads()?;

        let ticks_per_us = self.platform.tick_clock_rate() / 1_000_000;
        self.regs
            .write32(mac::US_TIC_COUNTER, ticks_per_us.saturating_sub(1));

        let link = {
            let mut bus =
                mdio_bus(&self.regs, &mut self.delay, &self.config);
            if !self.phy_connected {
                self.phy.connect(&mut bus)?;
                self.phy_connected = true;
            }
            *undo |= Undo::PHY;
            self.phy.startup(&mut bus)?
        };
        if !link.up {
            ringbuf_entry!(Trace::NoLink);
            return Err(EthError::NoLink);
        }
        self.adjust_link(&link)?;

        let tqs = self.configure_mtl();
        self.configure_mac();
        self.configure_dma(tqs)
    }

    fn wait_for_reset(&mut self) -> Result<(), EthError> {
        for _ in 0..=self.config.swr_wait_ms {
            if self.regs.read32(dma::MODE) & dma::MODE_SWR == 0 {
                return Ok(());
            }
            self.delay.delay_us(1000);
        }
        ringbuf_entry!(Trace::ResetTimeout);
        Err(EthError::ResetTimeout)
    }

    /// Sets up the single TX and RX queue and returns the programmed `TQS`.
    fn configure_mtl(&self) -> u32 {
        self.regs.set_bits32(
            mtl::TXQ0_OPERATION_MODE,
            mtl::TXQ0_OPERATION_MODE_TSF
                | (mtl::TXQ0_OPERATION_MODE_TXQEN_ENABLED
                    << mtl::TXQ0_OPERATION_MODE_TXQEN_SHIFT),
        );
        self.regs.write32(mtl::TXQ0_QUANTUM_WEIGHT, 0x10);
        self.regs.set_bits32(
            mtl::RXQ0_OPERATION_MODE,
            mtl::RXQ0_OPERATION_MODE_RSF,
        );

        let feature1 = self.regs.read32(mac::HW_FEATURE1);
        let tx_fifo = self.config.tx_fifo_size.unwrap_or(
            128 << field(
                feature1,
                mac::HW_FEATURE1_TXFIFOSIZE_SHIFT,
                mac::HW_FEATURE1_TXFIFOSIZE_MASK,
            ),
        );
        let rx_fifo = self.config.rx_fifo_size.unwrap_or(
            128 << field(
                feature1,
                mac::HW_FEATURE1_RXFIFOSIZE_SHIFT,
                mac::HW_FEATURE1_RXFIFOSIZE_MASK,
            ),
        );
        ringbuf_entry!(Trace::FifoSizes {
            tx: tx_fifo,
            rx: rx_fifo
        });

        // Queue sizes are programmed in 256-byte blocks, minus one.
        let tqs = (tx_fifo / 256).saturating_sub(1);
        let rqs = (rx_fifo / 256).saturating_sub(1);
        self.regs.modify32(
            mtl::TXQ0_OPERATION_MODE,
            mtl::TXQ0_OPERATION_MODE_TQS_MASK
                << mtl::TXQ0_OPERATION_MODE_TQS_SHIFT,
            place(
                tqs,
                mtl::TXQ0_OPERATION_MODE_TQS_SHIFT,
                mtl::TXQ0_OPERATION_MODE_TQS_MASK,
            ),
        );
        self.regs.modify32(
            mtl::RXQ0_OPERATION_MODE,
            mtl::RXQ0_OPERATION_MODE_RQS_MASK
                << mtl::RXQ0_OPERATION_MODE_RQS_SHIFT,
            place(
                rqs,
                mtl::RXQ0_OPERATION_MODE_RQS_SHIFT,
                mtl::RXQ0_OPERATION_MODE_RQS_MASK,
            ),
        );

        if rqs >= FLOW_CONTROL_MIN_RQS {
            self.regs.set_bits32(
                mtl::RXQ0_OPERATION_MODE,
                mtl::RXQ0_OPERATION_MODE_EHFC,
            );
            let (rfd, rfa) = flow_control_thresholds(rqs);
            self.regs.modify32(
                mtl::RXQ0_OPERATION_MODE,
                (mtl::RXQ0_OPERATION_MODE_RFD_MASK
                    << mtl::RXQ0_OPERATION_MODE_RFD_SHIFT)
                    | (mtl::RXQ0_OPERATION_MODE_RFA_MASK
                        << mtl::RXQ0_OPERATION_MODE_RFA_SHIFT),
                place(
                    rfd,
                    mtl::RXQ0_OPERATION_MODE_RFD_SHIFT,
                    mtl::RXQ0_OPERATION_MODE_RFD_MASK,
                ) | place(
                    rfa,
                    mtl::RXQ0_OPERATION_MODE_RFA_SHIFT,
                    mtl::RXQ0_OPERATION_MODE_RFA_MASK,
                ),
            );
        }
        tqs
    }

    fn configure_mac(&self) {
        self.regs.modify32(
            mac::RXQ_CTRL0,
            mac::RXQ_CTRL0_RXQ0EN_MASK << mac::RXQ_CTRL0_RXQ0EN_SHIFT,
            place(
                self.config.rxq_enable,
                mac::RXQ_CTRL0_RXQ0EN_SHIFT,
                mac::RXQ_CTRL0_RXQ0EN_MASK,
            ),
        );

        // Maximum pause time; queue 0 gets all priorities in both
        // directions.
        self.regs.set_bits32(
            mac::Q0_TX_FLOW_CTRL,
            mac::Q0_TX_FLOW_CTRL_PT_MASK << mac::Q0_TX_FLOW_CTRL_PT_SHIFT,
        );
        self.regs.clear_bits32(
            mac::TXQ_PRTY_MAP0,
            mac::TXQ_PRTY_MAP0_PSTQ0_MASK << mac::TXQ_PRTY_MAP0_PSTQ0_SHIFT,
        );
        self.regs.clear_bits32(
            mac::RXQ_CTRL2,
            mac::RXQ_CTRL2_PSRQ0_MASK << mac::RXQ_CTRL2_PSRQ0_SHIFT,
        );
        self.regs
            .set_bits32(mac::Q0_TX_FLOW_CTRL, mac::Q0_TX_FLOW_CTRL_TFE);
        self.regs.set_bits32(mac::RX_FLOW_CTRL, mac::RX_FLOW_CTRL_RFE);

        self.regs.modify32(
            mac::CONFIGURATION,
            (MacConfig::GPSLCE | MacConfig::WD | MacConfig::JD | MacConfig::JE)
                .bits(),
            (MacConfig::CST | MacConfig::ACS).bits(),
        );

        self.program_hw_address();
    }

    fn configure_dma(&mut self, tqs: u32) -> Result<(), EthError> {
        self.regs
            .set_bits32(dma::CH0_TX_CONTROL, dma::CH0_TX_CONTROL_OSP);
        self.regs.modify32(
            dma::CH0_RX_CONTROL,
            dma::CH0_RX_CONTROL_RBSZ_MASK << dma::CH0_RX_CONTROL_RBSZ_SHIFT,
            place(
                MAX_PACKET_SIZE as u32,
                dma::CH0_RX_CONTROL_RBSZ_SHIFT,
                dma::CH0_RX_CONTROL_RBSZ_MASK,
            ),
        );
        self.regs.set_bits32(dma::CH0_CONTROL, dma::CH0_CONTROL_PBLX8);

        // The TX burst can't be larger than the TX FIFO.
        let tx_pbl = (tqs + 1).min(32);
        self.regs.modify32(
            dma::CH0_TX_CONTROL,
            dma::CH0_TX_CONTROL_TXPBL_MASK << dma::CH0_TX_CONTROL_TXPBL_SHIFT,
            place(
                tx_pbl,
                dma::CH0_TX_CONTROL_TXPBL_SHIFT,
                dma::CH0_TX_CONTROL_TXPBL_MASK,
            ),
        );
        self.regs.modify32(
            dma::CH0_RX_CONTROL,
            dma::CH0_RX_CONTROL_RXPBL_MASK << dma::CH0_RX_CONTROL_RXPBL_SHIFT,
            place(
                8,
                dma::CH0_RX_CONTROL_RXPBL_SHIFT,
                dma::CH0_RX_CONTROL_RXPBL_MASK,
            ),
        );

        self.regs.write32(
            dma::SYSBUS_MODE,
            (2 << dma::SYSBUS_MODE_RD_OSR_LMT_SHIFT)
                | dma::SYSBUS_MODE_EAME
                | dma::SYSBUS_MODE_BLEN16
                | dma::SYSBUS_MODE_BLEN8
                | dma::SYSBUS_MODE_BLEN4,
        );

        let rings = self.rings.as_mut().ok_or(EthError::NoMemory)?;
        rings.tx.reset(&self.cache, false);
        rings.rx.reset(&self.cache, true);

        self.regs.write32(dma::CH0_TXDESC_LIST_HADDRESS, 0);
        self.regs.write32(
            dma::CH0_TXDESC_LIST_ADDRESS,
            self.cache.bus_address(rings.tx.base_addr()),
        );
        self.regs.write32(
            dma::CH0_TXDESC_RING_LENGTH,
            rings.tx.len() as u32 - 1,
        );
        self.regs.write32(dma::CH0_RXDESC_LIST_HADDRESS, 0);
        self.regs.write32(
            dma::CH0_RXDESC_LIST_ADDRESS,
            self.cache.bus_address(rings.rx.base_addr()),
        );
        self.regs.write32(
            dma::CH0_RXDESC_RING_LENGTH,
            rings.rx.len() as u32 - 1,
        );

        self.regs.set_bits32(
            mac::CONFIGURATION,
            (MacConfig::TE | MacConfig::RE).bits(),
        );
        self.regs.set_bits32(dma::CH0_TX_CONTROL, dma::CH0_TX_CONTROL_ST);
        self.regs.set_bits32(dma::CH0_RX_CONTROL, dma::CH0_RX_CONTROL_SR);

        // Point the tail at the *last* descriptor: with tail == head the
        // hardware couldn't tell a full ring from an empty one.
        let last = rings.rx.len() - 1;
        self.regs.write32(
            dma::CH0_RXDESC_TAIL_POINTER,
            self.cache.bus_address(rings.rx.descriptor_addr(last)),
        );
        Ok(())
    }

    /// Takes the controller down. Draining the queues is best-effort; a
    /// queue that won't drain is noted and ignored. Does nothing unless
    /// running.
    pub fn stop(&mut self) {
        if self.state != EngineState::Running {
            return;
        }
        self.state = EngineState::Stopping;
        self.reg_access_ok = false;

        self.regs
            .clear_bits32(dma::CH0_TX_CONTROL, dma::CH0_TX_CONTROL_ST);
        let tx_drained = self.poll_register(mtl::TXQ0_DEBUG, |v| {
            let trcsts = field(
                v,
                mtl::TXQ0_DEBUG_TRCSTS_SHIFT,
                mtl::TXQ0_DEBUG_TRCSTS_MASK,
            );
            trcsts != mtl::TXQ0_DEBUG_TRCSTS_READING
                && v & mtl::TXQ0_DEBUG_TXQSTS == 0
        });
        if !tx_drained {
            ringbuf_entry!(Trace::TxDrainTimeout);
        }

        self.regs.clear_bits32(
            mac::CONFIGURATION,
            (MacConfig::TE | MacConfig::RE).bits(),
        );
        let rx_drained = self.poll_register(mtl::RXQ0_DEBUG, |v| {
            field(v, mtl::RXQ0_DEBUG_PRXQ_SHIFT, mtl::RXQ0_DEBUG_PRXQ_MASK)
                == 0
                && field(
                    v,
                    mtl::RXQ0_DEBUG_RXQSTS_SHIFT,
                    mtl::RXQ0_DEBUG_RXQSTS_MASK,
                ) == 0
        });
        if !rx_drained {
            ringbuf_entry!(Trace::RxDrainTimeout);
        }
        self.regs
            .clear_bits32(dma::CH0_RX_CONTROL, dma::CH0_RX_CONTROL_SR);

        let mut bus = mdio_bus(&self.regs, &mut self.delay, &self.config);
        self.phy.shutdown(&mut bus);
        self.platform.stop_resets();
        self.platform.stop_clocks();

        self.state = EngineState::Stopped;
        ringbuf_entry!(Trace::Stopped);
    }

    fn poll_register(&self, offset: u32, done: impl Fn(u32) -> bool) -> bool {
        (0..DRAIN_POLLS).any(|_| done(self.regs.read32(offset)))
    }

    fn require_running(&self) -> Result<(), EthError> {
        if self.state == EngineState::Running {
            Ok(())
        } else {
            Err(EthError::NotRunning)
        }
    }

    /// Transmits `frame` and waits for the hardware to finish with it.
    ///
    /// On `Timeout` the descriptor stays with the hardware and the ring has
    /// already moved on to the next slot; sending to a slot the hardware
    /// still holds waits for it first.
    pub fn send(&mut self, frame: &[u8]) -> Result<(), EthError> {
        if frame.len() > MAX_PACKET_SIZE {
            return Err(EthError::InvalidArgument);
        }
        self.require_running()?;
        let rings = self.rings.as_mut().ok_or(EthError::NotRunning)?;
        let cache = &self.cache;
        let slot = rings.tx.next();

        let mut polls = 0;
        while rings.tx.is_owned_by_hw(cache, slot) {
            if polls == TX_POLLS {
                ringbuf_entry!(Trace::TxSlotBusy(slot as u8));
                return Err(EthError::Timeout);
            }
            self.delay.delay_us(1);
            polls += 1;
        }

        let committed = rings.tx.with_next_buffer(cache, |d, buf| {
            let data = &mut buf.0[..frame.len()];
            data.copy_from_slice(frame);
            let addr = data.as_ptr() as usize;
            cache.flush(addr, frame.len());
            d.set_tx(cache.bus_address(addr), frame.len() as u32);
            Commit::Yes
        });
        if committed != Some(Commit::Yes) {
            return Err(EthError::Timeout);
        }

        self.regs.write32(
            dma::CH0_TXDESC_TAIL_POINTER,
            cache.bus_address(rings.tx.next_addr()),
        );

        for _ in 0..TX_POLLS {
            if !rings.tx.is_owned_by_hw(cache, slot) {
                return Ok(());
            }
            self.delay.delay_us(1);
        }
        ringbuf_entry!(Trace::TxTimeout(slot as u8));
        Err(EthError::Timeout)
    }

    /// Returns the oldest received frame, or `None` if nothing has arrived.
    ///
    /// The same frame is returned on every call until it is given back with
    /// [`Eqos::release`].
    pub fn receive(&mut self) -> Result<Option<RxFrame>, EthError> {
        self.require_running()?;
        let rings = self.rings.as_mut().ok_or(EthError::NotRunning)?;
        let cache = &self.cache;

        let mut index = rings.rx.next();
        if rings.rx.is_owned_by_hw(cache, index) {
            // The hardware occasionally completes one slot past where we
            // expect it; look one ahead before calling the ring empty.
            let ahead = rings.rx.successor(index);
            if rings.rx.is_owned_by_hw(cache, ahead) {
                return Ok(None);
            }
            rings.rx.advance();
            index = ahead;
        }

        let len = rings.rx.frame_len(index).min(MAX_PACKET_SIZE);
        let addr = rings.rx.buffer_addr(index);
        cache.invalidate(addr, len);
        ringbuf_entry!(Trace::RxFrame {
            index: index as u8,
            len: len as u16,
        });
        Ok(Some(RxFrame { index, addr, len }))
    }

    /// Contents of a frame returned by [`Eqos::receive`] and not yet
    /// released.
    pub fn frame_data(&self, frame: &RxFrame) -> Result<&[u8], EthError> {
        let rings = self.rings.as_ref().ok_or(EthError::NotRunning)?;
        let rx = &rings.rx;
        if frame.index != rx.next()
            || frame.addr != rx.buffer_addr(frame.index)
            || frame.len > MAX_PACKET_SIZE
            || rx.is_owned_by_hw(&self.cache, frame.index)
        {
            return Err(EthError::InvalidArgument);
        }
        // Safety: the descriptor is software-owned, and only `release`
        // (which needs `&mut self`) hands it back.
        let buf = unsafe { rx.buffer(frame.index) };
        Ok(&buf[..frame.len])
    }

    /// Gives the buffer of the frame last returned by [`Eqos::receive`]
    /// back to the hardware. `buffer` is that frame's `addr`; anything else
    /// is refused.
    pub fn release(&mut self, buffer: usize) -> Result<(), EthError> {
        self.require_running()?;
        let rings = self.rings.as_mut().ok_or(EthError::NotRunning)?;
        let index = rings.rx.next();
        if buffer != rings.rx.buffer_addr(index)
            || rings.rx.is_owned_by_hw(&self.cache, index)
        {
            return Err(EthError::InvalidArgument);
        }
        rings.rx.rearm(&self.cache, index);
        self.regs.write32(
            dma::CH0_RXDESC_TAIL_POINTER,
            self.cache.bus_address(rings.rx.descriptor_addr(index)),
        );
        rings.rx.advance();
        ringbuf_entry!(Trace::Released(index as u8));
        Ok(())
    }

    /// IP version and feature summary. Needs the register block clocked.
    pub fn hw_info(&self) -> Result<HwInfo, EthError> {
        if !self.registers_accessible() {
            return Err(EthError::NotRunning);
        }
        let version = self.regs.read32(mac::VERSION);
        let f0 = self.regs.read32(mac::HW_FEATURE0);
        let bit = |shift: u32| field(f0, shift, 1) != 0;

        let mut features = HwFeatures::empty();
        features.set(HwFeatures::MMC, bit(mac::HW_FEATURE0_MMCSEL_SHIFT));
        features.set(HwFeatures::GMII, bit(mac::HW_FEATURE0_GMIISEL_SHIFT));
        features.set(HwFeatures::MII, bit(mac::HW_FEATURE0_MIISEL_SHIFT));
        features
            .set(HwFeatures::HALF_DUPLEX, bit(mac::HW_FEATURE0_HDSEL_SHIFT));

        let safety = if version & 0xff >= mac::IP_VERSION_5_0 {
            let f3 = self.regs.read32(mac::HW_FEATURE3);
            Some(SafetyMode::from_asp(f3 >> mac::HW_FEATURE3_ASP_SHIFT))
        } else {
            None
        };

        Ok(HwInfo {
            major: field(version, 4, 0xf) as u8,
            minor: field(version, 0, 0xf) as u8,
            user_version: field(version, 8, 0xff) as u8,
            features,
            safety,
        })
    }

    /// Live packet counters. Needs the register block clocked.
    pub fn counters(&self) -> Result<Counters, EthError> {
        if !self.registers_accessible() {
            return Err(EthError::NotRunning);
        }
        Ok(Counters {
            rx_packets: self.regs.read32(mmc::RX_PACKETS_COUNT_GOOD_BAD),
            tx_packets: self.regs.read32(mmc::TX_PACKET_COUNT_GOOD_BAD),
        })
    }

    /// Stops the engine and gives its DMA memory back.
    pub fn remove(mut self) {
        self.stop();
        if let Some(rings) = self.rings.take() {
            rings.release();
        }
    }
}
