//! The ROM byte-source contract the symbolic CPU reads through.
//!
//! Address translation (SNES 24-bit address → linear file offset, LoROM vs.
//! HiROM mirroring, SRAM/WRAM carve-outs) is out of scope for this crate —
//! it belongs to a `gilgamesh-rom` collaborator this crate only depends on
//! through the [`Rom`] trait, the way `rustynes-cpu` depends on its `Bus`
//! abstraction rather than owning memory-map details itself.

/// A 24-bit SNES address: `(bank << 16) | offset`.
pub type Addr = usize;

/// Read-only access to ROM contents and the two built-in entry vectors.
/// Implementations decide address translation and RAM/ROM classification;
/// the symbolic CPU treats this trait as the only source of ground truth
/// about the bytes it's analyzing.
pub trait Rom {
    /// `true` if `addr` falls in RAM (or any other non-ROM, non-analyzable
    /// region) rather than in the ROM image itself.
    fn is_ram(&self, addr: Addr) -> bool;

    /// Reads a single byte at `addr`.
    fn read_byte(&self, addr: Addr) -> u8;

    /// Reads a little-endian 16-bit value at `addr`.
    fn read_word(&self, addr: Addr) -> u16;

    /// Reads a little-endian 24-bit value at `addr`.
    fn read_address(&self, addr: Addr) -> u32;

    /// The address execution starts at after a hardware reset.
    fn reset_vector(&self) -> Addr;

    /// The address execution jumps to on NMI.
    fn nmi_vector(&self) -> Addr;
}

#[cfg(test)]
pub(crate) mod test_support {
    //! A minimal in-memory LoROM image used only by this crate's own
    //! tests and by `tests/analysis_scenarios.rs`. A real ROM loader with
    //! HiROM/ExHiROM support and header sniffing lives in the separate
    //! (not-yet-implemented) `gilgamesh-rom` crate.

    use super::{Addr, Rom};

    /// A flat LoROM image: bank `$80` maps 1:1 onto file offset `$0000`
    /// within that bank (mode-20 mapping, `addr & 0x7FFF` within each
    /// 32K half-bank, banks `$80`-`$FF` mirroring `$00`-`$7F`).
    pub struct TestRom {
        data: Vec<u8>,
    }

    impl TestRom {
        /// Builds a 32K LoROM image whose bank-`$80` bytes (starting at
        /// `$8000`) are `program`, zero-padded to fill the bank, with the
        /// reset vector pointing at `$8000` and the NMI vector at `$8003`
        /// unless `program` overrides the vector bytes itself.
        pub fn with_program(program: &[u8]) -> Self {
            let mut data = vec![0u8; 0x8000];
            data[..program.len()].copy_from_slice(program);
            // Native mode vectors live at $FFEA (NMI) / $FFFC (reset)
            // within bank $00, which for a 32K image is file offset
            // $7FEA / $7FFC.
            data[0x7FFC] = 0x00;
            data[0x7FFD] = 0x80;
            data[0x7FEA] = 0x00;
            data[0x7FEA + 1] = 0x80;
            Self { data }
        }

        fn offset(&self, addr: Addr) -> usize {
            let bank = (addr >> 16) & 0xFF;
            let offset = addr & 0xFFFF;
            debug_assert!(bank >= 0x80 || bank < 0x01, "test ROM only maps bank $80");
            offset & 0x7FFF
        }
    }

    impl Rom for TestRom {
        fn is_ram(&self, addr: Addr) -> bool {
            let bank = (addr >> 16) & 0xFF;
            if bank == 0x7E || bank == 0x7F {
                return true;
            }
            (addr & 0xFFFF) < 0x8000
        }

        fn read_byte(&self, addr: Addr) -> u8 {
            let offset = self.offset(addr);
            self.data.get(offset).copied().unwrap_or(0)
        }

        fn read_word(&self, addr: Addr) -> u16 {
            u16::from(self.read_byte(addr)) | (u16::from(self.read_byte(addr + 1)) << 8)
        }

        fn read_address(&self, addr: Addr) -> u32 {
            u32::from(self.read_byte(addr))
                | (u32::from(self.read_byte(addr + 1)) << 8)
                | (u32::from(self.read_byte(addr + 2)) << 16)
        }

        fn reset_vector(&self) -> Addr {
            self.read_word(0x00_FFFC) as Addr
        }

        fn nmi_vector(&self) -> Addr {
            self.read_word(0x00_FFEA) as Addr
        }
    }

    #[test]
    fn reset_vector_points_at_program_start() {
        let rom = TestRom::with_program(&[0xEA]);
        assert_eq!(rom.reset_vector(), 0x8000);
    }

    #[test]
    fn read_address_is_little_endian_24_bit() {
        let rom = TestRom::with_program(&[0x12, 0x34, 0x56]);
        assert_eq!(rom.read_address(0x8000), 0x56_3412);
    }

    #[test]
    fn bank_00_offset_is_not_ram_when_mirrored_from_80() {
        let rom = TestRom::with_program(&[0xEA]);
        assert!(!rom.is_ram(0x80_8000));
    }
}
