//! Payload stubs catalog.
//!
//! The FEL ROM can only write memory blocks and jump to addresses. Single word accesses to
//! arbitrary addresses are done by uploading a tiny stub for the target instruction set once, and
//! then running one of its two routines with the argument and the result passed through two
//! scratch words at the end of the stub:
//!
//! * read routine: loads the word at `*scratch` and stores it to `*(scratch + 4)`.
//! * write routine: stores `*(scratch + 4)` to the address at `*scratch`.
//!
//! All stubs are position independent, reach the scratch words PC-relative and return to the ROM
//! through the link register.

use std::fmt;
use std::str::FromStr;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{FelError, Result};

/// Instruction set a payload is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    /// 32-bit ARM, as run by the BROM of most sun4i to sun50i parts.
    Arm32,
    /// 64-bit ARM.
    Aarch64,
    /// T-Head E907 RISC-V core.
    Riscv32E907,
}

impl Architecture {
    /// Every architecture, in catalog order.
    pub const ALL: [Architecture; 3] = [
        Architecture::Arm32,
        Architecture::Aarch64,
        Architecture::Riscv32E907,
    ];

    /// Gets the canonical name.
    pub fn name(self) -> &'static str {
        match self {
            Architecture::Arm32 => "arm32",
            Architecture::Aarch64 => "aarch64",
            Architecture::Riscv32E907 => "riscv32_e907",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Architecture {
    type Err = FelError;

    fn from_str(s: &str) -> Result<Architecture> {
        match s.to_ascii_lowercase().as_str() {
            "arm" | "arm32" => Ok(Architecture::Arm32),
            "aarch64" | "arm64" => Ok(Architecture::Aarch64),
            "e907" | "riscv32_e907" | "riscv32-e907" => Ok(Architecture::Riscv32E907),
            _ => Err(FelError::UnsupportedArchitecture(s.to_owned())),
        }
    }
}

// Every routine first brings the caches and the branch predictor in line with the freshly
// written image, then does its single access.

// ARM32 stub, scratch words at 0x5c.
const ARM32_CODE: [u32; 25] = [
    // read:
    0xE3A0_0000, // mov r0, #0
    0xEE08_0F17, // mcr p15, 0, r0, c8, c7, 0   ; invalidate TLB
    0xEE07_0F15, // mcr p15, 0, r0, c7, c5, 0   ; invalidate I-cache
    0xEE07_0FD5, // mcr p15, 0, r0, c7, c5, 6   ; invalidate branch predictor
    0xEE07_0F9A, // mcr p15, 0, r0, c7, c10, 4  ; DSB
    0xEE07_0F95, // mcr p15, 0, r0, c7, c5, 4   ; ISB
    0xEAFF_FFFF, // b   .+4
    0xE59F_0038, // ldr r0, [pc, #0x38]         ; r0 = *scratch
    0xE28F_1038, // add r1, pc, #0x38           ; r1 = scratch + 4
    0xE590_2000, // ldr r2, [r0]
    0xE581_2000, // str r2, [r1]
    0xE12F_FF1E, // bx  lr
    // write:
    0xE3A0_0000, // mov r0, #0
    0xEE08_0F17, // mcr p15, 0, r0, c8, c7, 0
    0xEE07_0F15, // mcr p15, 0, r0, c7, c5, 0
    0xEE07_0FD5, // mcr p15, 0, r0, c7, c5, 6
    0xEE07_0F9A, // mcr p15, 0, r0, c7, c10, 4
    0xEE07_0F95, // mcr p15, 0, r0, c7, c5, 4
    0xEAFF_FFFF, // b   .+4
    0xE59F_0008, // ldr r0, [pc, #8]            ; r0 = *scratch
    0xE59F_1008, // ldr r1, [pc, #8]            ; r1 = *(scratch + 4)
    0xE580_1000, // str r1, [r0]
    0xE12F_FF1E, // bx  lr
    0x0000_0000, // scratch: address
    0x0000_0000, // scratch: value
];

// AArch64 stub, scratch words at 0x3c.
const AARCH64_CODE: [u32; 17] = [
    // read:
    0xD508_751F, // ic  iallu
    0xD503_3F9F, // dsb sy
    0xD503_3FDF, // isb
    0x1800_0180, // ldr w0, scratch
    0xB940_0001, // ldr w1, [x0]
    0x1000_0162, // adr x2, scratch + 4
    0xB900_0041, // str w1, [x2]
    0xD65F_03C0, // ret
    // write:
    0xD508_751F, // ic  iallu
    0xD503_3F9F, // dsb sy
    0xD503_3FDF, // isb
    0x1800_0080, // ldr w0, scratch
    0x1800_0081, // ldr w1, scratch + 4
    0xB900_0001, // str w1, [x0]
    0xD65F_03C0, // ret
    0x0000_0000, // scratch: address
    0x0000_0000, // scratch: value
];

// E907 stub, scratch words at 0x48.
const RISCV32_E907_CODE: [u32; 20] = [
    // read:
    0x0040_0337, // lui   t1, 0x400
    0x7C03_2073, // csrs  mxstatus, t1          ; enable the T-Head extensions
    0x0000_100F, // fence.i
    0x0040_006F, // j     .+4
    0x0000_0297, // auipc t0, 0
    0x0382_A303, // lw    t1, 0x38(t0)
    0x0003_2303, // lw    t1, 0(t1)
    0x0262_AE23, // sw    t1, 0x3c(t0)
    0x0000_8067, // ret
    // write:
    0x0040_0337, // lui   t1, 0x400
    0x7C03_2073, // csrs  mxstatus, t1
    0x0000_100F, // fence.i
    0x0040_006F, // j     .+4
    0x0000_0297, // auipc t0, 0
    0x0142_A303, // lw    t1, 0x14(t0)
    0x0182_A383, // lw    t2, 0x18(t0)
    0x0073_2023, // sw    t2, 0(t1)
    0x0000_8067, // ret
    0x0000_0000, // scratch: address
    0x0000_0000, // scratch: value
];

/// Table with all the catalogued payloads.
static CATALOG: [ArchDescriptor; 3] = [
    ArchDescriptor {
        arch: Architecture::Arm32,
        name: "ARM32",
        code: &ARM32_CODE,
        read_entry: 0x00,
        write_entry: 0x30,
        scratch_offset: 0x5C,
        aligned_access: true,
    },
    ArchDescriptor {
        arch: Architecture::Aarch64,
        name: "AARCH64",
        code: &AARCH64_CODE,
        read_entry: 0x00,
        write_entry: 0x20,
        scratch_offset: 0x3C,
        aligned_access: true,
    },
    ArchDescriptor {
        arch: Architecture::Riscv32E907,
        name: "RISCV32_E907",
        code: &RISCV32_E907_CODE,
        read_entry: 0x00,
        write_entry: 0x24,
        scratch_offset: 0x48,
        aligned_access: true,
    },
];

/// Payload stub and its layout for one architecture.
///
/// All offsets are relative to the start of the image. Where the image lands is decided by the
/// device, see [`ArchDescriptor::at`].
#[derive(Debug, PartialEq, Eq)]
pub struct ArchDescriptor {
    arch: Architecture,
    name: &'static str,
    code: &'static [u32],
    read_entry: u32,
    write_entry: u32,
    scratch_offset: u32,
    aligned_access: bool,
}

impl ArchDescriptor {
    /// Gets the architecture.
    pub fn arch(&self) -> Architecture {
        self.arch
    }

    /// Gets the descriptor name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Gets the stub image, as uploaded to the device.
    pub fn image(&self) -> Vec<u8> {
        let mut image = vec![0u8; self.image_len()];
        LittleEndian::write_u32_into(self.code, &mut image);
        image
    }

    /// Gets the stub image length in bytes.
    pub fn image_len(&self) -> usize {
        self.code.len() * 4
    }

    /// Gets the offset of the read routine within the image.
    pub fn read_entry(&self) -> u32 {
        self.read_entry
    }

    /// Gets the offset of the write routine within the image.
    pub fn write_entry(&self) -> u32 {
        self.write_entry
    }

    /// Gets the offset of the scratch address slot within the image.
    ///
    /// The value slot follows it.
    pub fn scratch_offset(&self) -> u32 {
        self.scratch_offset
    }

    /// Gets the offset of the scratch value slot within the image.
    pub fn value_offset(&self) -> u32 {
        self.scratch_offset + 4
    }

    /// Whether the stub faults on addresses not aligned to 4 bytes.
    pub fn aligned_access(&self) -> bool {
        self.aligned_access
    }

    /// Places the image at the given base address.
    pub fn at(&'static self, base: u32) -> ResidentPayload {
        ResidentPayload {
            descriptor: self,
            base,
        }
    }
}

/// A catalogued payload placed at a concrete address on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResidentPayload {
    descriptor: &'static ArchDescriptor,
    base: u32,
}

impl ResidentPayload {
    /// Gets the catalogued payload.
    pub fn descriptor(&self) -> &'static ArchDescriptor {
        self.descriptor
    }

    /// Gets the architecture.
    pub fn arch(&self) -> Architecture {
        self.descriptor.arch
    }

    /// Gets the address the image is loaded at.
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Gets the absolute address of the read routine.
    pub fn read_addr(&self) -> u32 {
        self.base.wrapping_add(self.descriptor.read_entry)
    }

    /// Gets the absolute address of the write routine.
    pub fn write_addr(&self) -> u32 {
        self.base.wrapping_add(self.descriptor.write_entry)
    }

    /// Gets the absolute address of the scratch address slot.
    pub fn scratch_addr(&self) -> u32 {
        self.base.wrapping_add(self.descriptor.scratch_offset())
    }

    /// Gets the absolute address of the scratch value slot.
    pub fn value_addr(&self) -> u32 {
        self.base.wrapping_add(self.descriptor.value_offset())
    }
}

/// Looks up the payload catalogued for the given architecture.
pub fn lookup(arch: Architecture) -> Result<&'static ArchDescriptor> {
    for descriptor in CATALOG.iter() {
        if descriptor.arch == arch {
            return Ok(descriptor);
        }
    }
    Err(FelError::UnsupportedArchitecture(arch.to_string()))
}

/// Looks up the payload for an architecture given by name.
pub fn lookup_name(name: &str) -> Result<&'static ArchDescriptor> {
    lookup(name.parse()?)
}

/// Gets the whole catalog.
pub fn catalog() -> &'static [ArchDescriptor] {
    &CATALOG
}

#[cfg(test)]
mod tests {
    use super::{catalog, lookup, lookup_name, Architecture};
    use crate::error::FelError;
    use byteorder::{ByteOrder, LittleEndian};

    #[test]
    fn it_parses_architectures() {
        assert_eq!("arm".parse::<Architecture>(), Ok(Architecture::Arm32));
        assert_eq!("AArch64".parse::<Architecture>(), Ok(Architecture::Aarch64));
        assert_eq!("e907".parse::<Architecture>(), Ok(Architecture::Riscv32E907));
        assert_eq!(
            "mips".parse::<Architecture>(),
            Err(FelError::UnsupportedArchitecture("mips".to_owned()))
        );
        for arch in &Architecture::ALL {
            assert_eq!(arch.to_string().parse::<Architecture>(), Ok(*arch));
        }
    }

    #[test]
    fn it_every_architecture_is_catalogued() {
        for arch in &Architecture::ALL {
            assert_eq!(lookup(*arch).unwrap().arch(), *arch);
        }
        assert_eq!(catalog().len(), Architecture::ALL.len());
        assert_eq!(lookup_name("riscv32_e907").unwrap().name(), "RISCV32_E907");
        assert!(lookup_name("x86").is_err());
    }

    #[test]
    fn it_layout_is_consistent() {
        for descriptor in catalog() {
            let image = descriptor.image();
            let len = image.len() as u32;
            assert_eq!(len as usize, descriptor.image_len());
            assert_eq!(descriptor.read_entry() % 4, 0);
            assert_eq!(descriptor.write_entry() % 4, 0);
            assert!(descriptor.read_entry() < descriptor.write_entry());
            assert!(descriptor.write_entry() < descriptor.scratch_offset());
            // Both scratch words are the last two words of the image and start zeroed.
            let scratch = descriptor.scratch_offset() as usize;
            assert_eq!(scratch + 8, len as usize);
            assert_eq!(&image[scratch..], &[0u8; 8]);
            assert_eq!(descriptor.value_offset(), descriptor.scratch_offset() + 4);
        }
    }

    #[test]
    fn it_places_payload_at_base() {
        let arm = lookup(Architecture::Arm32).unwrap();
        let resident = arm.at(0x7E00);
        assert_eq!(resident.base(), 0x7E00);
        assert_eq!(resident.arch(), Architecture::Arm32);
        assert_eq!(resident.read_addr(), 0x7E00);
        assert_eq!(resident.write_addr(), 0x7E30);
        assert_eq!(resident.scratch_addr(), 0x7E5C);
        assert_eq!(resident.value_addr(), 0x7E60);
        assert_eq!(arm.at(0x0002_0000).scratch_addr(), 0x0002_005C);
    }

    #[test]
    fn it_arm32_image_encoding() {
        let image = lookup(Architecture::Arm32).unwrap().image();
        // Little endian words, `mov r0, #0` first.
        assert_eq!(&image[..4], &[0x00, 0x00, 0xA0, 0xE3]);
        assert_eq!(LittleEndian::read_u32(&image[0x4C..0x50]), 0xE59F_0008);
    }

    #[test]
    fn it_routines_flush_before_access() {
        // Both routines of a stub start with the same maintenance sequence.
        for descriptor in catalog() {
            let image = descriptor.image();
            let read = descriptor.read_entry() as usize;
            let write = descriptor.write_entry() as usize;
            let len = match descriptor.arch() {
                Architecture::Arm32 => 28,
                Architecture::Aarch64 => 12,
                Architecture::Riscv32E907 => 16,
            };
            assert_eq!(&image[read..read + len], &image[write..write + len]);
        }

        let arm = lookup(Architecture::Arm32).unwrap().image();
        // `b .+4` lands on the next instruction.
        assert_eq!(LittleEndian::read_u32(&arm[0x18..0x1C]), 0xEAFF_FFFF);

        let e907 = lookup(Architecture::Riscv32E907).unwrap().image();
        // `csrs mxstatus, t1` before `fence.i`.
        assert_eq!(LittleEndian::read_u32(&e907[0x04..0x08]) >> 20, 0x7C0);
        assert_eq!(LittleEndian::read_u32(&e907[0x08..0x0C]), 0x0000_100F);
    }

    #[test]
    fn it_pc_relative_offsets_reach_scratch() {
        // `ldr rX, [pc, #imm]` reads from (instruction address + 8 + imm) on ARM32.
        let arm = lookup(Architecture::Arm32).unwrap();
        let image = arm.image();
        for &(at, slot) in &[(0x1Cu32, 0x5Cu32), (0x20, 0x60), (0x4C, 0x5C), (0x50, 0x60)] {
            let word = LittleEndian::read_u32(&image[at as usize..at as usize + 4]);
            assert_eq!(at + 8 + (word & 0xFFF), slot);
        }

        // `ldr wX, label` is PC-relative with a word offset in bits 5..24 on AArch64.
        let aarch64 = lookup(Architecture::Aarch64).unwrap();
        let image = aarch64.image();
        for &(at, slot) in &[(0x0Cu32, 0x3Cu32), (0x2C, 0x3C), (0x30, 0x40)] {
            let word = LittleEndian::read_u32(&image[at as usize..at as usize + 4]);
            assert_eq!(word >> 24, 0x18);
            assert_eq!(at + ((word >> 5) & 0x7FFFF) * 4, slot);
        }
        // `adr x2, label` splits its byte offset in bits 29..31 and 5..24.
        let adr = LittleEndian::read_u32(&image[0x14..0x18]);
        assert_eq!(0x14 + (((adr >> 5) & 0x7FFFF) << 2 | (adr >> 29) & 0x3), 0x40);

        // `lw tX, imm(t0)` after `auipc t0, 0` on the E907.
        let e907 = lookup(Architecture::Riscv32E907).unwrap();
        let image = e907.image();
        let loads = [(0x14u32, 0x10u32, 0x48u32), (0x38, 0x34, 0x48), (0x3C, 0x34, 0x4C)];
        for &(at, auipc, slot) in &loads {
            let word = LittleEndian::read_u32(&image[at as usize..at as usize + 4]);
            assert_eq!(word & 0x7F, 0x03);
            assert_eq!(auipc + (word >> 20), slot);
        }
        // `sw t1, imm(t0)` splits its offset in bits 25..32 and 7..12.
        let store = LittleEndian::read_u32(&image[0x1C..0x20]);
        assert_eq!(store & 0x7F, 0x23);
        assert_eq!(0x10 + ((store >> 25) << 5 | (store >> 7) & 0x1F), 0x4C);
    }
}
