//! *SoC* module.

use std::fmt;

/// Base of the `SID_KEY[0-3]` registers on the first *sun4i*-style parts.
const SID_SUN4I: Option<u32> = Some(0x01C2_3800);
/// Base of the `SID_KEY[0-3]` registers on the *H3*/*A64* generation.
const SID_SUN8I: Option<u32> = Some(0x01C1_4200);
/// Base of the `SID_KEY[0-3]` registers on the *H6* and later generations.
const SID_SUN50I: Option<u32> = Some(0x0300_6200);

/// Table with all the known *SoCs*.
const SOC_INFO_TABLE: [SocInfo; 21] = [
    SocInfo::new(0x1623, "A10", SID_SUN4I),
    SocInfo::new(0x1625, "A10s/A13/R8", SID_SUN4I),
    SocInfo::new(0x1651, "A20", SID_SUN4I),
    SocInfo::new(0x1650, "A23", SID_SUN4I),
    // The A31 SID is only reachable through the PMIC bus.
    SocInfo::new(0x1633, "A31", None),
    SocInfo::new(0x1667, "A33/R16", SID_SUN4I),
    SocInfo::new(0x1689, "A64", SID_SUN8I),
    SocInfo::new(0x1639, "A80", Some(0x01C0_E200)),
    SocInfo::new(0x1673, "A83T", SID_SUN8I),
    SocInfo::new(0x1680, "H3/H2+", SID_SUN8I),
    SocInfo::new(0x1681, "V3s", SID_SUN4I),
    SocInfo::new(0x1718, "H5", SID_SUN8I),
    SocInfo::new(0x1701, "R40", Some(0x01C1_B200)),
    SocInfo::new(0x1719, "A63", SID_SUN50I),
    SocInfo::new(0x1728, "H6", SID_SUN50I),
    SocInfo::new(0x1817, "V831", SID_SUN50I),
    SocInfo::new(0x1823, "H616", SID_SUN50I),
    SocInfo::new(0x1851, "R329", SID_SUN50I),
    SocInfo::new(0x1855, "A133", SID_SUN50I),
    SocInfo::new(0x1859, "D1/F133/T113", SID_SUN50I),
    SocInfo::new(0x1886, "V853", SID_SUN50I),
];

/// *SoC* information structure.
#[derive(PartialEq, Eq, Clone, Copy)]
pub struct SocInfo {
    /// ID of the SoC.
    soc_id: u32,
    /// Human-readable SoC name string.
    name: &'static str,
    /// Base address for `SID_KEY[0-3]` registers.
    sid_addr: Option<u32>,
}

impl SocInfo {
    const fn new(soc_id: u32, name: &'static str, sid_addr: Option<u32>) -> SocInfo {
        SocInfo {
            soc_id,
            name,
            sid_addr,
        }
    }

    /// Gets the SoC information structure for the given ID, if known.
    pub fn from_id(soc_id: u32) -> Option<SocInfo> {
        for soc_info in &SOC_INFO_TABLE {
            if soc_info.soc_id == soc_id {
                return Some(*soc_info);
            }
        }
        None
    }

    /// Gets the SoC ID.
    pub fn soc_id(&self) -> u32 {
        self.soc_id
    }

    /// Gets the name of the SoC.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Gets the `SID` register address.
    pub fn sid_addr(&self) -> Option<u32> {
        self.sid_addr
    }
}

impl fmt::Debug for SocInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{{ SoC ID: {:#06x}, name: {}, SID registers address: {} }}",
            self.soc_id,
            self.name,
            if let Some(sid_addr) = self.sid_addr {
                format!("{:#010x}", sid_addr)
            } else {
                "None".to_owned()
            }
        )
    }
}

/// Gets the *SoC* name from the given ID, if known.
pub fn soc_name(soc_id: u32) -> Option<&'static str> {
    SocInfo::from_id(soc_id).map(|info| info.name)
}
