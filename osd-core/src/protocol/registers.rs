//! Register map shared by the host and the modules.

/// Module type code.
pub const MOD_TYPE: u16 = 0x0000;
/// Module version.
pub const MOD_VERSION: u16 = 0x0001;
/// Control/status. Bit 0 enables trace streaming.
pub const MOD_CS: u16 = 0x0002;

pub const CS_TRACE_ENABLE: u64 = 1 << 0;

// System control module
pub const SCM_NUM_MOD: u16 = 0x0200;
pub const SCM_SYSRST: u16 = 0x0203;

pub const SYSRST_SYSTEM: u64 = 1 << 0;
pub const SYSRST_HALT: u64 = 1 << 1;

// Memory access module
pub const MAM_REGION_COUNT: u16 = 0x0200;
pub const MAM_DATA_WIDTH: u16 = 0x0201;

/// First region register. Base and size registers of each region follow in pairs.
pub const MAM_REGION_BASE: u16 = 0x0280;
/// Regions the register map can describe.
pub const MAM_MAX_REGIONS: u16 = (u16::MAX - MAM_REGION_BASE) / 2 + 1;

/// Register holding the base address of region `n`, if the map reaches it.
pub fn mam_region_base(n: u16) -> Option<u16> {
    n.checked_mul(2)?.checked_add(MAM_REGION_BASE)
}

pub fn mam_region_size(n: u16) -> Option<u16> {
    mam_region_base(n)?.checked_add(1)
}

// Core trace module
pub const CTM_CORE: u16 = 0x0200;

/// Module type codes reported in [`MOD_TYPE`].
pub mod types {
    pub const SCM: u64 = 0x01;
    pub const DEM_UART: u64 = 0x02;
    pub const MAM: u64 = 0x03;
    pub const STM: u64 = 0x04;
    pub const CTM: u64 = 0x05;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_registers_interleave() {
        assert_eq!(mam_region_base(0), Some(0x0280));
        assert_eq!(mam_region_size(0), Some(0x0281));
        assert_eq!(mam_region_base(1), Some(0x0282));
        assert_eq!(mam_region_size(3), Some(0x0287));
    }

    #[test]
    fn test_region_registers_end_at_map_top() {
        assert_eq!(mam_region_size(MAM_MAX_REGIONS - 1), Some(u16::MAX));
        assert_eq!(mam_region_base(MAM_MAX_REGIONS), None);
        assert_eq!(mam_region_size(MAM_MAX_REGIONS), None);
        assert_eq!(mam_region_base(u16::MAX), None);
    }
}
