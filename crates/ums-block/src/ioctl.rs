//! Control opcodes understood by [`crate::DeviceOps::ioctl`].
//!
//! Opcodes are packed as `kind[23:20] | family[15:8] | number[7:0]`.

pub const IOCTL_KIND_DEFAULT: u32 = 0x0;

pub const IOCTL_FAMILY_DEVICE: u32 = 0x01;
pub const IOCTL_FAMILY_BLOCK: u32 = 0x13;

pub const fn ioctl(kind: u32, family: u32, number: u32) -> u32 {
    ((kind & 0xf) << 20) | ((family & 0xff) << 8) | (number & 0xff)
}

/// Flush barrier: returns once everything queued before it has completed.
pub const IOCTL_DEVICE_SYNC: u32 = ioctl(IOCTL_KIND_DEFAULT, IOCTL_FAMILY_DEVICE, 6);

/// Reply: [`crate::BlockInfo`] in its 24-byte wire layout.
pub const IOCTL_BLOCK_GET_INFO: u32 = ioctl(IOCTL_KIND_DEFAULT, IOCTL_FAMILY_BLOCK, 1);
