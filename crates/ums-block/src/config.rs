use crate::{BlockFlags, Result, UmsError};

/// Controller-level settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UmsConfig {
    /// Upper bound on live transactions allocated by the async bridge.
    pub max_outstanding_txns: usize,
    /// Thread name for the worker spawned by [`crate::Ums::start`].
    pub worker_name: String,
}

impl UmsConfig {
    pub const DEFAULT_MAX_OUTSTANDING_TXNS: usize = 256;

    pub fn validate(&self) -> Result<()> {
        if self.max_outstanding_txns == 0 {
            return Err(UmsError::InvalidConfig(
                "max_outstanding_txns must be non-zero",
            ));
        }
        if self.worker_name.is_empty() {
            return Err(UmsError::InvalidConfig("worker_name must not be empty"));
        }
        Ok(())
    }
}

impl Default for UmsConfig {
    fn default() -> Self {
        Self {
            max_outstanding_txns: Self::DEFAULT_MAX_OUTSTANDING_TXNS,
            worker_name: "ums-worker".to_string(),
        }
    }
}

/// Geometry of one logical unit, as reported by READ CAPACITY during discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LunConfig {
    pub block_size: u32,
    pub total_blocks: u64,
    pub flags: BlockFlags,
}

impl LunConfig {
    pub fn new(block_size: u32, total_blocks: u64) -> Self {
        Self {
            block_size,
            total_blocks,
            flags: BlockFlags::empty(),
        }
    }

    pub fn with_flags(mut self, flags: BlockFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.block_size.is_power_of_two() {
            return Err(UmsError::InvalidConfig(
                "block_size must be a non-zero power of two",
            ));
        }
        if self
            .total_blocks
            .checked_mul(u64::from(self.block_size))
            .is_none()
        {
            return Err(UmsError::InvalidConfig("device size overflows u64"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        UmsConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_bad_values() {
        let config = UmsConfig {
            max_outstanding_txns: 0,
            ..UmsConfig::default()
        };
        assert!(matches!(config.validate(), Err(UmsError::InvalidConfig(_))));

        assert!(LunConfig::new(0, 8).validate().is_err());
        assert!(LunConfig::new(520, 8).validate().is_err());
        assert!(LunConfig::new(4096, u64::MAX).validate().is_err());
        LunConfig::new(512, 2048).validate().unwrap();
    }
}
