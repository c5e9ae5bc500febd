use crate::{Config, ConfigOption, Result};

/// NCI listen mode A parameters.
pub const LA_BIT_FRAME_SDD: u8 = 0x30;
pub const LA_SEL_INFO: u8 = 0x32;
pub const LA_NFCID1: u8 = 0x33;
pub const LI_A_HIST_BY: u8 = 0x59;

/// Anticollision data a reader sees while the device emulates a card.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnticolParams {
    pub atqa: u8,
    pub sak: u8,
    pub hist: Vec<u8>,
    pub uid: Vec<u8>,
}

impl AnticolParams {
    /// Listen mode options carrying these values. An empty `uid` or `hist`
    /// leaves the controller default in place.
    pub fn to_config(&self) -> Result<Config> {
        let mut config = Config::new();
        config.add(ConfigOption::new(LA_BIT_FRAME_SDD, [self.atqa])?);
        config.add(ConfigOption::new(LA_SEL_INFO, [self.sak])?);
        if !self.uid.is_empty() {
            config.add(ConfigOption::new(LA_NFCID1, self.uid.as_slice())?);
        }
        if !self.hist.is_empty() {
            config.add(ConfigOption::new(LI_A_HIST_BY, self.hist.as_slice())?);
        }
        Ok(config)
    }
}
