//! The SETTINGS table, RFC 9113 §6.5.2. Two independent copies are kept per
//! connection: one for what this endpoint has advertised (`local`, effective
//! once ACKed) and one for what the peer has advertised (`remote`, effective
//! immediately on receipt). Grounded on the teacher's `SettingsParameter`
//! (`types.rs`) and `enum_map` usage for settings-keyed maps.

use crate::error::H2Error;
use crate::types::{ErrorType, SettingsParameter};
use enum_map::EnumMap;

pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4096;
pub const DEFAULT_ENABLE_PUSH: u32 = 1;
pub const DEFAULT_MAX_CONCURRENT_STREAMS: u32 = u32::MAX;
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65_535;
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;
pub const DEFAULT_MAX_HEADER_LIST_SIZE: u32 = u32::MAX;

const MAX_FRAME_SIZE_FLOOR: u32 = 16_384;
const MAX_FRAME_SIZE_CEIL: u32 = 16_777_215;
const U31_MAX: u32 = u32::MAX >> 1;

/// A single SETTINGS table: one value per [`SettingsParameter`].
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    values: EnumMap<SettingsParameter, u32>,
}

impl Settings {
    pub fn defaults() -> Self {
        let mut values = EnumMap::default();
        values[SettingsParameter::HeaderTableSize] = DEFAULT_HEADER_TABLE_SIZE;
        values[SettingsParameter::EnablePush] = DEFAULT_ENABLE_PUSH;
        values[SettingsParameter::MaxConcurrentStreams] = DEFAULT_MAX_CONCURRENT_STREAMS;
        values[SettingsParameter::InitialWindowSize] = DEFAULT_INITIAL_WINDOW_SIZE;
        values[SettingsParameter::MaxFrameSize] = DEFAULT_MAX_FRAME_SIZE;
        values[SettingsParameter::MaxHeaderListSize] = DEFAULT_MAX_HEADER_LIST_SIZE;
        Self { values }
    }

    pub fn get(&self, param: SettingsParameter) -> u32 {
        self.values[param]
    }

    pub fn header_table_size(&self) -> u32 {
        self.get(SettingsParameter::HeaderTableSize)
    }

    pub fn enable_push(&self) -> bool {
        self.get(SettingsParameter::EnablePush) != 0
    }

    pub fn max_concurrent_streams(&self) -> u32 {
        self.get(SettingsParameter::MaxConcurrentStreams)
    }

    pub fn initial_window_size(&self) -> u32 {
        self.get(SettingsParameter::InitialWindowSize)
    }

    pub fn max_frame_size(&self) -> u32 {
        self.get(SettingsParameter::MaxFrameSize)
    }

    pub fn max_header_list_size(&self) -> u32 {
        self.get(SettingsParameter::MaxHeaderListSize)
    }

    /// Applies one (identifier, value) pair from a received SETTINGS frame.
    /// Unknown identifiers are accepted and ignored per RFC 9113 §6.5.2.
    /// Returns the identifier that changed, if any, so callers (e.g. the
    /// flow controller) can react to an `INITIAL_WINDOW_SIZE` change.
    pub fn apply(&mut self, id: u16, value: u32) -> Result<Option<SettingsParameter>, H2Error> {
        let Some(param) = SettingsParameter::ALL.iter().copied().find(|p| *p as u16 == id) else {
            return Ok(None);
        };
        validate(param, value)?;
        self.values[param] = value;
        Ok(Some(param))
    }

    pub fn set(&mut self, param: SettingsParameter, value: u32) -> Result<(), H2Error> {
        validate(param, value)?;
        self.values[param] = value;
        Ok(())
    }

    /// The wire form of every non-default-at-construction-time parameter this
    /// endpoint wants to advertise, in `SettingsParameter::ALL` order.
    pub fn to_wire_params(&self) -> Vec<(u16, u32)> {
        SettingsParameter::ALL
            .iter()
            .map(|&p| (p as u16, self.values[p]))
            .collect()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::defaults()
    }
}

fn validate(param: SettingsParameter, value: u32) -> Result<(), H2Error> {
    match param {
        SettingsParameter::EnablePush if value > 1 => Err(H2Error::connection(
            ErrorType::ProtocolError,
            "ENABLE_PUSH must be 0 or 1",
        )),
        SettingsParameter::InitialWindowSize if value > U31_MAX => Err(H2Error::connection(
            ErrorType::FlowControlError,
            "INITIAL_WINDOW_SIZE exceeds 2^31-1",
        )),
        SettingsParameter::MaxFrameSize if !(MAX_FRAME_SIZE_FLOOR..=MAX_FRAME_SIZE_CEIL).contains(&value) => {
            Err(H2Error::connection(
                ErrorType::ProtocolError,
                format!("MAX_FRAME_SIZE {value} out of [{MAX_FRAME_SIZE_FLOOR}, {MAX_FRAME_SIZE_CEIL}]"),
            ))
        }
        SettingsParameter::MaxConcurrentStreams if value > U31_MAX => Err(H2Error::connection(
            ErrorType::ProtocolError,
            "MAX_CONCURRENT_STREAMS exceeds 2^31-1",
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_rfc_initial_values() {
        let settings = Settings::defaults();
        assert_eq!(settings.header_table_size(), 4096);
        assert!(settings.enable_push());
        assert_eq!(settings.initial_window_size(), 65_535);
        assert_eq!(settings.max_frame_size(), 16_384);
    }

    #[test]
    fn apply_unknown_identifier_is_ignored() {
        let mut settings = Settings::defaults();
        assert_eq!(settings.apply(0xFF, 1).unwrap(), None);
    }

    #[test]
    fn enable_push_out_of_range_is_rejected() {
        let mut settings = Settings::defaults();
        assert!(settings.apply(SettingsParameter::EnablePush as u16, 2).is_err());
    }

    #[test]
    fn initial_window_size_over_u31_is_flow_control_error() {
        let mut settings = Settings::defaults();
        let err = settings
            .apply(SettingsParameter::InitialWindowSize as u16, 1 << 31)
            .unwrap_err();
        assert_eq!(err.code(), ErrorType::FlowControlError);
    }

    #[test]
    fn max_frame_size_below_floor_is_rejected() {
        let mut settings = Settings::defaults();
        assert!(settings.apply(SettingsParameter::MaxFrameSize as u16, 100).is_err());
    }

    #[test]
    fn apply_reports_the_changed_parameter() {
        let mut settings = Settings::defaults();
        let changed = settings
            .apply(SettingsParameter::InitialWindowSize as u16, 1000)
            .unwrap();
        assert_eq!(changed, Some(SettingsParameter::InitialWindowSize));
        assert_eq!(settings.initial_window_size(), 1000);
    }
}
