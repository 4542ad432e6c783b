use serde::{Deserialize, Serialize};

use crate::engine::{InstanceId, StateToken};
use crate::error::SessionError;

pub const MIN_GAIN: f32 = 0.0;
pub const MAX_GAIN: f32 = 2.0;
pub const UNITY_GAIN: f32 = 1.0;

/// A plugin file as offered by the plugin browser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub path: String,
    pub name: String,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub version: String,
}

impl PluginDescriptor {
    pub fn new(path: &str, name: &str) -> Self {
        Self {
            path: path.to_string(),
            name: name.to_string(),
            vendor: String::new(),
            version: String::new(),
        }
    }
}

/// One live plugin in the chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInstanceRecord {
    pub instance_id: InstanceId,
    pub path: String,
    pub name: String,
    pub vendor: String,
    pub version: String,
    pub enabled: bool,
    pub muted: bool,
    pub gain: f32,
    pub has_editor: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub state: Option<StateToken>,
}

impl PluginInstanceRecord {
    /// Fresh record right after a load, with default settings.
    pub fn loaded(instance_id: InstanceId, descriptor: &PluginDescriptor, has_editor: bool) -> Self {
        Self {
            instance_id,
            path: descriptor.path.clone(),
            name: descriptor.name.clone(),
            vendor: descriptor.vendor.clone(),
            version: descriptor.version.clone(),
            enabled: true,
            muted: false,
            gain: UNITY_GAIN,
            has_editor,
            state: None,
        }
    }

    pub fn descriptor(&self) -> PluginDescriptor {
        PluginDescriptor {
            path: self.path.clone(),
            name: self.name.clone(),
            vendor: self.vendor.clone(),
            version: self.version.clone(),
        }
    }

    pub fn gain_db_label(&self) -> String {
        gain_db_label(self.gain)
    }
}

/// Reject gains outside `[0, 2]` (and NaN) before they reach the engine.
pub fn validate_gain(gain: f32) -> Result<f32, SessionError> {
    if gain.is_finite() && (MIN_GAIN..=MAX_GAIN).contains(&gain) {
        Ok(gain)
    } else {
        Err(SessionError::GainOutOfRange(gain))
    }
}

/// Linear gain to dB. `None` for silence, so `-inf` never leaves this function.
pub fn gain_to_db(gain: f32) -> Option<f32> {
    if gain <= 0.0 {
        None
    } else {
        Some(20.0 * gain.log10())
    }
}

/// Display string for a gain, e.g. `"+6.0 dB"` or `"-∞ dB"`.
pub fn gain_db_label(gain: f32) -> String {
    match gain_to_db(gain) {
        Some(db) if db.abs() < 0.05 => "0.0 dB".to_string(),
        Some(db) => format!("{:+.1} dB", db),
        None => "-∞ dB".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gain_bounds() {
        assert!(validate_gain(0.0).is_ok());
        assert!(validate_gain(2.0).is_ok());
        assert!(validate_gain(0.5).is_ok());
        assert!(matches!(validate_gain(2.01), Err(SessionError::GainOutOfRange(_))));
        assert!(validate_gain(-0.1).is_err());
        assert!(validate_gain(f32::NAN).is_err());
        assert!(validate_gain(f32::INFINITY).is_err());
    }

    #[test]
    fn test_silence_has_no_db_value() {
        assert_eq!(gain_to_db(0.0), None);
        assert_eq!(gain_db_label(0.0), "-∞ dB");
    }

    #[test]
    fn test_db_labels() {
        assert_eq!(gain_db_label(1.0), "0.0 dB");
        assert_eq!(gain_db_label(2.0), "+6.0 dB");
        assert_eq!(gain_db_label(0.5), "-6.0 dB");
        let db = gain_to_db(2.0).unwrap();
        assert!((db - 6.0206).abs() < 1e-3);
    }

    #[test]
    fn test_loaded_record_defaults() {
        let desc = PluginDescriptor::new("p1.vst3", "Reverb");
        let rec = PluginInstanceRecord::loaded(InstanceId::from("x"), &desc, false);
        assert!(rec.enabled);
        assert!(!rec.muted);
        assert_eq!(rec.gain, 1.0);
        assert!(rec.state.is_none());
        assert_eq!(rec.descriptor(), desc);
    }
}
