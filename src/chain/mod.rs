//! In-memory plugin chain
//!
//! Ordered records of the loaded plugins, in engine processing order.

pub mod model;
pub mod record;

pub use model::{is_permutation, Chain, ChainModel, Mutation};
pub use record::{
    gain_db_label, gain_to_db, validate_gain, PluginDescriptor, PluginInstanceRecord, MAX_GAIN,
    MIN_GAIN, UNITY_GAIN,
};
