//! Parameter-efficient fine-tuning adapters
//!
//! - [`RuleSet`]: per-layer rank/alpha by longest matching glob
//! - [`PresetTable`]: named layer selections
//! - [`AdapterModule`]: LoRA, DoRA and LoHa adapters around one frozen layer
//! - [`DummyAdapterModule`]: checkpoint entries with no live layer
//! - [`AdapterWrapper`]: every adapter of a base model, hooks and checkpoint reconciliation

pub mod adapter;
mod config;
mod glob;
mod io;
pub mod keys;
mod presets;
mod rules;
mod state_dict;
mod wrapper;

pub use adapter::{
    AdapterModule, AdapterVariant, DoraAdapter, DummyAdapterModule, LohaAdapter, LoraAdapter,
};
pub use config::{check_dropout, PeftConfig, PeftType};
pub use glob::GlobPattern;
pub use io::{load_state_dict_file, save_state_dict, AdapterMetadata};
pub use presets::{LayerPreset, PresetTable, ResolvedPreset};
pub use rules::{LayerOverride, OverrideMap, RuleSet};
pub use state_dict::{partition_prefixed, StateDict};
pub use wrapper::{AdapterEntry, AdapterWrapper, BuildReport, LoadReport, TransferReport};
