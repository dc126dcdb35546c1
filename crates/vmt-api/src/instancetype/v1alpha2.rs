//! `v1alpha2`: same shape as `v1alpha1`, new storage version

pub use super::v1alpha1::{
    CpuInstancetype, CpuPreferences, InstancetypeSpec, MemoryInstancetype, PreferenceSpec,
    PreferredCpuTopology,
};
use super::{Object, TemplateOf};

pub type Instancetype = Object<InstancetypeSpec>;
pub type Preference = Object<PreferenceSpec>;
pub type Template = TemplateOf<InstancetypeSpec, PreferenceSpec>;
