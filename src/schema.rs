//! Schema building blocks shared by preprocessing and merging: the immutable
//! variable descriptor and the attribute-aggregation map entries.

use std::collections::BTreeMap;

use netcdf::types::NcVariableType;
use netcdf::AttributeValue;

/// Immutable description of a variable, used to compare variables between
/// granules. Two granules may only be merged when every shared variable path
/// carries an equal descriptor.
#[derive(Debug, Clone)]
pub struct VariableInfo {
    name: String,
    dim_order: Vec<String>,
    datatype: NcVariableType,
    group_path: String,
    fill_value: Option<AttributeValue>,
}

impl VariableInfo {
    pub fn new(
        name: String,
        dim_order: Vec<String>,
        datatype: NcVariableType,
        group_path: String,
        fill_value: Option<AttributeValue>,
    ) -> Self {
        Self {
            name,
            dim_order,
            datatype,
            group_path,
            fill_value,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dim_order(&self) -> &[String] {
        &self.dim_order
    }

    pub fn datatype(&self) -> &NcVariableType {
        &self.datatype
    }

    pub fn group_path(&self) -> &str {
        &self.group_path
    }

    pub fn fill_value(&self) -> Option<&AttributeValue> {
        self.fill_value.as_ref()
    }
}

impl PartialEq for VariableInfo {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.dim_order == other.dim_order
            && self.datatype == other.datatype
            && self.group_path == other.group_path
            && match (&self.fill_value, &other.fill_value) {
                (None, None) => true,
                (Some(a), Some(b)) => fill_eq(a, b),
                _ => false,
            }
    }
}

/// Fill-value comparison. Unlike attribute comparison, two NaN fills are
/// considered equal, scalars and elementwise for array-valued fills.
pub fn fill_eq(a: &AttributeValue, b: &AttributeValue) -> bool {
    match (a, b) {
        (AttributeValue::Float(x), AttributeValue::Float(y)) => {
            x == y || (x.is_nan() && y.is_nan())
        }
        (AttributeValue::Double(x), AttributeValue::Double(y)) => {
            x == y || (x.is_nan() && y.is_nan())
        }
        (AttributeValue::Floats(xs), AttributeValue::Floats(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .zip(ys)
                    .all(|(x, y)| x == y || (x.is_nan() && y.is_nan()))
        }
        (AttributeValue::Doubles(xs), AttributeValue::Doubles(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .zip(ys)
                    .all(|(x, y)| x == y || (x.is_nan() && y.is_nan()))
        }
        _ => a == b,
    }
}

/// Attribute comparison used during aggregation: type-strict and elementwise,
/// a scalar never equals a one-element array and NaN never equals NaN.
pub fn attr_eq(a: &AttributeValue, b: &AttributeValue) -> bool {
    a == b
}

/// State of an aggregated attribute. An attribute seen with two differing
/// values anywhere across the inputs degrades to `Inconsistent` and is
/// dropped before the output is finalized.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrEntry {
    Consistent(AttributeValue),
    Inconsistent,
}

pub type AttrMap = BTreeMap<String, AttrEntry>;

/// Folds one observed attribute value into the aggregation map. The first
/// sighting wins; later sightings must compare equal or the entry degrades.
pub fn note_attr(map: &mut AttrMap, name: &str, value: AttributeValue) {
    match map.get(name) {
        None => {
            map.insert(name.to_string(), AttrEntry::Consistent(value));
        }
        Some(AttrEntry::Consistent(existing)) => {
            if !attr_eq(existing, &value) {
                map.insert(name.to_string(), AttrEntry::Inconsistent);
            }
        }
        Some(AttrEntry::Inconsistent) => {}
    }
}

/// Merges a whole aggregation map produced from one granule (or one worker)
/// into the combined map, applying the same first-wins/degrade rule.
pub fn merge_attrs(merged: &mut AttrMap, subset: &AttrMap) {
    for (name, entry) in subset {
        match entry {
            AttrEntry::Consistent(value) => note_attr(merged, name, value.clone()),
            AttrEntry::Inconsistent => {
                merged.insert(name.clone(), AttrEntry::Inconsistent);
            }
        }
    }
}
