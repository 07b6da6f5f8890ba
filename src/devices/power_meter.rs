use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::utils::round_to;

/// Field name of the instantaneous total active power (kW).
pub const TOTAL_ACTIVE_POWER: &str = "total_active_power";
/// Field name of the cumulative imported active energy (kWh).
pub const TOTAL_POS_ACTIVE_ENERGY: &str = "total_pos_active_energy";

/// One named float occupying two consecutive holding registers, offset
/// relative to the start of the polled block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterField {
    pub name: &'static str,
    pub offset: usize,
}

const fn field(name: &'static str, offset: usize) -> RegisterField {
    RegisterField { name, offset }
}

/// Three-phase meter map for the block starting at holding register 66.
pub const POWER_METER_REGISTER_MAP: &[RegisterField] = &[
    field("avg_phase_voltage", 0),
    field("avg_line_voltage", 2),
    field("a_phase_current", 4),
    field("b_phase_current", 6),
    field("c_phase_current", 8),
    field(TOTAL_ACTIVE_POWER, 10),
    field("total_reactive_power", 12),
    field("total_apparent_power", 14),
    field("total_power_factor", 16),
    field("frequency", 18),
    field(TOTAL_POS_ACTIVE_ENERGY, 20),
    field("total_neg_active_energy", 22),
    field("total_pos_reactive_energy", 24),
    field("total_neg_reactive_energy", 26),
];

/// IEEE754 single from a register pair, high word first.
pub fn decode_f32_pair(high: u16, low: u16) -> Option<f32> {
    let value = f32::from_bits(((high as u32) << 16) | low as u32);
    value.is_finite().then_some(value)
}

/// Decodes the pair at `index`; `None` when the block is too short or the
/// bits are not a finite number.
pub fn decode_f32(registers: &[u16], index: usize) -> Option<f32> {
    let high = *registers.get(index)?;
    let low = *registers.get(index.checked_add(1)?)?;
    decode_f32_pair(high, low)
}

/// Decodes every mapped field, rounded to 3 decimals. A field that fails to
/// decode maps to `None` without affecting the others.
pub fn decode_registers(registers: &[u16], map: &[RegisterField]) -> BTreeMap<String, Option<f32>> {
    map.iter()
        .map(|field| {
            let value = decode_f32(registers, field.offset).map(|v| round_to(v as f64, 3) as f32);
            (field.name.to_string(), value)
        })
        .collect()
}

/// Latest decoded meter values keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PowerReading(BTreeMap<String, Option<f32>>);

impl PowerReading {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites every decoded field. Fields absent from `decoded` keep
    /// their previous values.
    pub fn apply(&mut self, decoded: BTreeMap<String, Option<f32>>) {
        self.0.extend(decoded);
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.0.get(name).copied().flatten()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl FromIterator<(String, Option<f32>)> for PowerReading {
    fn from_iter<I: IntoIterator<Item = (String, Option<f32>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
