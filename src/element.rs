//! Element specifications: the typed planes every raster cell carries.

use crate::error::{GvrsError, GvrsResult};

/// Maximum length, in bytes, of an element name.
pub const MAX_ELEMENT_NAME_LEN: usize = 32;

/// The four element data types GVRS supports (`spec.md` §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Int32,
    Int16,
    Float32,
    /// Fixed-point float stored as an integer: `stored = round(v*scale + offset)`.
    IntCodedFloat32,
}

impl DataType {
    /// The on-disk tag byte for this type, used in the file header.
    #[must_use]
    pub fn tag(self) -> u8 {
        match self {
            DataType::Int32 => 0,
            DataType::Int16 => 1,
            DataType::Float32 => 2,
            DataType::IntCodedFloat32 => 3,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> GvrsResult<Self> {
        match tag {
            0 => Ok(DataType::Int32),
            1 => Ok(DataType::Int16),
            2 => Ok(DataType::Float32),
            3 => Ok(DataType::IntCodedFloat32),
            other => Err(GvrsError::UnsupportedFormat(format!(
                "unknown element data type tag {other}"
            ))),
        }
    }

    /// Width in bytes of one stored value of this type.
    #[must_use]
    pub fn width(self) -> usize {
        match self {
            DataType::Int16 => 2,
            DataType::Int32 | DataType::Float32 | DataType::IntCodedFloat32 => 4,
        }
    }
}

/// The declared value range, fill value, and (for `IntCodedFloat32`) the
/// scale/offset of one element, along with its descriptive metadata
/// (`spec.md` §3 "Element").
#[derive(Debug, Clone)]
pub struct ElementSpec {
    name: String,
    data_type: DataType,
    min_value: f64,
    max_value: f64,
    fill_value: f64,
    scale: f64,
    offset: f64,
    description: String,
    label: String,
    units: String,
}

impl ElementSpec {
    /// Creates a spec for an `Int32` element.
    pub fn int32(name: impl Into<String>, min: i32, max: i32, fill: i32) -> GvrsResult<Self> {
        Self::new(name, DataType::Int32, f64::from(min), f64::from(max), f64::from(fill), 1.0, 0.0)
    }

    /// Creates a spec for an `Int16` element.
    pub fn int16(name: impl Into<String>, min: i16, max: i16, fill: i16) -> GvrsResult<Self> {
        Self::new(name, DataType::Int16, f64::from(min), f64::from(max), f64::from(fill), 1.0, 0.0)
    }

    /// Creates a spec for a `Float32` element. Use `f32::NAN` as `fill` to
    /// allow `NaN` writes.
    pub fn float32(name: impl Into<String>, min: f32, max: f32, fill: f32) -> GvrsResult<Self> {
        Self::new(name, DataType::Float32, f64::from(min), f64::from(max), f64::from(fill), 1.0, 0.0)
    }

    /// Creates a spec for an `IntCodedFloat32` element: values are stored as
    /// `round(v*scale + offset)` and recovered as `(stored - offset) / scale`.
    pub fn int_coded_float32(
        name: impl Into<String>,
        min: f32,
        max: f32,
        fill: f32,
        scale: f64,
        offset: f64,
    ) -> GvrsResult<Self> {
        Self::new(
            name,
            DataType::IntCodedFloat32,
            f64::from(min),
            f64::from(max),
            f64::from(fill),
            scale,
            offset,
        )
    }

    fn new(
        name: impl Into<String>,
        data_type: DataType,
        min_value: f64,
        max_value: f64,
        fill_value: f64,
        scale: f64,
        offset: f64,
    ) -> GvrsResult<Self> {
        let name = name.into();
        validate_element_name(&name)?;
        if data_type == DataType::IntCodedFloat32 && scale == 0.0 {
            return Err(GvrsError::InvalidSpec(
                "IntCodedFloat32 scale must be non-zero".into(),
            ));
        }
        Ok(Self {
            name,
            data_type,
            min_value,
            max_value,
            fill_value,
            scale,
            offset,
            description: String::new(),
            label: String::new(),
            units: String::new(),
        })
    }

    /// Attaches a free-form description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Attaches a short display label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Attaches a units string.
    #[must_use]
    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = units.into();
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    #[must_use]
    pub fn min_value(&self) -> f64 {
        self.min_value
    }

    #[must_use]
    pub fn max_value(&self) -> f64 {
        self.max_value
    }

    #[must_use]
    pub fn fill_value(&self) -> f64 {
        self.fill_value
    }

    #[must_use]
    pub fn scale(&self) -> f64 {
        self.scale
    }

    #[must_use]
    pub fn offset(&self) -> f64 {
        self.offset
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn units(&self) -> &str {
        &self.units
    }

    /// Encodes a floating-point value to the stored integer form for
    /// `IntCodedFloat32`; identity width-preserving cast for other types.
    #[must_use]
    pub fn encode_int_coded(&self, value: f64) -> i32 {
        (value * self.scale + self.offset).round() as i32
    }

    /// Decodes a stored integer back to its floating-point form for
    /// `IntCodedFloat32`.
    #[must_use]
    pub fn decode_int_coded(&self, stored: i32) -> f64 {
        (f64::from(stored) - self.offset) / self.scale
    }
}

/// Validates an element name per `spec.md` §3: ASCII, first char a letter,
/// remaining chars letters/digits/underscore, length ≤ 32.
pub(crate) fn validate_element_name(name: &str) -> GvrsResult<()> {
    if name.is_empty() || name.len() > MAX_ELEMENT_NAME_LEN {
        return Err(GvrsError::InvalidSpec(format!(
            "element name '{name}' must be 1-{MAX_ELEMENT_NAME_LEN} characters"
        )));
    }
    if !name.is_ascii() {
        return Err(GvrsError::InvalidSpec(format!(
            "element name '{name}' must be ASCII"
        )));
    }
    let mut chars = name.chars();
    let first = chars.next().expect("non-empty checked above");
    if !first.is_ascii_alphabetic() {
        return Err(GvrsError::InvalidSpec(format!(
            "element name '{name}' must start with a letter"
        )));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(GvrsError::InvalidSpec(format!(
            "element name '{name}' must contain only letters, digits, or underscores"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_names() {
        assert!(validate_element_name("").is_err());
        assert!(validate_element_name("1abc").is_err());
        assert!(validate_element_name("has space").is_err());
        assert!(validate_element_name(&"a".repeat(33)).is_err());
        assert!(validate_element_name("valid_Name1").is_ok());
    }

    #[test]
    fn int_coded_float_round_trip_is_stable() {
        let spec = ElementSpec::int_coded_float32("elevation", -1000.0, 9000.0, -9999.0, 10.0, 0.0)
            .unwrap();
        for v in [0.0_f64, 123.4, -55.7, 8999.95] {
            let stored = spec.encode_int_coded(v);
            let back = spec.decode_int_coded(stored);
            assert!((back - (v * 10.0).round() / 10.0).abs() < 1e-9);
        }
    }

    #[test]
    fn rejects_zero_scale() {
        assert!(ElementSpec::int_coded_float32("x", 0.0, 1.0, 0.0, 0.0, 0.0).is_err());
    }
}
