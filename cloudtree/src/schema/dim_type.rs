use std::fmt;

use crate::errors::{CloudError, CloudResult};

macro_rules! cast {
    ($value:expr, $ty:ty) => {
        match $value {
            Scalar::Signed(v) => v as $ty,
            Scalar::Unsigned(v) => v as $ty,
            Scalar::Floating(v) => v as $ty,
        }
    };
}

/// Numeric storage type of one point dimension.
///
/// # Purpose
/// Describes how a dimension's value is laid out in a raw point row. Every
/// type is fixed-width and little-endian.
///
/// # Naming
/// Types are named the way index metadata describes them: a base name
/// (`"signed"`, `"unsigned"` or `"floating"`) plus a byte size.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum DimType {
    Signed8,
    Signed16,
    Signed32,
    Signed64,
    Unsigned8,
    Unsigned16,
    Unsigned32,
    Unsigned64,
    Float,
    Double,
}

impl DimType {
    /// Resolves a type from its base name and byte size.
    pub fn from_parts(base: &str, size: usize) -> CloudResult<DimType> {
        let ty = match (base, size) {
            ("signed", 1) => DimType::Signed8,
            ("signed", 2) => DimType::Signed16,
            ("signed", 4) => DimType::Signed32,
            ("signed", 8) => DimType::Signed64,
            ("unsigned", 1) => DimType::Unsigned8,
            ("unsigned", 2) => DimType::Unsigned16,
            ("unsigned", 4) => DimType::Unsigned32,
            ("unsigned", 8) => DimType::Unsigned64,
            ("floating", 4) => DimType::Float,
            ("floating", 8) => DimType::Double,
            _ => {
                return Err(CloudError::InvalidSchema(format!(
                    "Invalid type specification: {} of size {}",
                    base, size
                )))
            }
        };
        Ok(ty)
    }

    pub fn size(self) -> usize {
        match self {
            DimType::Signed8 | DimType::Unsigned8 => 1,
            DimType::Signed16 | DimType::Unsigned16 => 2,
            DimType::Signed32 | DimType::Unsigned32 | DimType::Float => 4,
            DimType::Signed64 | DimType::Unsigned64 | DimType::Double => 8,
        }
    }

    pub fn base_name(self) -> &'static str {
        match self {
            DimType::Signed8 | DimType::Signed16 | DimType::Signed32 | DimType::Signed64 => {
                "signed"
            }
            DimType::Unsigned8
            | DimType::Unsigned16
            | DimType::Unsigned32
            | DimType::Unsigned64 => "unsigned",
            DimType::Float | DimType::Double => "floating",
        }
    }

    /// Decodes a value of this type from the start of `bytes`.
    ///
    /// `bytes` must hold at least [`DimType::size`] bytes.
    pub fn read(self, bytes: &[u8]) -> Scalar {
        match self {
            DimType::Signed8 => Scalar::Signed(i8::from_le_bytes([bytes[0]]) as i64),
            DimType::Signed16 => Scalar::Signed(i16::from_le_bytes(take(bytes)) as i64),
            DimType::Signed32 => Scalar::Signed(i32::from_le_bytes(take(bytes)) as i64),
            DimType::Signed64 => Scalar::Signed(i64::from_le_bytes(take(bytes))),
            DimType::Unsigned8 => Scalar::Unsigned(bytes[0] as u64),
            DimType::Unsigned16 => Scalar::Unsigned(u16::from_le_bytes(take(bytes)) as u64),
            DimType::Unsigned32 => Scalar::Unsigned(u32::from_le_bytes(take(bytes)) as u64),
            DimType::Unsigned64 => Scalar::Unsigned(u64::from_le_bytes(take(bytes))),
            DimType::Float => Scalar::Floating(f32::from_le_bytes(take(bytes)) as f64),
            DimType::Double => Scalar::Floating(f64::from_le_bytes(take(bytes))),
        }
    }

    /// Encodes `value` as this type into the start of `out`, converting with
    /// plain numeric casts. Out-of-range values saturate or wrap exactly as
    /// `as` does.
    pub fn write(self, value: Scalar, out: &mut [u8]) {
        match self {
            DimType::Signed8 => out[..1].copy_from_slice(&cast!(value, i8).to_le_bytes()),
            DimType::Signed16 => out[..2].copy_from_slice(&cast!(value, i16).to_le_bytes()),
            DimType::Signed32 => out[..4].copy_from_slice(&cast!(value, i32).to_le_bytes()),
            DimType::Signed64 => out[..8].copy_from_slice(&cast!(value, i64).to_le_bytes()),
            DimType::Unsigned8 => out[0] = cast!(value, u8),
            DimType::Unsigned16 => out[..2].copy_from_slice(&cast!(value, u16).to_le_bytes()),
            DimType::Unsigned32 => out[..4].copy_from_slice(&cast!(value, u32).to_le_bytes()),
            DimType::Unsigned64 => out[..8].copy_from_slice(&cast!(value, u64).to_le_bytes()),
            DimType::Float => out[..4].copy_from_slice(&cast!(value, f32).to_le_bytes()),
            DimType::Double => out[..8].copy_from_slice(&cast!(value, f64).to_le_bytes()),
        }
    }
}

fn take<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut buf = [0u8; N];
    buf.copy_from_slice(&bytes[..N]);
    buf
}

impl fmt::Display for DimType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.base_name(), self.size() * 8)
    }
}

/// A decoded dimension value, kept in the widest type of its family so that
/// conversions only happen once, at write time.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Scalar {
    Signed(i64),
    Unsigned(u64),
    Floating(f64),
}

impl Scalar {
    pub fn as_f64(self) -> f64 {
        match self {
            Scalar::Signed(v) => v as f64,
            Scalar::Unsigned(v) => v as f64,
            Scalar::Floating(v) => v,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            Scalar::Signed(v) => v,
            Scalar::Unsigned(v) => v as i64,
            Scalar::Floating(v) => v as i64,
        }
    }

    pub fn as_u64(self) -> u64 {
        match self {
            Scalar::Signed(v) => v as u64,
            Scalar::Unsigned(v) => v,
            Scalar::Floating(v) => v as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_parts() {
        assert_eq!(DimType::from_parts("floating", 8).unwrap(), DimType::Double);
        assert_eq!(DimType::from_parts("unsigned", 2).unwrap(), DimType::Unsigned16);
        assert_eq!(DimType::from_parts("signed", 1).unwrap(), DimType::Signed8);
        assert!(DimType::from_parts("floating", 2).is_err());
        assert!(DimType::from_parts("complex", 8).is_err());
    }

    #[test]
    fn test_read_write_each_type() {
        let cases = [
            (DimType::Signed8, Scalar::Signed(-5)),
            (DimType::Signed16, Scalar::Signed(-300)),
            (DimType::Signed32, Scalar::Signed(-70_000)),
            (DimType::Signed64, Scalar::Signed(-5_000_000_000)),
            (DimType::Unsigned8, Scalar::Unsigned(200)),
            (DimType::Unsigned16, Scalar::Unsigned(60_000)),
            (DimType::Unsigned32, Scalar::Unsigned(4_000_000_000)),
            (DimType::Unsigned64, Scalar::Unsigned(u64::MAX)),
            (DimType::Float, Scalar::Floating(1.5)),
            (DimType::Double, Scalar::Floating(-2.25)),
        ];

        for (ty, value) in cases {
            let mut buf = vec![0u8; ty.size()];
            ty.write(value, &mut buf);
            assert_eq!(ty.read(&buf), value, "type {}", ty);
        }
    }

    #[test]
    fn test_conversion_uses_casts() {
        let mut buf = [0u8; 2];
        DimType::Unsigned16.write(Scalar::Floating(12.9), &mut buf);
        assert_eq!(DimType::Unsigned16.read(&buf), Scalar::Unsigned(12));

        let mut buf = [0u8; 1];
        DimType::Unsigned8.write(Scalar::Floating(300.0), &mut buf);
        assert_eq!(DimType::Unsigned8.read(&buf), Scalar::Unsigned(255));

        let mut buf = [0u8; 4];
        DimType::Float.write(Scalar::Unsigned(7), &mut buf);
        assert_eq!(DimType::Float.read(&buf), Scalar::Floating(7.0));
    }

    #[test]
    fn test_display() {
        assert_eq!(DimType::Double.to_string(), "floating64");
        assert_eq!(DimType::Unsigned8.to_string(), "unsigned8");
    }
}
