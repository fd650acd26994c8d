use std::fmt::Display;

use serde::{Deserialize, Serialize};

use super::MetadataError;

/// The byte order prefix of a Zarr V2 data type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteOrder {
    /// `<`
    Little,
    /// `>`
    Big,
    /// `|`, not applicable (single byte or byte sequence types).
    NotApplicable,
    /// `=`
    Native,
}

/// A fixed-width Zarr V2 data type, e.g. `<u2`, `|b1`, `<M8[D]`, `|S10`.
///
/// The string is the NumPy array interface type string.
/// Only the element width matters for dechunking, so the data type is kept verbatim and parsed for its width.
/// Object (`|O`) and structured data types are not fixed-width and are rejected.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
#[serde(try_from = "String", into = "String")]
pub struct DataTypeV2 {
    typestr: String,
    byte_order: ByteOrder,
    kind: char,
    size: usize,
}

impl DataTypeV2 {
    /// Parse a NumPy type string.
    ///
    /// # Errors
    /// Returns [`MetadataError::InvalidDataType`] if `typestr` is malformed or not fixed-width.
    pub fn new(typestr: &str) -> Result<Self, MetadataError> {
        let invalid = |reason: &str| MetadataError::InvalidDataType(typestr.to_string(), reason.to_string());

        let mut chars = typestr.chars();
        let byte_order = match chars.next() {
            Some('<') => ByteOrder::Little,
            Some('>') => ByteOrder::Big,
            Some('|') => ByteOrder::NotApplicable,
            Some('=') => ByteOrder::Native,
            _ => return Err(invalid("must begin with <, >, | or =")),
        };
        let kind = chars.next().ok_or_else(|| invalid("missing kind"))?;
        if !matches!(kind, 'b' | 'i' | 'u' | 'f' | 'c' | 'm' | 'M' | 'S' | 'U' | 'V') {
            return Err(invalid("unsupported kind, must be fixed-width"));
        }

        let rest = chars.as_str();
        let (width, unit) = match rest.find('[') {
            Some(start) => (&rest[..start], Some(&rest[start..])),
            None => (rest, None),
        };
        if let Some(unit) = unit {
            if !matches!(kind, 'm' | 'M') {
                return Err(invalid("only datetime and timedelta types have a unit"));
            }
            if unit.len() < 3 || !unit.ends_with(']') {
                return Err(invalid("malformed unit"));
            }
        }
        let width: usize = width
            .parse()
            .map_err(|_| invalid("expected an integer byte width"))?;
        if width == 0 {
            return Err(invalid("byte width must be positive"));
        }

        // NumPy unicode strings are UCS4
        let size = if kind == 'U' {
            width
                .checked_mul(4)
                .ok_or_else(|| invalid("byte width exceeds usize::MAX"))?
        } else {
            width
        };

        Ok(Self {
            typestr: typestr.to_string(),
            byte_order,
            kind,
            size,
        })
    }

    /// The size of one element in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// The NumPy kind character.
    #[must_use]
    pub fn kind(&self) -> char {
        self.kind
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.typestr
    }
}

impl TryFrom<String> for DataTypeV2 {
    type Error = MetadataError;

    fn try_from(typestr: String) -> Result<Self, Self::Error> {
        Self::new(&typestr)
    }
}

impl From<DataTypeV2> for String {
    fn from(data_type: DataTypeV2) -> Self {
        data_type.typestr
    }
}

impl Display for DataTypeV2 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.typestr)
    }
}
