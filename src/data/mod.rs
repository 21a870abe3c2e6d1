pub mod normalize;
pub mod sample;
pub mod value;

pub use normalize::{decode_stored, normalize, renormalize, ConversionError, ConvertedValue};
pub use sample::{InsertRow, Sample, StoredSample};
pub use value::{CompareKey, StorageType, Value, ValueType, FLOAT_EPSILON};
