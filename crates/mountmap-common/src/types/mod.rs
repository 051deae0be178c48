pub mod endian;
pub mod number;

pub use endian::{BigEndian, Endian, Endianness, LittleEndian, NativeEndian};
pub use number::{U16, U32, U64};
