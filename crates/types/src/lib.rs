pub mod datatype;
pub mod geo;
pub mod temporal;

pub use datatype::DataType;
