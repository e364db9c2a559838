pub mod prepared;
pub mod utility;
