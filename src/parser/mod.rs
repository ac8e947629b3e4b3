//! Email parsing: header decoding, MIME walking, and `.eml` file reading.

pub mod eml;
pub mod header;
pub mod mime;
