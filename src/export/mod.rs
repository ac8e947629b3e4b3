//! Writing extracted attachments into the intake directory.

pub mod attachment;
