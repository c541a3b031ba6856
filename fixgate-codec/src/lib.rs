/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! # Fixgate Codec
//!
//! FIX wire-format support for the fixgate gateway engine.
//!
//! This crate provides:
//! - **Encoder**: tag=value message construction with automatic
//!   BeginString/BodyLength/CheckSum handling
//! - **Framing**: reassembly of inbound byte streams into whole FIX messages
//! - **Checksum**: tag 10 calculation and formatting

pub mod checksum;
pub mod encoder;
pub mod framing;

pub use checksum::{calculate_checksum, format_checksum, parse_checksum};
pub use encoder::{Encoder, SOH};
pub use framing::{FixFramer, FramingError};
