#![allow(missing_docs)]
//! Wire formats: the record and handshake message grammars, and the
//! buffering that turns a byte stream into whole messages.

#[macro_use]
mod macros;

pub mod alert;
pub mod base;
pub mod ccs;
pub mod codec;
pub mod deframer;
pub mod enums;
pub mod fragmenter;
pub mod handshake;
pub mod hsjoiner;
pub mod message;
