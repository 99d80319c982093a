#![no_std]

// Host-communication engine for behavior rig firmware.
//
// Everything here is portable across the STM32 firmware and the host emulator:
// the crate avoids the Rust standard library and reaches hardware only through
// the collaborator traits in `port`.
pub mod interval;
pub mod link;
pub mod port;
pub mod protocol;
pub mod stage;
pub mod trial;
