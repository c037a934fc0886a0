//! Hardware model of the AIC accelerator.
//!
//! This crate has **no dependencies** and touches no device. It is a pure
//! model of what the planner has to respect: memory capacities and
//! alignments, the firmware doorbell window, core and thread limits, the
//! UDMA descriptor layout and the execution-context ABI that the runtime
//! hands to every network thread.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`memory`] | Address spaces (L2TCM, VTCM, DDR), capacities, alignments |
//! | [`doorbell`] | Doorbell width, firmware slot count, exit slot |
//! | [`topology`] | Core and thread limits, hardware version, semaphores, ports |
//! | [`udma`] | UDMA descriptor layout and the per-thread descriptor ring |
//! | [`context`] | Execution-context field layout (32-bit pointer ABI) |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod context;
pub mod doorbell;
pub mod memory;
pub mod topology;
pub mod udma;

/// Round `value` up to the next multiple of `align`.
///
/// `align` must be a power of two.
#[must_use]
pub const fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_boundary() {
        assert_eq!(align_up(0, 128), 0);
        assert_eq!(align_up(1124, 128), 1152);
        assert_eq!(align_up(1168, 128), 1280);
        assert_eq!(align_up(4096, 4096), 4096);
    }
}
