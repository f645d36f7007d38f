// SPDX-License-Identifier: MIT

pub mod admin;
pub mod fleet;
pub mod worker;
