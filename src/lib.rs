//! Resolve symbolic patches against obfuscated JVM class sets and apply
//! their structural edits.
//!
//! A patch names classes, members and labels either concretely or weakly
//! (`~name`). [`patcher::Patcher`] searches the loaded [`classset::ClassSet`]
//! for an assignment of weak names that satisfies every structural check,
//! then applies the patch's additions and removals in place.

pub mod apply;
pub mod bytecode;
pub mod check;
pub mod classset;
pub mod descriptor;
pub mod disassemble;
pub mod error;
pub mod instruction;
pub mod ir;
pub mod logging;
pub mod matching;
pub mod opcodes;
pub mod patch;
pub mod patcher;
pub mod scan;
pub mod scope;

pub use error::{PatchError, Result, ValidateError};
pub use patcher::Patcher;
pub use scope::PatchScope;
