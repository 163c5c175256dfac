pub mod builder;
pub mod detection;
pub mod flow;
pub mod instruction;
pub mod module;
pub mod opcode;
pub mod result;
pub mod store;
pub mod validator;

use std::path::{Path, PathBuf};

pub use instruction::{FieldRef, InstrId, Instruction, MethodRef, Operand, TypeRef, TypeSig};
pub use module::{MethodBody, MethodDecl, MethodId, Module, TypeDecl};
pub use opcode::{Opcode, is_block_ending_opcode, is_terminal_opcode};

/// Loads a module through the JSON store, resolving dependencies against `search_dirs`.
///
/// # Example
/// ```rust,ignore
/// let module = load_module("app.json", &[PathBuf::from("deps")])?;
/// assert!(validator::validate_module(&module).is_ok());
/// ```
pub fn load_module(path: impl AsRef<Path>, search_dirs: &[PathBuf]) -> result::Result<Module> {
    use store::ModuleStore;
    store::JsonStore::new(search_dirs.to_vec()).load(path.as_ref())
}
