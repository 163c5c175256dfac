//! Loading and persisting modules.
//!
//! The physical format is the JSON encoding of [`Module`]. Loading resolves every reference
//! against the module and its declared dependencies; a reference into an undeclared dependency
//! or to a missing internal member is a load failure. Writing is deterministic, performs no
//! validation, and reports a SHA3-256 digest of the bytes written.

use sha3::{Digest, Sha3_256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::instruction::check_operand;
use crate::module::Module;
use crate::result::{Error, Result};

/// Outcome of a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    pub path: PathBuf,
    pub bytes: usize,
    /// Hex-encoded SHA3-256 of the written bytes.
    pub digest: String,
}

/// Collaborator that reads a module from storage and writes it back.
pub trait ModuleStore {
    fn load(&self, path: &Path) -> Result<Module>;
    fn write(&self, module: &Module, path: &Path) -> Result<WriteReceipt>;
}

/// JSON-backed store. Dependencies are looked up as `<name>.json` in the search directories
/// and then in the directory of the input file.
#[derive(Debug, Clone, Default)]
pub struct JsonStore {
    pub search_dirs: Vec<PathBuf>,
}

impl JsonStore {
    pub fn new(search_dirs: Vec<PathBuf>) -> Self {
        Self { search_dirs }
    }

    /// Location of each declared dependency, `None` when it is not found anywhere.
    pub fn locate_dependencies(&self, module: &Module, input: &Path) -> Vec<(String, Option<PathBuf>)> {
        let mut dirs = self.search_dirs.clone();
        if let Some(parent) = input.parent() {
            dirs.push(parent.to_path_buf());
        }
        module
            .dependencies
            .iter()
            .map(|dep| {
                let file = format!("{dep}.json");
                let found = dirs.iter().map(|d| d.join(&file)).find(|p| p.is_file());
                (dep.clone(), found)
            })
            .collect()
    }
}

impl ModuleStore for JsonStore {
    fn load(&self, path: &Path) -> Result<Module> {
        let display = path.display().to_string();
        let raw = fs::read_to_string(path).map_err(|source| Error::FileRead {
            path: display.clone(),
            source,
        })?;
        let mut module: Module = serde_json::from_str(&raw).map_err(|e| Error::LoadFailure {
            path: display.clone(),
            reason: e.to_string(),
        })?;

        for id in module.methods() {
            let name = module.describe(id);
            if let Some(body) = module.method_mut(id).and_then(|m| m.body.as_mut()) {
                for ins in &body.instructions {
                    check_operand(ins.opcode, &ins.operand).map_err(|e| Error::LoadFailure {
                        path: display.clone(),
                        reason: format!("{name}: instruction {}: {e}", ins.id.0),
                    })?;
                }
                body.normalize().map_err(|e| Error::LoadFailure {
                    path: display.clone(),
                    reason: format!("{name}: {e}"),
                })?;
            }
        }

        let problems = module.unresolved_references();
        if let Some(first) = problems.first() {
            return Err(Error::LoadFailure {
                path: display,
                reason: if problems.len() == 1 {
                    first.clone()
                } else {
                    format!("{first} (and {} more)", problems.len() - 1)
                },
            });
        }

        for (dep, found) in self.locate_dependencies(&module, path) {
            match found {
                Some(p) => debug!("dependency {dep} -> {}", p.display()),
                None => warn!("dependency {dep} not found in search directories"),
            }
        }

        info!(
            "loaded {} ({} types, {} methods)",
            module.name,
            module.types.len(),
            module.methods().len()
        );
        Ok(module)
    }

    fn write(&self, module: &Module, path: &Path) -> Result<WriteReceipt> {
        let bytes = to_bytes(module)?;
        fs::write(path, &bytes).map_err(|source| Error::FileWrite {
            path: path.display().to_string(),
            source,
        })?;
        let digest = digest_hex(&bytes);
        info!("wrote {} ({} bytes, sha3 {})", path.display(), bytes.len(), &digest[..16]);
        Ok(WriteReceipt {
            path: path.to_path_buf(),
            bytes: bytes.len(),
            digest,
        })
    }
}

/// Deterministic pretty-printed encoding of a module, newline-terminated.
pub fn to_bytes(module: &Module) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(module)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Hex-encoded SHA3-256 of `bytes`.
pub fn digest_hex(bytes: &[u8]) -> String {
    hex::encode(Sha3_256::digest(bytes))
}

/// `dir/stem_patched.ext` next to the input.
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "module".to_string());
    let name = match input.extension() {
        Some(ext) => format!("{stem}_patched.{}", ext.to_string_lossy()),
        None => format!("{stem}_patched"),
    };
    input.with_file_name(name)
}
