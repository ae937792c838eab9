// src/loader.rs
//
// Dynamic engine loading.
//
// An engine ships as a cdylib exporting one C-ABI factory symbol,
// `dynagym_engine_entry`, which hands ownership of a boxed provider to the
// harness. Loading happens exactly once at startup; the library handle is
// kept alive for the lifetime of the provider and everything it creates.
//
// The most common field failure is not a missing file but a present binary
// built for a different toolchain or ABI. When the dynamic loader rejects
// the library, the directory is scanned for sibling engine binaries and the
// diagnostic names each candidate so the operator can tell "nothing built"
// apart from "built wrong".

use std::env::consts::DLL_EXTENSION;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use libloading::{Library, Symbol};

use crate::artifact::PolicySaver;
use crate::engine::EngineProvider;

/// Factory symbol every engine library must export.
pub const ENGINE_ENTRY_SYMBOL: &[u8] = b"dynagym_engine_entry\0";

/// Signature of the factory symbol. The returned pointer must come from
/// `Box::into_raw` and transfers ownership to the caller.
pub type EngineEntryFn = unsafe extern "C" fn() -> *mut dyn EngineProvider;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The library path does not exist and no candidate binaries were found
    /// beside it; the loader's own error is passed through unmodified.
    #[error("failed to load engine library {path}: {source}")]
    NotFound {
        path: String,
        #[source]
        source: libloading::Error,
    },

    /// The library could not be loaded but candidate engine binaries exist
    /// in the same directory, which usually means an ABI or toolchain
    /// mismatch rather than a missing build.
    #[error("{}", mismatch_message(.path, .candidates))]
    BinaryMismatch {
        path: String,
        candidates: Vec<String>,
        #[source]
        source: libloading::Error,
    },

    /// The library loaded but does not export the factory symbol.
    #[error("engine library {path} does not export `dynagym_engine_entry`: {source}")]
    MissingSymbol {
        path: String,
        #[source]
        source: libloading::Error,
    },

    /// The factory symbol ran but returned a null provider.
    #[error("engine entry of {path} returned a null provider")]
    NullProvider { path: String },
}

fn mismatch_message(path: &str, candidates: &[String]) -> String {
    let mut msg = format!("failed to load engine library {path}.");
    let _ = write!(
        msg,
        " Found candidate engine binaries in the same directory: {}.",
        candidates.join(", ")
    );
    msg.push_str(
        " These were likely built for a different toolchain or ABI; \
         rebuild the engine against the running toolchain.",
    );
    msg
}

/// List engine-binary file names (platform dynamic-library extension) in
/// `dir`, sorted for stable diagnostics. Unreadable directories yield an
/// empty list; the scan is best-effort and only feeds error messages.
pub fn candidate_binaries(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .is_some_and(|ext| ext == DLL_EXTENSION)
        })
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn classify_load_failure(lib_path: &Path, source: libloading::Error) -> LoadError {
    let path = lib_path.display().to_string();
    let dir = lib_path.parent().unwrap_or_else(|| Path::new("."));
    let candidates = candidate_binaries(dir);
    if candidates.is_empty() {
        LoadError::NotFound { path, source }
    } else {
        LoadError::BinaryMismatch {
            path,
            candidates,
            source,
        }
    }
}

/// An engine provider together with the capabilities that travel with it.
///
/// Holding the library handle here ties its lifetime to the provider: the
/// field order drops the provider before the library it came from.
pub struct LoadedEngine {
    provider: Box<dyn EngineProvider>,
    saver: PolicySaver,
    _lib: Option<Library>,
}

impl LoadedEngine {
    /// Wrap an in-process provider (no dynamic library involved).
    pub fn from_provider(provider: Box<dyn EngineProvider>) -> Self {
        Self {
            provider,
            saver: PolicySaver::new(),
            _lib: None,
        }
    }

    pub fn provider(&self) -> &dyn EngineProvider {
        self.provider.as_ref()
    }

    pub fn saver(&self) -> &PolicySaver {
        &self.saver
    }
}

impl std::fmt::Debug for LoadedEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedEngine")
            .field("dynamic", &self._lib.is_some())
            .finish()
    }
}

/// Load an engine library and obtain its provider.
pub fn load_engine(lib_path: &Path) -> Result<LoadedEngine, LoadError> {
    // SAFETY: loading foreign code is inherently unsafe; the contract is
    // that the library exports `dynagym_engine_entry` with the documented
    // signature and runs no hazardous initializers.
    let lib = unsafe { Library::new(lib_path) }
        .map_err(|e| classify_load_failure(lib_path, e))?;

    let entry: EngineEntryFn = {
        // SAFETY: symbol type is fixed by the engine ABI contract.
        let symbol: Symbol<EngineEntryFn> =
            unsafe { lib.get(ENGINE_ENTRY_SYMBOL) }.map_err(|e| LoadError::MissingSymbol {
                path: lib_path.display().to_string(),
                source: e,
            })?;
        *symbol
    };

    // SAFETY: per the ABI contract the entry returns a Box::into_raw'd
    // provider (or null); ownership transfers to us here.
    let raw = unsafe { entry() };
    if raw.is_null() {
        return Err(LoadError::NullProvider {
            path: lib_path.display().to_string(),
        });
    }
    let provider = unsafe { Box::from_raw(raw) };

    Ok(LoadedEngine {
        provider,
        saver: PolicySaver::new(),
        _lib: Some(lib),
    })
}
