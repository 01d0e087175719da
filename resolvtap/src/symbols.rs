//! ELF symbol lookup for probe placement.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use log::{debug, warn};
use object::{Object, ObjectSymbol};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSymbol {
    pub name: String,
    pub file_offset: u64,
}

pub trait SymbolResolver {
    fn resolve(&mut self, binary: &Path, symbol: &str) -> Result<u64>;
}

/// Defined symbols of one binary, `.symtab` entries first, then `.dynsym`.
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: Vec<ResolvedSymbol>,
}

impl SymbolTable {
    pub fn parse(path: &Path, data: &[u8]) -> Result<Self> {
        let bad_binary = |reason: String| Error::BadBinary {
            path: path.to_path_buf(),
            reason,
        };

        let file = object::File::parse(data).map_err(|e| bad_binary(e.to_string()))?;
        if file.format() != object::BinaryFormat::Elf {
            return Err(bad_binary(format!("not an ELF file ({:?})", file.format())));
        }

        let symbols = file
            .symbols()
            .chain(file.dynamic_symbols())
            .filter(|sym| !sym.is_undefined())
            .filter_map(|sym| {
                let name = sym.name().ok()?;
                (!name.is_empty()).then(|| ResolvedSymbol {
                    name: name.to_string(),
                    file_offset: sym.address(),
                })
            })
            .collect();

        Ok(Self { symbols })
    }

    pub fn from_symbols(symbols: impl IntoIterator<Item = ResolvedSymbol>) -> Self {
        Self {
            symbols: symbols.into_iter().collect(),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&ResolvedSymbol> {
        self.symbols.iter().find(|sym| sym.name == name)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Resolver backed by the on-disk ELF file. Parsed tables are kept for the
/// lifetime of the resolver, one per path.
#[derive(Default)]
pub struct ElfSymbolResolver {
    tables: HashMap<PathBuf, SymbolTable>,
}

impl ElfSymbolResolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&mut self, binary: &Path) -> Result<&SymbolTable> {
        if !self.tables.contains_key(binary) {
            let data = fs::read(binary).map_err(|e| Error::BadBinary {
                path: binary.to_path_buf(),
                reason: e.to_string(),
            })?;
            let table = SymbolTable::parse(binary, &data)?;
            if table.is_empty() {
                warn!("{} has no defined symbols", binary.display());
            } else {
                debug!("Read {} symbols from {}", table.len(), binary.display());
            }
            self.tables.insert(binary.to_path_buf(), table);
        }
        Ok(&self.tables[binary])
    }
}

impl SymbolResolver for ElfSymbolResolver {
    fn resolve(&mut self, binary: &Path, symbol: &str) -> Result<u64> {
        self.table(binary)?
            .lookup(symbol)
            .map(|sym| sym.file_offset)
            .ok_or_else(|| Error::SymbolNotFound {
                symbol: symbol.to_string(),
                path: binary.to_path_buf(),
            })
    }
}

impl SymbolResolver for SymbolTable {
    fn resolve(&mut self, binary: &Path, symbol: &str) -> Result<u64> {
        self.lookup(symbol)
            .map(|sym| sym.file_offset)
            .ok_or_else(|| Error::SymbolNotFound {
                symbol: symbol.to_string(),
                path: binary.to_path_buf(),
            })
    }
}
