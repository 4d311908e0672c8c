//! ELF loading
//!
//! Reads a RISC-V ELF executable from disk, copies every allocatable
//! section into the simulated memory, and reports the entry address
//! and the bounds of the text segment. Function symbols are read
//! separately; their absence is not an error, they only make the
//! disassembly nicer.

use std::collections::HashMap;

use elf::abi::{SHF_ALLOC, SHT_NOBITS, STT_FUNC};
use elf::endian::AnyEndian;
use elf::section::SectionHeader;
use elf::ElfBytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ElfError {
    #[error("could not read ELF file: {0}")]
    FileUnreadable(#[from] std::io::Error),
    #[error("could not parse ELF file: {0}")]
    ParseFailed(String),
    #[error("unexpected compression in section {0}")]
    CompressedSection(String),
    #[error("ELF file has no .text section")]
    MissingTextSection,
}

impl From<elf::ParseError> for ElfError {
    fn from(e: elf::ParseError) -> Self {
        Self::ParseFailed(e.to_string())
    }
}

/// Anything the ELF loader can write program bytes into
pub trait ElfLoadable {
    fn write_byte(&mut self, addr: u32, data: u8);
}

impl ElfLoadable for crate::hart::memory::Memory {
    fn write_byte(&mut self, addr: u32, data: u8) {
        self.write(addr, data.into(), crate::hart::memory::Wordsize::Byte);
    }
}

/// Addresses of the loaded program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramInfo {
    /// Initial program counter
    pub entry: u32,
    /// First address of the text segment
    pub text_start: u32,
    /// One past the last address of the text segment
    pub text_end: u32,
}

fn section_data<'a>(
    header: &SectionHeader,
    file: &'a ElfBytes<'_, AnyEndian>,
    name: &str,
) -> Result<&'a [u8], ElfError> {
    let (data, compression) = file.section_data(header)?;
    if compression.is_some() {
        return Err(ElfError::CompressedSection(name.to_string()));
    }
    Ok(data)
}

/// Read an ELF file from disk and load the alloc sections (the ones
/// meant to be present during program execution) into the loadable.
/// Returns the entry address and text-segment bounds.
pub fn load_elf<L: ElfLoadable>(loadable: &mut L, path: &str) -> Result<ProgramInfo, ElfError> {
    let file_data = std::fs::read(path)?;
    let file = ElfBytes::<AnyEndian>::minimal_parse(file_data.as_slice())?;

    let (section_headers, strtab) = file.section_headers_with_strtab()?;
    let section_headers = section_headers.ok_or_else(|| {
        ElfError::ParseFailed("file has no section headers".to_string())
    })?;

    for header in section_headers.iter() {
        // Load sections that occupy memory at run time and have file
        // contents (.bss is allocatable but has nothing to copy)
        if header.sh_flags & u64::from(SHF_ALLOC) == 0 || header.sh_type == SHT_NOBITS {
            continue;
        }
        let name = match &strtab {
            Some(strtab) => strtab.get(header.sh_name as usize).unwrap_or(""),
            None => "",
        };
        let data = section_data(&header, &file, name)?;
        for (offset, byte) in data.iter().enumerate() {
            let addr = (header.sh_addr as u32).wrapping_add(offset as u32);
            loadable.write_byte(addr, *byte);
        }
    }

    let text_shdr = file
        .section_header_by_name(".text")?
        .ok_or(ElfError::MissingTextSection)?;
    let text_start = text_shdr.sh_addr as u32;
    let text_end = text_start + text_shdr.sh_size as u32;

    Ok(ProgramInfo {
        entry: file.ehdr.e_entry as u32,
        text_start,
        text_end,
    })
}

/// Function symbols of the loaded program, keyed by address
#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    functions: HashMap<u32, String>,
}

impl SymbolTable {
    pub fn insert(&mut self, addr: u32, name: String) {
        self.functions.insert(addr, name);
    }

    pub fn lookup(&self, addr: u32) -> Option<&str> {
        self.functions.get(&addr).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// Read the function symbols from an ELF file. A missing symbol
/// table yields an empty result, not an error.
pub fn read_symbols(path: &str) -> Result<SymbolTable, ElfError> {
    let file_data = std::fs::read(path)?;
    let file = ElfBytes::<AnyEndian>::minimal_parse(file_data.as_slice())?;

    let mut symbols = SymbolTable::default();
    let Some((symtab, strtab)) = file.symbol_table()? else {
        return Ok(symbols);
    };
    for entry in symtab.iter() {
        if entry.st_symtype() == STT_FUNC {
            let name = strtab.get(entry.st_name as usize).unwrap_or("");
            if !name.is_empty() {
                symbols.insert(entry.st_value as u32, name.to_string());
            }
        }
    }
    Ok(symbols)
}
