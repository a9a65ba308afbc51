use std::error;
use std::fmt;

#[derive(Debug)]
pub enum BindErr {
    InvalidBinary { detail: String },
    UnknownOpcode { opcode: u8, offset: usize },
}

impl fmt::Display for BindErr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BindErr::InvalidBinary { detail } => write!(f, "invalid binary: {}", detail),
            BindErr::UnknownOpcode { opcode, offset } => {
                write!(f, "unknown bind opcode {:#x} at offset {:#x}", opcode, offset)
            }
        }
    }
}

impl error::Error for BindErr {}

impl<'a> From<nom::Err<nom::error::Error<&'a [u8]>>> for BindErr {
    fn from(_: nom::Err<nom::error::Error<&'a [u8]>>) -> Self {
        BindErr::InvalidBinary {
            detail: "truncated bind opcode stream".to_string(),
        }
    }
}

pub type BindResult<T> = Result<T, BindErr>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

#[derive(Debug, Clone)]
pub struct Segment {
    pub segname: String,
    pub vmaddr: u64,
    pub vmsize: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub library_ordinal: i64,
    pub stab: bool,
    // 0 means unresolved import
    pub linked_addr: u64,
    pub bind_xrefs: Vec<u64>,
}

impl Symbol {
    pub fn binding(name: String, library_ordinal: i64) -> Self {
        Symbol {
            name,
            library_ordinal,
            stab: false,
            linked_addr: 0,
            bind_xrefs: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct ImageMemory {
    data: Vec<u8>,
}

impl ImageMemory {
    pub fn new(size: usize) -> Self {
        ImageMemory {
            data: vec![0; size],
        }
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        ImageMemory { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn store(&mut self, rva: u64, bytes: &[u8]) -> BindResult<()> {
        let start = rva as usize;
        let end = start
            .checked_add(bytes.len())
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| BindErr::InvalidBinary {
                detail: format!(
                    "store of {} bytes at rva {:#x} is outside image memory",
                    bytes.len(),
                    rva
                ),
            })?;
        self.data[start..end].copy_from_slice(bytes);
        Ok(())
    }

    pub fn load(&self, rva: u64, size: usize) -> BindResult<&[u8]> {
        let start = rva as usize;
        let end = start
            .checked_add(size)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| BindErr::InvalidBinary {
                detail: format!("load of {} bytes at rva {:#x} is outside image memory", size, rva),
            })?;
        Ok(&self.data[start..end])
    }
}

#[derive(Debug)]
pub struct MachImage {
    pub is_64: bool,
    pub byteorder: Endian,
    // lva the image is linked at; lva -> rva translation subtracts this
    pub base_addr: u64,
    pub segments: Vec<Segment>,
    pub symbols: Vec<Symbol>,
    pub ordered_symbols: Vec<usize>,
    pub memory: ImageMemory,
}

impl MachImage {
    pub fn to_rva(&self, lva: u64) -> u64 {
        lva.wrapping_sub(self.base_addr)
    }

    pub fn add_symbol(&mut self, symbol: Symbol) -> usize {
        let index = self.symbols.len();
        self.symbols.push(symbol);
        self.ordered_symbols.push(index);
        index
    }

    pub fn store_u64(&mut self, rva: u64, value: u64) -> BindResult<()> {
        let bytes = match self.byteorder {
            Endian::Little => value.to_le_bytes(),
            Endian::Big => value.to_be_bytes(),
        };
        self.memory.store(rva, &bytes)
    }

    pub fn store_u32(&mut self, rva: u64, value: u32) -> BindResult<()> {
        let bytes = match self.byteorder {
            Endian::Little => value.to_le_bytes(),
            Endian::Big => value.to_be_bytes(),
        };
        self.memory.store(rva, &bytes)
    }
}
