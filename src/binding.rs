use std::collections::HashMap;

use tracing::{debug, error, info};

use crate::helpers::{read_sleb, read_uleb, string_upto_null_terminator};
use crate::image::{BindErr, BindResult, MachImage, Segment, Symbol};
use crate::opcodes::{BindOpcode, BindSpecialDylib, BindSymbolFlags, BindType};

#[derive(Debug)]
pub struct BindState {
    pub done: bool,
    pub lib_ord: i64,
    pub sym_name: String,
    pub sym_flags: BindSymbolFlags,
    pub binding_type: u8,
    pub addend: i64,
    pub segment_index: usize,
    pub address: u64,
    pub seg_end_address: u64,
    pub intptr_size: u64,
}

impl BindState {
    pub fn new(is_64: bool) -> Self {
        BindState {
            done: false,
            lib_ord: 0,
            sym_name: String::new(),
            sym_flags: BindSymbolFlags::empty(),
            binding_type: 0,
            addend: 0,
            segment_index: 0,
            address: 0,
            seg_end_address: 0,
            intptr_size: if is_64 { 8 } else { 4 },
        }
    }

    // dyld encodes negative deltas as huge ulebs, so address steps wrap
    // mod 2^64 regardless of image bitness
    pub fn add_address_ov(&mut self, base: u64, delta: u64) {
        self.address = base.wrapping_add(delta);
    }

    pub fn check_address_bounds(&self, offset: usize) -> BindResult<()> {
        if self.address >= self.seg_end_address {
            error!(
                "bind offset {:#x}: address outside segment bounds ({:#x} >= {:#x})",
                offset, self.address, self.seg_end_address
            );
            return Err(BindErr::InvalidBinary {
                detail: format!(
                    "bind address {:#x} outside segment bounds {:#x}",
                    self.address, self.seg_end_address
                ),
            });
        }
        Ok(())
    }
}

pub struct BindInterpreter<'a> {
    image: &'a mut MachImage,
    lookup: HashMap<(String, i64), Vec<usize>>,
    strict: bool,
}

impl<'a> BindInterpreter<'a> {
    pub fn new(image: &'a mut MachImage) -> Self {
        let mut lookup: HashMap<(String, i64), Vec<usize>> = HashMap::new();
        for (index, symbol) in image.symbols.iter().enumerate() {
            if symbol.stab {
                continue;
            }
            lookup
                .entry((symbol.name.clone(), symbol.library_ordinal))
                .or_default()
                .push(index);
        }
        BindInterpreter {
            image,
            lookup,
            strict: false,
        }
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn bind_normal(&mut self, blob: Option<&[u8]>) -> BindResult<()> {
        let Some(blob) = blob else {
            return Ok(());
        };
        debug!("binding non-lazy, non-weak symbols");
        let mut state = BindState::new(self.image.is_64);
        self.run(blob, blob, &mut state, false)?;
        debug!("done binding non-lazy, non-weak symbols");
        Ok(())
    }

    pub fn bind_lazy(&mut self, blob: Option<&[u8]>) -> BindResult<()> {
        let Some(blob) = blob else {
            return Ok(());
        };
        debug!("binding lazy symbols");
        let mut cursor = blob;
        // every lazy record ends with DONE; registers reset in between
        while !cursor.is_empty() {
            let mut state = BindState::new(self.image.is_64);
            state.binding_type = BindType::Pointer as u8;
            cursor = self.run(blob, cursor, &mut state, true)?;
        }
        debug!("done binding lazy symbols");
        Ok(())
    }

    fn segment(&self, index: usize) -> BindResult<&Segment> {
        self.image
            .segments
            .get(index)
            .ok_or_else(|| BindErr::InvalidBinary {
                detail: format!("bind against segment {} which does not exist", index),
            })
    }

    fn run<'b>(
        &mut self,
        blob: &'b [u8],
        start: &'b [u8],
        state: &mut BindState,
        lazy: bool,
    ) -> BindResult<&'b [u8]> {
        let seg = self.segment(state.segment_index)?;
        state.seg_end_address = seg.vmaddr.wrapping_add(seg.vmsize);

        let mut cursor = start;
        while !state.done && !cursor.is_empty() {
            let offset = blob.len() - cursor.len();
            let (rest, (raw, opcode, immediate)) = BindOpcode::parse(cursor)?;
            cursor = rest;

            let Some(opcode) = opcode else {
                if self.strict {
                    return Err(BindErr::UnknownOpcode { opcode: raw, offset });
                }
                // skipped without consuming any operands, which can leave
                // the rest of the stream desynchronized
                error!(
                    "invalid bind opcode {:#x} at offset {:#x}",
                    raw & BindOpcode::BIND_OPCODE_MASK,
                    offset
                );
                continue;
            };

            debug!("{} @ {:#x} (immediate {:#x})", opcode, offset, immediate);

            match opcode {
                BindOpcode::Done => {
                    state.done = true;
                }
                BindOpcode::SetDylibOrdinalImm => {
                    state.lib_ord = immediate as i64;
                }
                BindOpcode::SetDylibOrdinalUleb => {
                    let (rest, ordinal) = read_uleb(cursor)?;
                    cursor = rest;
                    state.lib_ord = ordinal as i64;
                }
                BindOpcode::SetDylibSpecialImm => {
                    state.lib_ord = if immediate == 0 {
                        0
                    } else {
                        // sign-extend the 4-bit immediate
                        ((immediate | BindOpcode::BIND_OPCODE_MASK) as i8) as i64
                    };
                    let special: Option<BindSpecialDylib> =
                        num::FromPrimitive::from_i64(state.lib_ord);
                    debug!("special dylib ordinal {} ({:?})", state.lib_ord, special);
                }
                BindOpcode::SetSymbolTrailingFlagsImm => {
                    let (rest, name) = string_upto_null_terminator(cursor)?;
                    cursor = rest;
                    state.sym_flags = BindSymbolFlags::from_bits_retain(immediate);
                    if state.sym_flags.contains(BindSymbolFlags::WEAK_IMPORT) {
                        debug!("symbol {:?} is a weak import", name);
                    }
                    state.sym_name = name;
                }
                BindOpcode::SetTypeImm => {
                    state.binding_type = immediate;
                }
                BindOpcode::SetAddendSleb if !lazy => {
                    let (rest, addend) = read_sleb(cursor)?;
                    cursor = rest;
                    state.addend = addend;
                }
                BindOpcode::SetSegmentAndOffsetUleb => {
                    let (rest, seg_offset) = read_uleb(cursor)?;
                    cursor = rest;
                    let seg = self.segment(immediate as usize)?;
                    let (vmaddr, vmsize) = (seg.vmaddr, seg.vmsize);
                    state.add_address_ov(vmaddr, seg_offset);
                    if !lazy {
                        // lazy records skip bounds tracking
                        state.segment_index = immediate as usize;
                        state.seg_end_address = vmaddr.wrapping_add(vmsize);
                    }
                }
                BindOpcode::AddAddrUleb if !lazy => {
                    let (rest, delta) = read_uleb(cursor)?;
                    cursor = rest;
                    state.add_address_ov(state.address, delta);
                }
                BindOpcode::DoBind => {
                    if lazy {
                        self.bind_location(state)?;
                    } else {
                        state.check_address_bounds(offset)?;
                        self.bind_location(state)?;
                        state.add_address_ov(state.address, state.intptr_size);
                    }
                }
                BindOpcode::DoBindAddAddrUleb if !lazy => {
                    let (rest, delta) = read_uleb(cursor)?;
                    cursor = rest;
                    state.check_address_bounds(offset)?;
                    self.bind_location(state)?;
                    // stepped after the bind, in preparation for the next slot
                    state.add_address_ov(state.address, delta.wrapping_add(state.intptr_size));
                }
                BindOpcode::DoBindAddAddrImmScaled if !lazy => {
                    state.check_address_bounds(offset)?;
                    self.bind_location(state)?;
                    state.add_address_ov(
                        state.address,
                        (immediate as u64) * state.intptr_size + state.intptr_size,
                    );
                }
                BindOpcode::DoBindUlebTimesSkippingUleb if !lazy => {
                    let (rest, count) = read_uleb(cursor)?;
                    let (rest, skip) = read_uleb(rest)?;
                    cursor = rest;
                    for _ in 0..count {
                        state.check_address_bounds(offset)?;
                        self.bind_location(state)?;
                        state.add_address_ov(state.address, skip.wrapping_add(state.intptr_size));
                    }
                }
                _ => {
                    // opcode exists but is not part of this mode's table
                    if self.strict {
                        return Err(BindErr::UnknownOpcode { opcode: raw, offset });
                    }
                    error!(
                        "bind opcode {} not valid in {} binding at offset {:#x}",
                        opcode,
                        if lazy { "lazy" } else { "non-lazy" },
                        offset
                    );
                }
            }
        }

        Ok(cursor)
    }

    fn bind_location(&mut self, state: &BindState) -> BindResult<()> {
        let key = (state.sym_name.clone(), state.lib_ord);
        let found = match self.lookup.get(&key) {
            Some(matches) if matches.len() > 1 => {
                error!(
                    "cannot bind: more than one match for ({:?}, {})",
                    state.sym_name, state.lib_ord
                );
                return Err(BindErr::InvalidBinary {
                    detail: format!(
                        "more than one symbol match for ({:?}, {})",
                        state.sym_name, state.lib_ord
                    ),
                });
            }
            Some(matches) => Some(matches[0]),
            None => None,
        };
        let index = match found {
            Some(index) => index,
            None => {
                info!(
                    "no match for ({:?}, {}), generating binding symbol",
                    state.sym_name, state.lib_ord
                );
                let index = self
                    .image
                    .add_symbol(Symbol::binding(state.sym_name.clone(), state.lib_ord));
                self.lookup.insert(key, vec![index]);
                index
            }
        };

        let location = state.address;
        let linked_addr = self.image.symbols[index].linked_addr;
        // an unresolved import binds to zero and the addend is suppressed
        let value = if linked_addr != 0 {
            linked_addr.wrapping_add(state.addend as u64)
        } else {
            0
        };

        let bind_type: Option<BindType> = num::FromPrimitive::from_u8(state.binding_type);
        match bind_type {
            Some(BindType::Pointer) => {
                debug!(
                    "updating address {:#x} with symbol {:?} @ {:#x}",
                    location, state.sym_name, value
                );
                let rva = self.image.to_rva(location);
                if state.intptr_size == 8 {
                    self.image.store_u64(rva, value)?;
                } else {
                    self.image.store_u32(rva, value as u32)?;
                }
                self.image.symbols[index].bind_xrefs.push(location);
            }
            Some(BindType::TextAbsolute32) => {
                let location_32 = location as u32;
                let value_32 = value as u32;
                debug!(
                    "updating address {:#x} with symbol {:?} @ {:#x}",
                    location_32, state.sym_name, value_32
                );
                let rva = self.image.to_rva(location_32 as u64);
                self.image.store_u32(rva, value_32)?;
                self.image.symbols[index].bind_xrefs.push(location_32 as u64);
            }
            Some(BindType::TextPCRel32) => {
                let location_32 = location as u32;
                let value_32 = value.wrapping_sub(location.wrapping_add(4)) as u32;
                debug!(
                    "updating address {:#x} with symbol {:?} @ {:#x}",
                    location_32, state.sym_name, value_32
                );
                let rva = self.image.to_rva(location_32 as u64);
                self.image.store_u32(rva, value_32)?;
                self.image.symbols[index].bind_xrefs.push(location_32 as u64);
            }
            None => {
                error!("unknown bind type: {}", state.binding_type);
                return Err(BindErr::InvalidBinary {
                    detail: format!("unknown bind type {}", state.binding_type),
                });
            }
        }

        Ok(())
    }
}
