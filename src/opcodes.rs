use num_derive::FromPrimitive;
use strum_macros::Display;

#[derive(Debug, FromPrimitive, Clone, Copy, PartialEq, Eq)]
pub enum BindType {
    Pointer = 1,
    TextAbsolute32 = 2,
    TextPCRel32 = 3,
}

#[derive(Debug, FromPrimitive, Clone, Copy, PartialEq, Eq)]
pub enum BindSpecialDylib {
    Self_ = 0,
    MainExecutable = -1,
    FlatLookup = -2,
    WeakLookup = -3,
}

bitflags::bitflags! {
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BindSymbolFlags: u8 {
        const WEAK_IMPORT = 0x1;
        const NON_WEAK_DEFINITION = 0x8;
    }
}

#[derive(Debug, Display, FromPrimitive, Clone, Copy, PartialEq, Eq)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum BindOpcode {
    Done = 0,
    SetDylibOrdinalImm = 1,
    SetDylibOrdinalUleb = 2,
    SetDylibSpecialImm = 3,
    SetSymbolTrailingFlagsImm = 4,
    SetTypeImm = 5,
    SetAddendSleb = 6,
    SetSegmentAndOffsetUleb = 7,
    AddAddrUleb = 8,
    DoBind = 9,
    DoBindAddAddrUleb = 10,
    DoBindAddAddrImmScaled = 11,
    DoBindUlebTimesSkippingUleb = 12,
}

impl BindOpcode {
    pub const BIND_OPCODE_MASK: u8 = 0xF0;
    pub const BIND_IMMEDIATE_MASK: u8 = 0x0F;

    pub fn parse(bytes: &[u8]) -> nom::IResult<&[u8], (u8, Option<BindOpcode>, u8)> {
        let (bytes, raw) = nom::number::complete::le_u8(bytes)?;
        let opcode = num::FromPrimitive::from_u8((raw & Self::BIND_OPCODE_MASK) >> 4);
        Ok((bytes, (raw, opcode, raw & Self::BIND_IMMEDIATE_MASK)))
    }
}
