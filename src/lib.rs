pub mod binding;
pub mod helpers;
pub mod image;
pub mod opcodes;

pub use binding::{BindInterpreter, BindState};
pub use image::{BindErr, BindResult, Endian, ImageMemory, MachImage, Segment, Symbol};
pub use opcodes::{BindOpcode, BindSpecialDylib, BindSymbolFlags, BindType};
