//! decoder for PowerVR SGX USSE shader instructions, built on a table of declarative formats.
//!
//! every USSE instruction is one 64-bit word. a [`FormatRegistry`] holds the formats a word may
//! take; each is a fixed-bit predicate plus named fields, and may narrow further through a chain
//! of discriminant fields. the registry rejects tables where two formats could claim the same
//! word, so a word decodes to at most one [`Instruction`]. a [`HandlerTable`] then routes decoded
//! instructions to caller-supplied handlers by their dispatch key.
//!
//! ```
//! use yaxpeax_usse::{decode_and_dispatch, HandlerTable, InstDecoder};
//!
//! let decoder = InstDecoder::default();
//! let handlers = HandlerTable::builder()
//!     .on("vmov", |_| 1)
//!     .on("spec", |inst| inst.get::<u32>("category").unwrap_or(0) + 5)
//!     .build();
//!
//! let halt = (0b11111u64 << 59) | (3 << 51) | (1 << 50);
//! assert_eq!(decode_and_dispatch(&decoder, halt, &handlers), Ok(8));
//! ```

mod decode;
mod dispatch;
mod error;
mod field;
mod format;
mod registry;
pub mod table;
pub mod usse;

use std::sync::Arc;

use yaxpeax_arch::{Arch, Decoder, Reader};

pub use crate::decode::{decode, DecodeSink, Instruction};
pub use crate::dispatch::{dispatch, FormatView, HandlerTable, HandlerTableBuilder};
pub use crate::error::{ConstructionError, DecodeError, DispatchError, Error, TableError};
pub use crate::field::{sign_extend, FieldDescriptor, FieldValue};
pub use crate::format::{Discriminant, Field, FormatDefinition, LayoutBuilder};
pub use crate::registry::{DiscriminantStep, FormatRegistry, Layout, MAX_DISCRIMINANT_DEPTH};

#[derive(Debug)]
pub struct USSE;

impl Arch for USSE {
    type Address = u64;
    type Word = u8;
    type Instruction = Instruction;
    type DecodeError = DecodeError;
    type Decoder = InstDecoder;
    type Operand = FieldValue;
}

/// decodes words against one shared registry. cloning is cheap.
#[derive(Debug, Clone)]
pub struct InstDecoder {
    registry: Arc<FormatRegistry>,
}

impl InstDecoder {
    pub fn new(registry: impl Into<Arc<FormatRegistry>>) -> Self {
        InstDecoder { registry: registry.into() }
    }

    pub fn registry(&self) -> &Arc<FormatRegistry> {
        &self.registry
    }

    pub fn decode_word(&self, word: u64) -> Result<Instruction, DecodeError> {
        self.registry.decode(word)
    }
}

impl Default for InstDecoder {
    /// a decoder for the built-in USSE formats.
    fn default() -> Self {
        InstDecoder::new(usse::registry().expect("built-in USSE formats are disjoint and well-formed"))
    }
}

impl Decoder<USSE> for InstDecoder {
    fn decode_into<T: Reader<<USSE as Arch>::Address, <USSE as Arch>::Word>>(&self, inst: &mut Instruction, words: &mut T) -> Result<(), <USSE as Arch>::DecodeError> {
        let mut buf = [0u8; 8];
        words.next_n(&mut buf)?;
        decode::decode_inst(&self.registry, inst, u64::from_le_bytes(buf))
    }
}

/// decode `word`, then hand it to whichever handler in `handlers` claims it.
pub fn decode_and_dispatch<R>(
    decoder: &InstDecoder,
    word: u64,
    handlers: &HandlerTable<R>,
) -> Result<R, Error> {
    let inst = decoder.decode_word(word)?;
    Ok(handlers.dispatch(&inst)?)
}
