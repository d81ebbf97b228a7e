use core::fmt;
use std::sync::Arc;

use num_traits::NumCast;
use tracing::trace;
use yaxpeax_arch::{AddressDiff, LengthedInstruction};

use crate::error::DecodeError;
use crate::field::FieldValue;
use crate::format::Field;
use crate::registry::{DiscriminantStep, FormatRegistry, Layout, NodeKind};
use crate::USSE;

/// observer for the decode engine.
///
/// [`Instruction`] is the usual sink. anything that only wants to look at a word, like a
/// histogram of formats in a shader binary, can implement this instead and skip building one.
pub trait DecodeSink {
    fn on_decode_start(&mut self, _word: u64) {}
    fn on_format_matched(&mut self, _format: &Arc<str>) {}
    fn on_discriminant(&mut self, _field: &Arc<str>, _value: u64) {}
    fn on_field_decoded(&mut self, _field: &Field, _value: FieldValue) {}
    fn on_decode_end(&mut self, _layout: &Arc<Layout>) {}
}

/// a decoded instruction word: the resolved layout and every field it declares, extracted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Instruction {
    word: u64,
    layout: Option<Arc<Layout>>,
    values: Vec<FieldValue>,
}

impl Instruction {
    pub fn word(&self) -> u64 {
        self.word
    }

    /// false for a default-constructed instruction, or one whose last decode failed.
    pub fn is_decoded(&self) -> bool {
        self.layout.is_some()
    }

    pub fn layout(&self) -> Option<&Arc<Layout>> {
        self.layout.as_ref()
    }

    /// top-level format name, empty if nothing has been decoded.
    pub fn format(&self) -> &str {
        self.layout.as_ref().map(|l| l.format()).unwrap_or("")
    }

    /// dispatch key, e.g. `spec.misc.halt`. empty if nothing has been decoded.
    pub fn key(&self) -> &str {
        self.layout.as_ref().map(|l| l.key()).unwrap_or("")
    }

    pub fn path(&self) -> &[DiscriminantStep] {
        self.layout.as_ref().map(|l| l.path()).unwrap_or(&[])
    }

    /// the value a discriminant field resolved to on the way to this instruction's layout.
    pub fn discriminant(&self, field: &str) -> Option<u64> {
        self.path().iter().find(|s| &*s.field == field).map(|s| s.value)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, FieldValue)> + '_ {
        let names = self.layout.iter().flat_map(|l| l.fields().iter());
        names.zip(self.values.iter()).map(|(f, v)| (f.name.as_ref(), *v))
    }

    pub fn field(&self, name: &str) -> Option<FieldValue> {
        self.fields().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    /// a field converted to `T`, `None` if it is absent or does not fit.
    pub fn get<T: NumCast>(&self, name: &str) -> Option<T> {
        self.field(name)?.get()
    }
}

impl DecodeSink for Instruction {
    fn on_decode_start(&mut self, word: u64) {
        self.word = word;
        self.layout = None;
        self.values.clear();
    }
    fn on_field_decoded(&mut self, _field: &Field, value: FieldValue) {
        self.values.push(value);
    }
    fn on_decode_end(&mut self, layout: &Arc<Layout>) {
        self.layout = Some(Arc::clone(layout));
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let Some(layout) = self.layout.as_ref() else {
            return write!(f, "(bad {:#018x})", self.word);
        };
        write!(f, "{}", layout.key())?;
        let mut first = true;
        for (name, value) in self.fields() {
            if first {
                write!(f, " {}={}", name, value)?;
                first = false;
            } else {
                write!(f, ", {}={}", name, value)?;
            }
        }
        Ok(())
    }
}

impl LengthedInstruction for Instruction {
    type Unit = AddressDiff<<USSE as yaxpeax_arch::Arch>::Address>;
    fn min_size() -> Self::Unit {
        AddressDiff::from_const(8)
    }
    fn len(&self) -> Self::Unit {
        AddressDiff::from_const(8)
    }
}

impl yaxpeax_arch::Instruction for Instruction {
    fn well_defined(&self) -> bool {
        self.is_decoded()
    }
}

/// decode `word` against `registry`.
pub fn decode(word: u64, registry: &FormatRegistry) -> Result<Instruction, DecodeError> {
    registry.decode(word)
}

pub(crate) fn decode_inst<H: DecodeSink>(
    registry: &FormatRegistry,
    handler: &mut H,
    word: u64,
) -> Result<(), DecodeError> {
    handler.on_decode_start(word);

    // predicates are disjoint, so the first hit is the only one
    let root = match registry
        .roots
        .iter()
        .map(|&i| &registry.nodes[i])
        .find(|node| node.matches(word))
    {
        Some(root) => root,
        None => {
            trace!(word, "no format matched");
            return Err(DecodeError::UnknownFormat { word });
        }
    };
    handler.on_format_matched(&root.name);

    let mut node = root;
    loop {
        match &node.kind {
            NodeKind::Terminal(layout) => {
                for field in layout.fields() {
                    handler.on_field_decoded(field, field.descriptor.extract(word));
                }
                handler.on_decode_end(layout);
                return Ok(());
            }
            NodeKind::Branch { field, descriptor, cases } => {
                let value = descriptor.raw(word);
                let child = cases
                    .binary_search_by_key(&value, |(key, _)| *key)
                    .ok()
                    .map(|i| &registry.nodes[cases[i].1])
                    // a child's own fixed bits narrow further still
                    .filter(|child| child.matches(word));
                match child {
                    Some(child) => {
                        handler.on_discriminant(field, value);
                        node = child;
                    }
                    None => {
                        trace!(word, format = %root.name, field = %field, value, "no variant for discriminant");
                        return Err(DecodeError::UnknownDiscriminant {
                            format: root.name.clone(),
                            field: field.clone(),
                            value,
                            word,
                        });
                    }
                }
            }
        }
    }
}
