//! declarative instruction formats.
//!
//! a [`FormatDefinition`] is a named predicate (`word & fixed_mask == fixed_value`), the fields
//! it exposes, and optionally a [`Discriminant`]: a field whose value picks one of several child
//! definitions. children narrow their parent, may add fields of their own, and may discriminate
//! again, so `spec` words are told apart first by `category` and then, for one category, by
//! `special`.
//!
//! definitions are usually written with [`LayoutBuilder`], which lays members out from bit 63
//! downward the same way the opcode tables describe them: a bit string is a fixed member, a width
//! is a plain field, and an explicit offset skips over don't-care bits.

use std::sync::Arc;

use crate::error::ConstructionError;
use crate::field::FieldDescriptor;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Field {
    pub name: Arc<str>,
    pub descriptor: FieldDescriptor,
}

impl Field {
    pub fn new(name: impl Into<Arc<str>>, descriptor: FieldDescriptor) -> Self {
        Field { name: name.into(), descriptor }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDefinition {
    name: Arc<str>,
    fixed_mask: u64,
    fixed_value: u64,
    fields: Vec<Field>,
    discriminant: Option<Discriminant>,
}

/// a field whose value selects among child definitions.
///
/// cases are kept as a list rather than a map so that a repeated key survives until
/// [`FormatRegistry::build`](crate::FormatRegistry::build) can report it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discriminant {
    field: Arc<str>,
    cases: Vec<(u64, FormatDefinition)>,
}

impl Discriminant {
    pub fn new(field: impl Into<Arc<str>>, cases: Vec<(u64, FormatDefinition)>) -> Self {
        Discriminant { field: field.into(), cases }
    }

    pub fn field(&self) -> &Arc<str> {
        &self.field
    }

    pub fn cases(&self) -> &[(u64, FormatDefinition)] {
        &self.cases
    }
}

impl FormatDefinition {
    pub fn new(name: impl Into<Arc<str>>, fixed_mask: u64, fixed_value: u64) -> Self {
        FormatDefinition {
            name: name.into(),
            fixed_mask,
            fixed_value,
            fields: Vec::new(),
            discriminant: None,
        }
    }

    /// start an MSB-first layout; see [`LayoutBuilder`].
    pub fn layout(name: impl Into<Arc<str>>) -> LayoutBuilder {
        LayoutBuilder::new(name)
    }

    pub fn with_field(mut self, name: impl Into<Arc<str>>, descriptor: FieldDescriptor) -> Self {
        self.fields.push(Field::new(name, descriptor));
        self
    }

    pub fn with_discriminant(mut self, discriminant: Discriminant) -> Self {
        self.discriminant = Some(discriminant);
        self
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn fixed_mask(&self) -> u64 {
        self.fixed_mask
    }

    pub fn fixed_value(&self) -> u64 {
        self.fixed_value
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn discriminant(&self) -> Option<&Discriminant> {
        self.discriminant.as_ref()
    }

    pub fn matches(&self, word: u64) -> bool {
        word & self.fixed_mask == self.fixed_value
    }
}

/// lays out a [`FormatDefinition`] from the most significant bit down.
///
/// every member occupies the bits directly below the previous one unless it names an explicit
/// offset (its least significant bit), in which case the bits in between are don't-care. bits
/// below the last member are don't-care as well. the first layout mistake is kept and reported
/// by [`LayoutBuilder::build`]; later calls are ignored once one has happened.
#[derive(Debug, Clone)]
pub struct LayoutBuilder {
    name: Arc<str>,
    cursor: u32,
    fixed_mask: u64,
    fixed_value: u64,
    fields: Vec<Field>,
    discriminant: Option<Discriminant>,
    error: Option<ConstructionError>,
}

impl LayoutBuilder {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        LayoutBuilder {
            name: name.into(),
            cursor: 64,
            fixed_mask: 0,
            fixed_value: 0,
            fields: Vec::new(),
            discriminant: None,
            error: None,
        }
    }

    /// a member whose bits must equal `pattern` (MSB first, `0`/`1` only). the member is also
    /// readable as a field.
    pub fn fixed(self, name: &str, pattern: &str) -> Self {
        self.member(name, None, pattern.len() as u32, false, Some(pattern))
    }

    pub fn fixed_at(self, name: &str, offset: u32, pattern: &str) -> Self {
        self.member(name, Some(offset), pattern.len() as u32, false, Some(pattern))
    }

    pub fn field(self, name: &str, width: u32) -> Self {
        self.member(name, None, width, false, None)
    }

    pub fn field_at(self, name: &str, offset: u32, width: u32) -> Self {
        self.member(name, Some(offset), width, false, None)
    }

    pub fn signed(self, name: &str, width: u32) -> Self {
        self.member(name, None, width, true, None)
    }

    pub fn signed_at(self, name: &str, offset: u32, width: u32) -> Self {
        self.member(name, Some(offset), width, true, None)
    }

    /// the general form every other member method funnels into.
    pub fn member(
        mut self,
        name: &str,
        offset: Option<u32>,
        width: u32,
        signed: bool,
        pattern: Option<&str>,
    ) -> Self {
        if self.error.is_some() {
            return self;
        }

        if width == 0 || width > 64 {
            self.error = Some(ConstructionError::InvalidField {
                format: self.name.clone(),
                field: name.into(),
                offset: offset.unwrap_or(0),
                width,
            });
            return self;
        }

        let lsb = match offset {
            Some(offset) => {
                if offset.saturating_add(width) > 64 {
                    self.error = Some(ConstructionError::InvalidField {
                        format: self.name.clone(),
                        field: name.into(),
                        offset,
                        width,
                    });
                    return self;
                }
                if offset + width > self.cursor {
                    self.error = Some(ConstructionError::MemberOverlap {
                        format: self.name.clone(),
                        member: name.into(),
                    });
                    return self;
                }
                offset
            }
            None => {
                if width > self.cursor {
                    // the layout ran off the bottom of the word
                    self.error = Some(ConstructionError::InvalidField {
                        format: self.name.clone(),
                        field: name.into(),
                        offset: 0,
                        width,
                    });
                    return self;
                }
                self.cursor - width
            }
        };

        let descriptor = if signed {
            FieldDescriptor::signed(lsb as u8, width as u8)
        } else {
            FieldDescriptor::unsigned(lsb as u8, width as u8)
        };

        if let Some(pattern) = pattern {
            match parse_pattern(pattern, width) {
                Some(bits) => {
                    self.fixed_mask |= descriptor.mask();
                    self.fixed_value |= bits << lsb;
                }
                None => {
                    self.error = Some(ConstructionError::BadPattern {
                        format: self.name.clone(),
                        member: name.into(),
                        pattern: pattern.to_string(),
                    });
                    return self;
                }
            }
        }

        self.fields.push(Field::new(name, descriptor));
        self.cursor = lsb;
        self
    }

    /// select a child layout by the value of `field`.
    pub fn discriminant<I>(mut self, field: &str, cases: I) -> Self
    where
        I: IntoIterator<Item = (u64, LayoutBuilder)>,
    {
        if self.error.is_some() {
            return self;
        }
        let mut built = Vec::new();
        for (value, child) in cases {
            match child.build() {
                Ok(child) => built.push((value, child)),
                Err(e) => {
                    self.error = Some(e);
                    return self;
                }
            }
        }
        self.discriminant = Some(Discriminant::new(field, built));
        self
    }

    pub fn build(self) -> Result<FormatDefinition, ConstructionError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        Ok(FormatDefinition {
            name: self.name,
            fixed_mask: self.fixed_mask,
            fixed_value: self.fixed_value,
            fields: self.fields,
            discriminant: self.discriminant,
        })
    }
}

/// `"10110"` to its value, MSB first. `None` if the string is not exactly `width` binary digits.
fn parse_pattern(pattern: &str, width: u32) -> Option<u64> {
    if pattern.len() as u32 != width {
        return None;
    }
    let mut value = 0u64;
    for c in pattern.bytes() {
        value = (value << 1)
            | match c {
                b'0' => 0,
                b'1' => 1,
                _ => return None,
            };
    }
    Some(value)
}
