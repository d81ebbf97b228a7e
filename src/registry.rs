//! the immutable set of formats a decoder recognizes.
//!
//! [`FormatRegistry::build`] is the only way to get one. it refuses any table where two top-level
//! predicates could accept the same word, so decoding never needs a priority rule: the first
//! match in insertion order is the only match. everything after construction is read-only, and a
//! registry can be shared between threads freely.

use std::sync::Arc;

use tracing::debug;

use crate::decode::{decode_inst, DecodeSink, Instruction};
use crate::error::{ConstructionError, DecodeError};
use crate::field::FieldDescriptor;
use crate::format::{Field, FormatDefinition};

/// how many discriminants may be chained below one top-level format.
pub const MAX_DISCRIMINANT_DEPTH: usize = 8;

/// one resolved step of a discriminant chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiscriminantStep {
    pub field: Arc<str>,
    pub value: u64,
}

/// everything a terminal definition contributes to a decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub(crate) key: Arc<str>,
    pub(crate) format: Arc<str>,
    pub(crate) path: Vec<DiscriminantStep>,
    pub(crate) fields: Vec<Field>,
}

impl Layout {
    /// dispatch key: definition names from the top-level format down, joined with `.`.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn path(&self) -> &[DiscriminantStep] {
        &self.path
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }
}

#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) name: Arc<str>,
    pub(crate) mask: u64,
    pub(crate) value: u64,
    pub(crate) kind: NodeKind,
}

#[derive(Debug)]
pub(crate) enum NodeKind {
    Branch {
        field: Arc<str>,
        descriptor: FieldDescriptor,
        /// sorted by key.
        cases: Vec<(u64, usize)>,
    },
    Terminal(Arc<Layout>),
}

impl Node {
    pub(crate) fn matches(&self, word: u64) -> bool {
        word & self.mask == self.value
    }
}

#[derive(Debug)]
pub struct FormatRegistry {
    definitions: Vec<FormatDefinition>,
    pub(crate) roots: Vec<usize>,
    pub(crate) nodes: Vec<Node>,
    layouts: Vec<Arc<Layout>>,
}

impl FormatRegistry {
    pub fn build<I>(definitions: I) -> Result<FormatRegistry, ConstructionError>
    where
        I: IntoIterator<Item = FormatDefinition>,
    {
        let definitions: Vec<FormatDefinition> = definitions.into_iter().collect();

        for (i, def) in definitions.iter().enumerate() {
            check_name(def)?;
            check_predicate(def)?;
            if definitions[..i].iter().any(|other| other.name() == def.name()) {
                return Err(ConstructionError::DuplicateFormat(def.name().clone()));
            }
        }

        // (1) top-level predicates must be pairwise disjoint
        for (i, a) in definitions.iter().enumerate() {
            for b in &definitions[i + 1..] {
                let common = a.fixed_mask() & b.fixed_mask();
                if (a.fixed_value() ^ b.fixed_value()) & common == 0 {
                    return Err(ConstructionError::AmbiguousFormats {
                        first: a.name().clone(),
                        second: b.name().clone(),
                        witness: a.fixed_value() | b.fixed_value(),
                    });
                }
            }
        }

        // (2) discriminant chains are finite, narrowing, and keyed and named uniquely
        for def in &definitions {
            check_chain(def, def, 0, &mut Vec::new())?;
        }

        // (3) fields are in range and do not alias, then compile
        let mut registry = FormatRegistry {
            definitions: Vec::new(),
            roots: Vec::new(),
            nodes: Vec::new(),
            layouts: Vec::new(),
        };
        for def in &definitions {
            let root = registry.compile(def, def, &Scope::default())?;
            registry.roots.push(root);
        }
        registry.definitions = definitions;

        debug!(
            formats = registry.roots.len(),
            variants = registry.layouts.len(),
            "built format registry"
        );

        Ok(registry)
    }

    fn compile(
        &mut self,
        top: &FormatDefinition,
        def: &FormatDefinition,
        parent: &Scope,
    ) -> Result<usize, ConstructionError> {
        if !std::ptr::eq(top, def) {
            check_predicate(def)?;
            // a child must agree with every bit already fixed on the way to it
            let common = def.fixed_mask() & parent.fixed_mask;
            if (def.fixed_value() ^ parent.fixed_value) & common != 0 {
                return Err(ConstructionError::UnreachableVariant {
                    format: top.name().clone(),
                    variant: def.name().clone(),
                });
            }
        }

        let mut scope = parent.clone();
        scope.fixed_mask |= def.fixed_mask();
        scope.fixed_value |= def.fixed_value();
        scope.key = if parent.key.is_empty() {
            def.name().to_string()
        } else {
            format!("{}.{}", parent.key, def.name())
        };

        for field in def.fields() {
            scope.add_field(def, field)?;
        }

        let kind = match def.discriminant() {
            None => {
                let layout = Arc::new(Layout {
                    key: scope.key.as_str().into(),
                    format: top.name().clone(),
                    path: scope.path.clone(),
                    fields: scope.fields.clone(),
                });
                self.layouts.push(Arc::clone(&layout));
                NodeKind::Terminal(layout)
            }
            Some(discriminant) => {
                let selector = scope
                    .fields
                    .iter()
                    .find(|f| f.name == *discriminant.field())
                    .ok_or_else(|| ConstructionError::UnknownDiscriminantField {
                        format: def.name().clone(),
                        field: discriminant.field().clone(),
                    })?
                    .clone();
                if selector.descriptor.is_signed() {
                    return Err(ConstructionError::SignedDiscriminant {
                        format: def.name().clone(),
                        field: selector.name,
                    });
                }

                let width = selector.descriptor.width();
                let mut cases = Vec::with_capacity(discriminant.cases().len());
                for (value, child) in discriminant.cases() {
                    if width < 64 && value >> width != 0 {
                        return Err(ConstructionError::DiscriminantKeyOutOfRange {
                            format: def.name().clone(),
                            field: selector.name.clone(),
                            value: *value,
                        });
                    }
                    let mut child_scope = scope.clone();
                    // the selecting key pins the discriminant's bits for this child
                    child_scope.fixed_mask |= selector.descriptor.mask();
                    child_scope.fixed_value |= value << selector.descriptor.offset();
                    child_scope.path.push(DiscriminantStep {
                        field: selector.name.clone(),
                        value: *value,
                    });
                    let index = self.compile(top, child, &child_scope)?;
                    cases.push((*value, index));
                }
                cases.sort_by_key(|(value, _)| *value);

                NodeKind::Branch {
                    field: selector.name,
                    descriptor: selector.descriptor,
                    cases,
                }
            }
        };

        self.nodes.push(Node {
            name: def.name().clone(),
            mask: def.fixed_mask(),
            value: def.fixed_value(),
            kind,
        });
        Ok(self.nodes.len() - 1)
    }

    /// parse a JSON format table and build it. see [`crate::table`].
    pub fn from_json(json: &str) -> Result<FormatRegistry, crate::error::TableError> {
        let definitions = crate::table::parse_table(json)?;
        Ok(FormatRegistry::build(definitions)?)
    }

    pub fn decode(&self, word: u64) -> Result<Instruction, DecodeError> {
        let mut inst = Instruction::default();
        decode_inst(self, &mut inst, word)?;
        Ok(inst)
    }

    /// run the decode engine, reporting progress to `sink` instead of building an instruction.
    pub fn decode_with<S: DecodeSink>(&self, word: u64, sink: &mut S) -> Result<(), DecodeError> {
        decode_inst(self, sink, word)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// top-level format names, in insertion order.
    pub fn format_names(&self) -> impl Iterator<Item = &str> {
        self.definitions.iter().map(|d| d.name().as_ref())
    }

    pub fn get(&self, name: &str) -> Option<&FormatDefinition> {
        self.definitions.iter().find(|d| d.name().as_ref() == name)
    }

    pub fn definitions(&self) -> &[FormatDefinition] {
        &self.definitions
    }

    /// every terminal layout, in the order they were compiled.
    pub fn layouts(&self) -> &[Arc<Layout>] {
        &self.layouts
    }

    /// every key a decoded instruction can carry, plus every intermediate prefix of one. these are
    /// the keys a handler table can usefully register.
    pub fn variant_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = Vec::new();
        for layout in &self.layouts {
            let key: &str = &layout.key;
            let mut end = key.len();
            loop {
                let prefix = &key[..end];
                if !keys.contains(&prefix) {
                    keys.push(prefix);
                }
                match prefix.rfind('.') {
                    Some(dot) => end = dot,
                    None => break,
                }
            }
        }
        keys
    }

    /// how many top-level predicates accept `word`. construction guarantees this is 0 or 1.
    pub fn match_candidates(&self, word: u64) -> usize {
        self.definitions.iter().filter(|d| d.matches(word)).count()
    }
}

#[derive(Debug, Clone, Default)]
struct Scope {
    key: String,
    fixed_mask: u64,
    fixed_value: u64,
    fields: Vec<Field>,
    path: Vec<DiscriminantStep>,
}

impl Scope {
    fn add_field(&mut self, def: &FormatDefinition, field: &Field) -> Result<(), ConstructionError> {
        let descriptor = field.descriptor;
        if !descriptor.is_valid() {
            return Err(ConstructionError::InvalidField {
                format: def.name().clone(),
                field: field.name.clone(),
                offset: descriptor.offset() as u32,
                width: descriptor.width() as u32,
            });
        }
        for existing in &self.fields {
            if existing.name == field.name {
                return Err(ConstructionError::DuplicateField {
                    format: def.name().clone(),
                    field: field.name.clone(),
                });
            }
            if existing.descriptor.overlaps(&descriptor) {
                return Err(ConstructionError::OverlappingFields {
                    format: def.name().clone(),
                    first: existing.name.clone(),
                    second: field.name.clone(),
                });
            }
        }
        // a field may re-expose fixed bits, but only all of them or none
        let fixed = descriptor.mask() & self.fixed_mask;
        if fixed != 0 && fixed != descriptor.mask() {
            return Err(ConstructionError::AliasedField {
                format: def.name().clone(),
                field: field.name.clone(),
            });
        }
        self.fields.push(field.clone());
        Ok(())
    }
}

/// names are joined with `.` into dispatch keys, so they may not contain one.
fn check_name(def: &FormatDefinition) -> Result<(), ConstructionError> {
    if def.name().is_empty() || def.name().contains('.') {
        return Err(ConstructionError::InvalidName { name: def.name().clone() });
    }
    Ok(())
}

fn check_predicate(def: &FormatDefinition) -> Result<(), ConstructionError> {
    if def.fixed_value() & !def.fixed_mask() != 0 {
        return Err(ConstructionError::InvalidPredicate {
            format: def.name().clone(),
            mask: def.fixed_mask(),
            value: def.fixed_value(),
        });
    }
    Ok(())
}

fn check_chain<'a>(
    top: &FormatDefinition,
    def: &'a FormatDefinition,
    depth: usize,
    used: &mut Vec<&'a str>,
) -> Result<(), ConstructionError> {
    let Some(discriminant) = def.discriminant() else {
        return Ok(());
    };
    if depth >= MAX_DISCRIMINANT_DEPTH {
        return Err(ConstructionError::DiscriminantTooDeep {
            format: top.name().clone(),
            max: MAX_DISCRIMINANT_DEPTH,
        });
    }
    let field: &str = discriminant.field();
    if used.contains(&field) {
        return Err(ConstructionError::RedundantDiscriminant {
            format: def.name().clone(),
            field: discriminant.field().clone(),
        });
    }
    for (i, (value, child)) in discriminant.cases().iter().enumerate() {
        check_name(child)?;
        let earlier = &discriminant.cases()[..i];
        if earlier.iter().any(|(other, _)| other == value) {
            return Err(ConstructionError::DuplicateDiscriminantKey {
                format: def.name().clone(),
                field: discriminant.field().clone(),
                value: *value,
            });
        }
        // siblings with one name would share a dispatch key
        if earlier.iter().any(|(_, other)| other.name() == child.name()) {
            return Err(ConstructionError::DuplicateVariant {
                format: def.name().clone(),
                field: discriminant.field().clone(),
                variant: child.name().clone(),
            });
        }
    }
    used.push(field);
    for (_, child) in discriminant.cases() {
        check_chain(top, child, depth + 1, used)?;
    }
    used.pop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{Discriminant, LayoutBuilder};

    fn op(name: &str, pattern: &str) -> FormatDefinition {
        FormatDefinition::layout(name)
            .fixed("op", pattern)
            .field("payload", 8)
            .build()
            .expect("valid layout")
    }

    #[test]
    fn disjoint_formats_build() {
        let registry = FormatRegistry::build(vec![op("a", "00"), op("b", "01"), op("c", "1")])
            .expect("disjoint");
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.format_names().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(registry.variant_keys(), vec!["a", "b", "c"]);
    }

    #[test]
    fn overlapping_predicates_are_rejected_with_a_witness() {
        // `1` (one bit) and `10` (two bits) both accept 0b10 << 62
        let err = FormatRegistry::build(vec![op("wide", "1"), op("narrow", "10")])
            .expect_err("ambiguous");
        match err {
            ConstructionError::AmbiguousFormats { first, second, witness } => {
                assert_eq!(&*first, "wide");
                assert_eq!(&*second, "narrow");
                assert_eq!(witness >> 62, 0b10);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn an_empty_predicate_collides_with_everything() {
        let anything = FormatDefinition::new("anything", 0, 0);
        let err = FormatRegistry::build(vec![op("a", "00"), anything]).expect_err("ambiguous");
        assert!(matches!(err, ConstructionError::AmbiguousFormats { .. }));
    }

    #[test]
    fn predicate_value_outside_mask() {
        let bad = FormatDefinition::new("bad", 0xf0, 0x0f);
        assert!(matches!(
            FormatRegistry::build(vec![bad]),
            Err(ConstructionError::InvalidPredicate { .. })
        ));
    }

    #[test]
    fn duplicate_names() {
        let err = FormatRegistry::build(vec![op("a", "00"), op("a", "01")]).expect_err("dup");
        assert_eq!(err, ConstructionError::DuplicateFormat("a".into()));
    }

    #[test]
    fn field_checks() {
        let out_of_range = FormatDefinition::new("f", 0, 0)
            .with_field("x", FieldDescriptor::unsigned(62, 4));
        assert!(matches!(
            FormatRegistry::build(vec![out_of_range]),
            Err(ConstructionError::InvalidField { .. })
        ));

        let overlapping = FormatDefinition::new("f", 0, 0)
            .with_field("x", FieldDescriptor::unsigned(0, 4))
            .with_field("y", FieldDescriptor::unsigned(3, 4));
        assert!(matches!(
            FormatRegistry::build(vec![overlapping]),
            Err(ConstructionError::OverlappingFields { .. })
        ));

        let aliased = FormatDefinition::new("f", 0b1100, 0b0100)
            .with_field("x", FieldDescriptor::unsigned(1, 2));
        assert!(matches!(
            FormatRegistry::build(vec![aliased]),
            Err(ConstructionError::AliasedField { .. })
        ));

        let reexposed = FormatDefinition::new("f", 0b1100, 0b0100)
            .with_field("x", FieldDescriptor::unsigned(2, 2));
        assert!(FormatRegistry::build(vec![reexposed]).is_ok());
    }

    #[test]
    fn discriminant_checks() {
        let dup_key = FormatDefinition::layout("f")
            .field("kind", 2)
            .discriminant("kind", [(1, LayoutBuilder::new("x")), (1, LayoutBuilder::new("y"))])
            .build()
            .expect("layout is fine, keys are checked later");
        assert!(matches!(
            FormatRegistry::build(vec![dup_key]),
            Err(ConstructionError::DuplicateDiscriminantKey { value: 1, .. })
        ));

        let too_big = FormatDefinition::layout("f")
            .field("kind", 2)
            .discriminant("kind", [(4, LayoutBuilder::new("x"))])
            .build()
            .expect("layout");
        assert!(matches!(
            FormatRegistry::build(vec![too_big]),
            Err(ConstructionError::DiscriminantKeyOutOfRange { value: 4, .. })
        ));

        let missing = FormatDefinition::layout("f")
            .field("kind", 2)
            .discriminant("sort", [(0, LayoutBuilder::new("x"))])
            .build()
            .expect("layout");
        assert!(matches!(
            FormatRegistry::build(vec![missing]),
            Err(ConstructionError::UnknownDiscriminantField { .. })
        ));

        let signed = FormatDefinition::layout("f")
            .signed("kind", 2)
            .discriminant("kind", [(0, LayoutBuilder::new("x"))])
            .build()
            .expect("layout");
        assert!(matches!(
            FormatRegistry::build(vec![signed]),
            Err(ConstructionError::SignedDiscriminant { .. })
        ));

        let again = FormatDefinition::layout("f")
            .field("kind", 2)
            .discriminant(
                "kind",
                [(0, LayoutBuilder::new("x").discriminant("kind", [(0, LayoutBuilder::new("y"))]))],
            )
            .build()
            .expect("layout");
        assert!(matches!(
            FormatRegistry::build(vec![again]),
            Err(ConstructionError::RedundantDiscriminant { .. })
        ));
    }

    #[test]
    fn names_must_not_split_into_other_keys() {
        // `a.b` would dispatch to a handler for `a`
        let err = FormatRegistry::build(vec![op("a", "0"), op("a.b", "1")]).expect_err("dotted name");
        assert_eq!(err, ConstructionError::InvalidName { name: "a.b".into() });

        let err = FormatRegistry::build(vec![op("", "0")]).expect_err("empty name");
        assert_eq!(err, ConstructionError::InvalidName { name: "".into() });

        let nested = FormatDefinition::layout("t")
            .field("kind", 1)
            .discriminant("kind", [(0, LayoutBuilder::new("x.y"))])
            .build()
            .expect("layout");
        assert!(matches!(
            FormatRegistry::build(vec![nested]),
            Err(ConstructionError::InvalidName { .. })
        ));
    }

    #[test]
    fn sibling_variants_need_distinct_names() {
        let def = FormatDefinition::layout("t")
            .field("kind", 1)
            .discriminant("kind", [(0, LayoutBuilder::new("x")), (1, LayoutBuilder::new("x"))])
            .build()
            .expect("layout");
        match FormatRegistry::build(vec![def]) {
            Err(ConstructionError::DuplicateVariant { format, field, variant }) => {
                assert_eq!(&*format, "t");
                assert_eq!(&*field, "kind");
                assert_eq!(&*variant, "x");
            }
            other => panic!("unexpected {:?}", other),
        }

        // the same name under different parents is fine
        let def = FormatDefinition::layout("t")
            .field("kind", 1)
            .field("sub", 1)
            .discriminant(
                "kind",
                [
                    (0, LayoutBuilder::new("p").discriminant("sub", [(0, LayoutBuilder::new("x"))])),
                    (1, LayoutBuilder::new("q").discriminant("sub", [(0, LayoutBuilder::new("x"))])),
                ],
            )
            .build()
            .expect("layout");
        let registry = FormatRegistry::build(vec![def]).expect("distinct keys");
        assert_eq!(registry.variant_keys(), vec!["t.p.x", "t.p", "t", "t.q.x", "t.q"]);
    }

    #[test]
    fn variants_must_be_reachable() {
        // the parent fixes bit 63 to 1, the child wants it 0
        let def = FormatDefinition::new("t", 1 << 63, 1 << 63)
            .with_field("kind", FieldDescriptor::unsigned(0, 1))
            .with_discriminant(Discriminant::new("kind", vec![(0, FormatDefinition::new("c", 1 << 63, 0))]));
        match FormatRegistry::build(vec![def]) {
            Err(ConstructionError::UnreachableVariant { format, variant }) => {
                assert_eq!(&*format, "t");
                assert_eq!(&*variant, "c");
            }
            other => panic!("unexpected {:?}", other),
        }

        // selected by kind = 0, but fixes kind's bit to 1
        let def = FormatDefinition::new("t", 0, 0)
            .with_field("kind", FieldDescriptor::unsigned(0, 1))
            .with_discriminant(Discriminant::new("kind", vec![(0, FormatDefinition::new("c", 1, 1))]));
        assert!(matches!(
            FormatRegistry::build(vec![def]),
            Err(ConstructionError::UnreachableVariant { .. })
        ));

        // agreeing with the selecting key is allowed
        let def = FormatDefinition::new("t", 0, 0)
            .with_field("kind", FieldDescriptor::unsigned(0, 1))
            .with_discriminant(Discriminant::new("kind", vec![(1, FormatDefinition::new("c", 1, 1))]));
        let registry = FormatRegistry::build(vec![def]).expect("reachable");
        assert_eq!(registry.decode(1).expect("decodes").key(), "t.c");
    }

    #[test]
    fn chains_have_a_depth_limit() {
        // one single-bit selector per level, each level nested in the previous one's case 0
        let mut def = FormatDefinition::new("leaf", 0, 0);
        for level in (0..=MAX_DISCRIMINANT_DEPTH).rev() {
            let name = format!("b{}", level);
            def = FormatDefinition::new(name.as_str(), 0, 0)
                .with_field(name.as_str(), FieldDescriptor::unsigned(level as u8, 1))
                .with_discriminant(Discriminant::new(name.as_str(), vec![(0, def)]));
        }
        assert!(matches!(
            FormatRegistry::build(vec![def]),
            Err(ConstructionError::DiscriminantTooDeep { .. })
        ));
    }

    #[test]
    fn nested_keys_and_paths() {
        let def = FormatDefinition::layout("top")
            .fixed("op", "1")
            .field("kind", 2)
            .discriminant(
                "kind",
                [
                    (0, LayoutBuilder::new("zero").field_at("imm", 0, 8)),
                    (
                        2,
                        LayoutBuilder::new("two")
                            .field_at("sub", 60, 1)
                            .discriminant("sub", [(1, LayoutBuilder::new("one"))]),
                    ),
                ],
            )
            .build()
            .expect("layout");
        let registry = FormatRegistry::build(vec![def]).expect("valid");
        assert_eq!(registry.variant_keys(), vec!["top.zero", "top", "top.two.one", "top.two"]);

        let layout = registry
            .layouts()
            .iter()
            .find(|l| l.key() == "top.two.one")
            .expect("compiled");
        assert_eq!(layout.format(), "top");
        assert_eq!(
            layout.path().iter().map(|s| (&*s.field, s.value)).collect::<Vec<_>>(),
            vec![("kind", 2), ("sub", 1)]
        );
        assert_eq!(
            layout.fields().iter().map(|f| &*f.name).collect::<Vec<_>>(),
            vec!["op", "kind", "sub"]
        );
    }
}
