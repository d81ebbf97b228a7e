//! route decoded instructions to caller-supplied handlers.
//!
//! a [`HandlerTable`] maps dispatch keys to callbacks. keys are the dot-separated definition
//! names an [`Instruction`] resolved through (`spec`, `spec.misc`, `spec.misc.halt`), and lookup
//! walks from the most specific key back toward the format name: a handler for `spec` sees every
//! `spec` variant that has no handler of its own.

use core::fmt;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use crate::decode::Instruction;
use crate::error::DispatchError;

/// a typed view of one format's fields.
pub trait FormatView: Sized {
    /// the top-level format this view reads.
    const FORMAT: &'static str;

    fn from_instruction(inst: &Instruction) -> Option<Self>;
}

type Handler<R> = Box<dyn Fn(&Instruction) -> Result<R, DispatchError> + Send + Sync>;

pub struct HandlerTable<R> {
    handlers: HashMap<Arc<str>, Handler<R>>,
}

pub struct HandlerTableBuilder<R> {
    handlers: HashMap<Arc<str>, Handler<R>>,
}

impl<R> HandlerTable<R> {
    pub fn builder() -> HandlerTableBuilder<R> {
        HandlerTableBuilder { handlers: HashMap::new() }
    }

    fn lookup(&self, key: &str) -> Option<&Handler<R>> {
        let mut key = key;
        loop {
            if let Some(handler) = self.handlers.get(key) {
                return Some(handler);
            }
            match key.rfind('.') {
                Some(dot) => key = &key[..dot],
                None => return None,
            }
        }
    }

    /// true if dispatching an instruction with this key would reach a handler.
    pub fn is_handled(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    /// invoke the handler for `inst` exactly once and hand back what it returned. an instruction
    /// that never decoded reaches no handler.
    pub fn dispatch(&self, inst: &Instruction) -> Result<R, DispatchError> {
        if !inst.is_decoded() {
            trace!(word = inst.word(), "dispatch of an undecoded instruction");
            return Err(DispatchError::Undecoded { word: inst.word() });
        }
        match self.lookup(inst.key()) {
            Some(handler) => handler(inst),
            None => {
                trace!(key = inst.key(), "no handler");
                Err(DispatchError::UnhandledFormat { key: inst.key().into() })
            }
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(|k| k.as_ref())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<R> fmt::Debug for HandlerTable<R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut keys: Vec<&str> = self.keys().collect();
        keys.sort_unstable();
        f.debug_struct("HandlerTable").field("keys", &keys).finish()
    }
}

impl<R: 'static> HandlerTableBuilder<R> {
    /// register `handler` for `key`. a later registration for the same key replaces an earlier one.
    pub fn on<F>(mut self, key: &str, handler: F) -> Self
    where
        F: Fn(&Instruction) -> R + Send + Sync + 'static,
    {
        self.handlers.insert(key.into(), Box::new(move |inst: &Instruction| Ok(handler(inst))));
        self
    }

    /// register a handler that takes `V` rather than the raw field list. registered under
    /// `V::FORMAT`, so it covers every variant of that format.
    pub fn on_view<V, F>(mut self, handler: F) -> Self
    where
        V: FormatView + 'static,
        F: Fn(&V) -> R + Send + Sync + 'static,
    {
        self.handlers.insert(
            V::FORMAT.into(),
            Box::new(move |inst: &Instruction| match V::from_instruction(inst) {
                Some(view) => Ok(handler(&view)),
                None => Err(DispatchError::ViewMismatch {
                    key: inst.key().into(),
                    view: std::any::type_name::<V>(),
                }),
            }),
        );
        self
    }

    pub fn build(self) -> HandlerTable<R> {
        HandlerTable { handlers: self.handlers }
    }
}

pub fn dispatch<R>(inst: &Instruction, handlers: &HandlerTable<R>) -> Result<R, DispatchError> {
    handlers.dispatch(inst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{FormatDefinition, LayoutBuilder};
    use crate::registry::FormatRegistry;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registry() -> FormatRegistry {
        let tree = FormatDefinition::layout("tree")
            .fixed("op", "1")
            .field("kind", 1)
            .discriminant(
                "kind",
                [(0, LayoutBuilder::new("leaf")), (1, LayoutBuilder::new("branch").field_at("n", 58, 4))],
            )
            .build()
            .expect("layout");
        let flat = FormatDefinition::layout("flat").fixed("op", "0").field("n", 4).build().expect("layout");
        FormatRegistry::build(vec![tree, flat]).expect("disjoint")
    }

    #[test]
    fn most_specific_key_wins() {
        let registry = registry();
        let table = HandlerTable::builder()
            .on("tree", |_| "tree")
            .on("tree.branch", |_| "branch")
            .build();

        let branch = registry.decode(0b11 << 62).expect("decodes");
        let leaf = registry.decode(0b10 << 62).expect("decodes");
        let flat = registry.decode(0).expect("decodes");
        assert_eq!(dispatch(&branch, &table), Ok("branch"));
        assert_eq!(dispatch(&leaf, &table), Ok("tree"));
        assert_eq!(
            dispatch(&flat, &table),
            Err(DispatchError::UnhandledFormat { key: "flat".into() })
        );
        assert!(table.is_handled("tree.leaf"));
        assert!(!table.is_handled("flat"));
    }

    #[test]
    fn undecoded_instructions_reach_no_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let table = HandlerTable::builder()
            .on("", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .build();
        assert_eq!(
            table.dispatch(&Instruction::default()),
            Err(DispatchError::Undecoded { word: 0 })
        );

        // lookup stops at the format name, never at ""
        let flat = registry().decode(0).expect("decodes");
        assert_eq!(
            table.dispatch(&flat),
            Err(DispatchError::UnhandledFormat { key: "flat".into() })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn handlers_run_once() {
        let registry = registry();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let table = HandlerTable::builder()
            .on("flat", move |inst| {
                counter.fetch_add(1, Ordering::SeqCst);
                inst.get::<u8>("n")
            })
            .build();
        let inst = registry.decode(0b0_1001 << 59).expect("decodes");
        assert_eq!(table.dispatch(&inst), Ok(Some(0b1001)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    struct Branch {
        n: u8,
    }

    impl FormatView for Branch {
        const FORMAT: &'static str = "tree";
        fn from_instruction(inst: &Instruction) -> Option<Self> {
            Some(Branch { n: inst.get("n")? })
        }
    }

    #[test]
    fn typed_views() {
        let registry = registry();
        let table = HandlerTable::builder().on_view(|b: &Branch| b.n as u32).build();
        let branch = registry.decode((0b11 << 62) | (0b0110 << 58)).expect("decodes");
        assert_eq!(table.dispatch(&branch), Ok(6));

        // `leaf` has no `n`, so the view cannot be built
        let leaf = registry.decode(0b10 << 62).expect("decodes");
        assert!(matches!(
            table.dispatch(&leaf),
            Err(DispatchError::ViewMismatch { .. })
        ));
    }
}
