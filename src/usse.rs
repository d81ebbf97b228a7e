//! the USSE instruction formats this crate knows out of the box, and typed views over them.
//!
//! every format keeps its major opcode in `op1`, bits 63..59. `phas` and `spec` share
//! `op1 = 0b11111` and are told apart by `phase_select` (bit 49). `spec` is narrowed again by
//! `category`, and category 3 (`misc`) once more by `special`.

use crate::decode::Instruction;
use crate::dispatch::FormatView;
use crate::error::{ConstructionError, DispatchError};
use crate::format::{FormatDefinition, LayoutBuilder};
use crate::registry::FormatRegistry;

pub fn vmov() -> LayoutBuilder {
    FormatDefinition::layout("vmov")
        .fixed("op1", "00111")
        .field("pred", 3)
        .field("skipinv", 1)
        .field("test_bit_2", 1)
        .field("src0_comp_sel", 1)
        .field("syncstart", 1)
        .field("dest_bank_ext", 1)
        .field("end_or_src0_bank_ext", 1)
        .field("src1_bank_ext", 1)
        .field("src2_bank_ext", 1)
        .field("move_type", 3)
        .field("repeat_count", 2)
        .field("nosched", 1)
        .field("move_data_type", 3)
        .field("test_bit_1", 1)
        .field("src0_swiz", 3)
        .field("src0_bank_sel", 1)
        .field("dest_bank_sel", 2)
        .field("src1_bank_sel", 2)
        .field("src2_bank_sel", 2)
        .field("dest_mask", 4)
        .field("dest_n", 6)
        .field("src0_n", 6)
        .field("src1_n", 6)
        .field("src2_n", 6)
}

pub fn vmadsi() -> LayoutBuilder {
    FormatDefinition::layout("vmadsi")
        .fixed("op1", "00000")
        .field("pred", 3)
        .field("skipinv", 1)
        .field("gpi1_swiz_ext", 1)
        .field("dest_use_bank", 1)
        .field("end", 1)
        .field("src1_bank_ext", 1)
        .field("src2_bank_ext", 1)
        .field("increment_mode", 2)
        .field("gpi0_abs", 1)
        .field("repeat_count", 2)
        .field("nosched", 1)
        .field("write_mask", 4)
        .field("src1_neg", 1)
        .field("src1_abs", 1)
        .field("gpi1_neg", 1)
        .field("gpi1_abs", 1)
        .field("gpi0_swiz_ext", 1)
        .field("dest_bank", 2)
        .field("src1_bank", 2)
        .field("src2_bank", 2)
        .field("dest_n", 6)
        .field("gpi1_swiz", 4)
        .field("gpi0_swiz", 4)
        .field("gpi0_n", 2)
        .field("gpi1_n", 2)
        .field("src1_n", 5)
        .field("src2_n", 6)
}

pub fn vmad4() -> LayoutBuilder {
    // low six bits are unused
    FormatDefinition::layout("vmad4")
        .fixed("op1", "00001")
        .field("pred", 3)
        .field("skipinv", 1)
        .field("src1_swiz_bit2", 1)
        .field("syncstart", 1)
        .field("dest_bank_ext", 1)
        .field("src1_swiz_bit1", 1)
        .field("src1_bank_ext", 1)
        .field("src2_bank_ext", 1)
        .field("src2_swiz", 4)
        .field("nosched", 1)
        .field("dest_mask", 4)
        .field("src1_mod", 2)
        .field("src2_mod", 1)
        .field("src1_swiz_bit0", 1)
        .field("dest_bank_sel", 2)
        .field("src1_bank_sel", 2)
        .field("src2_bank_sel", 2)
        .field("dest_n", 6)
        .field("src0_n", 6)
        .field("src1_n", 6)
        .field("src2_n", 6)
}

pub fn phas() -> LayoutBuilder {
    FormatDefinition::layout("phas")
        .fixed("op1", "11111")
        .field("end", 1)
        .field("imm", 1)
        .field("src1_bank_ext", 1)
        .field("mode", 1)
        .field("rate_hi", 1)
        .field("rate_lo_or_nosched", 1)
        .field("wait_cond", 3)
        .fixed("phase_select", "1")
        .field("temp_count", 8)
        .field("exe_addr", 20)
        .field("src1_bank", 2)
        .field("src2_bank", 2)
        .field("src1_n", 7)
        .field("src2_n", 7)
}

pub fn spec() -> LayoutBuilder {
    FormatDefinition::layout("spec")
        .fixed("op1", "11111")
        .field("pred", 3)
        .field("skipinv", 1)
        .field("nosched", 1)
        .field("category", 3)
        .fixed_at("phase_select", 49, "0")
        .discriminant(
            "category",
            [
                (
                    0,
                    LayoutBuilder::new("flow")
                        .field_at("flow_op", 45, 4)
                        .signed_at("branch_offset", 0, 20),
                ),
                (
                    1,
                    LayoutBuilder::new("moe")
                        .field_at("moe_op", 46, 3)
                        .field_at("moe_data", 0, 24),
                ),
                (
                    2,
                    LayoutBuilder::new("sync")
                        .field_at("sync_op", 46, 3)
                        .field_at("sync_target", 0, 8),
                ),
                (
                    3,
                    LayoutBuilder::new("misc").field_at("special", 50, 1).discriminant(
                        "special",
                        [
                            (0, LayoutBuilder::new("kill").field_at("kill_mask", 0, 4)),
                            (1, LayoutBuilder::new("halt").field_at("halt_code", 0, 8)),
                        ],
                    ),
                ),
            ],
        )
}

/// the built-in formats, in match order.
pub fn definitions() -> Result<Vec<FormatDefinition>, ConstructionError> {
    [vmov(), vmadsi(), vmad4(), phas(), spec()]
        .into_iter()
        .map(LayoutBuilder::build)
        .collect()
}

pub fn registry() -> Result<FormatRegistry, ConstructionError> {
    FormatRegistry::build(definitions()?)
}

macro_rules! format_view {
    ($(#[$meta:meta])* $name:ident = $format:literal { $($field:ident: $ty:ty),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq)]
        pub struct $name {
            $(pub $field: $ty),*
        }

        impl FormatView for $name {
            const FORMAT: &'static str = $format;

            fn from_instruction(inst: &Instruction) -> Option<Self> {
                if inst.format() != $format {
                    return None;
                }
                Some($name {
                    $($field: inst.get(stringify!($field))?),*
                })
            }
        }
    }
}

format_view! {
    /// vector move.
    Vmov = "vmov" {
        pred: u8,
        skipinv: u8,
        syncstart: u8,
        move_type: u8,
        repeat_count: u8,
        nosched: u8,
        move_data_type: u8,
        src0_swiz: u8,
        dest_mask: u8,
        dest_n: u8,
        src0_n: u8,
        src1_n: u8,
        src2_n: u8,
    }
}

format_view! {
    /// single-issue vector multiply-add.
    Vmadsi = "vmadsi" {
        pred: u8,
        skipinv: u8,
        end: u8,
        increment_mode: u8,
        repeat_count: u8,
        nosched: u8,
        write_mask: u8,
        dest_n: u8,
        gpi0_n: u8,
        gpi1_n: u8,
        src1_n: u8,
        src2_n: u8,
    }
}

format_view! {
    /// four-component vector multiply-add.
    Vmad4 = "vmad4" {
        pred: u8,
        skipinv: u8,
        syncstart: u8,
        nosched: u8,
        dest_mask: u8,
        src1_mod: u8,
        src2_mod: u8,
        dest_n: u8,
        src0_n: u8,
        src1_n: u8,
        src2_n: u8,
    }
}

format_view! {
    Phas = "phas" {
        end: u8,
        imm: u8,
        mode: u8,
        wait_cond: u8,
        temp_count: u8,
        exe_addr: u32,
        src1_n: u8,
        src2_n: u8,
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SpecOp {
    Flow { flow_op: u8, branch_offset: i32 },
    Moe { moe_op: u8, moe_data: u32 },
    Sync { sync_op: u8, sync_target: u8 },
    Kill { kill_mask: u8 },
    Halt { halt_code: u8 },
}

/// special instructions. `category` and `special` are the discriminants the decoder resolved;
/// `special` only exists for category 3.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Spec {
    pub pred: u8,
    pub skipinv: u8,
    pub nosched: u8,
    pub category: u8,
    pub special: Option<u8>,
    pub op: SpecOp,
}

impl FormatView for Spec {
    const FORMAT: &'static str = "spec";

    fn from_instruction(inst: &Instruction) -> Option<Self> {
        if inst.format() != Self::FORMAT {
            return None;
        }
        let op = match inst.key() {
            "spec.flow" => SpecOp::Flow {
                flow_op: inst.get("flow_op")?,
                branch_offset: inst.get("branch_offset")?,
            },
            "spec.moe" => SpecOp::Moe {
                moe_op: inst.get("moe_op")?,
                moe_data: inst.get("moe_data")?,
            },
            "spec.sync" => SpecOp::Sync {
                sync_op: inst.get("sync_op")?,
                sync_target: inst.get("sync_target")?,
            },
            "spec.misc.kill" => SpecOp::Kill { kill_mask: inst.get("kill_mask")? },
            "spec.misc.halt" => SpecOp::Halt { halt_code: inst.get("halt_code")? },
            _ => return None,
        };
        Some(Spec {
            pred: inst.get("pred")?,
            skipinv: inst.get("skipinv")?,
            nosched: inst.get("nosched")?,
            category: inst.get("category")?,
            special: inst.get("special"),
            op,
        })
    }
}

/// a USSE instruction as one of its typed views.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UsseInstruction {
    Vmov(Vmov),
    Vmadsi(Vmadsi),
    Vmad4(Vmad4),
    Phas(Phas),
    Spec(Spec),
}

impl TryFrom<&Instruction> for UsseInstruction {
    type Error = DispatchError;

    fn try_from(inst: &Instruction) -> Result<Self, Self::Error> {
        let view = match inst.format() {
            "vmov" => Vmov::from_instruction(inst).map(UsseInstruction::Vmov),
            "vmadsi" => Vmadsi::from_instruction(inst).map(UsseInstruction::Vmadsi),
            "vmad4" => Vmad4::from_instruction(inst).map(UsseInstruction::Vmad4),
            "phas" => Phas::from_instruction(inst).map(UsseInstruction::Phas),
            "spec" => Spec::from_instruction(inst).map(UsseInstruction::Spec),
            _ => None,
        };
        view.ok_or_else(|| DispatchError::ViewMismatch {
            key: inst.key().into(),
            view: "UsseInstruction",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldValue;

    #[test]
    fn layouts_fill_the_word() {
        for def in definitions().expect("built-in table is valid") {
            let covered = def.fields().iter().fold(0u64, |acc, f| acc | f.descriptor.mask());
            let unused = match &**def.name() {
                "vmad4" => 0x3f,
                "phas" => 0b111,
                // the rest belongs to spec's variants
                "spec" => ((1u64 << 51) - 1) & !(1 << 49),
                _ => 0,
            };
            assert_eq!(covered | unused, u64::MAX, "{} leaves holes", def.name());
            assert_eq!(covered & unused, 0, "{} overlaps its gap", def.name());
        }
    }

    #[test]
    fn built_in_registry() {
        let registry = registry().expect("built-in table is valid");
        assert_eq!(
            registry.format_names().collect::<Vec<_>>(),
            vec!["vmov", "vmadsi", "vmad4", "phas", "spec"]
        );
        let mut keys = registry.variant_keys();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec![
                "phas", "spec", "spec.flow", "spec.misc", "spec.misc.halt", "spec.misc.kill",
                "spec.moe", "spec.sync", "vmad4", "vmadsi", "vmov",
            ]
        );
    }

    #[test]
    fn spec_branch_offsets_are_signed() {
        let registry = registry().expect("valid");
        let word = (0b11111u64 << 59) | 0xf_fffc;
        let inst = registry.decode(word).expect("decodes");
        assert_eq!(inst.key(), "spec.flow");
        assert_eq!(inst.field("branch_offset"), Some(FieldValue::Signed(-4)));
        let spec = Spec::from_instruction(&inst).expect("spec view");
        assert_eq!(spec.category, 0);
        assert_eq!(spec.special, None);
        assert_eq!(spec.op, SpecOp::Flow { flow_op: 0, branch_offset: -4 });
    }

    #[test]
    fn phas_and_spec_split_on_phase_select() {
        let registry = registry().expect("valid");
        let phas = registry.decode((0b11111u64 << 59) | (1 << 49) | (0x12345 << 21)).expect("decodes");
        assert_eq!(phas.key(), "phas");
        match UsseInstruction::try_from(&phas) {
            Ok(UsseInstruction::Phas(p)) => assert_eq!(p.exe_addr, 0x12345),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn views_reject_other_formats() {
        let registry = registry().expect("valid");
        let vmov = registry.decode(0b00111u64 << 59).expect("decodes");
        assert!(Vmov::from_instruction(&vmov).is_some());
        assert!(Vmad4::from_instruction(&vmov).is_none());
        assert!(Spec::from_instruction(&vmov).is_none());
        assert!(UsseInstruction::try_from(&Instruction::default()).is_err());
    }
}
