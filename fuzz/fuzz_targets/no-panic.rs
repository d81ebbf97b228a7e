#![no_main]
use libfuzzer_sys::fuzz_target;

use std::convert::TryFrom;

use yaxpeax_arch::{DecodeError, Decoder};

use std::fmt::Write;

fuzz_target!(|data: &[u8]| {

    let decoder = yaxpeax_usse::InstDecoder::default();
    let handlers = yaxpeax_usse::HandlerTable::builder()
        .on("spec", |inst| inst.fields().count())
        .build();

    let mut usse_inst = yaxpeax_usse::Instruction::default();

    let mut words = yaxpeax_arch::U8Reader::new(data);
    loop {
        // test decoding, may be ok or not, but should not panic
        match decoder.decode_into(&mut usse_inst, &mut words) {
            Ok(()) => {
                write!(&mut String::new(), "{}", usse_inst).expect("formatting does not panic either");
                let _ = handlers.dispatch(&usse_inst);
                let _ = yaxpeax_usse::usse::UsseInstruction::try_from(&usse_inst);
            }
            Err(e) if e.data_exhausted() => break,
            Err(_) => {}
        }
    }
});
